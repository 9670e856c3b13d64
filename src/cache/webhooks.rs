use redis::AsyncCommands;
use tracing::warn;

use crate::cache::CacheService;

const EVENT_TTL_SECONDS: u64 = 86_400;

fn event_key(event_id: &str) -> String {
    format!("webhook:event:{}", event_id)
}

impl CacheService {
    /// Атомарно помечает событие вебхука как принятое (SET NX EX).
    /// `false` - событие уже обрабатывалось. Если Redis недоступен, событие
    /// обрабатывается: переходы статусов брони и так идемпотентны.
    pub async fn claim_webhook_event(&self, event_id: &str) -> bool {
        let mut conn = self.redis.conn.clone();
        let result: Result<Option<String>, _> = redis::cmd("SET")
            .arg(event_key(event_id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(EVENT_TTL_SECONDS)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!("Webhook replay guard unavailable: {:?}", e);
                true
            }
        }
    }

    /// Снимает отметку, чтобы процессор мог доставить событие повторно.
    pub async fn release_webhook_event(&self, event_id: &str) {
        let mut conn = self.redis.conn.clone();
        let result: Result<(), _> = conn.del(event_key(event_id)).await;
        if let Err(e) = result {
            warn!("Failed to release webhook event {}: {:?}", event_id, e);
        }
    }
}

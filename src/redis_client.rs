use redis::{aio::ConnectionManager, Client};
use tracing::info;

use crate::config::RedisConfig;

/// Соединение с Redis. `ConnectionManager` сам переподключается после обрыва,
/// а кеш на время обрыва уходит в БД.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: ConnectionManager,
}

impl RedisClient {
    pub async fn connect(config: &RedisConfig) -> redis::RedisResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = client.get_connection_manager().await?;
        info!("Redis connected");
        Ok(RedisClient { conn })
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

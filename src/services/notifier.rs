use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewEnquiry,
    NewBooking,
    BookingConfirmed,
}

/// Сообщение, которое уходит во все открытые админские WebSocket-соединения.
#[derive(Debug, Clone, Serialize)]
pub struct AdminNotification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub data: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

/// Хаб админских уведомлений поверх `tokio::sync::broadcast`.
///
/// Закрытые подписчики выпадают сами, когда их `Receiver` дропается;
/// отставшие получают `Lagged` и должны переподключиться.
#[derive(Clone)]
pub struct AdminNotifier {
    tx: broadcast::Sender<String>,
}

impl Default for AdminNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl AdminNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Рассылает уведомление. Возвращает число подписчиков, которым оно ушло.
    pub fn publish<T: Serialize>(&self, kind: NotificationKind, data: &T) -> usize {
        let message = AdminNotification {
            kind,
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
            sent_at: Utc::now(),
        };
        let Ok(payload) = serde_json::to_string(&message) else {
            return 0;
        };

        match self.tx.send(payload) {
            Ok(receivers) => {
                debug!("Admin notification {:?} sent to {} connection(s)", kind, receivers);
                receivers
            }
            // Нет ни одного подключённого админа.
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn connected(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_live_subscriber_receives_in_order() {
        let notifier = AdminNotifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        assert_eq!(notifier.publish(NotificationKind::NewEnquiry, &serde_json::json!({"id": 1})), 2);
        assert_eq!(notifier.publish(NotificationKind::NewBooking, &serde_json::json!({"id": 2})), 2);

        for rx in [&mut first, &mut second] {
            let a: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            let b: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(a["type"], "new_enquiry");
            assert_eq!(a["data"]["id"], 1);
            assert_eq!(b["type"], "new_booking");
            assert!(b["sent_at"].is_string());
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let notifier = AdminNotifier::new();
        let keep = notifier.subscribe();
        let gone = notifier.subscribe();
        assert_eq!(notifier.connected(), 2);

        drop(gone);
        assert_eq!(notifier.connected(), 1);
        assert_eq!(notifier.publish(NotificationKind::NewBooking, &serde_json::json!({})), 1);

        drop(keep);
        assert_eq!(notifier.publish(NotificationKind::NewBooking, &serde_json::json!({})), 0);
    }
}

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::models::{Booking, BookingStatus};
use crate::services::checkout::apply_outcome;
use crate::services::payment::{IntentStatus, PaymentError};
use crate::AppState;

/// Фоновая сверка броней, застрявших в `pending` (вебхук так и не пришёл).
pub struct Reconciler {
    state: Arc<AppState>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
    pub checked: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub errors: usize,
    pub skipped: bool,
}

/// Что делать с intent'ом зависшей брони.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleAction {
    Apply(BookingStatus),
    /// Оплата не завершена, а ожидание истекло: отменить intent у процессора.
    Cancel,
    /// Процессор ещё обрабатывает платёж, ждём следующего раунда.
    Wait,
}

pub fn stale_action(status: IntentStatus) -> StaleAction {
    if let Some(outcome) = status.booking_outcome() {
        return StaleAction::Apply(outcome);
    }
    match status {
        IntentStatus::Pending | IntentStatus::RequiresCapture => StaleAction::Wait,
        _ => StaleAction::Cancel,
    }
}

impl Reconciler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Бесконечный цикл сверки с заданным интервалом.
    pub async fn run(self, interval: Duration) {
        info!("🔁 Payment reconciler started, interval {:?}", interval);
        loop {
            tokio::time::sleep(interval).await;
            let stats = self.run_once().await;
            if stats.checked > 0 || stats.skipped {
                info!("🔁 Reconcile round finished: {:?}", stats);
            }
        }
    }

    pub async fn run_once(&self) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let payments = &self.state.payments;

        if !payments.circuit_breaker().is_call_permitted() {
            warn!("🔁 Payment provider circuit is open, skipping reconcile round");
            stats.skipped = true;
            return stats;
        }

        let timeout = self.state.config.payment.pending_timeout_minutes;
        let stale = match Booking::stale_pending(&self.state.db.pool, timeout).await {
            Ok(stale) => stale,
            Err(e) => {
                error!("🔁 Failed to load stale bookings: {:?}", e);
                stats.errors += 1;
                return stats;
            }
        };

        if stale.is_empty() {
            return stats;
        }
        info!("🔁 Found {} booking(s) pending longer than {} min", stale.len(), timeout);

        for booking in stale {
            stats.checked += 1;
            match self.reconcile_booking(&booking).await {
                Ok(Some(BookingStatus::Confirmed)) => stats.confirmed += 1,
                Ok(Some(BookingStatus::Failed)) => stats.failed += 1,
                Ok(_) => stats.still_pending += 1,
                Err(PaymentError::CircuitOpen) => {
                    warn!("🔁 Circuit opened mid-round, stopping");
                    stats.errors += 1;
                    break;
                }
                Err(e) => {
                    error!("🔁 Failed to reconcile booking {}: {}", booking.reference, e);
                    stats.errors += 1;
                }
            }
        }

        stats
    }

    /// Возвращает статус, в который перешла бронь, или `None`, если она осталась как была.
    async fn reconcile_booking(&self, booking: &Booking) -> Result<Option<BookingStatus>, PaymentError> {
        let Some(intent_id) = booking.payment_intent_id.as_deref() else {
            return Ok(None);
        };
        let payments = &self.state.payments;

        let intent = payments.retrieve_payment_intent(intent_id).await?;
        let target = match stale_action(intent.status) {
            StaleAction::Apply(to) => to,
            StaleAction::Wait => return Ok(None),
            StaleAction::Cancel => {
                info!("🔁 Cancelling expired intent {} of booking {}", intent_id, booking.reference);
                let cancelled = payments.cancel_payment_intent(intent_id, "EXPIRED").await?;
                match stale_action(cancelled.status) {
                    StaleAction::Apply(to) => to,
                    _ => BookingStatus::Failed,
                }
            }
        };

        match apply_outcome(&self.state, booking, target).await {
            Ok(Some(updated)) => Ok(Some(updated.status)),
            Ok(None) => Ok(None),
            Err(e) => {
                error!("🔁 Failed to update booking {}: {:?}", booking.reference, e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_intents_map_to_actions() {
        assert_eq!(stale_action(IntentStatus::Succeeded), StaleAction::Apply(BookingStatus::Confirmed));
        assert_eq!(stale_action(IntentStatus::Cancelled), StaleAction::Apply(BookingStatus::Failed));
        assert_eq!(stale_action(IntentStatus::RequiresPaymentMethod), StaleAction::Cancel);
        assert_eq!(stale_action(IntentStatus::RequiresCustomerAction), StaleAction::Cancel);
        assert_eq!(stale_action(IntentStatus::Unknown), StaleAction::Cancel);
        assert_eq!(stale_action(IntentStatus::Pending), StaleAction::Wait);
        assert_eq!(stale_action(IntentStatus::RequiresCapture), StaleAction::Wait);
    }
}

//! Разбор результатов оплаты: вебхук процессора, подтверждение с фронта и
//! ручная смена статуса админом. Хранилище скрыто за `PaymentLedger`,
//! в проде это `AppState` (Postgres + Redis).

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::future::Future;
use tracing::{debug, info, warn};

use crate::error::{ApiResult, AppError};
use crate::models::{Booking, BookingStatus};
use crate::services::checkout::apply_outcome;
use crate::services::payment::{
    verify_webhook_signature, webhook_timestamp_is_fresh, IntentStatus, WebhookEvent,
};
use crate::AppState;

/// Операции над бронями и отметками вебхуков, нужные для разбора оплаты.
pub trait PaymentLedger: Send + Sync {
    /// `false` - событие уже принималось.
    fn claim_event(&self, event_id: &str) -> impl Future<Output = bool> + Send;

    fn release_event(&self, event_id: &str) -> impl Future<Output = ()> + Send;

    fn booking(&self, id: i64) -> impl Future<Output = Result<Option<Booking>, sqlx::Error>> + Send;

    fn booking_by_intent(
        &self,
        intent_id: &str,
    ) -> impl Future<Output = Result<Option<Booking>, sqlx::Error>> + Send;

    /// Переход статуса с побочными эффектами. `Ok(None)` - переход не применён.
    fn apply(
        &self,
        booking: &Booking,
        to: BookingStatus,
    ) -> impl Future<Output = Result<Option<Booking>, sqlx::Error>> + Send;
}

impl PaymentLedger for AppState {
    async fn claim_event(&self, event_id: &str) -> bool {
        self.cache.claim_webhook_event(event_id).await
    }

    async fn release_event(&self, event_id: &str) {
        self.cache.release_webhook_event(event_id).await
    }

    async fn booking(&self, id: i64) -> Result<Option<Booking>, sqlx::Error> {
        Booking::find(&self.db.pool, id).await
    }

    async fn booking_by_intent(&self, intent_id: &str) -> Result<Option<Booking>, sqlx::Error> {
        Booking::find_by_intent(&self.db.pool, intent_id).await
    }

    async fn apply(&self, booking: &Booking, to: BookingStatus) -> Result<Option<Booking>, sqlx::Error> {
        apply_outcome(self, booking, to).await
    }
}

/// Подписанный запрос вебхука как он пришёл по HTTP.
#[derive(Debug, Clone, Copy)]
pub struct SignedWebhook<'a> {
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub body: &'a [u8],
}

/// Проверяет подпись и свежесть, затем применяет событие к брони.
///
/// Ответ 200 означает "больше не присылать": неизвестный intent, событие
/// без итогового статуса и повтор уже принятого события тоже получают 200.
/// Ошибка БД снимает отметку события, чтобы процессор доставил его снова.
pub async fn process_webhook<L: PaymentLedger>(
    ledger: &L,
    secret: &str,
    request: SignedWebhook<'_>,
    now: DateTime<Utc>,
) -> ApiResult<Value> {
    let (Some(timestamp), Some(signature)) = (request.timestamp, request.signature) else {
        warn!("Webhook without signature headers rejected");
        return Err(AppError::BadRequest("Missing webhook signature".to_string()));
    };

    if !verify_webhook_signature(secret, timestamp, request.body, signature) {
        warn!("Webhook signature mismatch");
        return Err(AppError::BadRequest("Invalid webhook signature".to_string()));
    }

    if !webhook_timestamp_is_fresh(timestamp, now) {
        warn!("Webhook timestamp {} outside tolerance", timestamp);
        return Err(AppError::BadRequest("Stale webhook timestamp".to_string()));
    }

    let event: WebhookEvent = serde_json::from_slice(request.body)
        .map_err(|e| AppError::BadRequest(format!("Malformed webhook payload: {}", e)))?;

    info!("Webhook: event={}, name={}", event.id, event.name);

    let (Some(outcome), Some(intent_id)) = (event.booking_outcome(), event.intent_id()) else {
        if event.name.starts_with("payment_attempt.") {
            info!("Webhook {} for intent {:?}: attempt only, booking untouched", event.name, event.intent_id());
        } else {
            debug!("Webhook event {} ignored", event.name);
        }
        return Ok(json!({"received": true}));
    };

    if !ledger.claim_event(&event.id).await {
        info!("Webhook event {} already processed", event.id);
        return Ok(json!({"received": true, "duplicate": true}));
    }

    let booking = match ledger.booking_by_intent(intent_id).await {
        Ok(Some(booking)) => booking,
        Ok(None) => {
            warn!("Webhook for unknown payment intent {}", intent_id);
            return Ok(json!({"received": true}));
        }
        Err(e) => {
            ledger.release_event(&event.id).await;
            return Err(AppError::Database(e));
        }
    };

    match ledger.apply(&booking, outcome).await {
        Ok(Some(updated)) => info!("Webhook moved booking {} to {}", updated.reference, updated.status),
        Ok(None) => info!(
            "Webhook {} for booking {} ignored, booking is already {}",
            event.name, booking.reference, booking.status
        ),
        Err(e) => {
            ledger.release_event(&event.id).await;
            return Err(AppError::Database(e));
        }
    }

    Ok(json!({"received": true}))
}

/// Приводит бронь к статусу intent'а, полученному у процессора.
pub async fn settle_confirmation<L: PaymentLedger>(
    ledger: &L,
    booking: Booking,
    status: IntentStatus,
) -> ApiResult<Booking> {
    let Some(outcome) = status.booking_outcome() else {
        return Ok(booking);
    };

    match ledger.apply(&booking, outcome).await? {
        Some(updated) => Ok(updated),
        // Статус уже поменялся (вебхук успел раньше) - отдаём актуальный.
        None => Ok(ledger.booking(booking.id).await?.unwrap_or(booking)),
    }
}

/// Смена статуса админом. Возвращает `(было, стало)`; недопустимый переход - 409.
pub async fn admin_transition<L: PaymentLedger>(
    ledger: &L,
    id: i64,
    to: BookingStatus,
) -> ApiResult<(Booking, Booking)> {
    let booking = ledger
        .booking(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Booking {} not found", id)))?;

    if booking.status == to {
        return Ok((booking.clone(), booking));
    }
    if !booking.status.can_transition_to(to) {
        return Err(AppError::Conflict(format!(
            "Cannot move booking from {} to {}",
            booking.status, to
        )));
    }

    let updated = ledger
        .apply(&booking, to)
        .await?
        .ok_or_else(|| AppError::Conflict("Booking status changed concurrently".to_string()))?;
    Ok((booking, updated))
}

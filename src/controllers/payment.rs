use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::bookings::{announce_booking, bookable_package, BookingRequest};
use super::ValidJson;
use crate::error::{ApiResult, AppError};
use crate::middleware::MaybeUser;
use crate::models::{booking::generate_reference, Booking, BookingStatus};
use crate::services::payment::{IntentStatus, NewIntent};
use crate::services::settlement::{process_webhook, settle_confirmation, SignedWebhook};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments/create-payment-intent", post(create_payment_intent))
        .route("/payments/confirm-payment", post(confirm_payment))
        .route("/webhooks/airwallex", post(payment_webhook))
}

#[derive(Debug, Serialize)]
struct CreateIntentResponse {
    success: bool,
    client_secret: Option<String>,
    payment_intent_id: String,
    booking_id: i64,
    reference: String,
    amount: f64,
    currency: String,
}

/// POST /api/payments/create-payment-intent
async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    user: MaybeUser,
    ValidJson(req): ValidJson<BookingRequest>,
) -> ApiResult<impl IntoResponse> {
    let package = bookable_package(&state, req.package_id).await?;
    let currency = req.priced_currency(&package)?;
    let reference = generate_reference();
    let description = format!("{} x{}", package.name, req.travellers);

    let intent = state
        .payments
        .create_payment_intent(NewIntent {
            amount: req.total_amount,
            currency: &currency,
            booking_reference: &reference,
            package_id: package.id,
            description: &description,
        })
        .await
        .map_err(|e| {
            error!("Payment provider rejected intent for {}: {}", reference, e);
            AppError::from(e)
        })?;

    let new = req.into_new_booking(
        reference.clone(),
        user.0.as_ref().map(|u| u.user_id),
        currency.clone(),
        Some(intent.id.clone()),
    );

    let booking = match Booking::insert(&state.db.pool, &new).await {
        Ok(booking) => booking,
        Err(e) => {
            // Intent без брони никто не сверит - отменяем его сразу.
            error!("Failed to store booking {} for intent {}: {:?}", reference, intent.id, e);
            if let Err(cancel_err) = state
                .payments
                .cancel_payment_intent(&intent.id, "DUPLICATE")
                .await
            {
                warn!("Orphan intent {} could not be cancelled: {}", intent.id, cancel_err);
            }
            return Err(AppError::Database(e));
        }
    };

    info!(
        "Payment intent {} created for booking {} ({} {:.2})",
        intent.id, booking.reference, booking.currency, booking.total_amount
    );
    announce_booking(&state, &booking, &package);

    Ok((
        StatusCode::OK,
        Json(CreateIntentResponse {
            success: true,
            client_secret: intent.client_secret,
            payment_intent_id: intent.id,
            booking_id: booking.id,
            reference: booking.reference,
            amount: booking.total_amount,
            currency: booking.currency,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct ConfirmPaymentRequest {
    payment_intent_id: String,
}

#[derive(Debug, Serialize)]
struct ConfirmPaymentResponse {
    success: bool,
    booking_id: i64,
    reference: String,
    status: BookingStatus,
    processor_status: IntentStatus,
}

/// POST /api/payments/confirm-payment
///
/// Клиент вызывает после формы оплаты. Источник истины - статус intent'а у процессора.
async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let intent_id = req.payment_intent_id.trim();
    if intent_id.is_empty() {
        return Err(AppError::Validation("payment_intent_id is required".to_string()));
    }

    let booking = Booking::find_by_intent(&state.db.pool, intent_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No booking for payment intent {}", intent_id)))?;

    let intent = state.payments.retrieve_payment_intent(intent_id).await?;

    let booking = settle_confirmation(state.as_ref(), booking, intent.status).await?;

    Ok(Json(ConfirmPaymentResponse {
        success: true,
        booking_id: booking.id,
        reference: booking.reference,
        status: booking.status,
        processor_status: intent.status,
    }))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /api/webhooks/airwallex
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request = SignedWebhook {
        timestamp: header_str(&headers, "x-timestamp"),
        signature: header_str(&headers, "x-signature"),
        body: &body,
    };
    let reply = process_webhook(
        state.as_ref(),
        &state.config.payment.webhook_secret,
        request,
        Utc::now(),
    )
    .await?;
    Ok(Json(reply))
}

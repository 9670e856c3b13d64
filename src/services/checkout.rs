//! Применение результата оплаты к брони и всё, что за этим следует:
//! письма клиенту и в офис, уведомление в админку.

use serde_json::json;
use tracing::{info, warn};

use crate::models::{Booking, BookingStatus, Package};
use crate::services::mail::{Attachment, OutgoingEmail};
use crate::services::notifier::NotificationKind;
use crate::services::templates;
use crate::AppState;

/// Переводит бронь в `to`. `Ok(None)` - переход не применён (бронь уже в
/// другом статусе, например поздний вебхук после отмены).
pub async fn apply_outcome(
    state: &AppState,
    booking: &Booking,
    to: BookingStatus,
) -> Result<Option<Booking>, sqlx::Error> {
    if booking.status == to {
        return Ok(Some(booking.clone()));
    }

    let Some(updated) = Booking::transition(&state.db.pool, booking.id, to).await? else {
        warn!(
            "Booking {} not moved {} -> {}: status changed concurrently or transition not allowed",
            booking.reference, booking.status, to
        );
        return Ok(None);
    };

    info!("Booking {} is now {}", updated.reference, updated.status);
    if updated.status == BookingStatus::Confirmed {
        on_confirmed(state, &updated).await;
    }
    Ok(Some(updated))
}

async fn on_confirmed(state: &AppState, booking: &Booking) {
    state.notifier.publish(
        NotificationKind::BookingConfirmed,
        &json!({
            "booking_id": booking.id,
            "reference": booking.reference,
            "customer_name": booking.customer_name,
            "total_amount": booking.total_amount,
            "currency": booking.currency,
        }),
    );

    let package = match Package::find(&state.db.pool, booking.package_id).await {
        Ok(Some(package)) => package,
        Ok(None) => {
            warn!("Package {} for booking {} is gone, skipping emails", booking.package_id, booking.reference);
            return;
        }
        Err(e) => {
            warn!("Failed to load package for booking {}: {:?}", booking.reference, e);
            return;
        }
    };

    let document = templates::confirmation_document(booking, &package);
    let customer = OutgoingEmail::new(
        booking.customer_email.clone(),
        "booking_confirmation",
        templates::booking_confirmation(booking, &package.name, &state.config.app.frontend_url),
    )
    .with_attachment(Attachment {
        name: format!("{}.html", booking.reference),
        content_type: "text/html".to_string(),
        bytes: document.into_bytes(),
    });
    state.mailer.dispatch(state.db.pool.clone(), customer);

    state.mailer.dispatch(
        state.db.pool.clone(),
        OutgoingEmail::new(
            state.config.notifications.corporate_email.clone(),
            "booking_notice",
            templates::booking_notice(booking, &package.name),
        ),
    );
}

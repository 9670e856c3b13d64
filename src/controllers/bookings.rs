use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::{page_window, ValidJson};
use crate::error::{ApiResult, AppError};
use crate::middleware::{AdminUser, AuthUser, MaybeUser};
use crate::models::{booking::generate_reference, Booking, BookingStatus, NewBooking, Package};
use crate::services::{notifier::NotificationKind, settlement::admin_transition, templates};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/status", patch(update_booking_status))
        .route("/bookings/{id}/payment-status", get(get_payment_status))
        .route("/bookings/{id}/confirmation", get(download_confirmation))
        .route("/users/me/bookings", get(my_bookings))
}

/* ---------- request ---------- */

/// Данные брони, общие для прямого бронирования и создания payment intent.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BookingRequest {
    #[validate(range(min = 1, message = "is required"))]
    pub package_id: i64,
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub customer_name: String,
    #[validate(email(message = "must be a valid email"))]
    pub customer_email: String,
    #[validate(length(max = 50, message = "is too long"))]
    pub customer_phone: Option<String>,
    pub travel_date: Option<NaiveDate>,
    #[validate(range(min = 1, max = 50, message = "must be between 1 and 50"))]
    pub travellers: i32,
    #[validate(range(exclusive_min = 0.0, message = "must be greater than 0"))]
    pub total_amount: f64,
    #[validate(length(equal = 3, message = "must be a 3-letter code"))]
    pub currency: Option<String>,
    #[serde(default)]
    pub passenger_details: serde_json::Value,
    #[serde(default)]
    pub contact_details: serde_json::Value,
    #[validate(length(max = 2000, message = "is too long"))]
    pub special_requests: Option<String>,
}

/// Округление при сравнении суммы с ценой (полцента).
const PRICE_TOLERANCE: f64 = 0.005;

impl BookingRequest {
    pub fn currency_or(&self, default: &str) -> String {
        self.currency.as_deref().unwrap_or(default).to_ascii_uppercase()
    }

    /// Сверяет сумму и валюту с пакетом и возвращает валюту брони.
    /// Сумма не может быть меньше `effective_price * travellers`.
    pub fn priced_currency(&self, package: &Package) -> ApiResult<String> {
        let currency = self.currency_or(&package.currency);
        if !currency.eq_ignore_ascii_case(&package.currency) {
            return Err(AppError::BadRequest(format!(
                "Package {} is priced in {}",
                package.id, package.currency
            )));
        }

        let expected = package.effective_price() * f64::from(self.travellers);
        if self.total_amount + PRICE_TOLERANCE < expected {
            return Err(AppError::BadRequest(format!(
                "total_amount must be at least {:.2} {} for {} traveller(s)",
                expected, package.currency, self.travellers
            )));
        }
        Ok(currency)
    }

    pub fn into_new_booking(
        self,
        reference: String,
        user_id: Option<i64>,
        currency: String,
        payment_intent_id: Option<String>,
    ) -> NewBooking {
        NewBooking {
            reference,
            package_id: self.package_id,
            user_id,
            customer_name: self.customer_name.trim().to_string(),
            customer_email: self.customer_email.trim().to_string(),
            customer_phone: self.customer_phone,
            travel_date: self.travel_date,
            travellers: self.travellers,
            total_amount: self.total_amount,
            currency,
            payment_intent_id,
            passenger_details: or_default(self.passenger_details, json!([])),
            contact_details: or_default(self.contact_details, json!({})),
            special_requests: self.special_requests.filter(|s| !s.trim().is_empty()),
        }
    }
}

fn or_default(value: serde_json::Value, default: serde_json::Value) -> serde_json::Value {
    if value.is_null() {
        default
    } else {
        value
    }
}

/// Пакет должен существовать и быть опубликован.
pub async fn bookable_package(state: &AppState, package_id: i64) -> ApiResult<Package> {
    Package::find(&state.db.pool, package_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::NotFound(format!("Package {} not found", package_id)))
}

pub fn announce_booking(state: &AppState, booking: &Booking, package: &Package) {
    state.notifier.publish(
        NotificationKind::NewBooking,
        &json!({
            "booking_id": booking.id,
            "reference": booking.reference,
            "package": package.name,
            "customer_name": booking.customer_name,
            "total_amount": booking.total_amount,
            "currency": booking.currency,
            "status": booking.status,
        }),
    );
}

/// Доступ к брони: админ, владелец или тот, кто знает её reference.
/// При выключенной авторизации доступ открыт.
fn authorize_access(
    state: &AppState,
    booking: &Booking,
    user: &MaybeUser,
    reference: Option<&str>,
) -> ApiResult<()> {
    if !state.config.features.enable_auth {
        return Ok(());
    }
    if reference.is_some_and(|r| r == booking.reference) {
        return Ok(());
    }
    match &user.0 {
        Some(u) if u.is_admin() || booking.belongs_to(u.user_id) => Ok(()),
        Some(_) => Err(AppError::Forbidden("Booking belongs to another account".to_string())),
        None => Err(AppError::Unauthorized("Login or booking reference required".to_string())),
    }
}

async fn load_booking(state: &AppState, id: i64) -> ApiResult<Booking> {
    Booking::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Booking {} not found", id)))
}

#[derive(Debug, Deserialize)]
struct ReferenceQuery {
    reference: Option<String>,
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings - бронь без онлайн-оплаты (оплата позже через менеджера)
async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: MaybeUser,
    ValidJson(req): ValidJson<BookingRequest>,
) -> ApiResult<impl IntoResponse> {
    let package = bookable_package(&state, req.package_id).await?;
    let currency = req.priced_currency(&package)?;

    let new = req.into_new_booking(
        generate_reference(),
        user.0.as_ref().map(|u| u.user_id),
        currency,
        None,
    );
    let booking = Booking::insert(&state.db.pool, &new).await?;

    tracing::info!("Booking {} created for package {}", booking.reference, package.id);
    announce_booking(&state, &booking, &package);

    Ok((StatusCode::CREATED, Json(booking)))
}

#[derive(Debug, Deserialize)]
struct BookingsQuery {
    status: Option<String>,
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

// GET /api/bookings (admin)
async fn list_bookings(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(params): Query<BookingsQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<BookingStatus>)
        .transpose()
        .map_err(AppError::Validation)?;
    let (limit, offset) = page_window(params.page, params.page_size);

    let bookings = Booking::list(&state.db.pool, status, limit, offset).await?;
    Ok(Json(bookings))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    user: MaybeUser,
    Query(query): Query<ReferenceQuery>,
) -> ApiResult<impl IntoResponse> {
    let booking = load_booking(&state, id).await?;
    authorize_access(&state, &booking, &user, query.reference.as_deref())?;
    Ok(Json(booking))
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    status: BookingStatus,
}

// PATCH /api/bookings/{id}/status (admin)
async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<StatusUpdate>,
) -> ApiResult<impl IntoResponse> {
    let (booking, updated) = admin_transition(state.as_ref(), id, req.status).await?;

    // Неоплаченный intent отменённой брони больше не нужен.
    if updated.status == BookingStatus::Cancelled && booking.status == BookingStatus::Pending {
        if let Some(intent_id) = booking.payment_intent_id.as_deref() {
            if let Err(e) = state.payments.cancel_payment_intent(intent_id, "REQUESTED_BY_CUSTOMER").await {
                tracing::warn!("Failed to cancel intent {} of booking {}: {}", intent_id, booking.reference, e);
            }
        }
    }

    tracing::info!("Booking {} moved {} -> {} by admin", updated.reference, booking.status, updated.status);
    Ok(Json(updated))
}

#[derive(Debug, Serialize)]
struct PaymentStatusResponse {
    success: bool,
    booking_id: i64,
    reference: String,
    status: BookingStatus,
    payment_intent_id: Option<String>,
}

// GET /api/bookings/{id}/payment-status
async fn get_payment_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    user: MaybeUser,
    Query(query): Query<ReferenceQuery>,
) -> ApiResult<impl IntoResponse> {
    let booking = load_booking(&state, id).await?;
    authorize_access(&state, &booking, &user, query.reference.as_deref())?;

    Ok(Json(PaymentStatusResponse {
        success: true,
        booking_id: booking.id,
        reference: booking.reference,
        status: booking.status,
        payment_intent_id: booking.payment_intent_id,
    }))
}

// GET /api/bookings/{id}/confirmation?reference=BK-...
async fn download_confirmation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    user: MaybeUser,
    Query(query): Query<ReferenceQuery>,
) -> ApiResult<impl IntoResponse> {
    let booking = load_booking(&state, id).await?;
    authorize_access(&state, &booking, &user, query.reference.as_deref())?;

    if booking.status != BookingStatus::Confirmed {
        return Err(AppError::Conflict(format!(
            "Booking {} is {}, confirmation is available once payment is confirmed",
            booking.reference, booking.status
        )));
    }

    let package = Package::find(&state.db.pool, booking.package_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Package {} not found", booking.package_id)))?;
    let document = templates::confirmation_document(&booking, &package);

    Ok((
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.html\"", booking.reference),
            ),
        ],
        document,
    ))
}

// GET /api/users/me/bookings
async fn my_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    let bookings = Booking::list_for_user(&state.db.pool, user.user_id).await?;
    Ok(Json(bookings))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> serde_json::Value {
        json!({
            "package_id": 3,
            "customer_name": "Ann Lee",
            "customer_email": "ann@example.com",
            "travellers": 2,
            "total_amount": 2400.0,
            "currency": "usd"
        })
    }

    #[test]
    fn valid_request_builds_pending_booking() {
        let req: BookingRequest = serde_json::from_value(request()).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.currency_or("EUR"), "USD");

        let new = req.into_new_booking("BK-00000001".into(), Some(9), "USD".into(), Some("int_1".into()));
        assert_eq!(new.passenger_details, json!([]));
        assert_eq!(new.contact_details, json!({}));
        assert_eq!(new.user_id, Some(9));
        assert_eq!(new.payment_intent_id.as_deref(), Some("int_1"));
    }

    #[test]
    fn invalid_request_reports_each_field() {
        let mut body = request();
        body["customer_email"] = json!("not-an-email");
        body["travellers"] = json!(0);
        body["total_amount"] = json!(0.0);
        body["currency"] = json!("DOLLARS");

        let req: BookingRequest = serde_json::from_value(body).unwrap();
        let err: AppError = req.validate().unwrap_err().into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_string(),
            "currency must be a 3-letter code; customer_email must be a valid email; \
             total_amount must be greater than 0; travellers must be between 1 and 50"
        );
    }

    fn package(price: f64, sale_price: Option<f64>) -> Package {
        let now = chrono::Utc::now();
        Package {
            id: 3,
            name: "Kenya Safari".into(),
            slug: "kenya-safari".into(),
            category: "safari".into(),
            destination_id: None,
            content_html: String::new(),
            price,
            sale_price,
            currency: "USD".into(),
            duration_days: Some(7),
            inclusions: None,
            exclusions: None,
            hero_image: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn total_below_package_price_is_rejected() {
        let mut body = request();
        body["total_amount"] = json!(1.0);
        let req: BookingRequest = serde_json::from_value(body).unwrap();

        let err = req.priced_currency(&package(1200.0, None)).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_string(),
            "total_amount must be at least 2400.00 USD for 2 traveller(s)"
        );
    }

    #[test]
    fn sale_price_sets_the_floor() {
        let mut body = request();
        body["total_amount"] = json!(1998.0);
        let req: BookingRequest = serde_json::from_value(body).unwrap();

        assert_eq!(req.priced_currency(&package(1200.0, Some(999.0))).unwrap(), "USD");
        assert!(req.priced_currency(&package(1200.0, None)).is_err());
    }

    #[test]
    fn currency_must_match_package() {
        let mut body = request();
        body["currency"] = json!("EUR");
        let req: BookingRequest = serde_json::from_value(body).unwrap();
        let err = req.priced_currency(&package(1200.0, None)).unwrap_err();
        assert_eq!(err.to_string(), "Package 3 is priced in USD");

        let mut body = request();
        body.as_object_mut().unwrap().remove("currency");
        let req: BookingRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.priced_currency(&package(1200.0, None)).unwrap(), "USD");
    }

    #[test]
    fn missing_required_field_fails_deserialization() {
        let mut body = request();
        body.as_object_mut().unwrap().remove("customer_name");
        assert!(serde_json::from_value::<BookingRequest>(body).is_err());
    }
}

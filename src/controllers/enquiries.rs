use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::{page_window, ValidJson};
use crate::error::{ApiResult, AppError};
use crate::middleware::AdminUser;
use crate::models::{Enquiry, EnquiryStatus, NewEnquiry, Package};
use crate::services::mail::OutgoingEmail;
use crate::services::notifier::NotificationKind;
use crate::services::templates;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/enquiries", get(list_enquiries).post(create_enquiry))
        .route("/enquiries/{id}", get(get_enquiry))
        .route("/enquiries/{id}/status", patch(update_enquiry_status))
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnquiryRequest {
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(length(max = 50, message = "is too long"))]
    pub phone: Option<String>,
    pub package_id: Option<i64>,
    #[validate(length(max = 200, message = "is too long"))]
    pub destination: Option<String>,
    pub travel_date: Option<NaiveDate>,
    #[validate(range(min = 1, max = 50, message = "must be between 1 and 50"))]
    pub travellers: Option<i32>,
    #[validate(length(min = 1, max = 5000, message = "is required"))]
    pub message: String,
}

impl From<EnquiryRequest> for NewEnquiry {
    fn from(req: EnquiryRequest) -> Self {
        NewEnquiry {
            name: req.name.trim().to_string(),
            email: req.email.trim().to_string(),
            phone: req.phone.filter(|p| !p.trim().is_empty()),
            package_id: req.package_id,
            destination: req.destination.filter(|d| !d.trim().is_empty()),
            travel_date: req.travel_date,
            travellers: req.travellers,
            message: req.message,
        }
    }
}

// POST /api/enquiries
async fn create_enquiry(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<EnquiryRequest>,
) -> ApiResult<impl IntoResponse> {
    let package = match req.package_id {
        Some(id) => Some(
            Package::find(&state.db.pool, id)
                .await?
                .ok_or_else(|| AppError::Validation(format!("package_id {} does not exist", id)))?,
        ),
        None => None,
    };

    let enquiry = Enquiry::insert(&state.db.pool, &req.into()).await?;
    tracing::info!("Enquiry {} received from {}", enquiry.id, enquiry.email);

    let package_name = package.as_ref().map(|p| p.name.as_str());
    state.mailer.dispatch(
        state.db.pool.clone(),
        OutgoingEmail::new(
            state.config.notifications.admin_email.clone(),
            "enquiry_notice",
            templates::enquiry_notice(&enquiry, package_name),
        ),
    );
    state.mailer.dispatch(
        state.db.pool.clone(),
        OutgoingEmail::new(
            enquiry.email.clone(),
            "enquiry_acknowledgement",
            templates::enquiry_acknowledgement(&enquiry),
        ),
    );
    state.notifier.publish(NotificationKind::NewEnquiry, &enquiry);

    Ok((StatusCode::CREATED, Json(enquiry)))
}

#[derive(Debug, Deserialize)]
struct EnquiriesQuery {
    status: Option<EnquiryStatus>,
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

// GET /api/enquiries (admin)
async fn list_enquiries(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(params): Query<EnquiriesQuery>,
) -> ApiResult<impl IntoResponse> {
    let (limit, offset) = page_window(params.page, params.page_size);
    let enquiries = Enquiry::list(&state.db.pool, params.status, limit, offset).await?;
    Ok(Json(enquiries))
}

async fn get_enquiry(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let enquiry = Enquiry::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Enquiry {} not found", id)))?;
    Ok(Json(enquiry))
}

#[derive(Debug, Deserialize)]
struct EnquiryStatusUpdate {
    status: EnquiryStatus,
}

// PATCH /api/enquiries/{id}/status
async fn update_enquiry_status(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<EnquiryStatusUpdate>,
) -> ApiResult<impl IntoResponse> {
    let enquiry = Enquiry::set_status(&state.db.pool, id, req.status)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Enquiry {} not found", id)))?;
    Ok(Json(enquiry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_optional_fields_are_dropped() {
        let req: EnquiryRequest = serde_json::from_value(serde_json::json!({
            "name": "  Sam ",
            "email": "sam@example.com",
            "phone": " ",
            "destination": "",
            "message": "Looking for a family trip"
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let new: NewEnquiry = req.into();
        assert_eq!(new.name, "Sam");
        assert!(new.phone.is_none());
        assert!(new.destination.is_none());
    }

    #[test]
    fn empty_message_is_rejected() {
        let req: EnquiryRequest = serde_json::from_value(serde_json::json!({
            "name": "Sam",
            "email": "sam@example.com",
            "message": ""
        }))
        .unwrap();
        let err: AppError = req.validate().unwrap_err().into();
        assert_eq!(err.to_string(), "message is required");
    }

    #[test]
    fn status_filter_parses_lowercase() {
        let q: EnquiriesQuery = serde_urlencoded::from_str("status=contacted&page=2").unwrap();
        assert_eq!(q.status, Some(EnquiryStatus::Contacted));
    }
}

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::{page_window, ValidJson};
use crate::error::ApiResult;
use crate::middleware::AdminUser;
use crate::models::Subscription;
use crate::services::mail::OutgoingEmail;
use crate::services::templates;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/subscriptions", get(list_subscriptions).post(subscribe))
        .route("/subscriptions/unsubscribe", post(unsubscribe))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubscriptionRequest {
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
}

// POST /api/subscriptions
async fn subscribe(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<SubscriptionRequest>,
) -> ApiResult<impl IntoResponse> {
    let (subscription, newly_active) = Subscription::subscribe(&state.db.pool, req.email.trim()).await?;

    // Приветствие только при первой (или повторной после отписки) подписке
    if newly_active {
        tracing::info!("New subscriber {}", subscription.email);
        state.mailer.dispatch(
            state.db.pool.clone(),
            OutgoingEmail::new(
                subscription.email.clone(),
                "subscription_welcome",
                templates::subscription_welcome(&subscription.email, &state.config.app.frontend_url),
            ),
        );
    }

    let status = if newly_active { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(subscription)))
}

// POST /api/subscriptions/unsubscribe
async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<SubscriptionRequest>,
) -> ApiResult<impl IntoResponse> {
    let changed = Subscription::unsubscribe(&state.db.pool, req.email.trim()).await?;
    Ok(Json(json!({
        "success": true,
        "unsubscribed": changed,
    })))
}

#[derive(Debug, Deserialize)]
struct SubscriptionsQuery {
    #[serde(default)]
    active_only: bool,
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

// GET /api/subscriptions (admin)
async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(params): Query<SubscriptionsQuery>,
) -> ApiResult<impl IntoResponse> {
    let (limit, offset) = page_window(params.page, params.page_size);
    let subscriptions = Subscription::list(&state.db.pool, params.active_only, limit, offset).await?;
    Ok(Json(subscriptions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_only_defaults_to_false() {
        let q: SubscriptionsQuery = serde_urlencoded::from_str("page=1").unwrap();
        assert!(!q.active_only);
        let q: SubscriptionsQuery = serde_urlencoded::from_str("active_only=true").unwrap();
        assert!(q.active_only);
    }

    #[test]
    fn invalid_email_is_rejected() {
        let req = SubscriptionRequest { email: "nobody".into() };
        assert!(req.validate().is_err());
    }
}

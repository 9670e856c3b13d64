use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use super::{is_unique_violation, Pagination, ValidJson};
use crate::error::{ApiResult, AppError};
use crate::middleware::{issue_token, AdminUser, AuthUser};
use crate::models::User;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/me", get(me).put(update_me))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "is required"))]
    pub last_name: String,
    #[validate(length(max = 50, message = "is too long"))]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 100, message = "is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "is required"))]
    pub last_name: String,
    #[validate(length(max = 50, message = "is too long"))]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    success: bool,
    token: String,
    user: User,
}

async fn hash_password(password: String) -> ApiResult<String> {
    // bcrypt - CPU-bound, не держим на нём воркер рантайма
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

// POST /api/users/register
async fn register(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = req.email.trim().to_lowercase();
    let password_hash = hash_password(req.password).await?;

    let user = User::create(
        &state.db.pool,
        &email,
        &password_hash,
        req.first_name.trim(),
        req.last_name.trim(),
        req.phone.as_deref().filter(|p| !p.trim().is_empty()),
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Email is already registered".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    info!("User {} registered", user.id);
    let token = issue_token(&state.config.jwt, &user)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { success: true, token, user })))
}

// POST /api/users/login
async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let user = User::find_by_email(&state.db.pool, req.email.trim())
        .await?
        .ok_or_else(invalid)?;

    let password = req.password;
    let candidate = user.clone();
    let verified = tokio::task::spawn_blocking(move || candidate.verify_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("verify task failed: {}", e)))?;
    if !verified {
        warn!("Failed login for user {}", user.id);
        return Err(invalid());
    }
    if !user.is_active {
        return Err(AppError::Forbidden("Account is disabled".to_string()));
    }

    if let Err(e) = User::touch_last_login(&state.db.pool, user.id).await {
        warn!("Could not update last login for user {}: {}", user.id, e);
    }

    let token = issue_token(&state.config.jwt, &user)?;
    Ok(Json(AuthResponse { success: true, token, user }))
}

// GET /api/users/me
async fn me(State(state): State<Arc<AppState>>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    let user = User::find(&state.db.pool, auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

// PUT /api/users/me
async fn update_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ValidJson(req): ValidJson<ProfileUpdate>,
) -> ApiResult<impl IntoResponse> {
    let user = User::update_profile(
        &state.db.pool,
        auth.user_id,
        req.first_name.trim(),
        req.last_name.trim(),
        req.phone.as_deref().filter(|p| !p.trim().is_empty()),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

// GET /api/users (admin)
async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(page): Query<Pagination>,
) -> ApiResult<impl IntoResponse> {
    let (limit, offset) = page.limit_offset();
    let users = User::list(&state.db.pool, limit, offset).await?;
    Ok(Json(users))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Utc;

    #[test]
    fn short_password_and_bad_email_are_rejected() {
        let req: RegisterRequest = serde_json::from_value(serde_json::json!({
            "email": "not-an-email",
            "password": "short",
            "first_name": "Ada",
            "last_name": "Lovelace"
        }))
        .unwrap();
        let err: AppError = req.validate().unwrap_err().into();
        assert_eq!(
            err.to_string(),
            "email must be a valid email; password must be at least 8 characters"
        );
    }

    #[tokio::test]
    async fn hashed_password_verifies() {
        let hash = hash_password("correct horse".to_string()).await.unwrap();
        let user = User {
            id: 1,
            email: "ada@example.com".into(),
            password_hash: hash,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone: None,
            role: Role::Customer,
            is_active: true,
            created_at: Utc::now(),
            last_logged_in: None,
        };
        assert!(user.verify_password("correct horse"));
        assert!(!user.verify_password("wrong horse"));
    }

    #[test]
    fn auth_response_hides_password_hash() {
        let user = User {
            id: 1,
            email: "ada@example.com".into(),
            password_hash: "$2b$12$secret".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone: None,
            role: Role::Admin,
            is_active: true,
            created_at: Utc::now(),
            last_logged_in: None,
        };
        let body = serde_json::to_value(AuthResponse { success: true, token: "t".into(), user }).unwrap();
        assert!(body["user"].get("password_hash").is_none());
        assert_eq!(body["user"]["role"], "admin");
    }
}

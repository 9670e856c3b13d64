use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::Arc;

use crate::config::JwtConfig;
use crate::error::AppError;
use crate::models::{Role, User};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub email: String,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

pub fn issue_token(config: &JwtConfig, user: &User) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        role: user.role,
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(config.expires_in_hours)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token encoding failed: {}", e)))
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Роль и активность пользователя в БД на момент запроса.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct StoredAccount {
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub is_active: bool,
}

/// Собирает пользователя запроса. Роль берётся из БД: понижение или
/// блокировка действуют сразу, не дожидаясь истечения токена.
pub fn resolve_session(claims: Claims, stored: Option<StoredAccount>) -> Result<AuthUser, AppError> {
    match stored {
        Some(account) if account.is_active => Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
            role: account.role,
        }),
        _ => Err(AppError::Unauthorized("Account is disabled".to_string())),
    }
}

/// Проверяет токен и что пользователь всё ещё активен.
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthUser, AppError> {
    let claims = decode_token(&state.config.jwt.secret, token)?;

    let stored = sqlx::query_as::<_, StoredAccount>("SELECT role, is_active FROM users WHERE id = $1")
        .bind(claims.sub)
        .fetch_optional(&state.db.pool)
        .await?;

    resolve_session(claims, stored)
}

// Bearer JWT extractor
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
        authenticate(state, token).await
    }
}

/// Пользователь, если запрос пришёл с токеном. Невалидный токен - всё равно 401.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<AuthUser>);

impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match bearer(parts) {
            Some(token) => Ok(MaybeUser(Some(authenticate(state, token).await?))),
            None => Ok(MaybeUser(None)),
        }
    }
}

/// Админ. При `ENABLE_AUTH=false` пропускает всех (`user` будет `None`).
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub user: Option<AuthUser>,
}

pub async fn authorize_admin(state: &AppState, token: Option<&str>) -> Result<AdminUser, AppError> {
    if !state.config.features.enable_auth {
        return Ok(AdminUser { user: None });
    }
    let token = token.ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
    let user = authenticate(state, token).await?;
    if !user.is_admin() {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }
    Ok(AdminUser { user: Some(user) })
}

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authorize_admin(state, bearer(parts)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> User {
        User {
            id: 42,
            email: "admin@example.com".into(),
            password_hash: String::new(),
            first_name: "A".into(),
            last_name: "B".into(),
            phone: None,
            role,
            is_active: true,
            created_at: Utc::now(),
            last_logged_in: None,
        }
    }

    #[test]
    fn issued_token_decodes_with_same_secret_only() {
        let config = JwtConfig { secret: "s3cret".into(), expires_in_hours: 1 };
        let token = issue_token(&config, &user(Role::Admin)).unwrap();

        let claims = decode_token("s3cret", &token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role, Role::Admin);
        assert!(matches!(decode_token("other", &token), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = JwtConfig { secret: "s3cret".into(), expires_in_hours: -2 };
        let token = issue_token(&config, &user(Role::Customer)).unwrap();
        assert!(decode_token("s3cret", &token).is_err());
    }

    fn claims(role: Role) -> Claims {
        Claims { sub: 42, email: "ann@example.com".into(), role, iat: 0, exp: 0 }
    }

    #[test]
    fn stored_role_overrides_token_role() {
        let demoted = StoredAccount { role: Role::Customer, is_active: true };
        let user = resolve_session(claims(Role::Admin), Some(demoted)).unwrap();
        assert_eq!(user.role, Role::Customer);
        assert!(!user.is_admin());

        let promoted = StoredAccount { role: Role::Admin, is_active: true };
        assert!(resolve_session(claims(Role::Customer), Some(promoted)).unwrap().is_admin());
    }

    #[test]
    fn disabled_or_deleted_account_is_unauthorized() {
        let disabled = StoredAccount { role: Role::Admin, is_active: false };
        assert!(matches!(
            resolve_session(claims(Role::Admin), Some(disabled)),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(resolve_session(claims(Role::Admin), None), Err(AppError::Unauthorized(_))));
    }
}

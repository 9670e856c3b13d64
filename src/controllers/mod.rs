pub mod packages;
pub mod destinations;
pub mod categories;
pub mod regions;
pub mod bookings;
pub mod payment;
pub mod enquiries;
pub mod users;
pub mod subscriptions;
pub mod tracking;
pub mod notifications;

use axum::{
    extract::{FromRequest, Request},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 50;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(packages::routes())
        .merge(destinations::routes())
        .merge(categories::routes())
        .merge(regions::routes())
        .merge(bookings::routes())
        .merge(payment::routes())
        .merge(enquiries::routes())
        .merge(users::routes())
        .merge(subscriptions::routes())
        .merge(tracking::routes())
        .merge(notifications::routes())
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Pagination {
    pub page: Option<u32>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<u32>,
}

impl Pagination {
    /// `(limit, offset)` для SQL. Размер страницы ограничен `MAX_PAGE_SIZE`.
    pub fn limit_offset(&self) -> (i64, i64) {
        page_window(self.page, self.page_size)
    }
}

pub fn page_window(page: Option<u32>, page_size: Option<u32>) -> (i64, i64) {
    let size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE) as i64;
    let page = page.unwrap_or(1).max(1) as i64;
    (size, (page - 1) * size)
}

/// JSON-тело, прошедшее `validator`. Ошибки разбора и валидации - 400.
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}

/// Нарушение UNIQUE в PostgreSQL (23505).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Нарушение внешнего ключа (23503).
pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23503"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_clamps_size_and_page() {
        assert_eq!(page_window(None, None), (20, 0));
        assert_eq!(page_window(Some(3), Some(10)), (10, 20));
        assert_eq!(page_window(Some(0), Some(500)), (50, 0));
        assert_eq!(page_window(Some(2), Some(0)), (1, 1));
    }

    #[test]
    fn pagination_reads_camel_case_page_size() {
        let p: Pagination = serde_urlencoded::from_str("page=2&pageSize=5").unwrap();
        assert_eq!(p.limit_offset(), (5, 5));
    }
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{is_foreign_key_violation, is_unique_violation, page_window, ValidJson};
use crate::error::{ApiResult, AppError};
use crate::middleware::AdminUser;
use crate::models::{Package, PackageFilter, PackageInput, PackageSummary};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/packages", get(list_packages).post(create_package))
        .route(
            "/packages/{id}",
            get(get_package).put(update_package).delete(delete_package),
        )
        .route("/packages/slug/{slug}", get(get_package_by_slug))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PackagesQuery {
    pub category: Option<String>,
    pub destination: Option<i64>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub q: Option<String>,
    pub page: Option<u32>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<u32>,
}

impl PackagesQuery {
    fn filter(&self) -> PackageFilter {
        PackageFilter {
            category: self.category.clone(),
            destination_id: self.destination,
            country: self.country.clone(),
            region: self.region.clone(),
            search: self.q.clone(),
        }
    }
}

/// Листинг каталога через Redis-кеш. Ключ - нормализованный фильтр и окно страницы.
pub async fn cached_search(
    state: &AppState,
    filter: &PackageFilter,
    limit: i64,
    offset: i64,
) -> ApiResult<Vec<PackageSummary>> {
    let key = format!(
        "packages:{}&limit={}&offset={}",
        serde_urlencoded::to_string(filter).unwrap_or_default(),
        limit,
        offset
    );
    let pool = state.db.pool.clone();
    let filter = filter.clone();
    let packages = state
        .cache
        .cached_listing(&key, || async move {
            Package::search(&pool, &filter, limit, offset).await
        })
        .await?;
    Ok(packages)
}

// GET /api/packages
async fn list_packages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PackagesQuery>,
) -> ApiResult<impl IntoResponse> {
    let (limit, offset) = page_window(params.page, params.page_size);
    let packages = cached_search(&state, &params.filter(), limit, offset).await?;
    Ok(Json(packages))
}

// GET /api/packages/{id}
async fn get_package(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let package = Package::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Package {} not found", id)))?;
    Ok(Json(package))
}

// GET /api/packages/slug/{slug}
async fn get_package_by_slug(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let package = Package::find_by_slug(&state.db.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Package '{}' not found", slug)))?;
    Ok(Json(package))
}

fn check_sale_price(input: &PackageInput) -> ApiResult<()> {
    match input.sale_price {
        Some(sale) if sale > input.price => Err(AppError::Validation(
            "sale_price must not exceed price".to_string(),
        )),
        _ => Ok(()),
    }
}

fn map_write_error(err: sqlx::Error, slug: &str) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict(format!("Package slug '{}' is already taken", slug))
    } else if is_foreign_key_violation(&err) {
        AppError::Validation("destination_id does not exist".to_string())
    } else {
        AppError::Database(err)
    }
}

// POST /api/packages
async fn create_package(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    ValidJson(input): ValidJson<PackageInput>,
) -> ApiResult<impl IntoResponse> {
    check_sale_price(&input)?;

    let package = Package::create(&state.db.pool, &input)
        .await
        .map_err(|e| map_write_error(e, &input.slug))?;
    state.cache.invalidate_catalog().await;

    tracing::info!("Package {} created ({})", package.id, package.slug);
    Ok((StatusCode::CREATED, Json(package)))
}

// PUT /api/packages/{id}
async fn update_package(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    ValidJson(input): ValidJson<PackageInput>,
) -> ApiResult<impl IntoResponse> {
    check_sale_price(&input)?;

    let package = Package::update(&state.db.pool, id, &input)
        .await
        .map_err(|e| map_write_error(e, &input.slug))?
        .ok_or_else(|| AppError::NotFound(format!("Package {} not found", id)))?;
    state.cache.invalidate_catalog().await;

    Ok(Json(package))
}

// DELETE /api/packages/{id}
async fn delete_package(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    if !Package::delete(&state.db.pool, id).await? {
        return Err(AppError::NotFound(format!("Package {} not found", id)));
    }
    state.cache.invalidate_catalog().await;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn query_maps_to_filter() {
        let params: PackagesQuery =
            serde_urlencoded::from_str("category=honeymoon&destination=4&q=bali&pageSize=10").unwrap();
        let filter = params.filter();
        assert_eq!(filter.category.as_deref(), Some("honeymoon"));
        assert_eq!(filter.destination_id, Some(4));
        assert_eq!(filter.search.as_deref(), Some("bali"));
        assert_eq!(page_window(params.page, params.page_size), (10, 0));
    }

    #[test]
    fn sale_price_above_price_is_rejected() {
        let input: PackageInput = serde_json::from_value(serde_json::json!({
            "name": "Bali Escape",
            "slug": "bali-escape",
            "category": "honeymoon",
            "price": 1000.0,
            "sale_price": 1200.0,
            "currency": "USD"
        }))
        .unwrap();
        assert!(input.validate().is_ok());
        assert!(matches!(check_sale_price(&input), Err(AppError::Validation(_))));
    }

    #[test]
    fn package_input_validation_names_fields() {
        let input: PackageInput = serde_json::from_value(serde_json::json!({
            "name": "",
            "slug": "Bali Escape",
            "category": "honeymoon",
            "price": 0.0,
            "currency": "US"
        }))
        .unwrap();
        let err: AppError = input.validate().unwrap_err().into();
        let message = err.to_string();
        assert!(message.contains("name is required"));
        assert!(message.contains("slug must be lowercase kebab-case"));
        assert!(message.contains("price must be greater than 0"));
        assert!(message.contains("currency must be a 3-letter code"));
    }
}

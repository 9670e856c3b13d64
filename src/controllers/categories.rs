use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use super::{is_unique_violation, ValidJson};
use crate::error::{ApiResult, AppError};
use crate::middleware::AdminUser;
use crate::models::{Category, CategoryInput};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route("/categories/{slug}", get(get_category).delete(delete_category))
}

async fn list_categories(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let pool = state.db.pool.clone();
    let categories = state
        .cache
        .cached_listing("categories", || async move { Category::list(&pool).await })
        .await?;
    Ok(Json(categories))
}

async fn get_category(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let category = Category::find_by_slug(&state.db.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Category '{}' not found", slug)))?;
    Ok(Json(category))
}

async fn create_category(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    ValidJson(input): ValidJson<CategoryInput>,
) -> ApiResult<impl IntoResponse> {
    let category = Category::create(&state.db.pool, &input).await.map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Category '{}' already exists", input.slug))
        } else {
            AppError::Database(e)
        }
    })?;
    state.cache.invalidate_catalog().await;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn delete_category(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !Category::delete_by_slug(&state.db.pool, &slug).await? {
        return Err(AppError::NotFound(format!("Category '{}' not found", slug)));
    }
    state.cache.invalidate_catalog().await;
    Ok(StatusCode::NO_CONTENT)
}

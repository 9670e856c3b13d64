use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::{is_unique_violation, ValidJson};
use crate::error::{ApiResult, AppError};
use crate::middleware::AdminUser;
use crate::models::{Destination, DestinationInput};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/destinations", get(list_destinations).post(create_destination))
        .route(
            "/destinations/{id}",
            get(get_destination)
                .put(update_destination)
                .delete(delete_destination),
        )
        .route("/destinations/slug/{slug}", get(get_destination_by_slug))
}

#[derive(Debug, Deserialize)]
struct DestinationsQuery {
    region: Option<String>,
}

// GET /api/destinations
async fn list_destinations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DestinationsQuery>,
) -> ApiResult<impl IntoResponse> {
    let key = format!("destinations:region={}", params.region.as_deref().unwrap_or("*"));
    let pool = state.db.pool.clone();
    let region = params.region.clone();
    let destinations = state
        .cache
        .cached_listing(&key, || async move {
            Destination::list(&pool, region.as_deref()).await
        })
        .await?;
    Ok(Json(destinations))
}

async fn get_destination(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let destination = Destination::find(&state.db.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Destination {} not found", id)))?;
    Ok(Json(destination))
}

async fn get_destination_by_slug(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let destination = Destination::find_by_slug(&state.db.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Destination '{}' not found", slug)))?;
    Ok(Json(destination))
}

fn map_write_error(err: sqlx::Error, slug: &str) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict(format!("Destination slug '{}' is already taken", slug))
    } else {
        AppError::Database(err)
    }
}

async fn create_destination(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    ValidJson(input): ValidJson<DestinationInput>,
) -> ApiResult<impl IntoResponse> {
    let destination = Destination::create(&state.db.pool, &input)
        .await
        .map_err(|e| map_write_error(e, &input.slug))?;
    state.cache.invalidate_catalog().await;
    Ok((StatusCode::CREATED, Json(destination)))
}

async fn update_destination(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    ValidJson(input): ValidJson<DestinationInput>,
) -> ApiResult<impl IntoResponse> {
    let destination = Destination::update(&state.db.pool, id, &input)
        .await
        .map_err(|e| map_write_error(e, &input.slug))?
        .ok_or_else(|| AppError::NotFound(format!("Destination {} not found", id)))?;
    state.cache.invalidate_catalog().await;
    Ok(Json(destination))
}

async fn delete_destination(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    // Пакеты направления остаются, destination_id обнуляется (ON DELETE SET NULL).
    if !Destination::delete(&state.db.pool, id).await? {
        return Err(AppError::NotFound(format!("Destination {} not found", id)));
    }
    state.cache.invalidate_catalog().await;
    Ok(StatusCode::NO_CONTENT)
}

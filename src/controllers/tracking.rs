use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use super::Pagination;
use crate::error::ApiResult;
use crate::middleware::AdminUser;
use crate::models::EmailTracking;
use crate::AppState;

/// Прозрачный GIF 1x1.
pub const PIXEL_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracking", get(list_tracking))
        .route("/tracking/{id}/open.gif", get(track_open))
}

fn pixel() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0"),
            (header::PRAGMA, "no-cache"),
        ],
        PIXEL_GIF,
    )
}

// GET /api/tracking/{id}/open.gif
// Пиксель отдаётся всегда, даже для неизвестного id или при ошибке БД.
async fn track_open(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match Uuid::parse_str(&id) {
        Ok(tracking_id) => match EmailTracking::record_open(&state.db.pool, tracking_id).await {
            Ok(true) => tracing::debug!("Email {} opened", tracking_id),
            Ok(false) => tracing::debug!("Open for unknown tracking id {}", tracking_id),
            Err(e) => tracing::warn!("Failed to record open for {}: {}", tracking_id, e),
        },
        Err(_) => tracing::debug!("Malformed tracking id '{}'", id),
    }
    pixel()
}

// GET /api/tracking (admin)
async fn list_tracking(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(page): Query<Pagination>,
) -> ApiResult<impl IntoResponse> {
    let (limit, offset) = page.limit_offset();
    let rows = EmailTracking::list(&state.db.pool, limit, offset).await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn pixel_is_an_uncached_gif() {
        let response = pixel().into_response();
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "image/gif");
        assert!(headers[header::CACHE_CONTROL].to_str().unwrap().contains("no-cache"));

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..6], b"GIF89a");
        assert_eq!(body.last(), Some(&0x3b));
    }
}

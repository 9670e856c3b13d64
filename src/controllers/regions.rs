use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use super::{packages::cached_search, Pagination};
use crate::catalog::{RegionPage, Section, SectionKind};
use crate::error::{ApiResult, AppError};
use crate::models::PackageSummary;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/regions", get(list_sections))
        .route("/destination/{region}", get(region_pages))
        .route("/destination/{region}/{slug}", get(region_page))
        .route("/packages/collections/{collection}/{slug}", get(collection_page))
}

#[derive(Debug, Serialize)]
struct PageResponse {
    section: String,
    section_title: String,
    page: RegionPage,
    packages: Vec<PackageSummary>,
}

// GET /api/regions - всё меню регионов и коллекций
async fn list_sections(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.regions.sections().to_vec())
}

// GET /api/destination/{region}
async fn region_pages(
    State(state): State<Arc<AppState>>,
    Path(region): Path<String>,
) -> ApiResult<Json<Section>> {
    let section = state
        .regions
        .section(SectionKind::Region, &region)
        .ok_or_else(|| AppError::NotFound(format!("Region '{}' not found", region)))?;
    Ok(Json(section.clone()))
}

async fn render_page(
    state: &AppState,
    kind: SectionKind,
    section_slug: &str,
    slug: &str,
    pagination: &Pagination,
) -> ApiResult<Json<PageResponse>> {
    let section = state
        .regions
        .section(kind, section_slug)
        .ok_or_else(|| AppError::NotFound(format!("Section '{}' not found", section_slug)))?;
    let page = state
        .regions
        .page(kind, section_slug, slug)
        .ok_or_else(|| AppError::NotFound(format!("Page '{}/{}' not found", section_slug, slug)))?;

    let (limit, offset) = pagination.limit_offset();
    let packages = cached_search(state, &page.filter.to_package_filter(), limit, offset).await?;

    Ok(Json(PageResponse {
        section: section.slug.clone(),
        section_title: section.title.clone(),
        page: page.clone(),
        packages,
    }))
}

// GET /api/destination/{region}/{slug}
async fn region_page(
    State(state): State<Arc<AppState>>,
    Path((region, slug)): Path<(String, String)>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<impl IntoResponse> {
    render_page(&state, SectionKind::Region, &region, &slug, &pagination).await
}

// GET /api/packages/collections/{collection}/{slug}
async fn collection_page(
    State(state): State<Arc<AppState>>,
    Path((collection, slug)): Path<(String, String)>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<impl IntoResponse> {
    render_page(&state, SectionKind::Collection, &collection, &slug, &pagination).await
}

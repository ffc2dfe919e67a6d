use axum::extract::{Path, Query, State};
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::{effective_limit, ListProductsQuery, ProductListResponse};
use crate::models::product::ProductCacheEntry;
use crate::routes::error::ApiError;

/// GET /api/v1/products: resolved links, most recent first.
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListProductsQuery>,
) -> Result<Json<ProductListResponse>, ApiError> {
    let products = state.store.list_cache_entries(effective_limit(query.limit)).await?;
    Ok(Json(ProductListResponse { products }))
}

/// GET /api/v1/products/{short_code}
pub async fn get_product(
    State(state): State<AppState>,
    Path(short_code): Path<String>,
) -> Result<Json<ProductCacheEntry>, ApiError> {
    state
        .store
        .get_cache_entry_by_short_code(&short_code)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No product cached for short code {}", short_code)))
}

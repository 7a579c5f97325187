//! # Feed Handlers

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    response::Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::ApiError;
use crate::models::{FeedItem, RateBudget};
use crate::server::AppState;

/// Query parameters for the feed
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct FeedQuery {
    /// Return at most this many of the newest items (must be positive)
    pub limit: Option<usize>,
}

/// Current activity feed, newest first
#[utoipa::path(
    get,
    path = "/api/feed",
    params(FeedQuery),
    responses(
        (status = 200, description = "Feed items with the latest cached commit stats", body = [FeedItem]),
        (status = 400, description = "Invalid query parameters", body = ApiError)
    ),
    tag = "feed"
)]
pub async fn get_feed(
    State(state): State<AppState>,
    query: Result<Query<FeedQuery>, QueryRejection>,
) -> Result<Json<Vec<FeedItem>>, ApiError> {
    let Query(query) = query?;

    let mut items = state.store.enriched_feed();
    match query.limit {
        Some(0) => return Err(ApiError::validation("limit must be greater than zero")),
        Some(limit) => items.truncate(limit),
        None => {}
    }

    Ok(Json(items))
}

/// Upstream request budget as last observed
#[utoipa::path(
    get,
    path = "/api/rate-limit",
    responses(
        (status = 200, description = "Last observed rate budget", body = RateBudget),
        (status = 404, description = "No upstream call has reported a budget yet", body = ApiError)
    ),
    tag = "feed"
)]
pub async fn get_rate_limit(State(state): State<AppState>) -> Result<Json<RateBudget>, ApiError> {
    state
        .store
        .rate_budget()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No rate budget observed yet"))
}

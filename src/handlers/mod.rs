//! # API Handlers
//!
//! Read-only HTTP views over the repository cache.

use crate::models::ServiceInfo;
use axum::response::Json;

pub mod feed;
pub mod repos;

pub use feed::{get_feed, get_rate_limit};
pub use repos::{get_default_branch, list_repos};

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

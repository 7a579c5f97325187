//! # Data Models
//!
//! This module contains the data models shared by the poller, the store and
//! the read-only API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod feed_item;
pub mod repo;

pub use feed_item::{FeedItem, FeedKind};
pub use repo::{CommitStat, RateBudget, RepoInfo, RepoRef, RepoSnapshot};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "repofeed".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

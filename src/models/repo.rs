//! Repository-level models
//!
//! Configured repositories, their cached metadata snapshots, per-commit
//! diff statistics and the upstream request budget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A configured, monitored repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RepoRef {
    /// Stable `owner/name` identifier
    pub id: String,
    /// Human display label
    pub label: String,
}

impl RepoRef {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// Repository whose label is its identifier.
    pub fn unlabeled(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
        }
    }
}

/// Latest known metadata snapshot for a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RepoInfo {
    pub id: String,
    pub label: String,
    pub html_url: String,
    pub description: Option<String>,
    pub stars: u64,
    pub forks: u64,
    pub open_issues: u64,
    pub pushed_at: Option<DateTime<Utc>>,
    pub default_branch: String,
}

/// Cached metadata together with the time it was last refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RepoSnapshot {
    pub repo: RepoInfo,
    /// Last successful metadata or events fetch
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Line-level diff summary for one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CommitStat {
    pub sha: String,
    pub additions: u64,
    pub deletions: u64,
    pub files_changed: u64,
}

impl CommitStat {
    /// Placeholder recorded when the upstream reports no new value for a commit never seen before.
    pub fn zero(sha: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            additions: 0,
            deletions: 0,
            files_changed: 0,
        }
    }
}

/// Upstream call budget as last reported by rate-limit headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RateBudget {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateBudget {
    /// True when no calls remain and the window has not reset yet.
    pub fn is_exhausted(&self, now: DateTime<Utc>) -> bool {
        self.remaining == 0 && self.reset_at > now
    }
}

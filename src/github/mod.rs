//! # GitHub upstream
//!
//! Conditional REST client plus the response and event payload types it
//! decodes. The scheduler only sees the [`ActivitySource`] trait.

use async_trait::async_trait;

pub mod client;
pub mod types;

pub use client::{Conditional, GitHubClient, GitHubError};
pub use types::{EventPayload, RawEvent};

use crate::models::{CommitStat, RateBudget, RepoInfo};

/// Upstream operations the update scheduler depends on.
///
/// `Ok(None)` and empty vectors mean "unchanged since the last fetch".
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn get_repo_info(&self, repo_id: &str) -> Result<Option<RepoInfo>, GitHubError>;

    async fn get_repo_events(&self, repo_id: &str) -> Result<Vec<RawEvent>, GitHubError>;

    async fn get_commit_stat(
        &self,
        repo_id: &str,
        sha: &str,
    ) -> Result<Option<CommitStat>, GitHubError>;

    fn rate_budget(&self) -> Option<RateBudget>;
}

#[async_trait]
impl ActivitySource for GitHubClient {
    async fn get_repo_info(&self, repo_id: &str) -> Result<Option<RepoInfo>, GitHubError> {
        GitHubClient::get_repo_info(self, repo_id).await
    }

    async fn get_repo_events(&self, repo_id: &str) -> Result<Vec<RawEvent>, GitHubError> {
        GitHubClient::get_repo_events(self, repo_id).await
    }

    async fn get_commit_stat(
        &self,
        repo_id: &str,
        sha: &str,
    ) -> Result<Option<CommitStat>, GitHubError> {
        GitHubClient::get_commit_stat(self, repo_id, sha).await
    }

    fn rate_budget(&self) -> Option<RateBudget> {
        GitHubClient::rate_budget(self)
    }
}

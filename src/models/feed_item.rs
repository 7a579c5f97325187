//! Feed item model
//!
//! One user-visible activity entry in the aggregated feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::repo::CommitStat;

/// Normalized activity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Commit,
    Push,
    PullRequest,
    Issue,
    Comment,
    Release,
    Create,
    Delete,
    Fork,
    Star,
    Other,
}

impl FeedKind {
    /// Icon/category tag rendered next to the item.
    pub fn default_icon(self) -> &'static str {
        match self {
            FeedKind::Commit | FeedKind::Push => "commit",
            FeedKind::PullRequest => "pull-request",
            FeedKind::Issue => "issue",
            FeedKind::Comment => "comment",
            FeedKind::Release => "tag",
            FeedKind::Create => "plus",
            FeedKind::Delete => "trash",
            FeedKind::Fork => "fork",
            FeedKind::Star => "star",
            FeedKind::Other => "activity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FeedItem {
    pub kind: FeedKind,
    pub icon: String,
    pub timestamp: DateTime<Utc>,
    pub repo_id: String,
    pub repo_label: String,
    pub actor: String,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CommitStat>,
}

impl FeedItem {
    /// Item skeleton with the kind's default icon; the label starts as the raw repo id.
    pub fn new(
        kind: FeedKind,
        timestamp: DateTime<Utc>,
        repo_id: impl Into<String>,
        actor: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let repo_id = repo_id.into();
        Self {
            kind,
            icon: kind.default_icon().to_string(),
            timestamp,
            repo_label: repo_id.clone(),
            repo_id,
            actor: actor.into(),
            title: title.into(),
            url: url.into(),
            annotation: None,
            sha: None,
            stats: None,
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    /// The (repo, sha) pair this item can be enriched with, if any.
    pub fn commit_key(&self) -> Option<(&str, &str)> {
        match (self.kind, self.sha.as_deref()) {
            (FeedKind::Commit, Some(sha)) => Some((self.repo_id.as_str(), sha)),
            _ => None,
        }
    }
}

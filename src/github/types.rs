//! GitHub API response types
//!
//! Upstream JSON shapes are an external contract that keeps evolving, so
//! every optional field defaults instead of failing the whole response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CommitStat, RepoInfo};

/// `GET /repos/{owner}/{name}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubRepo {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl GitHubRepo {
    /// Convert to the cached snapshot; the label starts as the id and is replaced by the scheduler.
    pub fn into_repo_info(self, repo_id: &str) -> RepoInfo {
        let html_url = if self.html_url.is_empty() {
            format!("{}/{}", GITHUB_WEB_BASE, repo_id)
        } else {
            self.html_url
        };
        RepoInfo {
            id: repo_id.to_string(),
            label: repo_id.to_string(),
            html_url,
            description: self.description,
            stars: self.stargazers_count,
            forks: self.forks_count,
            open_issues: self.open_issues_count,
            pushed_at: self.pushed_at,
            default_branch: self
                .default_branch
                .filter(|branch| !branch.is_empty())
                .unwrap_or_else(|| crate::store::DEFAULT_BRANCH.to_string()),
        }
    }
}

/// `GET /repos/{owner}/{name}/commits/{sha}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubCommit {
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub stats: Option<GitHubCommitStats>,
    #[serde(default)]
    pub files: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubCommitStats {
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub total: u64,
}

impl GitHubCommit {
    /// Files changed is the file list length; without a list it falls back to `stats.total`.
    pub fn into_commit_stat(self, requested_sha: &str) -> CommitStat {
        let stats = self.stats.unwrap_or_default();
        let files_changed = match &self.files {
            Some(files) => files.len() as u64,
            None => stats.total,
        };
        let sha = if self.sha.is_empty() {
            requested_sha.to_string()
        } else {
            self.sha
        };
        CommitStat {
            sha,
            additions: stats.additions,
            deletions: stats.deletions,
            files_changed,
        }
    }
}

/// Web host used to build links the API payloads do not carry.
pub const GITHUB_WEB_BASE: &str = "https://github.com";

/// One activity event as returned by `GET /repos/{owner}/{name}/events`.
///
/// The payload stays untyped here; [`EventPayload::parse`] interprets it when
/// the feed is built so one malformed event never poisons its batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub actor: EventActor,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Owning repository, set by the client after the fetch.
    #[serde(default)]
    pub repo_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventActor {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub display_login: Option<String>,
}

impl RawEvent {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn actor_name(&self) -> &str {
        self.actor
            .display_login
            .as_deref()
            .filter(|login| !login.is_empty())
            .unwrap_or(&self.actor.login)
    }

    /// SHAs of the commits carried by a push event, in payload order.
    pub fn push_commit_shas(&self) -> Vec<String> {
        if self.event_type != "PushEvent" {
            return Vec::new();
        }
        match serde_json::from_value::<PushPayload>(self.payload.clone()) {
            Ok(push) => push.commits.into_iter().map(|commit| commit.sha).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Event payload keyed by event kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Push(PushPayload),
    PullRequest(PullRequestPayload),
    Issues(IssuesPayload),
    IssueComment(IssueCommentPayload),
    Release(ReleasePayload),
    Create(RefPayload),
    Delete(RefPayload),
    Fork(ForkPayload),
    Watch(WatchPayload),
    /// Kinds without a dedicated shape; only the common event fields apply.
    Other,
}

impl EventPayload {
    pub fn parse(event: &RawEvent) -> Result<Self, serde_json::Error> {
        let payload = event.payload.clone();
        Ok(match event.event_type.as_str() {
            "PushEvent" => Self::Push(serde_json::from_value(payload)?),
            "PullRequestEvent" => Self::PullRequest(serde_json::from_value(payload)?),
            "IssuesEvent" => Self::Issues(serde_json::from_value(payload)?),
            "IssueCommentEvent" => Self::IssueComment(serde_json::from_value(payload)?),
            "ReleaseEvent" => Self::Release(serde_json::from_value(payload)?),
            "CreateEvent" => Self::Create(serde_json::from_value(payload)?),
            "DeleteEvent" => Self::Delete(serde_json::from_value(payload)?),
            "ForkEvent" => Self::Fork(serde_json::from_value(payload)?),
            "WatchEvent" => Self::Watch(serde_json::from_value(payload)?),
            _ => Self::Other,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub head: Option<String>,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
}

impl PushPayload {
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushCommit {
    pub sha: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitAuthor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestPayload {
    #[serde(default)]
    pub action: String,
    pub pull_request: PullRequestRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    pub html_url: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub merged_at: Option<String>,
}

impl PullRequestRef {
    pub fn is_merged(&self) -> bool {
        self.merged || self.merged_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuesPayload {
    #[serde(default)]
    pub action: String,
    pub issue: IssueRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRef {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueCommentPayload {
    #[serde(default)]
    pub action: String,
    pub issue: IssueRef,
    pub comment: CommentRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRef {
    pub html_url: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasePayload {
    #[serde(default)]
    pub action: String,
    pub release: ReleaseRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRef {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    pub html_url: String,
}

/// Shared by create and delete events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefPayload {
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    pub ref_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkPayload {
    pub forkee: Forkee,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forkee {
    pub full_name: String,
    pub html_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchPayload {
    #[serde(default)]
    pub action: String,
}

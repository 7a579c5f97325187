//! Conditional GitHub API client
//!
//! Issues `GET` requests with `If-None-Match` validators remembered from
//! earlier responses, turns `304 Not Modified` into [`Conditional::Unchanged`],
//! and records the rate-limit budget reported by every response.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use metrics::{counter, gauge};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ETAG, HeaderMap, IF_NONE_MATCH};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::types::{GitHubCommit, GitHubRepo, RawEvent};
use crate::config::AppConfig;
use crate::models::{CommitStat, RateBudget, RepoInfo};

const USER_AGENT: &str = concat!("repofeed/", env!("CARGO_PKG_VERSION"));
const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const EVENTS_PER_PAGE: u32 = 100;
const LOW_BUDGET_THRESHOLD: u32 = 100;
const MAX_ERROR_BODY_CHARS: usize = 200;

/// GitHub client errors
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("API request failed with status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

/// Outcome of a conditional fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditional<T> {
    /// The server answered 304; whatever the caller cached is still current.
    Unchanged,
    Fresh(T),
}

impl<T> Conditional<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Conditional::Unchanged)
    }

    pub fn into_fresh(self) -> Option<T> {
        match self {
            Conditional::Unchanged => None,
            Conditional::Fresh(value) => Some(value),
        }
    }
}

/// Validation-token slots, one per resource class and key.
pub mod resource_key {
    pub fn repo(repo_id: &str) -> String {
        format!("repo:{}", repo_id)
    }

    pub fn events(repo_id: &str) -> String {
        format!("events:{}", repo_id)
    }
}

/// GitHub REST client with ETag validators and rate-budget tracking.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    validators: Mutex<LruCache<String, String>>,
    budget: Mutex<Option<RateBudget>>,
}

impl GitHubClient {
    /// Build a client from the loaded configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, GitHubError> {
        Self::with_api_base(
            config.github_api_base.clone(),
            config.github_token.clone(),
            Duration::from_secs(config.http_timeout_seconds),
            config.poller.validator_cache_capacity,
        )
    }

    /// Build a client against an explicit API base (mock servers in tests).
    pub fn with_api_base(
        api_base: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
        validator_capacity: usize,
    ) -> Result<Self, GitHubError> {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Url::parse(&api_base)?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        let capacity = NonZeroUsize::new(validator_capacity).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            http,
            api_base,
            token,
            validators: Mutex::new(LruCache::new(capacity)),
            budget: Mutex::new(None),
        })
    }

    /// Fetch a JSON resource, sending the validator stored under `cache_key`.
    pub async fn fetch_resource<T: DeserializeOwned>(
        &self,
        url: &str,
        cache_key: Option<&str>,
    ) -> Result<Conditional<T>, GitHubError> {
        let url = Url::parse(url)?;
        let mut request = self.http.get(url.clone()).header(ACCEPT, GITHUB_ACCEPT);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        if let Some(etag) = cache_key.and_then(|key| self.stored_validator(key)) {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                counter!("repofeed_upstream_requests_total", "outcome" => "transport")
                    .increment(1);
                return Err(err.into());
            }
        };

        self.record_budget(response.headers());

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            counter!("repofeed_upstream_requests_total", "outcome" => "unchanged").increment(1);
            debug!(url = %url, "Resource unchanged");
            return Ok(Conditional::Unchanged);
        }

        if !status.is_success() {
            counter!("repofeed_upstream_requests_total", "outcome" => "error").increment(1);
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::Upstream {
                status: status.as_u16(),
                message: truncate_body(body),
            });
        }

        let etag = extract_etag(response.headers());
        let body = response.bytes().await?;
        let value: T = serde_json::from_slice(&body)?;

        if let (Some(key), Some(etag)) = (cache_key, etag) {
            self.validators
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put(key.to_string(), etag);
        }

        counter!("repofeed_upstream_requests_total", "outcome" => "fresh").increment(1);
        Ok(Conditional::Fresh(value))
    }

    /// Metadata for one repository; `None` when unchanged since the last fetch.
    pub async fn get_repo_info(&self, repo_id: &str) -> Result<Option<RepoInfo>, GitHubError> {
        let url = format!("{}/repos/{}", self.api_base, repo_id);
        let key = resource_key::repo(repo_id);
        Ok(self
            .fetch_resource::<GitHubRepo>(&url, Some(&key))
            .await?
            .into_fresh()
            .map(|repo| repo.into_repo_info(repo_id)))
    }

    /// Latest event page, each event tagged with `repo_id`; empty when unchanged.
    ///
    /// Events are decoded one by one; an event whose envelope does not decode
    /// is logged and dropped without failing the page.
    pub async fn get_repo_events(&self, repo_id: &str) -> Result<Vec<RawEvent>, GitHubError> {
        let url = format!(
            "{}/repos/{}/events?per_page={}",
            self.api_base, repo_id, EVENTS_PER_PAGE
        );
        let key = resource_key::events(repo_id);
        let page = self
            .fetch_resource::<Vec<Value>>(&url, Some(&key))
            .await?
            .into_fresh()
            .unwrap_or_default();

        Ok(page
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<RawEvent>(value) {
                Ok(mut event) => {
                    event.repo_id = repo_id.to_string();
                    Some(event)
                }
                Err(err) => {
                    counter!("repofeed_update_failures_total", "kind" => "event_decode")
                        .increment(1);
                    warn!(repo = %repo_id, error = %err, "Skipping undecodable event");
                    None
                }
            })
            .collect())
    }

    /// Diff summary for one commit.
    ///
    /// Commits are immutable, so no validator is kept: a stat evicted from the
    /// store is refetched in full. `None` only if the upstream answers 304 anyway.
    pub async fn get_commit_stat(
        &self,
        repo_id: &str,
        sha: &str,
    ) -> Result<Option<CommitStat>, GitHubError> {
        let url = format!("{}/repos/{}/commits/{}", self.api_base, repo_id, sha);
        Ok(self
            .fetch_resource::<GitHubCommit>(&url, None)
            .await?
            .into_fresh()
            .map(|commit| commit.into_commit_stat(sha)))
    }

    /// Last budget reported by the upstream, if any call carried limit headers.
    pub fn rate_budget(&self) -> Option<RateBudget> {
        *self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validator currently stored for `cache_key`, without touching LRU order.
    pub fn validation_token(&self, cache_key: &str) -> Option<String> {
        self.validators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peek(cache_key)
            .cloned()
    }

    fn stored_validator(&self, cache_key: &str) -> Option<String> {
        self.validators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cache_key)
            .cloned()
    }

    fn record_budget(&self, headers: &HeaderMap) {
        let mut slot = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(budget) = parse_rate_budget(headers, slot.as_ref()) else {
            return;
        };

        gauge!("repofeed_rate_limit_remaining").set(budget.remaining as f64);
        if budget.remaining < LOW_BUDGET_THRESHOLD {
            warn!(
                remaining = budget.remaining,
                reset_at = %budget.reset_at,
                "GitHub API rate limit running low"
            );
        }
        *slot = Some(budget);
    }
}

/// Extract the ETag from response headers, strong or weak.
pub fn extract_etag(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Read `X-RateLimit-*` headers; `remaining` is required, the rest falls back to the previous budget.
pub fn parse_rate_budget(headers: &HeaderMap, previous: Option<&RateBudget>) -> Option<RateBudget> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    let remaining = header_u64("x-ratelimit-remaining")? as u32;
    let limit = header_u64("x-ratelimit-limit")
        .map(|v| v as u32)
        .or(previous.map(|b| b.limit))
        .unwrap_or(remaining);
    let reset_at = header_u64("x-ratelimit-reset")
        .and_then(|ts| DateTime::from_timestamp(ts as i64, 0))
        .or(previous.map(|b| b.reset_at))
        .unwrap_or_else(Utc::now);

    Some(RateBudget {
        limit,
        remaining,
        reset_at,
    })
}

fn truncate_body(body: String) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}...", truncated)
    } else {
        body
    }
}

//! Configuration loading for the repofeed service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `REPOFEED_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::RepoRef;

/// Application configuration derived from `REPOFEED_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub repos: Vec<RepoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    #[serde(default = "default_github_api_base")]
    pub github_api_base: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default)]
    pub poller: PollerConfig,
}

/// Polling cadence and cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PollerConfig {
    /// Seconds between single-repository update ticks (default: 60)
    ///
    /// Environment variable: `REPOFEED_POLLER_TICK_INTERVAL_SECONDS`
    #[serde(default = "default_poller_tick_interval_seconds")]
    pub tick_interval_seconds: u64,

    /// Seconds between full priority-queue rebuilds (default: 900)
    ///
    /// Environment variable: `REPOFEED_POLLER_REQUEUE_INTERVAL_SECONDS`
    #[serde(default = "default_poller_requeue_interval_seconds")]
    pub requeue_interval_seconds: u64,

    /// Maximum number of items retained in the feed (default: 200)
    ///
    /// Environment variable: `REPOFEED_POLLER_FEED_LIMIT`
    #[serde(default = "default_poller_feed_limit")]
    pub feed_limit: usize,

    /// Commit statistics fetched per repository update (default: 5)
    ///
    /// Environment variable: `REPOFEED_POLLER_COMMIT_STAT_FANOUT`
    #[serde(default = "default_poller_commit_stat_fanout")]
    pub commit_stat_fanout: usize,

    /// Entries kept in the commit statistics LRU (default: 2048)
    #[serde(default = "default_poller_commit_stat_cache_capacity")]
    pub commit_stat_cache_capacity: usize,

    /// Entries kept in the ETag LRU (default: 4096)
    #[serde(default = "default_poller_validator_cache_capacity")]
    pub validator_cache_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            repos: Vec::new(),
            github_token: None,
            github_api_base: default_github_api_base(),
            http_timeout_seconds: default_http_timeout_seconds(),
            poller: PollerConfig::default(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_poller_tick_interval_seconds(),
            requeue_interval_seconds: default_poller_requeue_interval_seconds(),
            feed_limit: default_poller_feed_limit(),
            commit_stat_fanout: default_poller_commit_stat_fanout(),
            commit_stat_cache_capacity: default_poller_commit_stat_cache_capacity(),
            validator_cache_capacity: default_poller_validator_cache_capacity(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.github_token.is_some() {
            config.github_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repos.is_empty() {
            return Err(ConfigError::MissingRepos);
        }

        for repo in &self.repos {
            if !is_valid_repo_id(&repo.id) {
                return Err(ConfigError::InvalidRepoId {
                    value: repo.id.clone(),
                });
            }
        }

        self.bind_addr()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: self.api_bind_addr.clone(),
                source,
            })?;

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.http_timeout_seconds == 0 {
            return Err(ConfigError::InvalidHttpTimeout {
                value: self.http_timeout_seconds,
            });
        }

        self.poller.validate()
    }
}

impl PollerConfig {
    /// Validate poller configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds == 0 {
            return Err(ConfigError::InvalidTickInterval {
                value: self.tick_interval_seconds,
            });
        }

        if self.requeue_interval_seconds <= self.tick_interval_seconds {
            return Err(ConfigError::InvalidRequeueInterval {
                value: self.requeue_interval_seconds,
                tick: self.tick_interval_seconds,
            });
        }

        if self.feed_limit == 0 || self.feed_limit > 5000 {
            return Err(ConfigError::InvalidFeedLimit {
                value: self.feed_limit,
            });
        }

        if self.commit_stat_fanout > 100 {
            return Err(ConfigError::InvalidCommitStatFanout {
                value: self.commit_stat_fanout,
            });
        }

        if self.commit_stat_cache_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity {
                field: "commit_stat_cache_capacity".to_string(),
            });
        }

        if self.validator_cache_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity {
                field: "validator_cache_capacity".to_string(),
            });
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_poller_tick_interval_seconds() -> u64 {
    60
}

fn default_poller_requeue_interval_seconds() -> u64 {
    900
}

fn default_poller_feed_limit() -> usize {
    200
}

fn default_poller_commit_stat_fanout() -> usize {
    5
}

fn default_poller_commit_stat_cache_capacity() -> usize {
    2048
}

fn default_poller_validator_cache_capacity() -> usize {
    4096
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("no repositories configured; set REPOFEED_REPOS")]
    MissingRepos,
    #[error("invalid repository identifier '{value}', expected owner/name")]
    InvalidRepoId { value: String },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("http timeout must be positive, got {value}")]
    InvalidHttpTimeout { value: u64 },
    #[error("poller tick interval must be at least 1 second, got {value}")]
    InvalidTickInterval { value: u64 },
    #[error("poller requeue interval ({value}) must be greater than the tick interval ({tick})")]
    InvalidRequeueInterval { value: u64, tick: u64 },
    #[error("feed limit must be between 1 and 5000, got {value}")]
    InvalidFeedLimit { value: usize },
    #[error("commit stat fan-out must not exceed 100, got {value}")]
    InvalidCommitStatFanout { value: usize },
    #[error("{field} must be at least 1")]
    InvalidCacheCapacity { field: String },
}

fn is_valid_repo_id(id: &str) -> bool {
    let mut parts = id.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) => {
            !owner.is_empty()
                && !name.is_empty()
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
        }
        _ => false,
    }
}

/// Parse the `REPOFEED_REPOS` list: `owner/name` or `owner/name=Label`, comma separated.
pub fn parse_repo_list(raw: &str) -> Vec<RepoRef> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((id, label)) if !label.trim().is_empty() => {
                RepoRef::new(id.trim(), label.trim())
            }
            Some((id, _)) => RepoRef::unlabeled(id.trim()),
            None => RepoRef::unlabeled(entry),
        })
        .collect()
}

/// Loads configuration using layered `.env` files and `REPOFEED_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration; process environment wins over every env file.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("REPOFEED_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let repos = layered
            .remove("REPOS")
            .map(|v| parse_repo_list(&v))
            .unwrap_or_default();
        let github_token = layered.remove("GITHUB_TOKEN").and_then(|val| {
            let trimmed = val.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });
        let github_api_base = layered
            .remove("GITHUB_API_BASE")
            .filter(|v| !v.is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(default_github_api_base);
        let http_timeout_seconds = parse_or_default(
            &mut layered,
            "HTTP_TIMEOUT_SECONDS",
            default_http_timeout_seconds,
        )?;

        let poller = PollerConfig {
            tick_interval_seconds: parse_or_default(
                &mut layered,
                "POLLER_TICK_INTERVAL_SECONDS",
                default_poller_tick_interval_seconds,
            )?,
            requeue_interval_seconds: parse_or_default(
                &mut layered,
                "POLLER_REQUEUE_INTERVAL_SECONDS",
                default_poller_requeue_interval_seconds,
            )?,
            feed_limit: parse_or_default(
                &mut layered,
                "POLLER_FEED_LIMIT",
                default_poller_feed_limit,
            )?,
            commit_stat_fanout: parse_or_default(
                &mut layered,
                "POLLER_COMMIT_STAT_FANOUT",
                default_poller_commit_stat_fanout,
            )?,
            commit_stat_cache_capacity: parse_or_default(
                &mut layered,
                "POLLER_COMMIT_STAT_CACHE_CAPACITY",
                default_poller_commit_stat_cache_capacity,
            )?,
            validator_cache_capacity: parse_or_default(
                &mut layered,
                "POLLER_VALIDATOR_CACHE_CAPACITY",
                default_poller_validator_cache_capacity,
            )?,
        };

        Ok(AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            repos,
            github_token,
            github_api_base,
            http_timeout_seconds,
            poller,
        })
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("REPOFEED_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("REPOFEED_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_or_default<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: fn() -> T,
) -> Result<T, ConfigError> {
    match layered.remove(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: format!("REPOFEED_{}", key),
            value: raw,
        }),
        None => Ok(default()),
    }
}

//! In-memory repository cache
//!
//! All state sits behind one `RwLock`. The derived feed is an
//! `Arc<Vec<FeedItem>>` replaced in a single write, so readers always see a
//! complete feed. Nothing here is held across an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::github::RawEvent;
use crate::models::{CommitStat, FeedItem, RateBudget, RepoInfo, RepoRef, RepoSnapshot};

/// Branch reported when nothing better is known.
pub const DEFAULT_BRANCH: &str = "main";

struct StoreState {
    repos: HashMap<String, RepoInfo>,
    events: BTreeMap<String, Arc<Vec<RawEvent>>>,
    feed: Arc<Vec<FeedItem>>,
    commit_stats: LruCache<String, CommitStat>,
    rate_budget: Option<RateBudget>,
    refreshed_at: HashMap<String, DateTime<Utc>>,
}

/// Process-wide cache shared by the scheduler and the read-only API.
pub struct Store {
    state: RwLock<StoreState>,
}

fn commit_key(repo_id: &str, sha: &str) -> String {
    format!("{}@{}", repo_id, sha)
}

impl Store {
    pub fn new(commit_stat_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(commit_stat_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: RwLock::new(StoreState {
                repos: HashMap::new(),
                events: BTreeMap::new(),
                feed: Arc::new(Vec::new()),
                commit_stats: LruCache::new(capacity),
                rate_budget: None,
                refreshed_at: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put_repo_info(&self, info: RepoInfo) {
        self.write().repos.insert(info.id.clone(), info);
    }

    pub fn repo_info(&self, repo_id: &str) -> Option<RepoInfo> {
        self.read().repos.get(repo_id).cloned()
    }

    pub fn pushed_at(&self, repo_id: &str) -> Option<DateTime<Utc>> {
        self.read().repos.get(repo_id).and_then(|info| info.pushed_at)
    }

    /// Cached metadata for `repos`, in the given order; repos never fetched are omitted.
    pub fn repo_snapshots(&self, repos: &[RepoRef]) -> Vec<RepoSnapshot> {
        let state = self.read();
        repos
            .iter()
            .filter_map(|repo_ref| {
                state.repos.get(&repo_ref.id).map(|info| RepoSnapshot {
                    repo: info.clone(),
                    refreshed_at: state.refreshed_at.get(&repo_ref.id).copied(),
                })
            })
            .collect()
    }

    /// Store an event batch. An empty batch never replaces a populated one.
    ///
    /// Returns `true` when the stored batch changed.
    pub fn store_events(&self, repo_id: &str, events: Vec<RawEvent>) -> bool {
        let mut state = self.write();
        if events.is_empty() && state.events.contains_key(repo_id) {
            return false;
        }
        state.events.insert(repo_id.to_string(), Arc::new(events));
        true
    }

    pub fn events(&self, repo_id: &str) -> Option<Arc<Vec<RawEvent>>> {
        self.read().events.get(repo_id).cloned()
    }

    /// All cached batches ordered by repository id.
    pub fn event_batches(&self) -> Vec<Arc<Vec<RawEvent>>> {
        self.read().events.values().cloned().collect()
    }

    pub fn has_commit_stat(&self, repo_id: &str, sha: &str) -> bool {
        self.read().commit_stats.contains(&commit_key(repo_id, sha))
    }

    pub fn commit_stat(&self, repo_id: &str, sha: &str) -> Option<CommitStat> {
        self.read().commit_stats.peek(&commit_key(repo_id, sha)).cloned()
    }

    pub fn put_commit_stat(&self, repo_id: &str, stat: CommitStat) {
        let key = commit_key(repo_id, &stat.sha);
        self.write().commit_stats.put(key, stat);
    }

    pub fn commit_stat_count(&self) -> usize {
        self.read().commit_stats.len()
    }

    /// Attach the latest cached stat to every commit item; items without one are left as they are.
    pub fn attach_commit_stats(&self, items: &mut [FeedItem]) {
        let state = self.read();
        for item in items.iter_mut() {
            let Some(key) = item.commit_key().map(|(repo_id, sha)| commit_key(repo_id, sha))
            else {
                continue;
            };
            if let Some(stat) = state.commit_stats.peek(&key) {
                item.stats = Some(stat.clone());
            }
        }
    }

    pub fn replace_feed(&self, items: Vec<FeedItem>) {
        self.write().feed = Arc::new(items);
    }

    pub fn feed(&self) -> Arc<Vec<FeedItem>> {
        Arc::clone(&self.read().feed)
    }

    /// Current feed with commit stats refreshed from the cache at read time.
    pub fn enriched_feed(&self) -> Vec<FeedItem> {
        let mut items = self.feed().as_ref().clone();
        self.attach_commit_stats(&mut items);
        items
    }

    /// Last known default branch, `main` when the repository was never fetched.
    pub fn default_branch(&self, repo_id: &str) -> String {
        self.read()
            .repos
            .get(repo_id)
            .map(|info| info.default_branch.clone())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
    }

    pub fn mark_refreshed(&self, repo_id: &str, at: DateTime<Utc>) {
        self.write().refreshed_at.insert(repo_id.to_string(), at);
    }

    pub fn refreshed_at(&self, repo_id: &str) -> Option<DateTime<Utc>> {
        self.read().refreshed_at.get(repo_id).copied()
    }

    pub fn set_rate_budget(&self, budget: RateBudget) {
        self.write().rate_budget = Some(budget);
    }

    pub fn rate_budget(&self) -> Option<RateBudget> {
        self.read().rate_budget
    }
}

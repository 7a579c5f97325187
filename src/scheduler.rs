//! # Update Scheduler
//!
//! Background task that keeps the repository cache warm. Startup runs a
//! concurrent bulk load of every configured repository; afterwards one
//! repository is refreshed per tick, visiting the most recently pushed
//! repositories first, and the visiting order is recomputed on a slower
//! requeue timer. Each update runs in its own task so a failing or
//! panicking repository never takes the others down.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, histogram};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AppConfig;
use crate::feed;
use crate::github::ActivitySource;
use crate::models::{CommitStat, RepoRef};
use crate::store::Store;

/// Lifecycle of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    BulkLoading,
    Queued,
    Ticking,
    Requeuing,
}

/// Outcome of one step of a repository update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepOutcome {
    #[default]
    Skipped,
    Updated,
    Unchanged,
    Failed,
}

/// What a single repository update did. Updates never return errors; failures are recorded here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateReport {
    pub repo_id: String,
    pub metadata: StepOutcome,
    pub events: StepOutcome,
    pub commit_stats_requested: usize,
    pub commit_stats_failed: usize,
    pub panicked: bool,
}

impl UpdateReport {
    fn new(repo_id: &str) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            ..Self::default()
        }
    }

    fn panicked(repo_id: &str) -> Self {
        Self {
            metadata: StepOutcome::Failed,
            events: StepOutcome::Failed,
            panicked: true,
            ..Self::new(repo_id)
        }
    }

    pub fn is_success(&self) -> bool {
        !self.panicked && self.metadata != StepOutcome::Failed && self.events != StepOutcome::Failed
    }
}

/// Background scheduler service.
pub struct UpdateScheduler {
    config: Arc<AppConfig>,
    source: Arc<dyn ActivitySource>,
    store: Arc<Store>,
    queue: VecDeque<RepoRef>,
    phase: SchedulerPhase,
}

impl UpdateScheduler {
    pub fn new(config: Arc<AppConfig>, source: Arc<dyn ActivitySource>, store: Arc<Store>) -> Self {
        Self {
            config,
            source,
            store,
            queue: VecDeque::new(),
            phase: SchedulerPhase::Idle,
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    /// Repository ids in the order the coming ticks will visit them.
    pub fn queued_ids(&self) -> Vec<&str> {
        self.queue.iter().map(|repo| repo.id.as_str()).collect()
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    ///
    /// Shutdown is only observed between ticks; an in-flight update always completes.
    #[instrument(skip_all)]
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(repos = self.config.repos.len(), "Starting update scheduler");

        if self.phase == SchedulerPhase::Idle {
            self.bulk_load().await;
        }

        let tick_period = Duration::from_secs(self.config.poller.tick_interval_seconds);
        let requeue_period = Duration::from_secs(self.config.poller.requeue_interval_seconds);

        let mut ticker = interval_at(Instant::now() + tick_period, tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut requeue = interval_at(Instant::now() + requeue_period, requeue_period);
        requeue.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Update scheduler shutdown requested");
                    break;
                }
                _ = requeue.tick() => {
                    self.requeue();
                    ticker.reset();
                }
                _ = ticker.tick() => {
                    let tick_started = std::time::Instant::now();
                    self.tick().await;
                    histogram!("repofeed_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Update scheduler stopped");
    }

    /// Update every configured repository concurrently, then rebuild the feed once.
    #[instrument(skip_all, fields(repos = self.config.repos.len()))]
    pub async fn bulk_load(&mut self) -> Vec<UpdateReport> {
        self.phase = SchedulerPhase::BulkLoading;
        let started = std::time::Instant::now();

        let handles: Vec<_> = self
            .config
            .repos
            .iter()
            .map(|repo| {
                let handle = tokio::spawn(update_repo(
                    Arc::clone(&self.source),
                    Arc::clone(&self.store),
                    repo.clone(),
                    self.config.poller.commit_stat_fanout,
                ));
                (repo.id.clone(), handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (repo_id, handle) in handles {
            reports.push(match handle.await {
                Ok(report) => report,
                Err(err) => {
                    counter!("repofeed_update_failures_total", "kind" => "panic").increment(1);
                    error!(error = %err, repo = %repo_id, "Repository update task failed");
                    UpdateReport::panicked(&repo_id)
                }
            });
        }

        self.sync_rate_budget();
        let feed_len = self.rebuild_feed();
        self.build_queue();
        self.phase = SchedulerPhase::Queued;

        let failed = reports.iter().filter(|r| !r.is_success()).count();
        info!(
            updated = reports.len() - failed,
            failed,
            feed_items = feed_len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Bulk load completed"
        );
        reports
    }

    /// Order repositories by descending `pushed_at`.
    ///
    /// Only repositories with a known push time move, and only among the
    /// slots they already occupy; the rest keep their configured position.
    pub fn build_queue(&mut self) {
        let mut ordered = self.config.repos.clone();
        let mut slots = Vec::new();
        let mut known = Vec::new();

        for (slot, repo) in self.config.repos.iter().enumerate() {
            if let Some(pushed_at) = self.store.pushed_at(&repo.id) {
                slots.push(slot);
                known.push((pushed_at, repo.clone()));
            }
        }

        known.sort_by(|a, b| b.0.cmp(&a.0));
        for (slot, (_, repo)) in slots.into_iter().zip(known) {
            ordered[slot] = repo;
        }

        self.queue = ordered.into();
        debug!(queue = ?self.queued_ids(), "Update queue rebuilt");
    }

    /// Recompute priorities from current metadata.
    pub fn requeue(&mut self) {
        self.phase = SchedulerPhase::Requeuing;
        self.build_queue();
        self.phase = SchedulerPhase::Queued;
    }

    /// Update the repository at the head of the queue and rebuild the feed.
    ///
    /// Returns `None` when the tick was skipped because the upstream budget is exhausted.
    pub async fn tick(&mut self) -> Option<UpdateReport> {
        if self.queue.is_empty() {
            self.build_queue();
        }

        let budget = self.source.rate_budget().or_else(|| self.store.rate_budget());
        if let Some(budget) = budget
            && budget.is_exhausted(Utc::now())
        {
            warn!(
                reset_at = %budget.reset_at,
                next = self.queue.front().map(|repo| repo.id.as_str()),
                "Rate budget exhausted, skipping tick"
            );
            return None;
        }

        let repo = self.queue.pop_front()?;
        self.phase = SchedulerPhase::Ticking;

        let handle = tokio::spawn(update_repo(
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            repo.clone(),
            self.config.poller.commit_stat_fanout,
        ));
        let report = match handle.await {
            Ok(report) => report,
            Err(err) => {
                counter!("repofeed_update_failures_total", "kind" => "panic").increment(1);
                error!(error = %err, repo = %repo.id, "Repository update task failed");
                UpdateReport::panicked(&repo.id)
            }
        };

        self.sync_rate_budget();
        let feed_len = self.rebuild_feed();
        self.phase = SchedulerPhase::Queued;

        debug!(
            repo = %repo.id,
            metadata = ?report.metadata,
            events = ?report.events,
            commit_stats = report.commit_stats_requested,
            feed_items = feed_len,
            remaining = self.queue.len(),
            "Scheduler tick completed"
        );
        Some(report)
    }

    fn rebuild_feed(&self) -> usize {
        feed::rebuild_feed(&self.store, &self.config.repos, self.config.poller.feed_limit)
    }

    fn sync_rate_budget(&self) {
        if let Some(budget) = self.source.rate_budget() {
            self.store.set_rate_budget(budget);
        }
    }
}

/// Refresh one repository: metadata and events concurrently, then a bounded
/// batch of commit statistics for pushes not seen before.
///
/// Failures are logged and reported; previously cached values stay in place.
#[instrument(skip(source, store, repo), fields(repo = %repo.id))]
pub async fn update_repo(
    source: Arc<dyn ActivitySource>,
    store: Arc<Store>,
    repo: RepoRef,
    commit_stat_fanout: usize,
) -> UpdateReport {
    let mut report = UpdateReport::new(&repo.id);

    let (info, events) = tokio::join!(
        source.get_repo_info(&repo.id),
        source.get_repo_events(&repo.id)
    );

    report.metadata = match info {
        Ok(Some(mut info)) => {
            info.label = repo.label.clone();
            store.put_repo_info(info);
            StepOutcome::Updated
        }
        Ok(None) => StepOutcome::Unchanged,
        Err(err) => {
            counter!("repofeed_update_failures_total", "kind" => "metadata").increment(1);
            warn!(error = %err, "Metadata fetch failed, keeping cached value");
            StepOutcome::Failed
        }
    };

    report.events = match events {
        Ok(events) => {
            if store.store_events(&repo.id, events) {
                StepOutcome::Updated
            } else {
                StepOutcome::Unchanged
            }
        }
        Err(err) => {
            counter!("repofeed_update_failures_total", "kind" => "events").increment(1);
            warn!(error = %err, "Events fetch failed, keeping cached batch");
            StepOutcome::Failed
        }
    };

    if report.metadata != StepOutcome::Failed || report.events != StepOutcome::Failed {
        store.mark_refreshed(&repo.id, Utc::now());
    }

    if report.events == StepOutcome::Failed {
        return report;
    }

    let pending = pending_commit_shas(&store, &repo.id, commit_stat_fanout);
    report.commit_stats_requested = pending.len();
    report.commit_stats_failed = fetch_commit_stats(&source, &store, &repo.id, pending).await;

    report
}

/// Push SHAs from the cached batch without a cached stat, first `limit` in event order.
fn pending_commit_shas(store: &Store, repo_id: &str, limit: usize) -> Vec<String> {
    let Some(batch) = store.events(repo_id) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    batch
        .iter()
        .flat_map(|event| event.push_commit_shas())
        .filter(|sha| seen.insert(sha.clone()))
        .filter(|sha| !store.has_commit_stat(repo_id, sha))
        .take(limit)
        .collect()
}

/// Fetch stats concurrently; returns the number of failures.
async fn fetch_commit_stats(
    source: &Arc<dyn ActivitySource>,
    store: &Arc<Store>,
    repo_id: &str,
    shas: Vec<String>,
) -> usize {
    let handles: Vec<_> = shas
        .into_iter()
        .map(|sha| {
            let source = Arc::clone(source);
            let owner = repo_id.to_string();
            let requested = sha.clone();
            let handle =
                tokio::spawn(async move { source.get_commit_stat(&owner, &requested).await });
            (sha, handle)
        })
        .collect();

    let mut failures = 0;
    for (sha, handle) in handles {
        match handle.await {
            Ok(Ok(Some(stat))) => {
                counter!("repofeed_commit_stats_fetched_total").increment(1);
                store.put_commit_stat(repo_id, stat);
            }
            Ok(Ok(None)) => {
                if !store.has_commit_stat(repo_id, &sha) {
                    store.put_commit_stat(repo_id, CommitStat::zero(sha));
                }
            }
            Ok(Err(err)) => {
                failures += 1;
                counter!("repofeed_update_failures_total", "kind" => "commit_stat").increment(1);
                warn!(error = %err, sha = %sha, "Commit stat fetch failed");
            }
            Err(err) => {
                failures += 1;
                counter!("repofeed_update_failures_total", "kind" => "panic").increment(1);
                error!(error = %err, sha = %sha, "Commit stat task failed");
            }
        }
    }
    failures
}

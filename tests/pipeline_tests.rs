//! End-to-end polling pipeline against a mocked GitHub API.

use std::sync::Arc;
use std::time::Duration;

use repofeed::config::{AppConfig, PollerConfig};
use repofeed::github::{ActivitySource, GitHubClient};
use repofeed::models::{FeedKind, RepoRef};
use repofeed::scheduler::{StepOutcome, UpdateScheduler, update_repo};
use repofeed::store::Store;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rate_headers(template: ResponseTemplate, remaining: u32) -> ResponseTemplate {
    template
        .insert_header("x-ratelimit-limit", "5000")
        .insert_header("x-ratelimit-remaining", remaining.to_string().as_str())
        .insert_header("x-ratelimit-reset", "1900000000")
}

async fn mount_repo(server: &MockServer, repo: &str, pushed_at: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{repo}")))
        .respond_with(rate_headers(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"meta-v1\"")
                .set_body_json(json!({
                    "full_name": repo,
                    "html_url": format!("https://github.com/{repo}"),
                    "description": "demo",
                    "stargazers_count": 42,
                    "forks_count": 3,
                    "open_issues_count": 1,
                    "pushed_at": pushed_at,
                    "default_branch": "trunk"
                })),
            4990,
        ))
        .mount(server)
        .await;
}

async fn mount_events(server: &MockServer, repo: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{repo}/events")))
        .and(header("if-none-match", "\"events-v1\""))
        .respond_with(rate_headers(ResponseTemplate::new(304), 4980))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/repos/{repo}/events")))
        .respond_with(rate_headers(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"events-v1\"")
                .set_body_json(json!([
                    {
                        "id": "100",
                        "type": "PushEvent",
                        "actor": {"login": "octocat", "display_login": "octocat"},
                        "created_at": "2025-04-01T10:00:00Z",
                        "payload": {
                            "ref": "refs/heads/trunk",
                            "commits": [
                                {"sha": "aaa111", "message": "Fix parser\n\nDetails", "author": {"name": "Mona"}},
                                {"sha": "bbb222", "message": "Add tests", "author": {"name": "Hubot"}}
                            ]
                        }
                    },
                    {
                        "id": "99",
                        "type": "IssuesEvent",
                        "actor": {"login": "hubot"},
                        "created_at": "2025-04-01T09:00:00Z",
                        "payload": {
                            "action": "opened",
                            "issue": {"number": 12, "title": "Crash", "html_url": format!("https://github.com/{repo}/issues/12")}
                        }
                    }
                ])),
            4985,
        ))
        .with_priority(2)
        .mount(server)
        .await;
}

async fn mount_commit(server: &MockServer, repo: &str, sha: &str, additions: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{repo}/commits/{sha}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": sha,
            "stats": {"additions": additions, "deletions": 2, "total": additions + 2},
            "files": [{"filename": "src/lib.rs"}]
        })))
        .mount(server)
        .await;
}

/// Commit that answers 304 whenever its ETag is sent back.
async fn mount_tagged_commit(server: &MockServer, repo: &str, sha: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{repo}/commits/{sha}")))
        .and(header("if-none-match", "\"c\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/repos/{repo}/commits/{sha}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"c\"")
                .set_body_json(json!({
                    "sha": sha,
                    "stats": {"additions": 7, "deletions": 3, "total": 10},
                    "files": [{"filename": "src/lib.rs"}, {"filename": "README.md"}]
                })),
        )
        .with_priority(2)
        .mount(server)
        .await;
}

fn config(server: &MockServer, repos: Vec<RepoRef>) -> Arc<AppConfig> {
    Arc::new(AppConfig {
        repos,
        github_api_base: server.uri(),
        poller: PollerConfig {
            feed_limit: 10,
            ..PollerConfig::default()
        },
        ..AppConfig::default()
    })
}

fn build(config: &Arc<AppConfig>) -> (UpdateScheduler, Arc<Store>) {
    let client = GitHubClient::with_api_base(
        config.github_api_base.clone(),
        None,
        Duration::from_secs(5),
        config.poller.validator_cache_capacity,
    )
    .expect("client builds");
    let source: Arc<dyn ActivitySource> = Arc::new(client);
    let store = Arc::new(Store::new(config.poller.commit_stat_cache_capacity));
    let scheduler = UpdateScheduler::new(Arc::clone(config), source, Arc::clone(&store));
    (scheduler, store)
}

#[tokio::test]
async fn bulk_load_builds_enriched_feed() {
    let server = MockServer::start().await;
    mount_repo(&server, "acme/widgets", "2025-04-01T10:00:00Z").await;
    mount_events(&server, "acme/widgets").await;
    mount_commit(&server, "acme/widgets", "aaa111", 10).await;
    mount_commit(&server, "acme/widgets", "bbb222", 20).await;

    let config = config(&server, vec![RepoRef::new("acme/widgets", "Widgets")]);
    let (mut scheduler, store) = build(&config);

    let reports = scheduler.bulk_load().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_success());
    assert_eq!(reports[0].commit_stats_requested, 2);

    let info = store.repo_info("acme/widgets").expect("metadata cached");
    assert_eq!(info.label, "Widgets");
    assert_eq!(info.stars, 42);
    assert_eq!(store.default_branch("acme/widgets"), "trunk");
    assert!(store.refreshed_at("acme/widgets").is_some());

    let feed = store.feed();
    assert_eq!(feed.len(), 3);
    assert_eq!(feed[0].kind, FeedKind::Commit);
    assert_eq!(feed[0].title, "[trunk] Fix parser");
    assert_eq!(feed[0].repo_label, "Widgets");
    assert_eq!(feed[0].stats.as_ref().map(|s| s.additions), Some(10));
    assert_eq!(feed[1].stats.as_ref().map(|s| s.additions), Some(20));
    assert_eq!(feed[2].kind, FeedKind::Issue);

    let budget = store.rate_budget().expect("budget observed");
    assert_eq!(budget.limit, 5000);
}

#[tokio::test]
async fn unchanged_events_keep_cached_batch() {
    let server = MockServer::start().await;
    mount_repo(&server, "acme/widgets", "2025-04-01T10:00:00Z").await;
    mount_events(&server, "acme/widgets").await;
    mount_commit(&server, "acme/widgets", "aaa111", 1).await;
    mount_commit(&server, "acme/widgets", "bbb222", 1).await;

    let config = config(&server, vec![RepoRef::unlabeled("acme/widgets")]);
    let (mut scheduler, store) = build(&config);

    scheduler.bulk_load().await;
    let before = store.feed();

    let report = scheduler.tick().await.expect("tick ran");
    assert_eq!(report.events, StepOutcome::Unchanged);
    assert_eq!(report.commit_stats_requested, 0);
    assert_eq!(store.events("acme/widgets").unwrap().len(), 2);
    assert_eq!(store.feed().as_ref(), before.as_ref());
    assert_eq!(store.rate_budget().unwrap().limit, 5000);
}

#[tokio::test]
async fn failing_repository_is_isolated() {
    let server = MockServer::start().await;
    mount_repo(&server, "acme/widgets", "2025-04-01T10:00:00Z").await;
    mount_events(&server, "acme/widgets").await;
    mount_commit(&server, "acme/widgets", "aaa111", 1).await;
    mount_commit(&server, "acme/widgets", "bbb222", 1).await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/broken/events"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let config = config(
        &server,
        vec![
            RepoRef::unlabeled("acme/broken"),
            RepoRef::unlabeled("acme/widgets"),
        ],
    );
    let (mut scheduler, store) = build(&config);

    let reports = scheduler.bulk_load().await;
    assert!(!reports[0].is_success());
    assert!(reports[1].is_success());

    assert!(store.repo_info("acme/broken").is_none());
    assert!(store.events("acme/broken").is_none());
    assert!(store.refreshed_at("acme/broken").is_none());
    assert_eq!(store.feed().len(), 3);

    // unknown repo keeps its slot at the head of the queue
    assert_eq!(scheduler.queued_ids(), vec!["acme/broken", "acme/widgets"]);
}

#[tokio::test]
async fn evicted_commit_stat_is_refetched_in_full() {
    let server = MockServer::start().await;
    mount_repo(&server, "acme/widgets", "2025-04-01T10:00:00Z").await;
    mount_events(&server, "acme/widgets").await;
    mount_tagged_commit(&server, "acme/widgets", "aaa111").await;
    mount_tagged_commit(&server, "acme/widgets", "bbb222").await;

    let config = config(&server, vec![RepoRef::unlabeled("acme/widgets")]);
    let client = GitHubClient::with_api_base(
        config.github_api_base.clone(),
        None,
        Duration::from_secs(5),
        config.poller.validator_cache_capacity,
    )
    .expect("client builds");
    let source: Arc<dyn ActivitySource> = Arc::new(client);
    let store = Arc::new(Store::new(1));
    let repo = RepoRef::unlabeled("acme/widgets");

    update_repo(Arc::clone(&source), Arc::clone(&store), repo.clone(), 5).await;
    assert_eq!(store.commit_stat_count(), 1);
    assert!(store.commit_stat("acme/widgets", "aaa111").is_none());

    let report = update_repo(Arc::clone(&source), Arc::clone(&store), repo, 5).await;
    assert_eq!(report.events, StepOutcome::Unchanged);
    assert_eq!(report.commit_stats_requested, 1);

    let stat = store
        .commit_stat("acme/widgets", "aaa111")
        .expect("evicted stat fetched again");
    assert_eq!(stat.additions, 7);
    assert_eq!(stat.deletions, 3);
    assert_eq!(stat.files_changed, 2);
}

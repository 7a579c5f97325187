//! # Feed builder
//!
//! Turns cached raw event batches into the bounded, time-ordered activity
//! feed. Building is a pure transformation of the store contents; only the
//! final swap writes back.

use std::collections::HashMap;

use metrics::gauge;
use thiserror::Error;
use tracing::{debug, warn};

use crate::github::types::{
    EventPayload, GITHUB_WEB_BASE, IssueCommentPayload, PullRequestPayload, PushPayload,
    RefPayload,
};
use crate::github::RawEvent;
use crate::models::{FeedItem, FeedKind, RepoRef};
use crate::store::Store;

const COMMENT_EXCERPT_CHARS: usize = 80;

/// Feed construction errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed event {event_id}: {reason}")]
    MalformedEvent { event_id: String, reason: String },
}

impl FeedError {
    fn malformed(event: &RawEvent, reason: impl Into<String>) -> Self {
        FeedError::MalformedEvent {
            event_id: event.id.clone(),
            reason: reason.into(),
        }
    }
}

/// Map one raw event to its feed items.
///
/// Push events expand to one item per commit; every other kind yields
/// exactly one item.
pub fn items_for_event(event: &RawEvent) -> Result<Vec<FeedItem>, FeedError> {
    let timestamp = event
        .timestamp()
        .ok_or_else(|| FeedError::malformed(event, "missing or invalid created_at"))?;
    let payload =
        EventPayload::parse(event).map_err(|err| FeedError::malformed(event, err.to_string()))?;

    let repo = event.repo_id.as_str();
    let actor = event.actor_name();
    let repo_url = format!("{}/{}", GITHUB_WEB_BASE, repo);
    let item = |kind: FeedKind, title: String, url: String| {
        FeedItem::new(kind, timestamp, repo, actor, title, url)
    };

    let items = match payload {
        EventPayload::Push(push) => return Ok(push_items(event, &push, timestamp)),
        EventPayload::PullRequest(pr) => {
            let annotation = pull_request_annotation(&pr);
            let PullRequestPayload { pull_request, .. } = pr;
            vec![
                item(
                    FeedKind::PullRequest,
                    format!("#{} {}", pull_request.number, pull_request.title),
                    pull_request.html_url,
                )
                .with_annotation(annotation),
            ]
        }
        EventPayload::Issues(issues) => vec![
            item(
                FeedKind::Issue,
                format!("#{} {}", issues.issue.number, issues.issue.title),
                issues.issue.html_url,
            )
            .with_annotation(issues.action),
        ],
        EventPayload::IssueComment(comment) => vec![comment_item(comment, item)],
        EventPayload::Release(release) => {
            let release = release.release;
            let name = release
                .name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| release.tag_name.clone());
            vec![
                item(FeedKind::Release, format!("Released {}", name), release.html_url)
                    .with_annotation(release.tag_name),
            ]
        }
        EventPayload::Create(created) => {
            let url = ref_url(&repo_url, &created);
            vec![item(FeedKind::Create, ref_title("Created", &created), url)]
        }
        EventPayload::Delete(deleted) => vec![item(
            FeedKind::Delete,
            ref_title("Deleted", &deleted),
            repo_url,
        )],
        EventPayload::Fork(fork) => vec![item(
            FeedKind::Fork,
            format!("Forked to {}", fork.forkee.full_name),
            fork.forkee.html_url,
        )],
        EventPayload::Watch(_) => vec![item(FeedKind::Star, format!("Starred {}", repo), repo_url)],
        EventPayload::Other => vec![item(FeedKind::Other, event.event_type.clone(), repo_url)],
    };

    Ok(items)
}

fn push_items(
    event: &RawEvent,
    push: &PushPayload,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> Vec<FeedItem> {
    let repo = event.repo_id.as_str();
    let branch = push.branch();

    if push.commits.is_empty() {
        let item = FeedItem::new(
            FeedKind::Push,
            timestamp,
            repo,
            event.actor_name(),
            format!("Pushed to {}", branch),
            format!("{}/{}/tree/{}", GITHUB_WEB_BASE, repo, branch),
        );
        return vec![match &push.head {
            Some(head) => item.with_sha(head.clone()),
            None => item,
        }];
    }

    push.commits
        .iter()
        .map(|commit| {
            let first_line = commit.message.lines().next().unwrap_or_default();
            let item = FeedItem::new(
                FeedKind::Commit,
                timestamp,
                repo,
                event.actor_name(),
                format!("[{}] {}", branch, first_line),
                format!("{}/{}/commit/{}", GITHUB_WEB_BASE, repo, commit.sha),
            )
            .with_sha(commit.sha.clone());
            if commit.author.name.is_empty() {
                item
            } else {
                item.with_annotation(commit.author.name.clone())
            }
        })
        .collect()
}

fn pull_request_annotation(pr: &PullRequestPayload) -> String {
    match pr.action.as_str() {
        "closed" if pr.pull_request.is_merged() => "merged".to_string(),
        "closed" => "closed".to_string(),
        other => other.to_string(),
    }
}

fn comment_item(
    payload: IssueCommentPayload,
    item: impl Fn(FeedKind, String, String) -> FeedItem,
) -> FeedItem {
    let excerpt = excerpt(&payload.comment.body);
    let title = format!(
        "Commented on #{} {}",
        payload.issue.number, payload.issue.title
    );
    let comment = item(FeedKind::Comment, title, payload.comment.html_url);
    if excerpt.is_empty() {
        comment
    } else {
        comment.with_annotation(excerpt)
    }
}

fn excerpt(body: &str) -> String {
    let first_line = body.lines().find(|line| !line.trim().is_empty()).unwrap_or_default();
    let first_line = first_line.trim();
    if first_line.chars().count() > COMMENT_EXCERPT_CHARS {
        let cut: String = first_line.chars().take(COMMENT_EXCERPT_CHARS).collect();
        format!("{}...", cut)
    } else {
        first_line.to_string()
    }
}

fn ref_title(verb: &str, payload: &RefPayload) -> String {
    match payload.git_ref.as_deref() {
        Some(name) if !name.is_empty() => format!("{} {} {}", verb, payload.ref_type, name),
        _ => format!("{} {}", verb, payload.ref_type),
    }
}

fn ref_url(repo_url: &str, payload: &RefPayload) -> String {
    match (payload.ref_type.as_str(), payload.git_ref.as_deref()) {
        ("branch", Some(name)) => format!("{}/tree/{}", repo_url, name),
        ("tag", Some(name)) => format!("{}/releases/tag/{}", repo_url, name),
        _ => repo_url.to_string(),
    }
}

/// Attach cached commit stats and configured display labels.
pub fn enrich(items: &mut [FeedItem], store: &Store, repos: &[RepoRef]) {
    store.attach_commit_stats(items);

    let labels: HashMap<&str, &str> = repos
        .iter()
        .map(|repo| (repo.id.as_str(), repo.label.as_str()))
        .collect();
    for item in items.iter_mut() {
        item.repo_label = labels
            .get(item.repo_id.as_str())
            .map(|label| label.to_string())
            .unwrap_or_else(|| item.repo_id.clone());
    }
}

/// Build the feed from every cached batch: expand, enrich, sort newest first, truncate.
pub fn build_feed(store: &Store, repos: &[RepoRef], limit: usize) -> Vec<FeedItem> {
    let mut items = Vec::new();
    let mut skipped = 0usize;

    for batch in store.event_batches() {
        for event in batch.iter() {
            match items_for_event(event) {
                Ok(mut mapped) => items.append(&mut mapped),
                Err(err) => {
                    skipped += 1;
                    warn!(repo = %event.repo_id, error = %err, "Skipping malformed event");
                }
            }
        }
    }

    enrich(&mut items, store, repos);
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    items.truncate(limit);

    debug!(items = items.len(), skipped, "Feed built");
    items
}

/// Rebuild and atomically replace the store's feed. Returns the new length.
pub fn rebuild_feed(store: &Store, repos: &[RepoRef], limit: usize) -> usize {
    let items = build_feed(store, repos, limit);
    let len = items.len();
    store.replace_feed(items);
    gauge!("repofeed_feed_items").set(len as f64);
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommitStat;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{Value, json};

    fn raw(id: &str, repo: &str, kind: &str, minutes: i64, payload: Value) -> RawEvent {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes);
        serde_json::from_value(json!({
            "id": id,
            "type": kind,
            "actor": {"login": "octocat"},
            "created_at": at.to_rfc3339(),
            "payload": payload,
            "repo_id": repo,
        }))
        .unwrap()
    }

    fn push(id: &str, repo: &str, minutes: i64, shas: &[&str]) -> RawEvent {
        let commits: Vec<Value> = shas
            .iter()
            .map(|sha| {
                json!({
                    "sha": sha,
                    "message": format!("change {sha}\n\nlonger body"),
                    "author": {"name": "Mona"}
                })
            })
            .collect();
        raw(
            id,
            repo,
            "PushEvent",
            minutes,
            json!({"ref": "refs/heads/main", "commits": commits}),
        )
    }

    #[test]
    fn test_push_expands_to_one_item_per_commit() {
        let items = items_for_event(&push("1", "a/b", 0, &["c1", "c2", "c3"])).unwrap();

        assert_eq!(items.len(), 3);
        let shas: Vec<_> = items.iter().filter_map(|i| i.sha.as_deref()).collect();
        assert_eq!(shas, vec!["c1", "c2", "c3"]);
        for item in &items {
            assert_eq!(item.kind, FeedKind::Commit);
            assert!(item.title.starts_with("[main] change "));
            assert!(!item.title.contains("longer body"));
            assert_eq!(item.annotation.as_deref(), Some("Mona"));
        }
        assert_eq!(items[0].url, "https://github.com/a/b/commit/c1");
    }

    #[test]
    fn test_push_without_commits_is_single_push_item() {
        let event = raw(
            "1",
            "a/b",
            "PushEvent",
            0,
            json!({"ref": "refs/heads/dev", "head": "abc", "commits": []}),
        );
        let items = items_for_event(&event).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, FeedKind::Push);
        assert_eq!(items[0].title, "Pushed to dev");
        assert!(items[0].commit_key().is_none());
    }

    #[test]
    fn test_pull_request_annotations() {
        let pr = |action: &str, merged: bool| {
            raw(
                "1",
                "a/b",
                "PullRequestEvent",
                0,
                json!({
                    "action": action,
                    "pull_request": {
                        "number": 7, "title": "Add thing",
                        "html_url": "https://github.com/a/b/pull/7", "merged": merged
                    }
                }),
            )
        };

        let merged = &items_for_event(&pr("closed", true)).unwrap()[0];
        assert_eq!(merged.annotation.as_deref(), Some("merged"));
        assert_eq!(merged.title, "#7 Add thing");
        assert_eq!(merged.icon, "pull-request");

        let closed = &items_for_event(&pr("closed", false)).unwrap()[0];
        assert_eq!(closed.annotation.as_deref(), Some("closed"));

        let opened = &items_for_event(&pr("opened", false)).unwrap()[0];
        assert_eq!(opened.annotation.as_deref(), Some("opened"));
    }

    #[test]
    fn test_single_item_kinds() {
        let cases = vec![
            (
                raw("1", "a/b", "IssuesEvent", 0, json!({"action": "opened",
                    "issue": {"number": 3, "title": "Bug", "html_url": "https://github.com/a/b/issues/3"}})),
                FeedKind::Issue,
            ),
            (
                raw("2", "a/b", "IssueCommentEvent", 0, json!({"action": "created",
                    "issue": {"number": 3, "title": "Bug", "html_url": "https://github.com/a/b/issues/3"},
                    "comment": {"html_url": "https://github.com/a/b/issues/3#c", "body": "\nSeen it too"}})),
                FeedKind::Comment,
            ),
            (
                raw("3", "a/b", "ReleaseEvent", 0, json!({"action": "published",
                    "release": {"tag_name": "v1.0", "name": "", "html_url": "https://github.com/a/b/releases/v1.0"}})),
                FeedKind::Release,
            ),
            (
                raw("4", "a/b", "CreateEvent", 0, json!({"ref": "feature", "ref_type": "branch"})),
                FeedKind::Create,
            ),
            (
                raw("5", "a/b", "DeleteEvent", 0, json!({"ref": "old", "ref_type": "tag"})),
                FeedKind::Delete,
            ),
            (
                raw("6", "a/b", "ForkEvent", 0, json!({"forkee": {"full_name": "c/b", "html_url": "https://github.com/c/b"}})),
                FeedKind::Fork,
            ),
            (
                raw("7", "a/b", "WatchEvent", 0, json!({"action": "started"})),
                FeedKind::Star,
            ),
        ];

        for (event, kind) in cases {
            let items = items_for_event(&event).unwrap();
            assert_eq!(items.len(), 1, "{}", event.event_type);
            assert_eq!(items[0].kind, kind);
            assert_eq!(items[0].icon, kind.default_icon());
        }

        let comment = raw("2", "a/b", "IssueCommentEvent", 0, json!({"action": "created",
            "issue": {"number": 3, "title": "Bug", "html_url": "https://github.com/a/b/issues/3"},
            "comment": {"html_url": "https://github.com/a/b/issues/3#c", "body": "\nSeen it too"}}));
        assert_eq!(
            items_for_event(&comment).unwrap()[0].annotation.as_deref(),
            Some("Seen it too")
        );

        let create = raw("4", "a/b", "CreateEvent", 0, json!({"ref": "feature", "ref_type": "branch"}));
        let created = &items_for_event(&create).unwrap()[0];
        assert_eq!(created.title, "Created branch feature");
        assert_eq!(created.url, "https://github.com/a/b/tree/feature");

        let release = raw("3", "a/b", "ReleaseEvent", 0, json!({"action": "published",
            "release": {"tag_name": "v1.0", "name": "", "html_url": "https://github.com/a/b/releases/v1.0"}}));
        assert_eq!(items_for_event(&release).unwrap()[0].title, "Released v1.0");
    }

    #[test]
    fn test_unknown_kind_uses_type_name_and_default_icon() {
        let items = items_for_event(&raw("1", "a/b", "GollumEvent", 0, json!({"pages": []}))).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, FeedKind::Other);
        assert_eq!(items[0].title, "GollumEvent");
        assert_eq!(items[0].icon, "activity");
    }

    #[test]
    fn test_malformed_event_contributes_nothing() {
        let store = Store::new(16);
        store.store_events(
            "a/b",
            vec![
                raw("bad", "a/b", "PullRequestEvent", 5, json!({"action": "opened"})),
                raw("good", "a/b", "WatchEvent", 1, json!({"action": "started"})),
            ],
        );

        let mut no_time = raw("late", "a/b", "WatchEvent", 0, json!({"action": "started"}));
        no_time.created_at = None;
        assert!(matches!(
            items_for_event(&no_time),
            Err(FeedError::MalformedEvent { .. })
        ));

        let feed = build_feed(&store, &[], 10);
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].kind, FeedKind::Star);
    }

    #[test]
    fn test_feed_is_bounded_to_most_recent() {
        let store = Store::new(16);
        let a: Vec<RawEvent> = (0..6)
            .map(|i| raw(&format!("a{i}"), "a/a", "WatchEvent", i * 2, json!({})))
            .collect();
        let b: Vec<RawEvent> = (0..6)
            .map(|i| raw(&format!("b{i}"), "b/b", "WatchEvent", i * 2 + 1, json!({})))
            .collect();
        store.store_events("a/a", a);
        store.store_events("b/b", b);

        let len = rebuild_feed(&store, &[], 5);
        assert_eq!(len, 5);

        let feed = store.feed();
        let minutes: Vec<i64> = feed
            .iter()
            .map(|item| (item.timestamp - Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()).num_minutes())
            .collect();
        assert_eq!(minutes, vec![11, 10, 9, 8, 7]);
    }

    #[test]
    fn test_labels_fall_back_to_repo_id() {
        let store = Store::new(16);
        store.store_events("a/b", vec![raw("1", "a/b", "WatchEvent", 0, json!({}))]);
        store.store_events("c/d", vec![raw("2", "c/d", "WatchEvent", 1, json!({}))]);

        let repos = vec![RepoRef::new("a/b", "Alpha")];
        let feed = build_feed(&store, &repos, 10);
        let label_of = |id: &str| {
            feed.iter()
                .find(|item| item.repo_id == id)
                .map(|item| item.repo_label.clone())
        };
        assert_eq!(label_of("a/b").as_deref(), Some("Alpha"));
        assert_eq!(label_of("c/d").as_deref(), Some("c/d"));
    }

    #[test]
    fn test_enrichment_applies_on_next_rebuild() {
        let store = Store::new(16);
        store.store_events("a/b", vec![push("1", "a/b", 0, &["s1", "s2"])]);

        rebuild_feed(&store, &[], 10);
        assert!(store.feed().iter().all(|item| item.stats.is_none()));

        let stat = CommitStat {
            sha: "s2".to_string(),
            additions: 9,
            deletions: 3,
            files_changed: 2,
        };
        store.put_commit_stat("a/b", stat.clone());

        rebuild_feed(&store, &[], 10);
        let feed = store.feed();
        let enriched = feed.iter().find(|item| item.sha.as_deref() == Some("s2")).unwrap();
        assert_eq!(enriched.stats.as_ref(), Some(&stat));
        let bare = feed.iter().find(|item| item.sha.as_deref() == Some("s1")).unwrap();
        assert!(bare.stats.is_none());
    }
}

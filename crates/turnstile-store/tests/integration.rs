//! Integration tests for the turnstile-store crate.
//!
//! These exercise the session store against a temporary directory.

use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use turnstile_store::{DEFAULT_SESSIONS_TO_KEEP, SessionStore, StoreError, TurnLog};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Doc {
    session_id: String,
    name: String,
    last_updated: chrono::DateTime<Utc>,
    messages: Vec<String>,
}

fn doc(id: &str, minutes: i64) -> Doc {
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    Doc {
        session_id: id.to_string(),
        name: format!("session {id}"),
        last_updated: base + Duration::minutes(minutes),
        messages: vec!["hello".into(), "world".into()],
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Save / load
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn save_then_load_returns_same_document() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions"));

    let original = doc("alpha", 0);
    let path = store.save("alpha", &original).await.unwrap();
    assert!(path.ends_with("session_alpha.json"));
    assert!(store.exists("alpha").await.unwrap());

    let loaded: Doc = store.load("session_alpha").await.unwrap();
    assert_eq!(loaded, original);
}

#[tokio::test]
async fn save_overwrites_previous_version() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());

    store.save("beta", &doc("beta", 0)).await.unwrap();
    let mut updated = doc("beta", 5);
    updated.messages.push("again".into());
    store.save("beta", &updated).await.unwrap();

    let loaded: Doc = store.load("beta").await.unwrap();
    assert_eq!(loaded.messages.len(), 3);
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn session_files_are_private() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    let path = store.save("gamma", &doc("gamma", 0)).await.unwrap();
    let mode = std::fs::metadata(path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

// ═══════════════════════════════════════════════════════════════════════
//  Listing and cleanup
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn list_is_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());

    store.save("old", &doc("old", 1)).await.unwrap();
    store.save("new", &doc("new", 30)).await.unwrap();
    store.save("mid", &doc("mid", 10)).await.unwrap();

    let ids: Vec<String> = store
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(ids, vec!["new", "mid", "old"]);
}

#[tokio::test]
async fn cleanup_keeps_newest_twenty() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());

    for i in 0..25 {
        let id = format!("s{i:02}");
        store.save(&id, &doc(&id, i)).await.unwrap();
    }

    let deleted = store.cleanup(DEFAULT_SESSIONS_TO_KEEP).await.unwrap();
    assert_eq!(deleted, vec!["s00", "s01", "s02", "s03", "s04"]);

    let remaining = store.list().await.unwrap();
    assert_eq!(remaining.len(), 20);
    assert_eq!(remaining[0].session_id, "s24");
    assert_eq!(remaining[19].session_id, "s05");
}

#[tokio::test]
async fn cleanup_below_limit_deletes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    store.save("only", &doc("only", 0)).await.unwrap();

    assert!(store.cleanup(DEFAULT_SESSIONS_TO_KEEP).await.unwrap().is_empty());
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_missing_session_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    let err = store.delete("ghost").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "session", .. }));
}

// ═══════════════════════════════════════════════════════════════════════
//  Turn log
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn turn_log_writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("turns.jsonl");
    let log = TurnLog::to_path(&path);
    assert!(log.is_enabled());

    for i in 0..3 {
        log.append(&serde_json::json!({ "iteration": i, "completion_reached": i == 2 }))
            .await
            .unwrap();
    }

    let text = std::fs::read_to_string(path).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2]["completion_reached"], true);
}

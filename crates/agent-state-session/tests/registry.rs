//! Session registry behaviour over the in-memory store.

use std::{sync::Arc, time::Duration};

use agent_state_core::{KeyValueStore, TaskStatus, keys};
use agent_state_session::{
    RegistryError, SessionRegistry, SessionUpdate, storage::MemoryStore,
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

const TTL: Duration = Duration::from_secs(300);

fn registry() -> (Arc<MemoryStore>, SessionRegistry<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (Arc::clone(&store), SessionRegistry::new(store, TTL))
}

/// Write a raw document and index it, bypassing the encoder.
async fn seed(store: &MemoryStore, user_id: &str, session_id: &str, doc: serde_json::Value) {
    let bytes = serde_json::to_vec(&doc).unwrap();
    assert_ok!(
        store
            .set_with_ttl(&keys::session(user_id, session_id), &bytes, TTL)
            .await
    );
    assert_ok!(store.set_add(&keys::user_sessions(user_id), session_id).await);
}

#[tokio::test]
async fn created_session_is_readable_and_listed() {
    let (_, registry) = registry();
    let id = assert_ok!(
        registry
            .create("u1", Some("s1"), Some("t1"), TaskStatus::Idle, None)
            .await
    );
    assert_eq!(id, "s1");

    let record = assert_ok!(registry.get("u1", "s1").await).unwrap();
    assert_eq!(record.status, TaskStatus::Idle);
    assert_eq!(record.task_id.as_deref(), Some("t1"));
    assert_eq!(record.ttl, 300);
    assert!(record.last_updated.is_some());

    assert_eq!(assert_ok!(registry.list("u1").await), vec!["s1".to_string()]);
    assert!(assert_ok!(registry.exists("u1", "s1").await));
    assert!(assert_ok!(registry.user_exists("u1").await));
    assert!(!assert_ok!(registry.user_exists("u2").await));
}

#[tokio::test]
async fn create_generates_missing_ids() {
    let (_, registry) = registry();
    let id = assert_ok!(
        registry
            .create("u1", None, None, TaskStatus::Idle, None)
            .await
    );
    assert!(!id.is_empty());
    assert_eq!(assert_ok!(registry.list("u1").await), vec![id]);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (_, registry) = registry();
    assert_ok!(
        registry
            .create("u1", Some("s1"), None, TaskStatus::Idle, None)
            .await
    );

    assert!(assert_ok!(registry.delete("u1", "s1").await));
    assert!(!assert_ok!(registry.delete("u1", "s1").await));
    assert!(assert_ok!(registry.get("u1", "s1").await).is_none());
    assert!(assert_ok!(registry.list("u1").await).is_empty());
}

#[tokio::test]
async fn update_of_missing_session_reports_false() {
    let (_, registry) = registry();
    let updated = assert_ok!(
        registry
            .update("u1", "ghost", SessionUpdate::status(TaskStatus::Running))
            .await
    );
    assert!(!updated);
    assert!(assert_ok!(registry.get("u1", "ghost").await).is_none());
}

#[tokio::test]
async fn timestamps_never_move_backwards() {
    let (_, registry) = registry();
    assert_ok!(
        registry
            .create("u1", Some("s1"), None, TaskStatus::Idle, None)
            .await
    );
    let far_future = 4_000_000_000.5;
    assert_ok!(
        registry
            .update("u1", "s1", SessionUpdate::status(TaskStatus::Running).at(far_future))
            .await
    );
    assert_ok!(
        registry
            .update("u1", "s1", SessionUpdate::status(TaskStatus::Completed).at(100.0))
            .await
    );

    let record = assert_ok!(registry.get("u1", "s1").await).unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.last_updated, Some(far_future));
}

#[tokio::test]
async fn most_recent_session_wins() {
    let (store, registry) = registry();
    seed(&store, "u1", "a", json!({"status": "completed", "last_updated": 100})).await;
    seed(&store, "u1", "b", json!({"status": "completed", "last_updated": 200})).await;
    seed(&store, "u1", "c", json!({"status": "idle", "last_updated": "50"})).await;
    seed(&store, "u1", "d", json!({"status": "idle"})).await;

    assert_eq!(
        assert_ok!(registry.most_recently_updated("u1").await).as_deref(),
        Some("b")
    );
    assert!(assert_ok!(registry.most_recently_updated("nobody").await).is_none());
}

#[tokio::test]
async fn unreadable_sessions_are_skipped_when_picking_latest() {
    let (store, registry) = registry();
    seed(&store, "u1", "ok", json!({"status": "idle", "last_updated": 10})).await;
    seed(&store, "u1", "broken", json!(["not", "a", "record"])).await;

    assert!(matches!(
        registry.get("u1", "broken").await,
        Err(RegistryError::Codec(_))
    ));
    assert_eq!(
        assert_ok!(registry.most_recently_updated("u1").await).as_deref(),
        Some("ok")
    );
}

#[tokio::test]
async fn broken_response_keeps_other_fields() {
    let (store, registry) = registry();
    seed(
        &store,
        "u1",
        "s1",
        json!({
            "status": "completed",
            "last_query": "what's the weather",
            "last_response": {"unexpected": true},
            "last_updated": 1_700_000_000.5
        }),
    )
    .await;

    let record = assert_ok!(registry.get("u1", "s1").await).unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.last_query.as_deref(), Some("what's the weather"));
    assert!(record.last_response.is_none());
    assert_eq!(record.session_id, "s1");
    assert_eq!(record.user_id, "u1");
}

#[tokio::test]
async fn unknown_status_reads_as_error() {
    let (store, registry) = registry();
    seed(&store, "u1", "s1", json!({"status": "paused"})).await;

    let record = assert_ok!(registry.get("u1", "s1").await).unwrap();
    assert_eq!(record.status, TaskStatus::Error);
    assert_eq!(record.ttl, 300);
}

#[tokio::test(start_paused = true)]
async fn updates_slide_the_expiry_window() {
    let (_, registry) = registry();
    assert_ok!(
        registry
            .create(
                "u1",
                Some("s1"),
                None,
                TaskStatus::Idle,
                Some(Duration::from_secs(10)),
            )
            .await
    );

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(assert_ok!(
        registry
            .update("u1", "s1", SessionUpdate::status(TaskStatus::Running))
            .await
    ));
    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(assert_ok!(registry.get("u1", "s1").await).is_some());

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(assert_ok!(registry.get("u1", "s1").await).is_none());
}

#[tokio::test(start_paused = true)]
async fn touch_renews_without_rewriting() {
    let (_, registry) = registry();
    assert_ok!(
        registry
            .create(
                "u1",
                Some("s1"),
                None,
                TaskStatus::Running,
                Some(Duration::from_secs(10)),
            )
            .await
    );
    let before = assert_ok!(registry.get("u1", "s1").await).unwrap();

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(assert_ok!(registry.touch("u1", "s1").await));
    tokio::time::advance(Duration::from_secs(6)).await;
    let after = assert_ok!(registry.get("u1", "s1").await).unwrap();
    assert_eq!(after, before);

    assert!(!assert_ok!(registry.touch("u1", "missing").await));
}

#[tokio::test(start_paused = true)]
async fn expired_records_are_reconciled_out_of_the_index() {
    let (store, registry) = registry();
    assert_ok!(
        registry
            .create(
                "u1",
                Some("short"),
                None,
                TaskStatus::Idle,
                Some(Duration::from_secs(5)),
            )
            .await
    );
    assert_ok!(
        registry
            .create("u1", Some("long"), None, TaskStatus::Idle, None)
            .await
    );

    tokio::time::advance(Duration::from_secs(6)).await;
    let index = assert_ok!(store.set_members(&keys::user_sessions("u1")).await);
    assert_eq!(index.len(), 2);

    assert_eq!(assert_ok!(registry.list("u1").await), vec!["long".to_string()]);
    assert_eq!(assert_ok!(registry.reconcile("u1").await), 0);
    let index = assert_ok!(store.set_members(&keys::user_sessions("u1")).await);
    assert_eq!(index, vec!["long".to_string()]);
}

#[tokio::test]
async fn system_wide_listing_covers_every_user() {
    let (store, registry) = registry();
    for (user, session) in [("u1", "a"), ("u1", "b"), ("u2", "c")] {
        assert_ok!(
            registry
                .create(user, Some(session), None, TaskStatus::Idle, None)
                .await
        );
    }
    // Index entry whose record never existed.
    assert_ok!(store.set_add(&keys::user_sessions("u3"), "gone").await);

    let all = assert_ok!(registry.all_users_sessions().await);
    assert_eq!(all.len(), 2);
    assert_eq!(all["u1"], vec!["a".to_string(), "b".to_string()]);
    assert_eq!(all["u2"], vec!["c".to_string()]);
    assert_eq!(assert_ok!(registry.count_all().await), 3);
    assert_eq!(assert_ok!(registry.reconcile_all().await), 0);

    let records = assert_ok!(registry.records("u1").await);
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn index_key_holding_bytes_is_a_store_error() {
    let (store, registry) = registry();
    assert_ok!(
        store
            .set_with_ttl(&keys::user_sessions("u1"), b"oops", TTL)
            .await
    );
    assert_err!(registry.list("u1").await);
}

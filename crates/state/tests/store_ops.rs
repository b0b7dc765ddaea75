//! Integration tests for the state store: atomic patches, transactions,
//! version history, and subscription fan-out under overflow.

use agui_core::{JsonPatchOp, OverflowPolicy};
use agui_state::{StateConfig, StateError, StateStore, SubscribeOptions};
use serde_json::json;

fn store() -> StateStore {
    StateStore::new(StateConfig::default())
}

// ── Basic reads and writes ──────────────────────────────────────────────

#[test]
fn set_get_delete_round_trip() {
    let s = store();
    s.set("/users", json!({})).unwrap();
    s.set("/users/u1", json!({"age": 30})).unwrap();

    assert_eq!(s.get("/users/u1/age").unwrap(), json!(30));
    assert_eq!(s.get("/users/u1").unwrap(), json!({"age": 30}));

    s.delete("/users/u1").unwrap();
    assert_eq!(
        s.get("/users/u1"),
        Err(StateError::NotFound("/users/u1".into()))
    );
}

#[test]
fn get_root_merges_all_shards() {
    let s = store();
    // Enough keys to land on several of the 16 shards.
    for i in 0..32 {
        s.set(&format!("/k{i}"), json!(i)).unwrap();
    }
    let root = s.snapshot();
    let map = root.as_object().unwrap();
    assert_eq!(map.len(), 32);
    assert_eq!(map["k31"], json!(31));
}

#[test]
fn delete_missing_path_is_not_found() {
    let s = store();
    assert_eq!(
        s.delete("/ghost"),
        Err(StateError::NotFound("/ghost".into()))
    );
}

#[test]
fn escaped_pointer_segments() {
    let s = store();
    s.set("/a~1b", json!(1)).unwrap();
    assert_eq!(s.get("/a~1b").unwrap(), json!(1));
}

// ── Patch atomicity ─────────────────────────────────────────────────────

#[test]
fn failed_test_op_rolls_back_the_whole_patch() {
    let s = store();
    s.set("/users", json!({"u1": {"age": 30}})).unwrap();
    let before_version = s.current_version();

    let err = s
        .apply_patch(vec![
            JsonPatchOp::test("/users/u1/age", json!(30)),
            JsonPatchOp::replace("/users/u1/age", json!(31)),
            JsonPatchOp::test("/users/u1/age", json!(999)),
        ])
        .unwrap_err();

    match err {
        StateError::Patch { at, .. } => assert_eq!(at, 2),
        other => panic!("expected Patch error, got {other:?}"),
    }
    // State is untouched and no version was recorded.
    assert_eq!(s.get("/users/u1/age").unwrap(), json!(30));
    assert_eq!(s.current_version(), before_version);
}

#[test]
fn multi_shard_patch_is_atomic() {
    let s = store();
    s.set("/alpha", json!({"v": 1})).unwrap();
    s.set("/beta", json!({"v": 2})).unwrap();

    // Second op fails; the first (touching a different top-level key)
    // must not stick.
    let err = s
        .apply_patch(vec![
            JsonPatchOp::replace("/alpha/v", json!(10)),
            JsonPatchOp::replace("/beta/missing", json!(20)),
        ])
        .unwrap_err();
    assert!(matches!(err, StateError::Patch { at: 1, .. }));
    assert_eq!(s.get("/alpha/v").unwrap(), json!(1));
}

#[test]
fn second_apply_with_test_on_new_value_succeeds() {
    let s = store();
    s.set("/counter", json!(0)).unwrap();
    let delta = |expect: i64, next: i64| {
        vec![
            JsonPatchOp::test("/counter", json!(expect)),
            JsonPatchOp::replace("/counter", json!(next)),
        ]
    };
    s.apply_patch(delta(0, 1)).unwrap();
    // Re-applying with the precondition updated to the new value works.
    s.apply_patch(delta(1, 2)).unwrap();
    // Re-applying the original precondition fails.
    assert!(s.apply_patch(delta(0, 1)).is_err());
    assert_eq!(s.get("/counter").unwrap(), json!(2));
}

#[test]
fn move_across_top_level_keys() {
    let s = store();
    s.set("/src", json!({"item": 42})).unwrap();
    s.set("/dst", json!({})).unwrap();
    s.apply_patch(vec![JsonPatchOp::mv("/src/item", "/dst/item")])
        .unwrap();
    assert_eq!(s.get("/dst/item").unwrap(), json!(42));
    assert!(s.get("/src/item").is_err());
}

#[test]
fn structurally_invalid_op_rejected_before_any_mutation() {
    let s = store();
    s.set("/a", json!(1)).unwrap();
    let err = s
        .apply_patch(vec![
            JsonPatchOp::replace("/a", json!(2)),
            JsonPatchOp {
                op: agui_core::PatchOpKind::Move,
                path: "/b".into(),
                value: None,
                from: None,
            },
        ])
        .unwrap_err();
    assert!(matches!(err, StateError::Patch { at: 1, .. }));
    assert_eq!(s.get("/a").unwrap(), json!(1));
}

// ── Versions ────────────────────────────────────────────────────────────

#[test]
fn versions_are_monotonic_and_bounded() {
    let s = StateStore::new(StateConfig {
        max_history: 5,
        ..StateConfig::default()
    });
    let mut last = 0;
    for i in 0..20 {
        let v = s.set("/k", json!(i)).unwrap();
        assert!(v > last);
        last = v;
    }
    let history = s.history(100);
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].version_id, last);
    assert!(history[0].root_hash.is_some());
    assert_eq!(s.stats().history_length, 5);
}

// ── Transactions ────────────────────────────────────────────────────────

#[test]
fn transaction_commit_materialises_staged_ops() {
    let s = store();
    s.set("/n", json!(1)).unwrap();

    let mut tx = s.begin();
    tx.apply(vec![JsonPatchOp::test("/n", json!(1))]).unwrap();
    tx.apply(vec![JsonPatchOp::replace("/n", json!(2))]).unwrap();
    assert_eq!(tx.staged_len(), 2);
    // Nothing visible until commit.
    assert_eq!(s.get("/n").unwrap(), json!(1));

    tx.commit().unwrap();
    assert_eq!(s.get("/n").unwrap(), json!(2));
}

#[test]
fn transaction_rollback_discards_staged_ops() {
    let s = store();
    s.set("/n", json!(1)).unwrap();
    let before = s.current_version();

    let mut tx = s.begin();
    tx.apply(vec![JsonPatchOp::replace("/n", json!(99))]).unwrap();
    tx.rollback();

    assert_eq!(s.get("/n").unwrap(), json!(1));
    assert_eq!(s.current_version(), before);
}

// ── Subscriptions ───────────────────────────────────────────────────────

#[tokio::test]
async fn subscription_receives_matching_changes() {
    let s = store();
    s.set("/users", json!({})).unwrap();
    let sub = s.subscribe("/users/*", SubscribeOptions::default()).unwrap();

    s.set("/users/u1", json!({"age": 1})).unwrap();
    s.set("/other", json!(true)).unwrap();

    let change = sub.recv().await.unwrap();
    assert_eq!(change.op.path, "/users/u1");
    // The non-matching change was filtered out.
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn drop_oldest_backpressure_keeps_newest_events() {
    let s = store();
    s.set("/xs", json!({})).unwrap();
    let sub = s
        .subscribe(
            "/xs/*",
            SubscribeOptions {
                queue_size: Some(2),
                policy: Some(OverflowPolicy::DropOldest),
                ttl: None,
            },
        )
        .unwrap();

    for i in 1..=4 {
        s.set(&format!("/xs/e{i}"), json!(i)).unwrap();
    }

    // Consumer was slow: E1 and E2 were evicted.
    assert_eq!(sub.recv().await.unwrap().op.path, "/xs/e3");
    assert_eq!(sub.recv().await.unwrap().op.path, "/xs/e4");
    assert_eq!(sub.dropped_count(), 2);
}

#[tokio::test]
async fn drop_new_backpressure_keeps_oldest_events() {
    let s = store();
    s.set("/xs", json!({})).unwrap();
    let sub = s
        .subscribe(
            "/xs/*",
            SubscribeOptions {
                queue_size: Some(2),
                policy: Some(OverflowPolicy::DropNew),
                ttl: None,
            },
        )
        .unwrap();

    for i in 1..=4 {
        s.set(&format!("/xs/e{i}"), json!(i)).unwrap();
    }

    assert_eq!(sub.recv().await.unwrap().op.path, "/xs/e1");
    assert_eq!(sub.recv().await.unwrap().op.path, "/xs/e2");
    assert_eq!(sub.dropped_count(), 2);
}

#[tokio::test]
async fn unsubscribe_restores_prior_table_and_closes_queue() {
    let s = store();
    assert_eq!(s.subscriber_count(), 0);
    let sub = s.subscribe("/a/*", SubscribeOptions::default()).unwrap();
    assert_eq!(s.subscriber_count(), 1);

    s.unsubscribe(&sub.id).unwrap();
    assert_eq!(s.subscriber_count(), 0);
    // End-of-stream after cancel.
    assert_eq!(sub.recv().await, None);

    assert_eq!(
        s.unsubscribe(&sub.id),
        Err(StateError::SubscriptionNotFound(sub.id.clone()))
    );
}

#[test]
fn idle_subscriptions_are_swept_after_ttl() {
    let s = store();
    let _sub = s
        .subscribe(
            "/a/*",
            SubscribeOptions {
                queue_size: None,
                policy: None,
                ttl: Some(0), // expires immediately
            },
        )
        .unwrap();
    assert_eq!(s.subscriber_count(), 1);
    assert_eq!(s.sweep_subscriptions(), 1);
    assert_eq!(s.subscriber_count(), 0);
}

#[tokio::test]
async fn slow_subscriber_never_blocks_writer_or_siblings() {
    let s = store();
    s.set("/xs", json!({})).unwrap();
    let slow = s
        .subscribe(
            "/xs/*",
            SubscribeOptions {
                queue_size: Some(1),
                policy: Some(OverflowPolicy::DropOldest),
                ttl: None,
            },
        )
        .unwrap();
    let fast = s
        .subscribe(
            "/xs/*",
            SubscribeOptions {
                queue_size: Some(64),
                policy: Some(OverflowPolicy::DropOldest),
                ttl: None,
            },
        )
        .unwrap();

    // Writer proceeds regardless of the stuck slow consumer.
    for i in 0..10 {
        s.set(&format!("/xs/e{i}"), json!(i)).unwrap();
    }

    // The fast subscriber saw everything.
    let mut seen = 0;
    while fast.try_recv().is_some() {
        seen += 1;
    }
    assert_eq!(seen, 10);
    // The slow one kept only the newest.
    assert_eq!(slow.recv().await.unwrap().op.path, "/xs/e9");
    assert_eq!(slow.dropped_count(), 9);
}

// ── Concurrency ─────────────────────────────────────────────────────────

#[test]
fn parallel_writers_on_distinct_keys() {
    use std::sync::Arc;
    let s = Arc::new(store());
    let mut handles = Vec::new();
    for t in 0..8 {
        let s = s.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..100 {
                s.set(&format!("/t{t}"), json!(i)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    // All writers committed; version IDs stayed strictly monotonic.
    assert_eq!(s.current_version(), 800);
    for t in 0..8 {
        assert_eq!(s.get(&format!("/t{t}")).unwrap(), json!(99));
    }
}

//! Integration tests for the `multiverse-events` store.
//!
//! Each test runs against a fresh temporary data directory, so they need
//! no external services.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::missing_panics_doc
)]

use chrono::{Duration, Utc};
use multiverse_events::{AppendMetadata, EventStore};
use multiverse_types::{EventType, MaterializedState, Payload};
use serde_json::{Value, json};

fn payload(value: Value) -> Payload {
    value
        .as_object()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .collect()
}

async fn open_store(dir: &tempfile::TempDir) -> EventStore {
    EventStore::open(dir.path())
        .await
        .expect("failed to open event store")
}

/// Append a deterministic mix of primitives and return how many were written.
async fn seed_mixed_stream(store: &EventStore, stream_id: &str) -> u64 {
    let events = [
        (EventType::StateSet, json!({"hp": 100, "name": "wyrm"})),
        (EventType::StateIncrement, json!({"hp": -30, "xp": 10})),
        (EventType::custom("boss_spawned"), json!({"at": "crypt"})),
        (EventType::StateSet, json!({"phase": 2})),
        (EventType::StateIncrement, json!({"xp": 2.5})),
        (EventType::StateRemove, json!({"keys": ["phase"]})),
        (EventType::StateIncrement, json!({"hp": 5})),
        (EventType::StateSet, json!({"name": "elder wyrm"})),
    ];
    let count = u64::try_from(events.len()).unwrap();
    for (event_type, body) in events {
        store
            .append_event(stream_id, event_type, payload(body), AppendMetadata::default())
            .await
            .unwrap();
    }
    count
}

#[tokio::test]
async fn n_appends_yield_versions_one_to_n() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let n = 25_u64;
    for i in 0..n {
        store
            .append_event(
                "entity/7",
                EventType::StateSet,
                payload(json!({"i": i})),
                AppendMetadata::default(),
            )
            .await
            .unwrap();
    }

    let events = store.read_stream("entity/7", 0).await.unwrap();
    let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
    assert_eq!(versions, (1..=n).collect::<Vec<_>>());
    let order: Vec<Value> = events.iter().map(|e| e.payload["i"].clone()).collect();
    assert_eq!(order, (0..n).map(|i| json!(i)).collect::<Vec<_>>());
}

#[tokio::test]
async fn scenario_b_set_then_increment() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    store
        .append_event(
            "entity/1",
            EventType::StateSet,
            payload(json!({"hp": 100})),
            AppendMetadata::default(),
        )
        .await
        .unwrap();
    store
        .append_event(
            "entity/1",
            EventType::StateIncrement,
            payload(json!({"hp": -30})),
            AppendMetadata::default(),
        )
        .await
        .unwrap();

    let state = store.replay_state("entity/1", None).await.unwrap();
    assert_eq!(state.get("hp"), Some(&json!(70)));
    assert_eq!(state.version, 2);
    assert!(state.timestamp_utc.is_some());
}

#[tokio::test]
async fn snapshot_replay_matches_full_replay_for_every_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let total = seed_mixed_stream(&store, "realm/crypt").await;
    let full = store.replay_state("realm/crypt", None).await.unwrap();
    assert_eq!(full.version, total);

    let events = store.read_stream("realm/crypt", 0).await.unwrap();
    for cadence in 1..=total {
        // Snapshot at every multiple of the cadence, then finish from the last one.
        let mut state = MaterializedState::empty("realm/crypt");
        let mut latest = None;
        for event in &events {
            multiverse_events::replay::apply_event(&mut state, event).unwrap();
            if event.version % cadence == 0 {
                latest = Some(store.create_snapshot("realm/crypt", &state).await.unwrap());
            }
        }
        let resumed = store
            .replay_state("realm/crypt", latest.as_ref())
            .await
            .unwrap();
        assert_eq!(resumed, full, "cadence {cadence} diverged");
    }

    let stored = store.get_latest_snapshot("realm/crypt").await.unwrap().unwrap();
    let resumed = store.replay_state("realm/crypt", Some(&stored)).await.unwrap();
    assert_eq!(resumed, full);
}

#[tokio::test]
async fn read_as_of_is_a_monotonic_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    seed_mixed_stream(&store, "entity/2").await;

    let all = store.read_stream("entity/2", 0).await.unwrap();
    let first_ts = all.first().unwrap().timestamp_utc;
    let last_ts = all.last().unwrap().timestamp_utc;

    let mut cutoffs: Vec<_> = all.iter().map(|e| e.timestamp_utc).collect();
    cutoffs.push(first_ts - Duration::seconds(1));
    cutoffs.push(last_ts + Duration::seconds(1));
    cutoffs.sort();

    let mut previous_len = 0;
    for t in cutoffs {
        let as_of = store.read_as_of("entity/2", t).await.unwrap();
        let expected: Vec<_> = all.iter().filter(|e| e.timestamp_utc <= t).cloned().collect();
        assert_eq!(as_of, expected);
        assert_eq!(as_of.as_slice(), &all[..as_of.len()]);
        assert!(as_of.len() >= previous_len);
        previous_len = as_of.len();
    }
    assert_eq!(previous_len, all.len());

    let before = store.read_as_of("entity/2", first_ts - Duration::seconds(1)).await.unwrap();
    assert!(before.is_empty());
    let now = store.read_as_of("entity/2", Utc::now()).await.unwrap();
    assert_eq!(now, all);
}

#[tokio::test]
async fn timestamps_never_decrease_within_a_stream() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    seed_mixed_stream(&store, "s").await;
    let events = store.read_stream("s", 0).await.unwrap();
    assert!(events.windows(2).all(|w| w[0].timestamp_utc <= w[1].timestamp_utc));
}

#[tokio::test]
async fn streams_are_rediscovered_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(&dir).await;
        seed_mixed_stream(&store, "entity/1").await;
        store
            .append_event(
                "realm/overworld",
                EventType::StateSet,
                payload(json!({"day": 1})),
                AppendMetadata::default(),
            )
            .await
            .unwrap();
        let state = store.replay_state("entity/1", None).await.unwrap();
        store.create_snapshot("entity/1", &state).await.unwrap();
    }

    let reopened = open_store(&dir).await;
    assert_eq!(
        reopened.list_streams().await.unwrap(),
        vec!["entity/1".to_owned(), "realm/overworld".to_owned()]
    );
    assert_eq!(reopened.stream_version("entity/1").await.unwrap(), 8);

    let next = reopened
        .append_event(
            "entity/1",
            EventType::StateIncrement,
            payload(json!({"hp": 1})),
            AppendMetadata::default(),
        )
        .await
        .unwrap();
    assert_eq!(next.version, 9);

    let snapshot = reopened.get_latest_snapshot("entity/1").await.unwrap().unwrap();
    assert_eq!(snapshot.version(), 8);
    let from_snapshot = reopened.replay_state("entity/1", Some(&snapshot)).await.unwrap();
    let from_scratch = reopened.replay_state("entity/1", None).await.unwrap();
    assert_eq!(from_snapshot, from_scratch);
    assert_eq!(from_scratch.get("hp"), Some(&json!(76)));
}

#[tokio::test]
async fn distinct_streams_append_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(open_store(&dir).await);

    let mut handles = Vec::new();
    for realm in ["alpha", "beta", "gamma", "delta"] {
        let store = std::sync::Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let stream_id = format!("realm/{realm}");
            for _ in 0..10 {
                store
                    .append_event(
                        &stream_id,
                        EventType::StateIncrement,
                        payload(json!({"tick": 1})),
                        AppendMetadata::actor(realm),
                    )
                    .await
                    .unwrap();
            }
            stream_id
        }));
    }

    for handle in handles {
        let stream_id = handle.await.unwrap();
        let state = store.replay_state(&stream_id, None).await.unwrap();
        assert_eq!(state.version, 10);
        assert_eq!(state.get("tick"), Some(&json!(10)));
    }
    assert_eq!(store.list_streams().await.unwrap().len(), 4);
}

#[tokio::test]
async fn unknown_stream_reads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    assert!(store.read_stream("nobody", 0).await.unwrap().is_empty());
    assert!(store.get_latest_snapshot("nobody").await.unwrap().is_none());
    let state = store.replay_state("nobody", None).await.unwrap();
    assert_eq!(state, MaterializedState::empty("nobody"));
}

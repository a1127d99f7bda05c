//! Consolidation under concurrency: several replicas share one staging store.

#![allow(clippy::unwrap_used)]

use courier_core::fragment::CorrelationId;
use courier_runtime::Consolidator;
use courier_testing::{InMemoryStagingStore, RecordingNotifier};
use serde_json::json;
use std::sync::Arc;

fn required() -> Vec<String> {
    vec!["identity".to_string(), "score".to_string()]
}

fn replica(store: &InMemoryStagingStore, notifier: &RecordingNotifier) -> Consolidator {
    Consolidator::new("player", Arc::new(store.clone()), Arc::new(notifier.clone()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_attempts_yield_exactly_one_entity() {
    let store = InMemoryStagingStore::new();
    let notifier = RecordingNotifier::new();
    let a = replica(&store, &notifier);
    let b = replica(&store, &notifier);
    let id = CorrelationId::new("42");

    a.write_fragment(&id, "identity", &json!({"name": "Alice"}))
        .await
        .unwrap();
    b.write_fragment(&id, "score", &json!({"score": 10}))
        .await
        .unwrap();

    let (left, right) = tokio::join!(
        tokio::spawn({
            let id = id.clone();
            async move { a.try_consolidate(&id, &required()).await }
        }),
        tokio::spawn({
            let id = id.clone();
            async move { b.try_consolidate(&id, &required()).await }
        }),
    );
    let results = [left.unwrap().unwrap(), right.unwrap().unwrap()];

    let produced: Vec<_> = results.iter().flatten().collect();
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].to_value(), json!({"name": "Alice", "score": 10}));

    assert!(store.peek("player_identity_42").is_none());
    assert!(store.peek("player_score_42").is_none());
    assert_eq!(notifier.attempts(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_entities_raced_by_many_replicas_notify_once_each() {
    let store = InMemoryStagingStore::new();
    let notifier = RecordingNotifier::new();
    let writer = replica(&store, &notifier);

    for n in 0..50 {
        let id = CorrelationId::new(n.to_string());
        writer
            .write_fragment(&id, "identity", &json!({"name": format!("player-{n}")}))
            .await
            .unwrap();
        writer
            .write_fragment(&id, "score", &json!({"score": n}))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let consolidator = replica(&store, &notifier);
        tasks.push(tokio::spawn(async move {
            let mut produced = 0;
            for n in 0..50 {
                let id = CorrelationId::new(n.to_string());
                if consolidator
                    .try_consolidate(&id, &required())
                    .await
                    .unwrap()
                    .is_some()
                {
                    produced += 1;
                }
            }
            produced
        }));
    }

    let mut total = 0;
    for task in tasks {
        total += task.await.unwrap();
    }

    assert_eq!(total, 50);
    assert_eq!(notifier.attempts(), 50);
    assert_eq!(store.successful_claims(), 50);
    assert!(store.is_empty());
}

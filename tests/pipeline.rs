//! Sync pipeline behaviour against fake collaborators.

mod common;

use common::{
    message, messages, pipeline, sqlite, work_invoice, FakeSource, RacingStore, SlowStore,
    StubClassifier,
};
use inbox_sync::{
    ClassificationGateway, ClassifyError, EmailQuery, InboundMessage, MemoryStore,
    RawClassification, RecordStore, Scheduler, SourceError, SqliteStore, SyncPipeline,
    SyncSettings, SyncState, SyncStatus, SyncSummary, TriggerOutcome,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

fn summary(fetched: usize, inserted: usize, skipped: usize) -> SyncSummary {
    SyncSummary {
        fetched,
        inserted,
        skipped,
        status: SyncStatus::Ok,
        error: None,
    }
}

async fn wait_for_state(pipeline: &SyncPipeline, state: SyncState) {
    let mut rx = pipeline.subscribe();
    timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("state reached in time")
        .unwrap();
}

#[tokio::test]
async fn test_skips_already_stored_message() {
    let store = sqlite();
    let seed = pipeline(
        FakeSource::new(messages(&["m1"])),
        StubClassifier::answering(work_invoice()),
        store.clone(),
    );
    assert_eq!(seed.run().await, summary(1, 1, 0));

    let sync = pipeline(
        FakeSource::new(messages(&["m1", "m2"])),
        StubClassifier::answering(work_invoice()),
        store.clone(),
    );
    assert_eq!(sync.run().await, summary(2, 1, 1));

    assert_eq!(store.count().unwrap(), 2);
    let m2 = store.get_by_message_id("m2").unwrap().unwrap();
    assert_eq!(m2.subject, "Subject m2");
    assert!(!m2.is_read);
    assert!(m2.created_at.is_some());
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let store = sqlite();
    let classifier = StubClassifier::answering(work_invoice());
    let sync = pipeline(
        FakeSource::new(messages(&["a", "b", "c"])),
        classifier.clone(),
        store.clone(),
    );

    assert_eq!(sync.run().await, summary(3, 3, 0));
    assert_eq!(sync.run().await, summary(3, 0, 3));
    assert_eq!(store.count().unwrap(), 3);
    // Duplicates are never sent for classification
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_duplicate_ids_in_one_batch_insert_once() {
    let store = sqlite();
    let mut batch = messages(&["a", "b"]);
    let mut dup = message("a");
    dup.subject = "second copy".to_string();
    batch.push(dup);

    let sync = pipeline(
        FakeSource::new(batch),
        StubClassifier::answering(work_invoice()),
        store.clone(),
    );

    assert_eq!(sync.run().await, summary(3, 2, 1));
    assert_eq!(store.count().unwrap(), 2);
    assert_eq!(store.get_by_message_id("a").unwrap().unwrap().subject, "Subject a");
}

#[tokio::test]
async fn test_classification_failure_still_persists_every_message() {
    let store = sqlite();
    let sync = pipeline(
        FakeSource::new(messages(&["a", "b", "c"])),
        StubClassifier::failing(ClassifyError::Status(429, "quota exceeded".to_string())),
        store.clone(),
    );

    let result = sync.run().await;
    assert_eq!(result, summary(3, 3, 0));

    for id in ["a", "b", "c"] {
        let record = store.get_by_message_id(id).unwrap().unwrap();
        assert_eq!(record.category, "Uncategorized");
        assert_eq!(record.iu_score, 1);
        assert_eq!(record.intent, "Unknown");
        assert!(record.summary.starts_with("Error in AI processing"));
        assert!(record.summary.contains("429"));
    }
}

#[tokio::test]
async fn test_missing_api_key_falls_back() {
    let store = Arc::new(MemoryStore::new());
    let sync = pipeline(
        FakeSource::new(messages(&["a"])),
        StubClassifier::failing(ClassifyError::MissingCredential),
        store.clone(),
    );

    assert!(sync.run().await.is_ok());
    let record = store.get_by_message_id("a").unwrap().unwrap();
    assert_eq!(record.category, "Uncategorized");
}

#[tokio::test]
async fn test_unparseable_date_is_stored_as_null() {
    let store = sqlite();
    let mut bad = message("bad-date");
    bad.date = "not-a-date".to_string();
    let mut empty = message("no-date");
    empty.date = String::new();

    let sync = pipeline(
        FakeSource::new(vec![bad, empty, message("good")]),
        StubClassifier::answering(work_invoice()),
        store.clone(),
    );

    assert_eq!(sync.run().await, summary(3, 3, 0));
    assert_eq!(store.get_by_message_id("bad-date").unwrap().unwrap().date_sent, None);
    assert_eq!(store.get_by_message_id("no-date").unwrap().unwrap().date_sent, None);
    let good = store.get_by_message_id("good").unwrap().unwrap();
    assert_eq!(
        good.date_sent.unwrap().to_rfc3339(),
        "2025-02-03T10:00:00+00:00"
    );
}

#[tokio::test]
async fn test_commit_conflict_rolls_back_whole_run() {
    let store = Arc::new(RacingStore {
        inner: SqliteStore::open_in_memory().unwrap(),
        conflicting_id: "m5".to_string(),
    });
    let sync = pipeline(
        FakeSource::new(messages(&["m1", "m2", "m3", "m4", "m5"])),
        StubClassifier::answering(work_invoice()),
        store.clone(),
    );

    let result = sync.run().await;
    assert_eq!(result.status, SyncStatus::Failed);
    assert_eq!(result.fetched, 5);
    assert_eq!(result.inserted, 0);
    assert!(result.error.unwrap().contains("UNIQUE"));
    assert_eq!(sync.state(), SyncState::Failed);

    for id in ["m1", "m2", "m3", "m4"] {
        assert!(!store.exists(id).unwrap(), "{id} must not survive the rollback");
    }
    // Only the concurrent writer's row remains
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(
        store.get_by_message_id("m5").unwrap().unwrap().subject,
        "written concurrently"
    );
}

#[tokio::test]
async fn test_source_failure_fails_run_and_retries_next_time() {
    let store = sqlite();
    let failing = pipeline(
        FakeSource::failing(SourceError::Network("connection refused".to_string())),
        StubClassifier::answering(work_invoice()),
        store.clone(),
    );

    let result = failing.run().await;
    assert_eq!(result.status, SyncStatus::Failed);
    assert_eq!((result.fetched, result.inserted, result.skipped), (0, 0, 0));
    assert!(result.error.unwrap().contains("connection refused"));
    assert_eq!(store.count().unwrap(), 0);

    let recovered = pipeline(
        FakeSource::new(messages(&["a"])),
        StubClassifier::answering(work_invoice()),
        store.clone(),
    );
    assert_eq!(recovered.run().await, summary(1, 1, 0));
}

#[tokio::test]
async fn test_message_without_id_fails_run() {
    let store = sqlite();
    let sync = pipeline(
        FakeSource::new(vec![message("a"), message("  ")]),
        StubClassifier::answering(work_invoice()),
        store.clone(),
    );

    let result = sync.run().await;
    assert_eq!(result.status, SyncStatus::Failed);
    assert_eq!(result.inserted, 0);
    assert!(result.error.unwrap().contains("no provider id"));
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test]
async fn test_empty_fetch_is_ok() {
    let store = sqlite();
    let classifier = StubClassifier::answering(work_invoice());
    let sync = pipeline(FakeSource::new(Vec::new()), classifier.clone(), store.clone());

    let result = sync.run().await;
    assert_eq!(result, summary(0, 0, 0));
    assert_eq!(sync.state(), SyncState::Idle);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_out_of_range_scores_are_clamped() {
    let store = sqlite();
    let raw = RawClassification {
        category: "work".to_string(),
        importance_score: 9,
        urgency_score: -2,
        summary: "  Quarterly planning meeting.  ".to_string(),
        intent: "Action Required".to_string(),
    };
    let sync = pipeline(
        FakeSource::new(messages(&["a"])),
        StubClassifier::answering(raw),
        store.clone(),
    );

    assert!(sync.run().await.is_ok());
    let record = store.get_by_message_id("a").unwrap().unwrap();
    assert_eq!(record.category, "Work");
    assert_eq!(record.intent, "ActionRequired");
    assert_eq!(record.iu_score, 3);
    assert_eq!(record.summary, "Quarterly planning meeting.");
}

#[tokio::test]
async fn test_concurrent_classification_keeps_fetch_order() {
    let store = sqlite();
    let ids = ["a", "b", "c", "d", "e", "f"];
    let sync = SyncPipeline::new(
        FakeSource::new(messages(&ids)),
        ClassificationGateway::new(StubClassifier::answering(work_invoice())),
        store.clone(),
        SyncSettings {
            classify_concurrency: 4,
            ..SyncSettings::default()
        },
    );

    assert_eq!(sync.run().await, summary(6, 6, 0));
    let stored: Vec<String> = store
        .query(&EmailQuery::default())
        .unwrap()
        .into_iter()
        .rev()
        .map(|r| r.message_id)
        .collect();
    assert_eq!(stored, ids);
}

#[tokio::test]
async fn test_max_results_caps_the_fetch() {
    let store = sqlite();
    let sync = SyncPipeline::new(
        FakeSource::new(messages(&["a", "b", "c"])),
        ClassificationGateway::new(StubClassifier::answering(work_invoice())),
        store.clone(),
        SyncSettings {
            max_results: 2,
            ..SyncSettings::default()
        },
    );

    assert_eq!(sync.run().await, summary(2, 2, 0));
    assert!(!store.exists("c").unwrap());
}

#[tokio::test]
async fn test_cancelled_run_leaves_no_records() {
    let store = sqlite();
    let (classifier, _gate) = StubClassifier::gated(work_invoice());
    let sync = pipeline(FakeSource::new(messages(&["a", "b"])), classifier, store.clone());

    let result = timeout(Duration::from_millis(100), sync.run()).await;
    assert!(result.is_err());
    assert_eq!(store.count().unwrap(), 0);
    assert_eq!(sync.state(), SyncState::Idle);
}

#[tokio::test]
async fn test_manual_trigger_skipped_while_run_is_classifying() {
    let store = sqlite();
    let source = FakeSource::new(messages(&["a", "b"]));
    let (classifier, gate) = StubClassifier::gated(work_invoice());
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(pipeline(source.clone(), classifier, store.clone())),
        Duration::from_secs(3600),
    ));

    let first = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.trigger().await }
    });
    wait_for_state(scheduler.pipeline(), SyncState::Classifying).await;
    assert!(scheduler.is_running());

    assert_eq!(scheduler.trigger().await, TriggerOutcome::Skipped);
    assert_eq!(scheduler.skipped_runs(), 1);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    gate.add_permits(2);
    let outcome = first.await.unwrap();
    assert_eq!(outcome, TriggerOutcome::Completed(summary(2, 2, 0)));
    assert!(!scheduler.is_running());
    assert_eq!(store.count().unwrap(), 2);
}

#[tokio::test]
async fn test_scheduled_ticks_skip_while_run_in_flight() {
    let store = sqlite();
    let source = FakeSource::new(messages(&["a", "b"]));
    let (classifier, gate) = StubClassifier::gated(work_invoice());
    let scheduler = Arc::new(
        Scheduler::new(
            Arc::new(pipeline(source.clone(), classifier, store.clone())),
            Duration::from_millis(20),
        )
        .with_run_on_start(true),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown_tx.subscribe();
        async move { scheduler.run(shutdown).await }
    });

    wait_for_state(scheduler.pipeline(), SyncState::Classifying).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(scheduler.skipped_runs() >= 1);
    // Skipped ticks never reached the source
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    gate.add_permits(2);
    timeout(Duration::from_secs(5), async {
        while store.count().unwrap() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let _ = shutdown_tx.send(());
    timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(store.count().unwrap(), 2);
}

#[tokio::test]
async fn test_scheduler_stops_on_shutdown() {
    let store = sqlite();
    let source = FakeSource::new(Vec::<InboundMessage>::new());
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(pipeline(
            source.clone(),
            StubClassifier::answering(work_invoice()),
            store,
        )),
        Duration::from_secs(3600),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown_tx.subscribe();
        async move { scheduler.run(shutdown).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = shutdown_tx.send(());
    timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    // The first run waits a full interval
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_abandoned_trigger_keeps_guard_until_commit_ends() {
    let store = Arc::new(SlowStore {
        inner: SqliteStore::open_in_memory().unwrap(),
        commit_delay: Duration::from_millis(400),
    });
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(pipeline(
            FakeSource::new(messages(&["a"])),
            StubClassifier::answering(work_invoice()),
            store.clone(),
        )),
        Duration::from_secs(3600),
    ));

    let first = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.trigger().await }
    });
    wait_for_state(scheduler.pipeline(), SyncState::Committing).await;
    // A caller going away, e.g. an HTTP client disconnecting
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    assert!(scheduler.is_running());
    assert_eq!(scheduler.trigger().await, TriggerOutcome::Skipped);

    timeout(Duration::from_secs(5), async {
        while scheduler.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(store.count().unwrap(), 1);

    assert_eq!(
        scheduler.trigger().await,
        TriggerOutcome::Completed(summary(1, 0, 1))
    );
}

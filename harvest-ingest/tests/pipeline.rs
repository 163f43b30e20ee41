mod common;

use std::time::Duration;

use common::{categories, init_test_tracing, page, Script, ScriptedSource};
use harvest_ingest::{
    DocumentStore, IngestError, IngestPipeline, MemoryStore, PipelineOptions, RateGate,
    SqliteDocumentStore, StopReason, SubjectStatus,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn open_gate() -> RateGate {
    RateGate::spawn(10_000, Duration::from_secs(60), CancellationToken::new()).0
}

fn pipeline(source: ScriptedSource) -> IngestPipeline<ScriptedSource, MemoryStore> {
    IngestPipeline::new(
        source,
        MemoryStore::new(),
        open_gate(),
        PipelineOptions::default(),
    )
}

#[tokio::test]
async fn small_budget_requests_a_single_short_page() {
    init_test_tracing();
    let p = pipeline(ScriptedSource::new());

    let summary = p.run("alice", &categories(&["Tweets"]), 5).await.unwrap();

    let calls = p.source().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].page_size, 5);
    assert_eq!(calls[0].cursor, None);
    assert_eq!(summary.items(), 5);
    assert_eq!(summary.categories[0].stop, StopReason::BudgetReached);
    assert_eq!(p.store().count("tweets").await.unwrap(), 5);
}

#[tokio::test]
async fn full_pages_paginate_until_the_budget() {
    init_test_tracing();
    let p = pipeline(ScriptedSource::new());

    let summary = p.run("alice", &categories(&["Tweets"]), 45).await.unwrap();

    let calls = p.source().calls();
    let sizes: Vec<_> = calls.iter().map(|c| c.page_size).collect();
    let cursors: Vec<_> = calls.iter().map(|c| c.cursor.as_deref()).collect();
    assert_eq!(sizes, [20, 20, 5]);
    assert_eq!(cursors, [None, Some("20"), Some("40")]);
    assert_eq!(summary.categories[0].pages, 3);
    assert_eq!(summary.items(), 45);
    assert_eq!(p.store().count("tweets").await.unwrap(), 45);
}

#[tokio::test]
async fn empty_page_ends_only_its_category() {
    init_test_tracing();
    let source = ScriptedSource::new().script(
        "alice",
        "Tweets",
        Script::Pages(vec![page(&["1", "2", "3"], Some("next")), page(&[], Some("again"))]),
    );
    let p = pipeline(source);

    let summary = p
        .run("alice", &categories(&["Tweets", "Replies"]), 10)
        .await
        .unwrap();

    let tweets = &summary.categories[0];
    assert_eq!((tweets.items, tweets.pages, tweets.stop), (3, 1, StopReason::EmptyPage));
    let replies = &summary.categories[1];
    assert_eq!((replies.items, replies.stop), (10, StopReason::BudgetReached));

    let tweet_calls: Vec<_> = p
        .source()
        .calls()
        .into_iter()
        .filter(|c| c.category == "Tweets")
        .collect();
    assert_eq!(tweet_calls.len(), 2);
    assert_eq!(tweet_calls[1].cursor.as_deref(), Some("next"));
}

#[tokio::test]
async fn missing_cursor_ends_the_category() {
    init_test_tracing();
    let source = ScriptedSource::new().script(
        "alice",
        "Likes",
        Script::Pages(vec![page(&["a", "b"], None), page(&["never"], None)]),
    );
    let p = pipeline(source);

    let summary = p.run("alice", &categories(&["Likes"]), 100).await.unwrap();

    assert_eq!(p.source().calls().len(), 1);
    assert_eq!(summary.categories[0].stop, StopReason::EndOfData);
    assert_eq!(summary.items(), 2);
    assert!(p.store().get("tweets", "never").await.unwrap().is_none());
}

#[tokio::test]
async fn surplus_items_beyond_the_budget_are_dropped() {
    init_test_tracing();
    let p = pipeline(ScriptedSource::new().oversize(50));

    let summary = p.run("alice", &categories(&["Media"]), 30).await.unwrap();

    assert_eq!(summary.items(), 30);
    assert_eq!(p.store().count("tweets").await.unwrap(), 30);
    let sizes: Vec<_> = p.source().calls().iter().map(|c| c.page_size).collect();
    assert_eq!(sizes, [20]);
}

#[tokio::test]
async fn stored_documents_carry_pipeline_metadata() {
    init_test_tracing();
    let source = ScriptedSource::new().script(
        "alice",
        "Replies",
        Script::Pages(vec![page(&["77"], None)]),
    );
    let p = pipeline(source);

    p.run("alice", &categories(&["Replies"]), 5).await.unwrap();

    let doc = p.store().get("tweets", "77").await.unwrap().unwrap();
    assert_eq!(doc["id"], "77");
    assert_eq!(doc["category"], "Replies");
    assert_eq!(doc["text"], "scripted");
    assert!(doc["scraped_at"].as_str().is_some());
}

#[tokio::test]
async fn rerunning_a_subject_does_not_duplicate_documents() {
    init_test_tracing();
    let p = pipeline(ScriptedSource::new());
    let cats = categories(&["Tweets", "Replies"]);

    p.run("alice", &cats, 7).await.unwrap();
    p.run("alice", &cats, 7).await.unwrap();

    assert_eq!(p.store().count("tweets").await.unwrap(), 14);
}

#[tokio::test]
async fn failing_subject_skips_its_remaining_categories_only() {
    init_test_tracing();
    let source = ScriptedSource::new().script(
        "A",
        "Replies",
        Script::Fail("401 Unauthorized".into()),
    );
    let p = pipeline(source);
    let cats = categories(&["Tweets", "Replies", "Media", "Likes"]);

    let report = p.run_batch(&["A".into(), "B".into()], &cats, 3).await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert!(!report.cancelled);
    match &report.outcomes[0].status {
        SubjectStatus::Failed { reason, partial } => {
            assert!(reason.contains("Replies"), "{reason}");
            assert!(reason.contains("401 Unauthorized"), "{reason}");
            let partial = partial.as_ref().expect("A was resolved");
            let stops: Vec<_> = partial.categories.iter().map(|c| c.stop).collect();
            assert_eq!(stops, [StopReason::BudgetReached, StopReason::Failed]);
            assert_eq!(partial.items(), 3);
        }
        other => panic!("A should have failed, got {other:?}"),
    }

    let a: Vec<_> = p.source().calls_for("A").into_iter().map(|c| c.category).collect();
    assert_eq!(a, ["Tweets", "Replies"]);
    let b: Vec<_> = p.source().calls_for("B").into_iter().map(|c| c.category).collect();
    assert_eq!(b, ["Tweets", "Replies", "Media", "Likes"]);

    assert_eq!(report.items_total(), 15);
    assert_eq!(p.store().count("tweets").await.unwrap(), 15);
}

#[tokio::test]
async fn failed_subject_reports_items_stored_before_the_failure() {
    init_test_tracing();
    let source = ScriptedSource::new().script(
        "A",
        "Replies",
        Script::PagesThenFail(vec![page(&["r1", "r2"], Some("more"))], "boom".into()),
    );
    let p = pipeline(source);

    let report = p
        .run_batch(&["A".into()], &categories(&["Tweets", "Replies", "Media"]), 3)
        .await;

    let SubjectStatus::Failed {
        partial: Some(partial),
        ..
    } = &report.outcomes[0].status
    else {
        panic!("A should have failed with progress: {:?}", report.outcomes[0]);
    };
    let replies = &partial.categories[1];
    assert_eq!(
        (replies.items, replies.pages, replies.stop),
        (2, 1, StopReason::Failed)
    );
    assert_eq!(partial.categories.len(), 2);
    assert_eq!(report.items_total(), 5);
    assert_eq!(p.store().count("tweets").await.unwrap(), 5);
}

#[tokio::test]
async fn unresolvable_subject_is_reported_and_batch_continues() {
    init_test_tracing();
    let p = pipeline(ScriptedSource::new().unresolvable("ghost"));

    let report = p
        .run_batch(&["ghost".into(), "alice".into()], &categories(&["Tweets"]), 2)
        .await;

    match &report.outcomes[0].status {
        SubjectStatus::Failed { reason, partial } => {
            assert!(reason.contains("ghost"), "{reason}");
            assert!(partial.is_none());
        }
        other => panic!("ghost should have failed, got {other:?}"),
    }
    assert!(matches!(report.outcomes[1].status, SubjectStatus::Completed { .. }));
    assert!(p.source().calls_for("ghost").is_empty());
}

#[tokio::test]
async fn single_run_surfaces_typed_errors() {
    init_test_tracing();
    let source = ScriptedSource::new().script("A", "Tweets", Script::Fail("boom".into()));
    let p = pipeline(source);

    let err = p.run("A", &categories(&["Tweets"]), 3).await.unwrap_err();
    match err {
        IngestError::Fetch {
            subject, category, ..
        } => {
            assert_eq!(subject, "A");
            assert_eq!(category.0, "Tweets");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn every_fetch_and_write_waits_on_the_limiter() {
    init_test_tracing();
    let gate = RateGate::spawn(3, Duration::from_secs(60), CancellationToken::new()).0;
    let p = IngestPipeline::new(
        ScriptedSource::new(),
        MemoryStore::new(),
        gate,
        PipelineOptions::default(),
    );
    let start = Instant::now();

    // resolve + fetch + two upserts = four admissions against a limit of three
    p.run("alice", &categories(&["Tweets"]), 2).await.unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(60), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(61), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn cancelled_batch_skips_every_subject() {
    init_test_tracing();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let p = pipeline(ScriptedSource::new()).with_cancellation(cancel);

    let report = p
        .run_batch(&["A".into(), "B".into()], &categories(&["Tweets"]), 5)
        .await;

    assert!(report.cancelled);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == SubjectStatus::Skipped));
    assert!(p.source().calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_a_limiter_wait_stops_the_batch() {
    init_test_tracing();
    let cancel = CancellationToken::new();
    let gate = RateGate::spawn(2, Duration::from_secs(60), CancellationToken::new()).0;
    let p = IngestPipeline::new(
        ScriptedSource::new(),
        MemoryStore::new(),
        gate,
        PipelineOptions::default(),
    )
    .with_cancellation(cancel.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
    });

    let report = p
        .run_batch(&["A".into(), "B".into()], &categories(&["Tweets"]), 10)
        .await;
    trigger.await.unwrap();

    assert!(report.cancelled);
    assert!(matches!(report.outcomes[0].status, SubjectStatus::Failed { .. }));
    assert_eq!(report.outcomes[1].status, SubjectStatus::Skipped);
    // resolve and fetch were admitted; the first write was left waiting
    assert_eq!(p.store().count("tweets").await.unwrap(), 0);
}

#[tokio::test]
async fn sqlite_store_end_to_end() {
    init_test_tracing();
    let store = SqliteDocumentStore::connect("sqlite::memory:").await.unwrap();
    let p = IngestPipeline::new(
        ScriptedSource::new(),
        store,
        open_gate(),
        PipelineOptions {
            page_size_cap: 4,
            collection: "timeline".into(),
        },
    );

    let report = p
        .run_batch(&["alice".into()], &categories(&["Tweets", "Likes"]), 6)
        .await;

    assert_eq!(report.items_total(), 12);
    assert_eq!(p.store().count("timeline").await.unwrap(), 12);
    let doc = p
        .store()
        .get("timeline", "alice:Likes:5")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["category"], "Likes");
    let sizes: Vec<_> = p.source().calls().iter().map(|c| c.page_size).collect();
    assert_eq!(sizes, [4, 2, 4, 2]);
}

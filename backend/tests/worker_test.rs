mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use backend::metrics::Metrics;
use backend::store::Store;
use backend::time::now_ms;

use support::{
    MockExtractor, MockNotifier, MockSearchClient, build_engine, drain_extraction_queue,
    make_store, setup_pool, summary, test_engine_config,
};

#[tokio::test]
async fn worker_extracts_keys_and_scores_a_listing() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let metrics = Arc::new(Metrics::default());

    let listing = store
        .upsert_listing(&summary("e1", "32GB DDR4 ECC REG 2666", 45.99).into_listing(now_ms()))
        .await
        .expect("upsert");
    store
        .enqueue_extraction(&listing.id, 0)
        .await
        .expect("enqueue");

    let engine = Arc::new(build_engine(
        store.clone(),
        MockSearchClient::new(),
        MockExtractor::new(),
        MockNotifier::new(),
        test_engine_config(),
        metrics.clone(),
    ));

    drain_extraction_queue(&engine, store.as_ref()).await;

    let listing = store
        .get_listing("e1")
        .await
        .expect("get")
        .expect("still there");
    assert_eq!(listing.component_type.as_deref(), Some("ram"));
    assert_eq!(
        listing.product_key.as_deref(),
        Some("ram:ddr4:ecc_reg:32gb:2666")
    );
    assert!(listing.attrs.as_ref().is_some_and(|a| !a.is_empty()));
    let confidence = listing.extraction_confidence.expect("confidence recorded");
    assert!((confidence - 0.9).abs() < 1e-9);
    assert!(listing.score.is_some(), "worker scores after extraction");

    // No baseline exists yet: this was a cold-start scoring.
    assert_eq!(metrics.cold_start_scorings.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.warm_baseline_scorings.load(Ordering::Relaxed), 0);
    assert_eq!(metrics.extraction_duration_ms.count(), 1);
    assert_eq!(metrics.score_distribution.count(), 1);

    let (completed, err): (Option<i64>, String) = {
        let row: (Option<i64>, String) = sqlx::query_as(
            "SELECT completed_at_ms, error FROM extraction_jobs WHERE listing_id = ?",
        )
        .bind(listing.id.to_string())
        .fetch_one(&pool)
        .await
        .expect("job row");
        row
    };
    assert!(completed.is_some());
    assert!(err.is_empty());
}

#[tokio::test]
async fn extractor_failure_completes_the_job_with_error_text() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let extractor = MockExtractor::new();
    let metrics = Arc::new(Metrics::default());

    extractor.fail.store(true, Ordering::SeqCst);

    let listing = store
        .upsert_listing(&summary("e1", "mystery lot", 10.0).into_listing(now_ms()))
        .await
        .expect("upsert");
    store
        .enqueue_extraction(&listing.id, 0)
        .await
        .expect("enqueue");

    let engine = Arc::new(build_engine(
        store.clone(),
        MockSearchClient::new(),
        extractor,
        MockNotifier::new(),
        test_engine_config(),
        metrics.clone(),
    ));

    drain_extraction_queue(&engine, store.as_ref()).await;

    assert_eq!(metrics.extraction_failures.load(Ordering::Relaxed), 1);

    let listing = store.get_listing("e1").await.expect("get").expect("row");
    assert!(listing.component_type.is_none());
    assert!(listing.score.is_none());

    let err: String = sqlx::query_scalar("SELECT error FROM extraction_jobs WHERE listing_id = ?")
        .bind(listing.id.to_string())
        .fetch_one(&pool)
        .await
        .expect("job row");
    assert!(err.contains("extract"), "error text preserved: {err}");
}

#[tokio::test]
async fn warm_baseline_raises_the_score_of_a_cheap_listing() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let metrics = Arc::new(Metrics::default());

    // Twelve comparable listings around $45 make the baseline warm.
    let (component_type, attrs) = MockExtractor::default_output();
    for i in 0..12 {
        let l = store
            .upsert_listing(
                &summary(&format!("seed-{i}"), "32GB DDR4 ECC REG 2666", 44.0 + i as f64)
                    .into_listing(now_ms()),
            )
            .await
            .expect("upsert");
        store
            .update_listing_extraction(
                &l.id,
                &component_type,
                &attrs,
                0.9,
                Some("ram:ddr4:ecc_reg:32gb:2666"),
            )
            .await
            .expect("extraction");
    }
    store
        .recompute_all_baselines(90)
        .await
        .expect("recompute baselines");

    // A clearly-underpriced new arrival.
    let bargain = store
        .upsert_listing(&summary("bargain", "32GB DDR4 ECC REG 2666", 20.0).into_listing(now_ms()))
        .await
        .expect("upsert");
    store
        .enqueue_extraction(&bargain.id, 0)
        .await
        .expect("enqueue");

    let engine = Arc::new(build_engine(
        store.clone(),
        MockSearchClient::new(),
        MockExtractor::new(),
        MockNotifier::new(),
        test_engine_config(),
        metrics.clone(),
    ));

    drain_extraction_queue(&engine, store.as_ref()).await;

    let bargain = store.get_listing("bargain").await.expect("get").expect("row");
    let score = bargain.score.expect("scored");
    assert!(score > 80, "bargain against a warm baseline, got {score}");
    assert_eq!(metrics.warm_baseline_scorings.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.cold_start_scorings.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn workers_stop_promptly_on_cancellation() {
    let pool = setup_pool().await;
    let store = make_store(&pool);

    let engine = Arc::new(build_engine(
        store.clone(),
        MockSearchClient::new(),
        MockExtractor::new(),
        MockNotifier::new(),
        test_engine_config(),
        Arc::new(Metrics::default()),
    ));

    let cancel = CancellationToken::new();
    let handles = engine.clone().start_extraction_workers(2, &cancel);
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker exits after cancellation")
            .expect("worker task joins");
    }
}

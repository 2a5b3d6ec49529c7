mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use backend::error::is_cancelled;
use backend::marketplace::BrowseQuota;
use backend::metrics::Metrics;
use backend::model::Alert;
use backend::store::Store;
use backend::time::now_ms;

use support::{
    MockExtractor, MockNotifier, MockSearchClient, build_engine, drain_extraction_queue,
    insert_watch, make_store, setup_pool, summary, test_engine_config, watch,
};

#[tokio::test]
async fn single_listing_happy_path_end_to_end() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let search = MockSearchClient::new();
    let extractor = MockExtractor::new();
    let notifier = MockNotifier::new();
    let metrics = Arc::new(Metrics::default());

    let w = watch("ddr4 watch", "32GB DDR4 ECC", 60);
    insert_watch(&pool, &w).await;
    search.set_page("32GB DDR4 ECC", vec![summary("e1", "32GB DDR4", 45.99)]);

    let engine = Arc::new(build_engine(
        store.clone(),
        search.clone(),
        extractor,
        notifier.clone(),
        test_engine_config(),
        metrics.clone(),
    ));
    let cancel = CancellationToken::new();

    // First cycle lands the listing and queues extraction; no score yet,
    // so no alert.
    engine.run_ingestion(&cancel).await.expect("first cycle");

    let listing = store
        .get_listing("e1")
        .await
        .expect("get listing")
        .expect("listing persisted");
    assert!(listing.score.is_none());
    assert_eq!(metrics.listings_ingested.load(Ordering::Relaxed), 1);
    assert_eq!(
        store.count_pending_extraction_jobs().await.expect("count"),
        1
    );

    drain_extraction_queue(&engine, store.as_ref()).await;

    let listing = store
        .get_listing("e1")
        .await
        .expect("get listing")
        .expect("listing persisted");
    assert_eq!(listing.component_type.as_deref(), Some("ram"));
    assert_eq!(
        listing.product_key.as_deref(),
        Some("ram:ddr4:ecc_reg:32gb:2666")
    );
    let score = listing.score.expect("scored after extraction");
    assert!(score >= 60, "expected an alertable score, got {score}");

    // Second cycle re-sees the listing with its score, evaluates the
    // alert inline, and the end-of-cycle processor delivers it.
    engine.run_ingestion(&cancel).await.expect("second cycle");

    assert_eq!(notifier.single_count(), 1);
    assert_eq!(store.count_pending_alerts().await.expect("count"), 0);
    assert_eq!(metrics.alerts_fired.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.alerts_fired_for("ddr4 watch"), 1);

    let succeeded: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notification_attempts WHERE succeeded = 1")
            .fetch_one(&pool)
            .await
            .expect("count attempts");
    assert_eq!(succeeded, 1);
}

#[tokio::test]
async fn daily_limit_mid_cycle_stops_traversal_but_not_the_tail() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let search = MockSearchClient::new();
    let extractor = MockExtractor::new();
    let notifier = MockNotifier::new();
    let metrics = Arc::new(Metrics::default());

    // ORDER BY name: a before b before c.
    insert_watch(&pool, &watch("a-watch", "qa", 90)).await;
    insert_watch(&pool, &watch("b-watch", "qb", 90)).await;
    insert_watch(&pool, &watch("c-watch", "qc", 90)).await;

    search.set_page("qa", vec![summary("e-a", "16GB DDR3", 20.0)]);
    search.set_daily_limit("qb");
    search.set_page("qc", vec![summary("e-c", "64GB DDR4", 99.0)]);
    search.set_quota(BrowseQuota {
        count: 5_000,
        limit: 5_000,
        remaining: 0,
        reset_at_ms: now_ms() + 3_600_000,
    });

    let engine = Arc::new(
        build_engine(
            store.clone(),
            search.clone(),
            extractor,
            notifier,
            test_engine_config(),
            metrics.clone(),
        )
        .with_analytics(search.clone()),
    );

    engine
        .run_ingestion(&CancellationToken::new())
        .await
        .expect("sentinel is a break, not an error");

    // First watch fully processed, second hit the sentinel, third skipped.
    assert_eq!(search.calls(), vec!["qa".to_string(), "qb".to_string()]);
    assert!(store.get_listing("e-a").await.expect("get").is_some());
    assert!(store.get_listing("e-c").await.expect("get").is_none());
    assert_eq!(metrics.daily_limit_hits.load(Ordering::Relaxed), 1);

    // Quota sync and state sync still ran.
    assert_eq!(metrics.rate_remaining.load(Ordering::Relaxed), 0);
    assert_eq!(metrics.rate_limit.load(Ordering::Relaxed), 5_000);
    assert_eq!(metrics.watches_total.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn page_budget_limits_watches_per_cycle() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let search = MockSearchClient::new();
    let extractor = MockExtractor::new();
    let notifier = MockNotifier::new();
    let metrics = Arc::new(Metrics::default());

    insert_watch(&pool, &watch("a-watch", "qa", 90)).await;
    insert_watch(&pool, &watch("b-watch", "qb", 90)).await;
    search.set_page("qa", vec![summary("e-a", "16GB DDR3", 20.0)]);
    search.set_page("qb", vec![summary("e-b", "64GB DDR4", 99.0)]);

    let mut cfg = test_engine_config();
    cfg.max_calls_per_cycle = 1;

    let engine = Arc::new(build_engine(
        store.clone(),
        search.clone(),
        extractor,
        notifier,
        cfg,
        metrics,
    ));

    engine
        .run_ingestion(&CancellationToken::new())
        .await
        .expect("budget break is not an error");

    assert_eq!(search.calls(), vec!["qa".to_string()]);
    assert!(store.get_listing("e-b").await.expect("get").is_none());
}

#[tokio::test]
async fn zero_watches_still_processes_alerts_and_syncs() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let search = MockSearchClient::new();
    let extractor = MockExtractor::new();
    let notifier = MockNotifier::new();
    let metrics = Arc::new(Metrics::default());

    search.set_quota(BrowseQuota {
        count: 10,
        limit: 5_000,
        remaining: 4_990,
        reset_at_ms: now_ms() + 3_600_000,
    });

    // A leftover pending alert from an earlier cycle; its watch row must
    // exist for dispatch, but the watch is disabled so ingestion skips it.
    let mut w = watch("leftover", "unused", 50);
    w.enabled = false;
    insert_watch(&pool, &w).await;
    let listing = store
        .upsert_listing(&summary("e9", "8GB DDR3 ECC", 12.0).into_listing(now_ms()))
        .await
        .expect("upsert");
    store
        .create_alert(&Alert {
            id: Uuid::new_v4(),
            watch_id: w.id,
            listing_id: listing.id,
            score: 80,
            pending: true,
            created_ms: now_ms(),
        })
        .await
        .expect("create alert");

    let engine = Arc::new(
        build_engine(
            store.clone(),
            search.clone(),
            extractor,
            notifier.clone(),
            test_engine_config(),
            metrics.clone(),
        )
        .with_analytics(search.clone()),
    );

    engine
        .run_ingestion(&CancellationToken::new())
        .await
        .expect("empty cycle");

    assert!(search.calls().is_empty(), "no watch may be searched");
    assert_eq!(notifier.single_count(), 1, "pending alert still drained");
    assert_eq!(store.count_pending_alerts().await.expect("count"), 0);
    assert_eq!(metrics.rate_remaining.load(Ordering::Relaxed), 4_990);

    let persisted: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rate_limit_state")
        .fetch_one(&pool)
        .await
        .expect("rate state row");
    assert_eq!(persisted, 1);
}

#[tokio::test]
async fn watch_error_is_absorbed_and_last_polled_still_recorded() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let search = MockSearchClient::new();
    let extractor = MockExtractor::new();
    let notifier = MockNotifier::new();
    let metrics = Arc::new(Metrics::default());

    let broken = watch("broken", "q-broken", 90);
    insert_watch(&pool, &broken).await;
    let healthy = watch("healthy", "q-ok", 90);
    insert_watch(&pool, &healthy).await;

    search.set_fail("q-broken");
    search.set_page("q-ok", vec![summary("e-ok", "SAS HBA", 30.0)]);

    let engine = Arc::new(build_engine(
        store.clone(),
        search.clone(),
        extractor,
        notifier,
        test_engine_config(),
        metrics.clone(),
    ));

    engine
        .run_ingestion(&CancellationToken::new())
        .await
        .expect("per-watch errors are absorbed");

    assert_eq!(metrics.ingestion_errors.load(Ordering::Relaxed), 1);
    assert!(store.get_listing("e-ok").await.expect("get").is_some());

    let polled: Option<i64> =
        sqlx::query_scalar("SELECT last_polled_ms FROM watches WHERE name = 'broken'")
            .fetch_one(&pool)
            .await
            .expect("fetch last polled");
    assert!(polled.is_some(), "last-polled recorded despite the failure");
}

#[tokio::test]
async fn cancellation_surfaces_but_tail_still_runs() {
    let pool = setup_pool().await;
    let store = make_store(&pool);
    let search = MockSearchClient::new();
    let extractor = MockExtractor::new();
    let notifier = MockNotifier::new();
    let metrics = Arc::new(Metrics::default());

    insert_watch(&pool, &watch("a-watch", "qa", 90)).await;

    let engine = Arc::new(build_engine(
        store.clone(),
        search.clone(),
        extractor,
        notifier,
        test_engine_config(),
        metrics.clone(),
    ));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .run_ingestion(&cancel)
        .await
        .expect_err("cancellation must surface");
    assert!(is_cancelled(&err));
    assert!(search.calls().is_empty());

    // State-metric sync still happened on the way out.
    assert_eq!(metrics.watches_total.load(Ordering::Relaxed), 1);
}

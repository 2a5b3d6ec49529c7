use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use backend::{
    config::AppConfig,
    db::Db,
    engine::Engine,
    extractor::llm::LlmExtractor,
    marketplace::client::HttpSearchClient,
    marketplace::paginator::Paginator,
    marketplace::rate_limiter::RateLimiter,
    metrics::Metrics,
    notify::webhook::WebhookNotifier,
    scheduler::Scheduler,
    store::{Store, sqlx_store::SqlxStore},
};
use common::logger::init_tracing;

/// Extraction leases older than this at startup belong to dead workers.
const STALE_LEASE_AGE_MS: u64 = 10 * 60 * 1_000;

/// Initializes the DB, runs migrations, and constructs the store.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<Arc<SqlxStore>> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;
    Ok(Arc::new(SqlxStore::new(db.pool.clone())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting price-tracker backend...");

    let cfg = AppConfig::from_env();
    let metrics = Arc::new(Metrics::default());

    let store: Arc<dyn Store> = init_store(&cfg).await?;

    // Crash recovery before anything starts moving.
    let released = store.recover_stale_leases(STALE_LEASE_AGE_MS).await?;
    if released > 0 {
        tracing::warn!(released, "released stale extraction leases");
    }

    let limiter = Arc::new(RateLimiter::new(
        cfg.rate_per_sec,
        cfg.rate_burst,
        cfg.daily_quota,
    ));
    if let Some(snapshot) = store.load_rate_limiter_state().await? {
        limiter.restore(&snapshot);
        tracing::info!(
            daily_count = snapshot.daily_count,
            daily_max = snapshot.daily_max,
            "rate limiter restored from persisted state"
        );
    }

    let client = Arc::new(HttpSearchClient::new(
        cfg.marketplace_base_url.clone(),
        cfg.marketplace_token.clone(),
        limiter.clone(),
        metrics.clone(),
    )?);
    let paginator = Arc::new(Paginator::new(client.clone(), store.clone(), cfg.page_cap));
    let extractor = Arc::new(LlmExtractor::new(
        cfg.extractor_base_url.clone(),
        cfg.extractor_api_key.clone(),
        cfg.extractor_model.clone(),
    )?);
    let notifier = Arc::new(WebhookNotifier::new(cfg.webhook_url.clone())?);

    let engine = Arc::new(
        Engine::new(
            store.clone(),
            client.clone(),
            extractor,
            notifier,
            limiter.clone(),
            cfg.engine.clone(),
            metrics.clone(),
        )
        .with_paginator(paginator)
        .with_analytics(client.clone()),
    );

    let cancel = CancellationToken::new();

    let worker_handles = engine
        .clone()
        .start_extraction_workers(cfg.engine.worker_count, &cancel);

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        engine.clone(),
        &cfg.scheduler,
        metrics.clone(),
    ));
    scheduler.recover_stale_job_runs().await?;
    let scheduler_handle = scheduler.start(&cancel);

    tracing::info!(
        workers = cfg.engine.worker_count,
        "Backend started; waiting for shutdown signal"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    scheduler_handle.stopped().await;
    futures::future::join_all(worker_handles).await;

    Ok(())
}

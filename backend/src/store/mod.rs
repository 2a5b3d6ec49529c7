pub mod sqlx_store;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{
    Alert, AlertId, AttrMap, Baseline, ExtractionJob, JobId, JobStatus, Listing, ListingId,
    RateLimitSnapshot, RunId, SystemState, Watch, WatchId,
};

/// Query shape for operator-facing listing enumeration.
#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    pub product_key: Option<String>,
    pub component_type: Option<String>,
    pub min_score: Option<i32>,
    pub limit: usize,
    pub offset: usize,
}

/// Durable state for all entities and queues.
///
/// One logical operation per call; implementations own their transactions
/// and never hold one across a return.
#[async_trait]
pub trait Store: Send + Sync {
    // --- watches ---
    async fn list_watches(&self, enabled_only: bool) -> Result<Vec<Watch>>;
    async fn get_watch(&self, id: &WatchId) -> Result<Option<Watch>>;
    async fn update_watch_last_polled(&self, id: &WatchId, at_ms: u64) -> Result<()>;

    // --- listings ---
    /// Insert or refresh by external id. Extraction and scoring fields on
    /// the stored row survive the refresh; the returned listing is the
    /// merged row as persisted.
    async fn upsert_listing(&self, listing: &Listing) -> Result<Listing>;
    async fn get_listing(&self, external_id: &str) -> Result<Option<Listing>>;
    async fn get_listing_by_id(&self, id: &ListingId) -> Result<Option<Listing>>;
    async fn list_listings(&self, query: &ListingQuery) -> Result<(Vec<Listing>, u64)>;
    /// Keyset pagination ordered by id; pass the previous page's last id.
    async fn list_listings_cursor(
        &self,
        cursor: Option<&ListingId>,
        batch_size: usize,
    ) -> Result<Vec<Listing>>;
    async fn list_unscored_listings(&self, limit: usize) -> Result<Vec<Listing>>;
    /// Listings with a component type but no product key.
    async fn list_incomplete_extractions(
        &self,
        component_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Listing>>;
    async fn update_listing_extraction(
        &self,
        id: &ListingId,
        component_type: &str,
        attrs: &AttrMap,
        confidence: f64,
        product_key: Option<&str>,
    ) -> Result<()>;
    async fn update_score(&self, id: &ListingId, total: i32, breakdown_json: &str) -> Result<()>;

    // --- baselines ---
    /// Returns the `AppError::NoBaseline` sentinel when no row exists.
    async fn get_baseline(&self, product_key: &str) -> Result<Baseline>;
    /// Recompute every baseline over the sliding window; returns the number
    /// of product keys with at least one sample.
    async fn recompute_all_baselines(&self, window_days: u32) -> Result<u64>;
    /// (cold, warm) counts split at `min_samples`.
    async fn count_baselines_by_maturity(&self, min_samples: u32) -> Result<(u64, u64)>;
    async fn count_product_keys_without_baseline(&self) -> Result<u64>;

    // --- extraction queue ---
    async fn enqueue_extraction(&self, listing_id: &ListingId, priority: i32) -> Result<JobId>;
    /// Atomically lease up to `n` eligible jobs to `worker_id`. Two
    /// concurrent callers can never lease the same job.
    async fn dequeue_extractions(&self, worker_id: &str, n: usize) -> Result<Vec<ExtractionJob>>;
    /// Mark a leased job done; empty `error` means success.
    async fn complete_extraction_job(&self, job_id: &JobId, error: &str) -> Result<()>;
    async fn count_pending_extraction_jobs(&self) -> Result<u64>;
    /// Startup sweep: release leases older than `stale_ms` so crashed
    /// workers' jobs become eligible again. Returns affected rows.
    async fn recover_stale_leases(&self, stale_ms: u64) -> Result<u64>;

    // --- alerts ---
    /// Insert a pending alert. Returns false when one is already pending
    /// for this (watch, listing); the partial unique index absorbs the
    /// race and the engine treats it as a no-op.
    async fn create_alert(&self, alert: &Alert) -> Result<bool>;
    async fn list_pending_alerts(&self) -> Result<Vec<Alert>>;
    /// Any alert (pending or notified) created for this pair within the
    /// cooldown window.
    async fn has_recent_alert(
        &self,
        watch_id: &WatchId,
        listing_id: &ListingId,
        cooldown_ms: u64,
    ) -> Result<bool>;
    async fn has_successful_notification(&self, alert_id: &AlertId) -> Result<bool>;
    async fn insert_notification_attempt(
        &self,
        alert_id: &AlertId,
        succeeded: bool,
        duration_ms: u64,
        error: &str,
    ) -> Result<()>;
    async fn mark_alert_notified(&self, id: &AlertId) -> Result<()>;
    async fn mark_alerts_notified(&self, ids: &[AlertId]) -> Result<()>;
    async fn count_pending_alerts(&self) -> Result<u64>;

    // --- scheduler ---
    /// Returns true when this holder now owns the lock. Expired locks are
    /// reclaimable; re-acquisition by the same holder refreshes the ttl.
    async fn acquire_scheduler_lock(&self, name: &str, holder: &str, ttl_ms: u64) -> Result<bool>;
    async fn release_scheduler_lock(&self, name: &str, holder: &str) -> Result<()>;
    async fn insert_job_run(&self, name: &str, started_ms: u64) -> Result<RunId>;
    async fn complete_job_run(
        &self,
        id: &RunId,
        status: JobStatus,
        error: &str,
        duration_ms: u64,
    ) -> Result<()>;
    /// Running rows older than `stale_ms` are swept to crashed. Returns
    /// affected rows.
    async fn recover_stale_job_runs(&self, stale_ms: u64) -> Result<u64>;

    // --- state ---
    async fn get_system_state(&self, min_samples: u32) -> Result<SystemState>;
    async fn persist_rate_limiter_state(&self, snapshot: &RateLimitSnapshot) -> Result<()>;
    async fn load_rate_limiter_state(&self) -> Result<Option<RateLimitSnapshot>>;
}

//! Ingestion cycle: traverse enabled watches under the per-cycle page
//! budget, upsert what the marketplace returns, and queue extraction.

use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::Engine;
use crate::error::{AppError, is_cancelled, is_daily_limit};
use crate::marketplace::SearchRequest;
use crate::model::Watch;
use crate::time::now_ms;

impl Engine {
    /// Process every enabled watch once, bounded by `max_calls_per_cycle`.
    ///
    /// Alert processing, quota sync, and state-metric sync always run at
    /// the end, regardless of budget exhaustion, the daily-limit sentinel,
    /// or cancellation mid-traversal.
    #[instrument(skip(self, cancel), target = "engine")]
    pub async fn run_ingestion(&self, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();

        let result = self.ingest_watches(cancel).await;

        if let Err(e) = self.process_alerts(cancel).await {
            warn!(error = ?e, "alert processing after ingestion failed");
        }
        self.sync_quota().await;
        self.sync_state_metrics().await;

        self.metrics
            .ingestion_duration_ms
            .observe(started.elapsed().as_millis() as f64);

        result
    }

    async fn ingest_watches(&self, cancel: &CancellationToken) -> Result<()> {
        let watches = self
            .store
            .list_watches(true)
            .await
            .context("list enabled watches")?;

        let budget = self.cfg.max_calls_per_cycle;
        let mut pages_used: u32 = 0;

        for (idx, watch) in watches.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled.into());
            }
            if pages_used >= budget {
                info!(
                    pages_used,
                    budget, "per-cycle page budget exhausted; stopping watch traversal"
                );
                break;
            }

            let outcome = self.process_watch(watch).await;

            // Last-polled is bookkeeping, never fatal.
            if let Err(e) = self.store.update_watch_last_polled(&watch.id, now_ms()).await {
                warn!(watch = %watch.name, error = ?e, "failed to record last-polled");
            }

            match outcome {
                Ok(pages) => {
                    pages_used += pages;
                }
                Err(e) if is_daily_limit(&e) => {
                    self.metrics.daily_limit_hits.fetch_add(1, Ordering::Relaxed);
                    warn!(watch = %watch.name, "daily marketplace limit reached; stopping cycle");
                    break;
                }
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => {
                    self.metrics.ingestion_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(watch = %watch.name, error = ?e, "watch ingestion failed; continuing");
                }
            }

            let is_last = idx + 1 == watches.len();
            if !is_last && !self.cfg.stagger_offset.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.cfg.stagger_offset) => {}
                    _ = cancel.cancelled() => return Err(AppError::Cancelled.into()),
                }
            }
        }

        Ok(())
    }

    /// Search one watch and land its listings. Per-listing failures are
    /// logged and never halt the batch. Returns pages consumed.
    async fn process_watch(&self, watch: &Watch) -> Result<u32> {
        let req = SearchRequest::new(watch.query.clone(), watch.category.clone());

        let (summaries, pages_used, total_seen) = match &self.paginator {
            Some(paginator) => {
                let out = paginator.paginate(&req, true).await?;
                debug!(
                    watch = %watch.name,
                    pages = out.pages_used,
                    total_seen = out.total_seen,
                    new = out.new_listings.len(),
                    stopped_at = %out.stopped_at,
                    "paginated watch"
                );
                (out.new_listings, out.pages_used, out.total_seen)
            }
            None => {
                let page = self.search.search(&req).await?;
                let seen = page.items.len() as u32;
                (page.items, 1, seen)
            }
        };

        for summary in summaries {
            let listing = summary.into_listing(now_ms());

            let stored = match self.store.upsert_listing(&listing).await {
                Ok(l) => l,
                Err(e) => {
                    warn!(external_id = %listing.external_id, error = ?e, "listing upsert failed");
                    continue;
                }
            };
            self.metrics.listings_ingested.fetch_add(1, Ordering::Relaxed);

            if let Err(e) = self.store.enqueue_extraction(&stored.id, 0).await {
                warn!(external_id = %stored.external_id, error = ?e, "extraction enqueue failed");
            }

            if let Err(e) = self.evaluate_listing_alert(watch, &stored).await {
                warn!(external_id = %stored.external_id, error = ?e, "alert evaluation failed");
            }
        }

        debug!(watch = %watch.name, pages_used, total_seen, "watch processed");
        Ok(pages_used)
    }
}

//! Extraction worker pool: drains the durable queue, one job at a time
//! per worker, with exactly-once completion bookkeeping per dequeue.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::extractor::product_key::product_key;
use crate::model::{ExtractionJob, JobId};

const WORKER_IDLE_DELAY: Duration = Duration::from_millis(100);
const EXTRACTION_CONFIDENCE: f64 = 0.9;

impl Engine {
    /// Spawn `count` independent workers. Each loops on the store queue
    /// until the token is cancelled; there are no in-process channels
    /// between workers and the ingestion loop.
    pub fn start_extraction_workers(
        self: Arc<Self>,
        count: usize,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let pid = std::process::id();
        (0..count.max(1))
            .map(|i| {
                let engine = Arc::clone(&self);
                let cancel = cancel.clone();
                let worker_id = format!("worker-{pid}-{i}");
                tokio::spawn(async move {
                    engine.extraction_worker_loop(worker_id, cancel).await;
                })
            })
            .collect()
    }

    async fn extraction_worker_loop(&self, worker_id: String, cancel: CancellationToken) {
        info!(worker = %worker_id, "extraction worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.store.dequeue_extractions(&worker_id, 1).await {
                Ok(jobs) if jobs.is_empty() => {
                    tokio::select! {
                        _ = tokio::time::sleep(WORKER_IDLE_DELAY) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                Ok(jobs) => {
                    for job in jobs {
                        self.process_extraction_job(&job).await;
                    }
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!(worker = %worker_id, error = ?e, "dequeue failed");
                    tokio::select! {
                        _ = tokio::time::sleep(WORKER_IDLE_DELAY) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }

        info!(worker = %worker_id, "extraction worker stopped");
    }

    /// Classify, derive the product key, persist, then score. Scoring
    /// failures are logged but the job still completes; scoring is
    /// best-effort and re-runnable.
    async fn process_extraction_job(&self, job: &ExtractionJob) {
        let listing = match self.store.get_listing_by_id(&job.listing_id).await {
            Ok(Some(l)) => l,
            Ok(None) => {
                self.complete_job(&job.id, "listing not found").await;
                return;
            }
            Err(e) => {
                self.complete_job(&job.id, &format!("fetch listing: {e:#}")).await;
                return;
            }
        };

        let started = Instant::now();
        let extraction = self
            .extractor
            .classify_and_extract(&listing.title, listing.attrs.as_ref())
            .await;
        self.metrics
            .extraction_duration_ms
            .observe(started.elapsed().as_millis() as f64);

        let (component_type, attrs) = match extraction {
            Ok(out) => out,
            Err(e) => {
                self.metrics.extraction_failures.fetch_add(1, Ordering::Relaxed);
                self.complete_job(&job.id, &format!("extract: {e:#}")).await;
                return;
            }
        };

        let key = product_key(&component_type, &attrs);

        if let Err(e) = self
            .store
            .update_listing_extraction(
                &listing.id,
                &component_type,
                &attrs,
                EXTRACTION_CONFIDENCE,
                key.as_deref(),
            )
            .await
        {
            self.complete_job(&job.id, &format!("persist extraction: {e:#}")).await;
            return;
        }

        let mut updated = listing;
        updated.component_type = Some(component_type);
        updated.attrs = Some(attrs);
        updated.product_key = key;

        if let Err(e) = self.score_listing(&updated).await {
            warn!(
                external_id = %updated.external_id,
                error = ?e,
                "scoring failed; extraction job still completes"
            );
        }

        self.complete_job(&job.id, "").await;
    }

    /// A completion failure is logged, not retried: the stale-lease sweep
    /// makes the job eligible again after a crash.
    async fn complete_job(&self, job_id: &JobId, err_text: &str) {
        if let Err(e) = self.store.complete_extraction_job(job_id, err_text).await {
            warn!(job = %job_id, error = ?e, "failed to mark extraction job complete");
        }
    }
}

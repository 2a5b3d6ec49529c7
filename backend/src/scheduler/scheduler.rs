//! Periodic driver around the engine.
//!
//! Responsibilities:
//! - Fire ingestion, baseline refresh, and (optionally) re-extraction on
//!   fixed intervals.
//! - Gate each run behind the store-side distributed lock so at most one
//!   instance executes a given job at a time, across all replicas.
//! - Record every run durably (`job_runs`) and sweep rows orphaned by a
//!   crash back to a terminal status at startup.
//!
//! Non-responsibilities:
//! - The work itself (the engine does that).
//! - Per-operation deadlines: the lock ttl is an upper bound for a run,
//!   not a timeout.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerIntervals;
use crate::engine::Engine;
use crate::metrics::Metrics;
use crate::model::JobStatus;
use crate::store::Store;
use crate::time::now_ms;

pub const JOB_INGESTION: &str = "ingestion";
pub const JOB_BASELINE_REFRESH: &str = "baseline_refresh";
pub const JOB_RE_EXTRACTION: &str = "re_extraction";

const INGESTION_TTL_MS: u64 = 30 * 60 * 1_000;
const BASELINE_TTL_MS: u64 = 60 * 60 * 1_000;
const RE_EXTRACTION_TTL_MS: u64 = 30 * 60 * 1_000;

/// Running job-run rows older than this are presumed crashed.
const STALE_RUN_AGE_MS: u64 = 2 * 60 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Ingestion,
    BaselineRefresh,
    ReExtraction,
}

#[derive(Debug, Clone)]
pub struct JobEntry {
    pub name: &'static str,
    kind: JobKind,
    pub interval: Duration,
    pub ttl_ms: u64,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    engine: Arc<Engine>,
    hostname: String,
    metrics: Arc<Metrics>,
    entries: Vec<JobEntry>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<Engine>,
        intervals: &SchedulerIntervals,
        metrics: Arc<Metrics>,
    ) -> Self {
        let mut entries = vec![
            JobEntry {
                name: JOB_INGESTION,
                kind: JobKind::Ingestion,
                interval: intervals.ingestion_interval,
                ttl_ms: INGESTION_TTL_MS,
            },
            JobEntry {
                name: JOB_BASELINE_REFRESH,
                kind: JobKind::BaselineRefresh,
                interval: intervals.baseline_interval,
                ttl_ms: BASELINE_TTL_MS,
            },
        ];
        if !intervals.re_extraction_interval.is_zero() {
            entries.push(JobEntry {
                name: JOB_RE_EXTRACTION,
                kind: JobKind::ReExtraction,
                interval: intervals.re_extraction_interval,
                ttl_ms: RE_EXTRACTION_TTL_MS,
            });
        }

        Self {
            store,
            engine,
            hostname: hostname(),
            metrics,
            entries,
        }
    }

    /// Override the lock-holder identity (one process hosting several
    /// instances, e.g. under test).
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn entries(&self) -> &[JobEntry] {
        &self.entries
    }

    /// Startup sweep: `running` rows whose start is older than the stale
    /// threshold become `crashed`.
    pub async fn recover_stale_job_runs(&self) -> Result<u64> {
        let affected = self.store.recover_stale_job_runs(STALE_RUN_AGE_MS).await?;
        if affected > 0 {
            warn!(affected, "swept stale job runs to crashed");
        }
        Ok(affected)
    }

    /// Begin firing entries. Each entry loops independently; the lock
    /// serializes actual execution across instances.
    pub fn start(self: Arc<Self>, cancel: &CancellationToken) -> SchedulerHandle {
        let mut handles = Vec::with_capacity(self.entries.len());
        for entry in self.entries.clone() {
            let scheduler = Arc::clone(&self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                scheduler.entry_loop(entry, cancel).await;
            }));
        }
        SchedulerHandle { handles }
    }

    async fn entry_loop(&self, entry: JobEntry, cancel: CancellationToken) {
        let mut ticker = interval(entry.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // consume the immediate first tick

        self.metrics
            .set_next_run(entry.name, now_ms() + entry.interval.as_millis() as u64);
        info!(
            job = entry.name,
            every_s = entry.interval.as_secs(),
            "scheduled job registered"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }

            self.metrics
                .set_next_run(entry.name, now_ms() + entry.interval.as_millis() as u64);

            if let Err(e) = self.run_job(&entry, &cancel).await {
                tracing::error!(job = entry.name, error = ?e, "scheduled job failed");
            }

            if cancel.is_cancelled() {
                break;
            }
        }

        info!(job = entry.name, "scheduled job loop stopped");
    }

    /// One tick of one job: lock → run row → fn → teardown.
    ///
    /// A lock held elsewhere (or a lock-acquisition error) is a silent
    /// skip, which is normal for multi-replica. Teardown runs on every exit path
    /// and its errors are logged, never propagated; the original `fn`
    /// error is returned to the caller.
    pub async fn run_job(&self, entry: &JobEntry, cancel: &CancellationToken) -> Result<()> {
        let acquired = match self
            .store
            .acquire_scheduler_lock(entry.name, &self.hostname, entry.ttl_ms)
            .await
        {
            Ok(a) => a,
            Err(e) => {
                warn!(job = entry.name, error = ?e, "lock acquisition errored; skipping tick");
                return Ok(());
            }
        };
        if !acquired {
            debug!(job = entry.name, "lock held by another instance; skipping");
            return Ok(());
        }

        let run_id = match self.store.insert_job_run(entry.name, now_ms()).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(job = entry.name, error = ?e, "job-run insert failed; running without bookkeeping");
                None
            }
        };

        let Some(run_id) = run_id else {
            // Best-effort path: release the lock and still run the job.
            if let Err(e) = self
                .store
                .release_scheduler_lock(entry.name, &self.hostname)
                .await
            {
                warn!(job = entry.name, error = ?e, "lock release failed");
            }
            return self.execute(entry.kind, cancel).await;
        };

        let result = self.execute(entry.kind, cancel).await;

        let (status, err_text) = match &result {
            Ok(()) => (JobStatus::Succeeded, String::new()),
            Err(e) => (JobStatus::Failed, format!("{e:#}")),
        };

        if let Err(e) = self
            .store
            .release_scheduler_lock(entry.name, &self.hostname)
            .await
        {
            warn!(job = entry.name, error = ?e, "lock release failed");
        }
        if let Err(e) = self
            .store
            .complete_job_run(&run_id, status, &err_text, 0)
            .await
        {
            warn!(job = entry.name, error = ?e, "job-run completion failed");
        }

        result
    }

    async fn execute(&self, kind: JobKind, cancel: &CancellationToken) -> Result<()> {
        match kind {
            JobKind::Ingestion => {
                self.engine.run_ingestion(cancel).await?;
                self.metrics
                    .last_ingestion_success_ms
                    .store(now_ms(), Ordering::Relaxed);
                Ok(())
            }
            JobKind::BaselineRefresh => {
                self.engine.run_baseline_refresh().await?;
                self.metrics
                    .last_baseline_refresh_ms
                    .store(now_ms(), Ordering::Relaxed);
                Ok(())
            }
            JobKind::ReExtraction => {
                let enqueued = self.engine.run_re_extraction(cancel, None, None).await?;
                info!(enqueued, "re-extraction run complete");
                Ok(())
            }
        }
    }
}

/// Handle to the running job loops; resolves once all of them exit after
/// cancellation.
pub struct SchedulerHandle {
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub async fn stopped(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("host-{}", std::process::id()))
}

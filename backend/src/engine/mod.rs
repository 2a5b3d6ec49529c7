//! Stateless orchestrator composing the store, marketplace client,
//! extractor, scorer, and notifier.
//!
//! Entry points: `run_ingestion`, `run_baseline_refresh`,
//! `run_re_extraction`, `start_extraction_workers`, `process_alerts`,
//! `sync_quota`, `sync_state_metrics`. All of them take a cancellation
//! token where they loop. None of them ever kills the process: a failed
//! dependency degrades the pipeline, it does not halt it.

pub mod alerts;
pub mod baseline;
pub mod ingestion;
pub mod quota;
pub mod reextract;
pub mod scoring;
pub mod state;
pub mod workers;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::extractor::Extractor;
use crate::marketplace::paginator::Paginator;
use crate::marketplace::rate_limiter::RateLimiter;
use crate::marketplace::{AnalyticsClient, SearchClient};
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::scoring::ScoreWeights;
use crate::store::Store;

pub struct Engine {
    store: Arc<dyn Store>,
    search: Arc<dyn SearchClient>,
    paginator: Option<Arc<Paginator>>,
    extractor: Arc<dyn Extractor>,
    notifier: Arc<dyn Notifier>,
    limiter: Arc<RateLimiter>,
    analytics: Option<Arc<dyn AnalyticsClient>>,
    cfg: EngineConfig,
    weights: ScoreWeights,
    metrics: Arc<Metrics>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        search: Arc<dyn SearchClient>,
        extractor: Arc<dyn Extractor>,
        notifier: Arc<dyn Notifier>,
        limiter: Arc<RateLimiter>,
        cfg: EngineConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let weights = ScoreWeights {
            min_baseline_samples: cfg.min_baseline_samples,
            ..ScoreWeights::default()
        };

        Self {
            store,
            search,
            paginator: None,
            extractor,
            notifier,
            limiter,
            analytics: None,
            cfg,
            weights,
            metrics,
        }
    }

    /// Multi-page traversal per watch; without it each watch gets a single
    /// search page per cycle.
    pub fn with_paginator(mut self, paginator: Arc<Paginator>) -> Self {
        self.paginator = Some(paginator);
        self
    }

    /// Authoritative-quota reconciliation; without it `sync_quota` is a
    /// no-op (feature disabled, not an error).
    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsClient>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

//! Scoring integration: baseline lookup, feature extraction, persistence.

use std::sync::atomic::Ordering;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::is_no_baseline;
use crate::model::{Listing, ListingId};
use crate::scoring::{self, ListingFeatures};
use crate::store::ListingQuery;

const RESCORE_ALL_BATCH: usize = 200;
const BY_KEY_PAGE: usize = 500;

impl Engine {
    /// Compute and persist the composite score for one listing.
    ///
    /// A listing without a product key cannot be scored yet; that is a
    /// successful no-op, not an error. A missing baseline row is a cold
    /// start, not a store failure.
    pub async fn score_listing(&self, listing: &Listing) -> Result<()> {
        let Some(key) = listing.product_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(());
        };

        let baseline = match self.store.get_baseline(key).await {
            Ok(b) => Some(b),
            Err(e) if is_no_baseline(&e) => None,
            Err(e) => return Err(e).context("fetch baseline"),
        };

        let features = ListingFeatures::from_listing(listing);
        let (total, breakdown) = scoring::score(&features, baseline.as_ref(), &self.weights);

        if baseline
            .as_ref()
            .is_some_and(|b| b.is_warm(self.weights.min_baseline_samples))
        {
            self.metrics
                .warm_baseline_scorings
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics
                .cold_start_scorings
                .fetch_add(1, Ordering::Relaxed);
        }
        self.metrics.score_distribution.observe(total as f64);

        let breakdown_json = serde_json::to_string(&breakdown)?;
        self.store
            .update_score(&listing.id, total, &breakdown_json)
            .await
            .context("persist score")?;

        debug!(external_id = %listing.external_id, total, "listing scored");
        Ok(())
    }

    /// Score up to `limit` listings from the unscored backlog. Per-listing
    /// failures are logged; returns how many scored.
    pub async fn rescore_listings(&self, limit: usize) -> Result<u64> {
        let listings = self
            .store
            .list_unscored_listings(limit)
            .await
            .context("list unscored listings")?;

        let mut scored = 0u64;
        for listing in &listings {
            match self.score_listing(listing).await {
                Ok(()) => scored += 1,
                Err(e) => {
                    warn!(external_id = %listing.external_id, error = ?e, "rescore failed")
                }
            }
        }
        Ok(scored)
    }

    /// Re-score every listing sharing a product key (e.g. after its
    /// baseline moved).
    pub async fn rescore_by_product_key(&self, key: &str) -> Result<u64> {
        let mut scored = 0u64;
        let mut offset = 0usize;

        loop {
            let query = ListingQuery {
                product_key: Some(key.to_string()),
                limit: BY_KEY_PAGE,
                offset,
                ..Default::default()
            };
            let (listings, _) = self.store.list_listings(&query).await?;
            let page_len = listings.len();

            for listing in &listings {
                match self.score_listing(listing).await {
                    Ok(()) => scored += 1,
                    Err(e) => {
                        warn!(external_id = %listing.external_id, error = ?e, "rescore failed")
                    }
                }
            }

            if page_len < BY_KEY_PAGE {
                break;
            }
            offset += BY_KEY_PAGE;
        }

        Ok(scored)
    }

    /// Walk the whole listing table in id-cursor batches so the table is
    /// never materialized at once. Per-batch errors accumulate and are
    /// surfaced joined at the end.
    pub async fn rescore_all(&self) -> Result<u64> {
        let mut cursor: Option<ListingId> = None;
        let mut scored = 0u64;
        let mut errors: Vec<String> = Vec::new();

        loop {
            let batch = match self
                .store
                .list_listings_cursor(cursor.as_ref(), RESCORE_ALL_BATCH)
                .await
            {
                Ok(b) => b,
                Err(e) => {
                    errors.push(format!("cursor batch after {cursor:?}: {e:#}"));
                    break;
                }
            };

            let Some(last) = batch.last() else { break };
            cursor = Some(last.id);

            for listing in &batch {
                match self.score_listing(listing).await {
                    Ok(()) => scored += 1,
                    Err(e) => errors.push(format!("{}: {e:#}", listing.external_id)),
                }
            }

            if batch.len() < RESCORE_ALL_BATCH {
                break;
            }
        }

        if errors.is_empty() {
            Ok(scored)
        } else {
            Err(anyhow!(
                "rescore-all finished with {} error(s): {}",
                errors.len(),
                errors.join("; ")
            ))
        }
    }
}

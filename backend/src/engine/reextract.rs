use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::AppError;

const DEFAULT_REEXTRACT_LIMIT: usize = 100;

impl Engine {
    /// Queue listings whose extraction is incomplete (classified but never
    /// keyed) for another pass at re-extract priority. Returns how many
    /// jobs were enqueued.
    pub async fn run_re_extraction(
        &self,
        cancel: &CancellationToken,
        component_type: Option<&str>,
        limit: Option<usize>,
    ) -> Result<u64> {
        let limit = limit.unwrap_or(DEFAULT_REEXTRACT_LIMIT);

        let listings = self
            .store
            .list_incomplete_extractions(component_type, limit)
            .await
            .context("list incomplete extractions")?;

        let mut enqueued = 0u64;
        for listing in &listings {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled.into());
            }
            match self.store.enqueue_extraction(&listing.id, 1).await {
                Ok(_) => enqueued += 1,
                Err(e) => {
                    warn!(external_id = %listing.external_id, error = ?e, "re-extraction enqueue failed");
                }
            }
        }

        info!(
            enqueued,
            candidates = listings.len(),
            component_type = component_type.unwrap_or("*"),
            "re-extraction jobs enqueued"
        );
        Ok(enqueued)
    }
}

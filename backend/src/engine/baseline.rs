use anyhow::{Context, Result};
use tracing::info;

use crate::engine::Engine;

impl Engine {
    /// Recompute all baselines over the sliding window, then re-score
    /// every listing against them. Strictly ordered: a recompute failure
    /// aborts the rescore.
    pub async fn run_baseline_refresh(&self) -> Result<()> {
        let keys = self
            .store
            .recompute_all_baselines(self.cfg.baseline_window_days)
            .await
            .context("recompute baselines")?;

        info!(
            product_keys = keys,
            window_days = self.cfg.baseline_window_days,
            "baselines recomputed"
        );

        let scored = self
            .rescore_all()
            .await
            .context("rescore after baseline refresh")?;

        info!(scored, "baseline refresh rescoring complete");
        Ok(())
    }
}

use std::sync::atomic::Ordering;

use tracing::warn;

use crate::engine::Engine;

impl Engine {
    /// Refresh the backlog gauges from one denormalized store snapshot.
    /// All errors are logged, never propagated.
    pub async fn sync_state_metrics(&self) {
        let state = match self
            .store
            .get_system_state(self.cfg.min_baseline_samples)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!(error = ?e, "system state query failed; gauges left stale");
                return;
            }
        };

        let m = &self.metrics;
        m.watches_total.store(state.watches_total, Ordering::Relaxed);
        m.watches_enabled.store(state.watches_enabled, Ordering::Relaxed);
        m.listings_total.store(state.listings_total, Ordering::Relaxed);
        m.listings_unextracted
            .store(state.listings_unextracted, Ordering::Relaxed);
        m.listings_unscored
            .store(state.listings_unscored, Ordering::Relaxed);
        m.alerts_pending.store(state.alerts_pending, Ordering::Relaxed);
        m.baselines_cold.store(state.baselines_cold, Ordering::Relaxed);
        m.baselines_warm.store(state.baselines_warm, Ordering::Relaxed);
        m.baselines_total
            .store(state.baselines_cold + state.baselines_warm, Ordering::Relaxed);
        m.product_keys_without_baseline
            .store(state.product_keys_without_baseline, Ordering::Relaxed);
        m.extraction_queue_depth
            .store(state.extraction_queue_depth, Ordering::Relaxed);
        m.set_incomplete_by_type(&state.listings_incomplete_by_type);
    }
}

use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::engine::Engine;

impl Engine {
    /// Reconcile the in-process rate limiter with the marketplace's
    /// authoritative quota numbers and mirror them into the store.
    ///
    /// Never fails the cycle: no analytics client means the feature is
    /// disabled, and a query error is logged and dropped.
    pub async fn sync_quota(&self) {
        let Some(analytics) = &self.analytics else {
            return;
        };

        let quota = match analytics.browse_quota().await {
            Ok(q) => q,
            Err(e) => {
                warn!(error = ?e, "quota sync failed; keeping local limiter state");
                return;
            }
        };

        self.metrics.rate_limit.store(quota.limit, Ordering::Relaxed);
        self.metrics
            .rate_remaining
            .store(quota.remaining, Ordering::Relaxed);
        self.metrics
            .rate_reset_ms
            .store(quota.reset_at_ms, Ordering::Relaxed);

        self.limiter.sync(quota.count, quota.limit, quota.reset_at_ms);

        if let Err(e) = self
            .store
            .persist_rate_limiter_state(&self.limiter.snapshot())
            .await
        {
            warn!(error = ?e, "failed to persist rate limiter state");
        }

        debug!(
            count = quota.count,
            limit = quota.limit,
            remaining = quota.remaining,
            "quota reconciled"
        );
    }
}

//! Alert evaluation (inline, per listing) and the pending-alert processor.
//!
//! State machine of an alert: PENDING → NOTIFIED on a successful send;
//! a failed send leaves it PENDING with an attempt row appended, and a
//! later pass retries. The attempt log doubles as the idempotency
//! record: an alert with a successful attempt is never sent again.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::AppError;
use crate::model::{Alert, Listing, Watch, WatchId};
use crate::notify::AlertPayload;
use crate::time::now_ms;

impl Engine {
    /// Called inline from ingestion once per upserted listing.
    pub(crate) async fn evaluate_listing_alert(
        &self,
        watch: &Watch,
        listing: &Listing,
    ) -> Result<()> {
        let Some(score) = listing.score else {
            return Ok(());
        };
        if score < watch.threshold {
            return Ok(());
        }
        if !watch.filters.matches(listing) {
            return Ok(());
        }

        if self.cfg.re_alerts_enabled {
            let cooldown_ms = self.cfg.re_alerts_cooldown.as_millis() as u64;
            if self
                .store
                .has_recent_alert(&watch.id, &listing.id, cooldown_ms)
                .await?
            {
                return Ok(());
            }
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            watch_id: watch.id,
            listing_id: listing.id,
            score,
            pending: true,
            created_ms: now_ms(),
        };

        let inserted = self.store.create_alert(&alert).await?;
        if inserted {
            debug!(watch = %watch.name, external_id = %listing.external_id, score, "alert created");
        }
        Ok(())
    }

    /// Drain pending alerts grouped by watch: groups at or above the batch
    /// threshold go out as one batched notification, smaller groups go out
    /// individually. A dispatch failure is counted and the group is left
    /// pending for the next pass.
    ///
    /// Cancellation is honored between groups only; a group in flight
    /// completes, preserving the attempt/notified bookkeeping.
    pub async fn process_alerts(&self, cancel: &CancellationToken) -> Result<()> {
        let pending = self
            .store
            .list_pending_alerts()
            .await
            .context("list pending alerts")?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut groups: HashMap<WatchId, Vec<Alert>> = HashMap::new();
        for alert in pending {
            groups.entry(alert.watch_id).or_default().push(alert);
        }

        for (watch_id, group) in groups {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled.into());
            }

            let watch = match self.store.get_watch(&watch_id).await {
                Ok(Some(w)) => w,
                Ok(None) => {
                    debug!(watch_id = %watch_id, "watch gone; skipping alert group");
                    continue;
                }
                Err(e) => {
                    warn!(watch_id = %watch_id, error = ?e, "watch fetch failed; skipping group");
                    continue;
                }
            };

            if group.len() >= self.cfg.batch_threshold {
                if let Err(e) = self.send_batch_group(&watch, &group).await {
                    self.record_dispatch_failure(&watch, &e);
                }
            } else {
                for alert in &group {
                    if let Err(e) = self.send_single(&watch, alert).await {
                        self.record_dispatch_failure(&watch, &e);
                    }
                }
            }
        }

        Ok(())
    }

    fn record_dispatch_failure(&self, watch: &Watch, err: &anyhow::Error) {
        self.metrics
            .notification_failures
            .fetch_add(1, Ordering::Relaxed);
        self.metrics
            .last_notification_failure_ms
            .store(now_ms(), Ordering::Relaxed);
        warn!(watch = %watch.name, error = ?err, "alert dispatch failed; will retry next pass");
    }

    async fn send_single(&self, watch: &Watch, alert: &Alert) -> Result<()> {
        // Idempotency guard: re-entry after a timeout must not re-send.
        if self.store.has_successful_notification(&alert.id).await? {
            return Ok(());
        }

        let listing = self
            .store
            .get_listing_by_id(&alert.listing_id)
            .await
            .context("fetch listing for alert")?
            .ok_or_else(|| anyhow!("listing {} missing for alert {}", alert.listing_id, alert.id))?;

        let payload = AlertPayload::new(watch, &listing, alert.score);

        let started = Instant::now();
        let send_result = self.notifier.send_alert(&payload).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.metrics
            .notification_duration_ms
            .observe(duration_ms as f64);

        let err_text = send_result
            .as_ref()
            .err()
            .map(|e| format!("{e:#}"))
            .unwrap_or_default();
        if let Err(e) = self
            .store
            .insert_notification_attempt(&alert.id, send_result.is_ok(), duration_ms, &err_text)
            .await
        {
            warn!(alert = %alert.id, error = ?e, "failed to record notification attempt");
        }

        send_result.with_context(|| format!("send alert for watch {}", watch.name))?;

        self.metrics.inc_alerts_fired(&watch.name, 1);
        self.metrics
            .last_notification_success_ms
            .store(now_ms(), Ordering::Relaxed);
        self.store.mark_alert_notified(&alert.id).await?;
        Ok(())
    }

    async fn send_batch_group(&self, watch: &Watch, group: &[Alert]) -> Result<()> {
        let mut payloads = Vec::new();
        let mut included = Vec::new();

        for alert in group {
            if self.store.has_successful_notification(&alert.id).await? {
                continue;
            }
            let listing = match self.store.get_listing_by_id(&alert.listing_id).await? {
                Some(l) => l,
                None => {
                    debug!(alert = %alert.id, "listing gone; dropping alert from batch");
                    continue;
                }
            };
            payloads.push(AlertPayload::new(watch, &listing, alert.score));
            included.push(alert.id);
        }

        if payloads.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let send_result = self.notifier.send_batch(&payloads, &watch.name).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.metrics
            .notification_duration_ms
            .observe(duration_ms as f64);

        let err_text = send_result
            .as_ref()
            .err()
            .map(|e| format!("{e:#}"))
            .unwrap_or_default();
        // Every included alert gets an attempt row with the batch outcome.
        for id in &included {
            if let Err(e) = self
                .store
                .insert_notification_attempt(id, send_result.is_ok(), duration_ms, &err_text)
                .await
            {
                warn!(alert = %id, error = ?e, "failed to record notification attempt");
            }
        }

        send_result.with_context(|| format!("send batch for watch {}", watch.name))?;

        self.metrics
            .inc_alerts_fired(&watch.name, included.len() as u64);
        self.metrics
            .last_notification_success_ms
            .store(now_ms(), Ordering::Relaxed);
        self.store.mark_alerts_notified(&included).await?;
        Ok(())
    }
}

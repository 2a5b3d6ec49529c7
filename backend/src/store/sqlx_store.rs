//! SQLx-backed implementation of the `Store` trait.
//!
//! Responsible only for persistence and row mapping. Concurrency-sensitive
//! operations (job leasing, lock acquisition, pending-alert insertion) are
//! single guarded statements whose `rows_affected()` tells the caller
//! whether it won the race; a CAS miss is never an error.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{
    Alert, AlertId, AttrMap, Baseline, ExtractionJob, JobId, JobStatus, Listing, ListingId,
    ListingType, RateLimitSnapshot, RunId, Seller, SystemState, Watch, WatchFilters, WatchId,
};
use crate::store::{ListingQuery, Store};
use crate::time::now_ms;

pub struct SqlxStore {
    pool: Arc<AnyPool>,
}

impl SqlxStore {
    pub fn new(pool: Arc<AnyPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

const LISTING_COLUMNS: &str = r#"
  id, external_id, title, price, shipping, quantity,
  seller_name, seller_feedback_count, seller_feedback_pct, seller_top_rated,
  condition_raw, condition_normalized, listing_type, item_url, image_url,
  attrs_json, component_type, extraction_confidence, product_key,
  score, breakdown_json, auction_end_ms, first_seen_ms
"#;

#[async_trait]
impl Store for SqlxStore {
    async fn list_watches(&self, enabled_only: bool) -> Result<Vec<Watch>> {
        let sql = if enabled_only {
            r#"SELECT id, name, query, category, component_type, threshold,
                      filters_json, enabled, last_polled_ms
               FROM watches WHERE enabled = 1 ORDER BY name;"#
        } else {
            r#"SELECT id, name, query, category, component_type, threshold,
                      filters_json, enabled, last_polled_ms
               FROM watches ORDER BY name;"#
        };

        let rows = sqlx::query(sql).fetch_all(&*self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_watch(&r) {
                Ok(w) => out.push(w),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the batch
                    tracing::warn!(error = %e, "skipping malformed watch row");
                }
            }
        }
        Ok(out)
    }

    async fn get_watch(&self, id: &WatchId) -> Result<Option<Watch>> {
        let row = sqlx::query(
            r#"SELECT id, name, query, category, component_type, threshold,
                      filters_json, enabled, last_polled_ms
               FROM watches WHERE id = ?;"#,
        )
        .bind(id.to_string())
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_watch(&r)?)),
            None => Ok(None),
        }
    }

    async fn update_watch_last_polled(&self, id: &WatchId, at_ms: u64) -> Result<()> {
        sqlx::query("UPDATE watches SET last_polled_ms = ? WHERE id = ?;")
            .bind(int_to_db(at_ms)?)
            .bind(id.to_string())
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_listing(&self, listing: &Listing) -> Result<Listing> {
        // Volatile fields refresh on conflict; extraction and scoring
        // results on the stored row are preserved.
        sqlx::query(
            r#"
INSERT INTO listings (
  id, external_id, title, price, shipping, quantity,
  seller_name, seller_feedback_count, seller_feedback_pct, seller_top_rated,
  condition_raw, condition_normalized, listing_type, item_url, image_url,
  attrs_json, component_type, extraction_confidence, product_key,
  score, breakdown_json, auction_end_ms, first_seen_ms
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(external_id) DO UPDATE SET
  title = excluded.title,
  price = excluded.price,
  shipping = excluded.shipping,
  quantity = excluded.quantity,
  seller_name = excluded.seller_name,
  seller_feedback_count = excluded.seller_feedback_count,
  seller_feedback_pct = excluded.seller_feedback_pct,
  seller_top_rated = excluded.seller_top_rated,
  condition_raw = excluded.condition_raw,
  condition_normalized = excluded.condition_normalized,
  listing_type = excluded.listing_type,
  item_url = excluded.item_url,
  image_url = excluded.image_url,
  auction_end_ms = excluded.auction_end_ms;
"#,
        )
        .bind(listing.id.to_string())
        .bind(&listing.external_id)
        .bind(&listing.title)
        .bind(listing.price)
        .bind(listing.shipping)
        .bind(i64::from(listing.quantity))
        .bind(&listing.seller.name)
        .bind(i64::from(listing.seller.feedback_count))
        .bind(listing.seller.feedback_pct)
        .bind(if listing.seller.top_rated { 1i64 } else { 0i64 })
        .bind(&listing.condition_raw)
        .bind(&listing.condition_normalized)
        .bind(listing.listing_type.to_string())
        .bind(&listing.item_url)
        .bind(&listing.image_url)
        .bind(attrs_to_json(listing.attrs.as_ref())?)
        .bind(&listing.component_type)
        .bind(listing.extraction_confidence)
        .bind(&listing.product_key)
        .bind(listing.score.map(|v| v as i64))
        .bind(Option::<String>::None)
        .bind(listing.auction_end_ms.map(int_to_db).transpose()?)
        .bind(int_to_db(listing.first_seen_ms)?)
        .execute(&*self.pool)
        .await?;

        self.get_listing(&listing.external_id)
            .await?
            .ok_or_else(|| anyhow!("listing vanished after upsert: {}", listing.external_id))
    }

    async fn get_listing(&self, external_id: &str) -> Result<Option<Listing>> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE external_id = ?;");
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_listing(&r)?)),
            None => Ok(None),
        }
    }

    async fn get_listing_by_id(&self, id: &ListingId) -> Result<Option<Listing>> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?;");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_listing(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_listings(&self, query: &ListingQuery) -> Result<(Vec<Listing>, u64)> {
        let mut where_clauses = Vec::new();
        if query.product_key.is_some() {
            where_clauses.push("product_key = ?");
        }
        if query.component_type.is_some() {
            where_clauses.push("component_type = ?");
        }
        if query.min_score.is_some() {
            where_clauses.push("score >= ?");
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM listings {where_sql};");
        let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(k) = &query.product_key {
            count_q = count_q.bind(k.clone());
        }
        if let Some(t) = &query.component_type {
            count_q = count_q.bind(t.clone());
        }
        if let Some(s) = query.min_score {
            count_q = count_q.bind(s as i64);
        }
        let total = count_q.fetch_one(&*self.pool).await?;

        let limit = if query.limit == 0 { 100 } else { query.limit };
        let page_sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings {where_sql} ORDER BY id LIMIT ? OFFSET ?;"
        );
        let mut page_q = sqlx::query(&page_sql);
        if let Some(k) = &query.product_key {
            page_q = page_q.bind(k.clone());
        }
        if let Some(t) = &query.component_type {
            page_q = page_q.bind(t.clone());
        }
        if let Some(s) = query.min_score {
            page_q = page_q.bind(s as i64);
        }
        let rows = page_q
            .bind(limit as i64)
            .bind(query.offset as i64)
            .fetch_all(&*self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_listing(&r)?);
        }
        Ok((out, int_from_db::<u64>(total)?))
    }

    async fn list_listings_cursor(
        &self,
        cursor: Option<&ListingId>,
        batch_size: usize,
    ) -> Result<Vec<Listing>> {
        let rows = match cursor {
            Some(c) => {
                let sql = format!(
                    "SELECT {LISTING_COLUMNS} FROM listings WHERE id > ? ORDER BY id LIMIT ?;"
                );
                sqlx::query(&sql)
                    .bind(c.to_string())
                    .bind(batch_size as i64)
                    .fetch_all(&*self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {LISTING_COLUMNS} FROM listings ORDER BY id LIMIT ?;");
                sqlx::query(&sql)
                    .bind(batch_size as i64)
                    .fetch_all(&*self.pool)
                    .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_listing(&r)?);
        }
        Ok(out)
    }

    async fn list_unscored_listings(&self, limit: usize) -> Result<Vec<Listing>> {
        let sql = format!(
            r#"SELECT {LISTING_COLUMNS} FROM listings
               WHERE score IS NULL AND product_key IS NOT NULL AND product_key != ''
               ORDER BY first_seen_ms LIMIT ?;"#
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_listing(&r)?);
        }
        Ok(out)
    }

    async fn list_incomplete_extractions(
        &self,
        component_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Listing>> {
        let rows = match component_type {
            Some(ct) => {
                let sql = format!(
                    r#"SELECT {LISTING_COLUMNS} FROM listings
                       WHERE (product_key IS NULL OR product_key = '')
                         AND component_type = ?
                       ORDER BY first_seen_ms LIMIT ?;"#
                );
                sqlx::query(&sql)
                    .bind(ct)
                    .bind(limit as i64)
                    .fetch_all(&*self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    r#"SELECT {LISTING_COLUMNS} FROM listings
                       WHERE product_key IS NULL OR product_key = ''
                       ORDER BY first_seen_ms LIMIT ?;"#
                );
                sqlx::query(&sql)
                    .bind(limit as i64)
                    .fetch_all(&*self.pool)
                    .await?
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_listing(&r)?);
        }
        Ok(out)
    }

    async fn update_listing_extraction(
        &self,
        id: &ListingId,
        component_type: &str,
        attrs: &AttrMap,
        confidence: f64,
        product_key: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
UPDATE listings
SET component_type = ?, attrs_json = ?, extraction_confidence = ?, product_key = ?
WHERE id = ?;
"#,
        )
        .bind(component_type)
        .bind(serde_json::to_string(attrs)?)
        .bind(confidence)
        .bind(product_key)
        .bind(id.to_string())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn update_score(&self, id: &ListingId, total: i32, breakdown_json: &str) -> Result<()> {
        sqlx::query("UPDATE listings SET score = ?, breakdown_json = ? WHERE id = ?;")
            .bind(total as i64)
            .bind(breakdown_json)
            .bind(id.to_string())
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn get_baseline(&self, product_key: &str) -> Result<Baseline> {
        let row = sqlx::query(
            r#"SELECT product_key, sample_count, p10, p25, p50, p75, p90, mean, updated_ms
               FROM baselines WHERE product_key = ?;"#,
        )
        .bind(product_key)
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(r) => row_to_baseline(&r),
            None => Err(AppError::NoBaseline(product_key.to_string()).into()),
        }
    }

    async fn recompute_all_baselines(&self, window_days: u32) -> Result<u64> {
        let cutoff = now_ms().saturating_sub(window_days as u64 * 86_400_000);

        let rows = common::logger::warn_slow_op(
            "baseline_sample_scan",
            std::time::Duration::from_millis(500),
            sqlx::query(
                r#"SELECT product_key, price, shipping, quantity FROM listings
               WHERE product_key IS NOT NULL AND product_key != '' AND first_seen_ms >= ?;"#,
            )
            .bind(int_to_db(cutoff)?)
            .fetch_all(&*self.pool),
        )
        .await?;

        let mut samples: HashMap<String, Vec<f64>> = HashMap::new();
        for r in rows {
            let key: String = r.get("product_key");
            let price: f64 = r.get("price");
            let shipping: Option<f64> = r.get("shipping");
            let quantity: i64 = r.get("quantity");
            let unit = (price + shipping.unwrap_or(0.0)) / (quantity.max(1) as f64);
            samples.entry(key).or_default().push(unit);
        }

        let updated = now_ms();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM baselines;").execute(&mut *tx).await?;

        let count = samples.len() as u64;
        for (key, mut prices) in samples {
            prices.sort_by(|a, b| a.total_cmp(b));
            let mean = prices.iter().sum::<f64>() / prices.len() as f64;

            sqlx::query(
                r#"
INSERT INTO baselines (product_key, sample_count, p10, p25, p50, p75, p90, mean, updated_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
            )
            .bind(&key)
            .bind(prices.len() as i64)
            .bind(percentile(&prices, 10.0))
            .bind(percentile(&prices, 25.0))
            .bind(percentile(&prices, 50.0))
            .bind(percentile(&prices, 75.0))
            .bind(percentile(&prices, 90.0))
            .bind(mean)
            .bind(int_to_db(updated)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(count)
    }

    async fn count_baselines_by_maturity(&self, min_samples: u32) -> Result<(u64, u64)> {
        let cold: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM baselines WHERE sample_count < ?;")
                .bind(i64::from(min_samples))
                .fetch_one(&*self.pool)
                .await?;
        let warm: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM baselines WHERE sample_count >= ?;")
                .bind(i64::from(min_samples))
                .fetch_one(&*self.pool)
                .await?;
        Ok((int_from_db::<u64>(cold)?, int_from_db::<u64>(warm)?))
    }

    async fn count_product_keys_without_baseline(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(DISTINCT product_key) FROM listings l
               WHERE product_key IS NOT NULL AND product_key != ''
                 AND NOT EXISTS (SELECT 1 FROM baselines b WHERE b.product_key = l.product_key);"#,
        )
        .fetch_one(&*self.pool)
        .await?;
        Ok(int_from_db::<u64>(n)?)
    }

    async fn enqueue_extraction(&self, listing_id: &ListingId, priority: i32) -> Result<JobId> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
INSERT INTO extraction_jobs (id, listing_id, priority, enqueued_at_ms, error)
VALUES (?, ?, ?, ?, '');
"#,
        )
        .bind(id.to_string())
        .bind(listing_id.to_string())
        .bind(priority as i64)
        .bind(int_to_db(now_ms())?)
        .execute(&*self.pool)
        .await?;
        Ok(id)
    }

    async fn dequeue_extractions(&self, worker_id: &str, n: usize) -> Result<Vec<ExtractionJob>> {
        let stamp = int_to_db(now_ms())?;

        // Single guarded statement: SQLite serializes writers, PostgreSQL
        // re-checks `leased_by IS NULL` under the row lock, so concurrent
        // callers can never lease the same job. Jobs for a listing that
        // already has an active lease are not eligible, which keeps each
        // listing on at most one worker at a time.
        let res = sqlx::query(
            r#"
UPDATE extraction_jobs
SET leased_by = ?, leased_at_ms = ?
WHERE leased_by IS NULL
  AND completed_at_ms IS NULL
  AND id IN (
    SELECT id FROM extraction_jobs
    WHERE leased_by IS NULL AND completed_at_ms IS NULL
      AND listing_id NOT IN (
        SELECT listing_id FROM extraction_jobs
        WHERE leased_by IS NOT NULL AND completed_at_ms IS NULL
      )
    ORDER BY priority ASC, enqueued_at_ms ASC
    LIMIT ?
  );
"#,
        )
        .bind(worker_id)
        .bind(stamp)
        .bind(n as i64)
        .execute(&*self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
SELECT id, listing_id, priority, enqueued_at_ms, leased_by, leased_at_ms, completed_at_ms, error
FROM extraction_jobs
WHERE leased_by = ? AND leased_at_ms = ? AND completed_at_ms IS NULL
ORDER BY priority ASC, enqueued_at_ms ASC;
"#,
        )
        .bind(worker_id)
        .bind(stamp)
        .fetch_all(&*self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_job(&r)?);
        }
        Ok(out)
    }

    async fn complete_extraction_job(&self, job_id: &JobId, error: &str) -> Result<()> {
        sqlx::query("UPDATE extraction_jobs SET completed_at_ms = ?, error = ? WHERE id = ?;")
            .bind(int_to_db(now_ms())?)
            .bind(error)
            .bind(job_id.to_string())
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn count_pending_extraction_jobs(&self) -> Result<u64> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM extraction_jobs WHERE completed_at_ms IS NULL;")
                .fetch_one(&*self.pool)
                .await?;
        Ok(int_from_db::<u64>(n)?)
    }

    async fn recover_stale_leases(&self, stale_ms: u64) -> Result<u64> {
        let threshold = int_to_db(now_ms().saturating_sub(stale_ms))?;
        let res = sqlx::query(
            r#"
UPDATE extraction_jobs
SET leased_by = NULL, leased_at_ms = NULL
WHERE completed_at_ms IS NULL AND leased_by IS NOT NULL AND leased_at_ms < ?;
"#,
        )
        .bind(threshold)
        .execute(&*self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn create_alert(&self, alert: &Alert) -> Result<bool> {
        // The partial unique index enforces "at most one pending alert per
        // (watch, listing)"; losing the race is a no-op, not an error.
        let res = sqlx::query(
            r#"
INSERT INTO alerts (id, watch_id, listing_id, score, pending, created_ms)
VALUES (?, ?, ?, ?, 1, ?)
ON CONFLICT(watch_id, listing_id) WHERE pending = 1 DO NOTHING;
"#,
        )
        .bind(alert.id.to_string())
        .bind(alert.watch_id.to_string())
        .bind(alert.listing_id.to_string())
        .bind(alert.score as i64)
        .bind(int_to_db(alert.created_ms)?)
        .execute(&*self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn list_pending_alerts(&self) -> Result<Vec<Alert>> {
        let rows = sqlx::query(
            r#"SELECT id, watch_id, listing_id, score, pending, created_ms
               FROM alerts WHERE pending = 1 ORDER BY created_ms;"#,
        )
        .fetch_all(&*self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_alert(&r)?);
        }
        Ok(out)
    }

    async fn has_recent_alert(
        &self,
        watch_id: &WatchId,
        listing_id: &ListingId,
        cooldown_ms: u64,
    ) -> Result<bool> {
        let since = int_to_db(now_ms().saturating_sub(cooldown_ms))?;
        let n: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM alerts
               WHERE watch_id = ? AND listing_id = ? AND created_ms >= ?;"#,
        )
        .bind(watch_id.to_string())
        .bind(listing_id.to_string())
        .bind(since)
        .fetch_one(&*self.pool)
        .await?;
        Ok(n > 0)
    }

    async fn has_successful_notification(&self, alert_id: &AlertId) -> Result<bool> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification_attempts WHERE alert_id = ? AND succeeded = 1;",
        )
        .bind(alert_id.to_string())
        .fetch_one(&*self.pool)
        .await?;
        Ok(n > 0)
    }

    async fn insert_notification_attempt(
        &self,
        alert_id: &AlertId,
        succeeded: bool,
        duration_ms: u64,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO notification_attempts (id, alert_id, succeeded, duration_ms, error, attempted_ms)
VALUES (?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(alert_id.to_string())
        .bind(if succeeded { 1i64 } else { 0i64 })
        .bind(int_to_db(duration_ms)?)
        .bind(error)
        .bind(int_to_db(now_ms())?)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn mark_alert_notified(&self, id: &AlertId) -> Result<()> {
        sqlx::query("UPDATE alerts SET pending = 0 WHERE id = ?;")
            .bind(id.to_string())
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn mark_alerts_notified(&self, ids: &[AlertId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE alerts SET pending = 0 WHERE id = ?;")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count_pending_alerts(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts WHERE pending = 1;")
            .fetch_one(&*self.pool)
            .await?;
        Ok(int_from_db::<u64>(n)?)
    }

    async fn acquire_scheduler_lock(&self, name: &str, holder: &str, ttl_ms: u64) -> Result<bool> {
        let now = int_to_db(now_ms())?;

        // Upsert guarded by expiry: a live lock held elsewhere makes the
        // DO UPDATE a no-op and rows_affected() reports the miss.
        let res = sqlx::query(
            r#"
INSERT INTO scheduler_locks (job_name, holder, acquired_at_ms, ttl_ms)
VALUES (?, ?, ?, ?)
ON CONFLICT(job_name) DO UPDATE SET
  holder = excluded.holder,
  acquired_at_ms = excluded.acquired_at_ms,
  ttl_ms = excluded.ttl_ms
WHERE scheduler_locks.holder = excluded.holder
   OR scheduler_locks.acquired_at_ms + scheduler_locks.ttl_ms < excluded.acquired_at_ms;
"#,
        )
        .bind(name)
        .bind(holder)
        .bind(now)
        .bind(int_to_db(ttl_ms)?)
        .execute(&*self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn release_scheduler_lock(&self, name: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM scheduler_locks WHERE job_name = ? AND holder = ?;")
            .bind(name)
            .bind(holder)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn insert_job_run(&self, name: &str, started_ms: u64) -> Result<RunId> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
INSERT INTO job_runs (id, job_name, status, started_ms, error)
VALUES (?, ?, 'running', ?, '');
"#,
        )
        .bind(id.to_string())
        .bind(name)
        .bind(int_to_db(started_ms)?)
        .execute(&*self.pool)
        .await?;
        Ok(id)
    }

    async fn complete_job_run(
        &self,
        id: &RunId,
        status: JobStatus,
        error: &str,
        duration_ms: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
UPDATE job_runs SET status = ?, completed_ms = ?, error = ?, duration_ms = ?
WHERE id = ?;
"#,
        )
        .bind(status.to_string())
        .bind(int_to_db(now_ms())?)
        .bind(error)
        .bind(int_to_db(duration_ms)?)
        .bind(id.to_string())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn recover_stale_job_runs(&self, stale_ms: u64) -> Result<u64> {
        let threshold = int_to_db(now_ms().saturating_sub(stale_ms))?;
        let res = sqlx::query(
            r#"
UPDATE job_runs SET status = 'crashed', completed_ms = ?
WHERE status = 'running' AND started_ms < ?;
"#,
        )
        .bind(int_to_db(now_ms())?)
        .bind(threshold)
        .execute(&*self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn get_system_state(&self, min_samples: u32) -> Result<SystemState> {
        let row = sqlx::query(
            r#"
SELECT
  (SELECT COUNT(*) FROM watches) AS watches_total,
  (SELECT COUNT(*) FROM watches WHERE enabled = 1) AS watches_enabled,
  (SELECT COUNT(*) FROM listings) AS listings_total,
  (SELECT COUNT(*) FROM listings WHERE component_type IS NULL) AS listings_unextracted,
  (SELECT COUNT(*) FROM listings WHERE score IS NULL) AS listings_unscored,
  (SELECT COUNT(*) FROM alerts WHERE pending = 1) AS alerts_pending,
  (SELECT COUNT(*) FROM baselines WHERE sample_count < ?) AS baselines_cold,
  (SELECT COUNT(*) FROM baselines WHERE sample_count >= ?) AS baselines_warm,
  (SELECT COUNT(DISTINCT product_key) FROM listings l
     WHERE product_key IS NOT NULL AND product_key != ''
       AND NOT EXISTS (SELECT 1 FROM baselines b WHERE b.product_key = l.product_key)
  ) AS keys_without_baseline,
  (SELECT COUNT(*) FROM extraction_jobs WHERE completed_at_ms IS NULL) AS queue_depth;
"#,
        )
        .bind(i64::from(min_samples))
        .bind(i64::from(min_samples))
        .fetch_one(&*self.pool)
        .await?;

        let incomplete_rows = sqlx::query(
            r#"
SELECT component_type, COUNT(*) AS n FROM listings
WHERE component_type IS NOT NULL AND (product_key IS NULL OR product_key = '')
GROUP BY component_type;
"#,
        )
        .fetch_all(&*self.pool)
        .await?;

        let mut incomplete = Vec::with_capacity(incomplete_rows.len());
        for r in incomplete_rows {
            let ct: String = r.get("component_type");
            let n: i64 = r.get("n");
            incomplete.push((ct, int_from_db::<u64>(n)?));
        }
        incomplete.sort();

        Ok(SystemState {
            watches_total: int_from_db::<u64>(row.get("watches_total"))?,
            watches_enabled: int_from_db::<u64>(row.get("watches_enabled"))?,
            listings_total: int_from_db::<u64>(row.get("listings_total"))?,
            listings_unextracted: int_from_db::<u64>(row.get("listings_unextracted"))?,
            listings_unscored: int_from_db::<u64>(row.get("listings_unscored"))?,
            listings_incomplete_by_type: incomplete,
            alerts_pending: int_from_db::<u64>(row.get("alerts_pending"))?,
            baselines_cold: int_from_db::<u64>(row.get("baselines_cold"))?,
            baselines_warm: int_from_db::<u64>(row.get("baselines_warm"))?,
            product_keys_without_baseline: int_from_db::<u64>(row.get("keys_without_baseline"))?,
            extraction_queue_depth: int_from_db::<u64>(row.get("queue_depth"))?,
        })
    }

    async fn persist_rate_limiter_state(&self, snapshot: &RateLimitSnapshot) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO rate_limit_state (id, daily_count, daily_max, reset_at_ms)
VALUES (1, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
  daily_count = excluded.daily_count,
  daily_max = excluded.daily_max,
  reset_at_ms = excluded.reset_at_ms;
"#,
        )
        .bind(int_to_db(snapshot.daily_count)?)
        .bind(int_to_db(snapshot.daily_max)?)
        .bind(int_to_db(snapshot.reset_at_ms)?)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn load_rate_limiter_state(&self) -> Result<Option<RateLimitSnapshot>> {
        let row = sqlx::query(
            "SELECT daily_count, daily_max, reset_at_ms FROM rate_limit_state WHERE id = 1;",
        )
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(RateLimitSnapshot {
                daily_count: int_from_db::<u64>(r.get("daily_count"))?,
                daily_max: int_from_db::<u64>(r.get("daily_max"))?,
                reset_at_ms: int_from_db::<u64>(r.get("reset_at_ms"))?,
            })),
            None => Ok(None),
        }
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_watch(r: &sqlx::any::AnyRow) -> Result<Watch> {
    let id_str: String = r.get("id");
    let id = Uuid::parse_str(&id_str).context("invalid watch id")?;

    let filters_json: String = r.get("filters_json");
    let filters: WatchFilters = serde_json::from_str(&filters_json)
        .map_err(|e| anyhow!("Invalid filters JSON '{}': {}", filters_json, e))?;

    Ok(Watch {
        id,
        name: r.get("name"),
        query: r.get("query"),
        category: r.get("category"),
        component_type: r.get("component_type"),
        threshold: r.get::<i64, _>("threshold") as i32,
        filters,
        enabled: r.get::<i64, _>("enabled") != 0,
        last_polled_ms: r.get::<Option<i64>, _>("last_polled_ms").map(|v| v as u64),
    })
}

fn row_to_listing(r: &sqlx::any::AnyRow) -> Result<Listing> {
    let id_str: String = r.get("id");
    let id = Uuid::parse_str(&id_str).context("invalid listing id")?;

    let listing_type_str: String = r.get("listing_type");
    let listing_type = listing_type_str.parse::<ListingType>()?;

    let attrs = match r.get::<Option<String>, _>("attrs_json") {
        Some(s) => Some(
            serde_json::from_str::<AttrMap>(&s)
                .map_err(|e| anyhow!("Invalid attrs JSON '{}': {}", s, e))?,
        ),
        None => None,
    };

    Ok(Listing {
        id,
        external_id: r.get("external_id"),
        title: r.get("title"),
        price: r.get("price"),
        shipping: r.get("shipping"),
        quantity: int_from_db::<u32>(r.get("quantity"))?,
        seller: Seller {
            name: r.get("seller_name"),
            feedback_count: int_from_db::<u32>(r.get("seller_feedback_count"))?,
            feedback_pct: r.get("seller_feedback_pct"),
            top_rated: r.get::<i64, _>("seller_top_rated") != 0,
        },
        condition_raw: r.get("condition_raw"),
        condition_normalized: r.get("condition_normalized"),
        listing_type,
        item_url: r.get("item_url"),
        image_url: r.get("image_url"),
        attrs,
        component_type: r.get("component_type"),
        extraction_confidence: r.get("extraction_confidence"),
        product_key: r.get("product_key"),
        score: r.get::<Option<i64>, _>("score").map(|v| v as i32),
        auction_end_ms: r.get::<Option<i64>, _>("auction_end_ms").map(|v| v as u64),
        first_seen_ms: int_from_db::<u64>(r.get("first_seen_ms"))?,
    })
}

fn row_to_job(r: &sqlx::any::AnyRow) -> Result<ExtractionJob> {
    let id_str: String = r.get("id");
    let listing_str: String = r.get("listing_id");

    Ok(ExtractionJob {
        id: Uuid::parse_str(&id_str).context("invalid job id")?,
        listing_id: Uuid::parse_str(&listing_str).context("invalid job listing id")?,
        priority: r.get::<i64, _>("priority") as i32,
        enqueued_at_ms: int_from_db::<u64>(r.get("enqueued_at_ms"))?,
        leased_by: r.get("leased_by"),
        leased_at_ms: r.get::<Option<i64>, _>("leased_at_ms").map(|v| v as u64),
        completed_at_ms: r.get::<Option<i64>, _>("completed_at_ms").map(|v| v as u64),
        error: r.get("error"),
    })
}

fn row_to_alert(r: &sqlx::any::AnyRow) -> Result<Alert> {
    let id_str: String = r.get("id");
    let watch_str: String = r.get("watch_id");
    let listing_str: String = r.get("listing_id");

    Ok(Alert {
        id: Uuid::parse_str(&id_str).context("invalid alert id")?,
        watch_id: Uuid::parse_str(&watch_str).context("invalid alert watch id")?,
        listing_id: Uuid::parse_str(&listing_str).context("invalid alert listing id")?,
        score: r.get::<i64, _>("score") as i32,
        pending: r.get::<i64, _>("pending") != 0,
        created_ms: int_from_db::<u64>(r.get("created_ms"))?,
    })
}

fn row_to_baseline(r: &sqlx::any::AnyRow) -> Result<Baseline> {
    Ok(Baseline {
        product_key: r.get("product_key"),
        sample_count: int_from_db::<u32>(r.get("sample_count"))?,
        p10: r.get("p10"),
        p25: r.get("p25"),
        p50: r.get("p50"),
        p75: r.get("p75"),
        p90: r.get("p90"),
        mean: r.get("mean"),
        updated_ms: int_from_db::<u64>(r.get("updated_ms"))?,
    })
}

fn attrs_to_json(attrs: Option<&AttrMap>) -> Result<Option<String>> {
    match attrs {
        Some(a) => Ok(Some(serde_json::to_string(a)?)),
        None => Ok(None),
    }
}

/// Linear-interpolation percentile over a sorted, non-empty slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Narrow a BIGINT column into the domain type. A value that does not
/// round-trip means a corrupt row, and surfaces as an error rather than
/// a silent wrap.
fn int_from_db<T>(v: i64) -> Result<T>
where
    T: TryFrom<i64>,
    <T as TryFrom<i64>>::Error: std::error::Error + Send + Sync + 'static,
{
    T::try_from(v).with_context(|| format!("integer column holds out-of-range value {v}"))
}

/// Timestamps and counts are unsigned in the domain but stored as BIGINT.
fn int_to_db(v: u64) -> Result<i64> {
    i64::try_from(v).with_context(|| format!("value {v} does not fit a BIGINT column"))
}

#[cfg(test)]
mod tests {
    use super::percentile;

    #[test]
    fn percentile_interpolates() {
        let v = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        assert!((percentile(&v, 50.0) - 30.0).abs() < f64::EPSILON);
        assert!((percentile(&v, 25.0) - 20.0).abs() < f64::EPSILON);
        assert!((percentile(&v, 10.0) - 14.0).abs() < 1e-9);
        assert!((percentile(&v, 90.0) - 46.0).abs() < 1e-9);
    }

    #[test]
    fn percentile_degenerate_inputs() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[7.5], 90.0), 7.5);
    }
}

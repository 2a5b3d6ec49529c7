use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Watches
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS watches (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL UNIQUE,
  query TEXT NOT NULL,
  category TEXT,
  component_type TEXT,
  threshold INTEGER NOT NULL,
  filters_json TEXT NOT NULL,
  enabled INTEGER NOT NULL,
  last_polled_ms BIGINT
);
"#,
    )
    .execute(pool)
    .await?;

    // Listings
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS listings (
  id TEXT PRIMARY KEY,
  external_id TEXT NOT NULL UNIQUE,
  title TEXT NOT NULL,
  price DOUBLE PRECISION NOT NULL,
  shipping DOUBLE PRECISION,
  quantity INTEGER NOT NULL,

  seller_name TEXT NOT NULL,
  seller_feedback_count INTEGER NOT NULL,
  seller_feedback_pct DOUBLE PRECISION NOT NULL,
  seller_top_rated INTEGER NOT NULL,

  condition_raw TEXT NOT NULL,
  condition_normalized TEXT NOT NULL,
  listing_type TEXT NOT NULL,
  item_url TEXT,
  image_url TEXT,

  attrs_json TEXT,
  component_type TEXT,
  extraction_confidence DOUBLE PRECISION,
  product_key TEXT,

  score INTEGER,
  breakdown_json TEXT,

  auction_end_ms BIGINT,
  first_seen_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Extraction queue
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS extraction_jobs (
  id TEXT PRIMARY KEY,
  listing_id TEXT NOT NULL,
  priority INTEGER NOT NULL,
  enqueued_at_ms BIGINT NOT NULL,
  leased_by TEXT,
  leased_at_ms BIGINT,
  completed_at_ms BIGINT,
  error TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Baselines
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS baselines (
  product_key TEXT PRIMARY KEY,
  sample_count INTEGER NOT NULL,
  p10 DOUBLE PRECISION NOT NULL,
  p25 DOUBLE PRECISION NOT NULL,
  p50 DOUBLE PRECISION NOT NULL,
  p75 DOUBLE PRECISION NOT NULL,
  p90 DOUBLE PRECISION NOT NULL,
  mean DOUBLE PRECISION NOT NULL,
  updated_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Alerts
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS alerts (
  id TEXT PRIMARY KEY,
  watch_id TEXT NOT NULL,
  listing_id TEXT NOT NULL,
  score INTEGER NOT NULL,
  pending INTEGER NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Notification attempts (append-only)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS notification_attempts (
  id TEXT PRIMARY KEY,
  alert_id TEXT NOT NULL,
  succeeded INTEGER NOT NULL,
  duration_ms BIGINT NOT NULL,
  error TEXT NOT NULL,
  attempted_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Scheduler locks
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS scheduler_locks (
  job_name TEXT PRIMARY KEY,
  holder TEXT NOT NULL,
  acquired_at_ms BIGINT NOT NULL,
  ttl_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Job runs
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS job_runs (
  id TEXT PRIMARY KEY,
  job_name TEXT NOT NULL,
  status TEXT NOT NULL,
  started_ms BIGINT NOT NULL,
  completed_ms BIGINT,
  duration_ms BIGINT NOT NULL DEFAULT 0,
  error TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Rate limiter mirror (single row, id = 1)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS rate_limit_state (
  id INTEGER PRIMARY KEY,
  daily_count BIGINT NOT NULL,
  daily_max BIGINT NOT NULL,
  reset_at_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // At most one pending alert per (watch, listing).
    sqlx::query(
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_pending_unique
           ON alerts(watch_id, listing_id) WHERE pending = 1;"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_alerts_pending ON alerts(pending);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_jobs_open
           ON extraction_jobs(priority, enqueued_at_ms) WHERE completed_at_ms IS NULL;"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_listings_product_key ON listings(product_key);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_attempts_alert ON notification_attempts(alert_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_job_runs_status ON job_runs(status);"#)
        .execute(pool)
        .await?;

    Ok(())
}

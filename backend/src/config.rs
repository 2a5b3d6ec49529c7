use std::time::Duration;

/// Engine knobs. Defaults match a single-instance deployment polling a
/// marketplace with a 5,000-call daily budget.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Marketplace pages a single ingestion cycle may consume across all
    /// watches. The daily quota is enforced separately by the rate limiter;
    /// this bounds one cycle so a long watch list cannot starve the next.
    pub max_calls_per_cycle: u32,

    /// Sliding window for baseline recomputation.
    pub baseline_window_days: u32,

    /// Delay between watches within a cycle, to avoid bursts against the
    /// marketplace. Zero disables.
    pub stagger_offset: Duration,

    /// Extraction worker pool size.
    pub worker_count: usize,

    /// When set, a listing may alert again after the cooldown even though
    /// an earlier alert for the same (watch, listing) was delivered.
    pub re_alerts_enabled: bool,
    pub re_alerts_cooldown: Duration,

    /// Pending alerts for one watch at or above this count are delivered
    /// as a single batched notification.
    pub batch_threshold: usize,

    /// Baselines under this many samples score as cold starts.
    pub min_baseline_samples: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_calls_per_cycle: 50,
            baseline_window_days: 90,
            stagger_offset: Duration::from_secs(30),
            worker_count: 1,
            re_alerts_enabled: false,
            re_alerts_cooldown: Duration::from_secs(24 * 3600),
            batch_threshold: 5,
            min_baseline_samples: 10,
        }
    }
}

/// Periodic job cadence. A zero re-extraction interval disables that job.
#[derive(Clone, Debug)]
pub struct SchedulerIntervals {
    pub ingestion_interval: Duration,
    pub baseline_interval: Duration,
    pub re_extraction_interval: Duration,
}

impl Default for SchedulerIntervals {
    fn default() -> Self {
        Self {
            ingestion_interval: Duration::from_secs(15 * 60),
            baseline_interval: Duration::from_secs(24 * 3600),
            re_extraction_interval: Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    pub marketplace_base_url: String,
    pub marketplace_token: String,

    pub extractor_base_url: String,
    pub extractor_api_key: String,
    pub extractor_model: String,

    pub webhook_url: String,

    /// Paginator page cap per watch.
    pub page_cap: u32,

    /// In-process limiter: sustained rate, burst, and daily budget.
    pub rate_per_sec: f64,
    pub rate_burst: u32,
    pub daily_quota: u64,

    pub engine: EngineConfig,
    pub scheduler: SchedulerIntervals,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let engine_defaults = EngineConfig::default();
        let scheduler_defaults = SchedulerIntervals::default();

        Self {
            database_url: env_or("DATABASE_URL", "sqlite://tracker_dev.db"),

            marketplace_base_url: env_or("MARKETPLACE_API_URL", "https://api.ebay.com"),
            marketplace_token: env_or("MARKETPLACE_API_TOKEN", ""),

            extractor_base_url: env_or("EXTRACTOR_API_URL", "https://api.openai.com"),
            extractor_api_key: env_or("EXTRACTOR_API_KEY", ""),
            extractor_model: env_or("EXTRACTOR_MODEL", "gpt-4o-mini"),

            webhook_url: env_or("ALERT_WEBHOOK_URL", ""),

            page_cap: parse_or("PAGE_CAP", 5),
            rate_per_sec: parse_or("RATE_PER_SEC", 2.0),
            rate_burst: parse_or("RATE_BURST", 5),
            daily_quota: parse_or("DAILY_QUOTA", 5_000),

            engine: EngineConfig {
                max_calls_per_cycle: parse_or(
                    "MAX_CALLS_PER_CYCLE",
                    engine_defaults.max_calls_per_cycle,
                ),
                baseline_window_days: parse_or(
                    "BASELINE_WINDOW_DAYS",
                    engine_defaults.baseline_window_days,
                ),
                stagger_offset: Duration::from_secs(parse_or("STAGGER_OFFSET_SECS", 30)),
                worker_count: parse_or("WORKER_COUNT", engine_defaults.worker_count),
                re_alerts_enabled: env_or("RE_ALERTS_ENABLED", "false") == "true",
                re_alerts_cooldown: Duration::from_secs(
                    parse_or("RE_ALERTS_COOLDOWN_HOURS", 24u64) * 3600,
                ),
                batch_threshold: parse_or("BATCH_THRESHOLD", engine_defaults.batch_threshold),
                min_baseline_samples: parse_or(
                    "MIN_BASELINE_SAMPLES",
                    engine_defaults.min_baseline_samples,
                ),
            },

            scheduler: SchedulerIntervals {
                ingestion_interval: Duration::from_secs(parse_or(
                    "INGESTION_INTERVAL_SECS",
                    scheduler_defaults.ingestion_interval.as_secs(),
                )),
                baseline_interval: Duration::from_secs(parse_or(
                    "BASELINE_INTERVAL_SECS",
                    scheduler_defaults.baseline_interval.as_secs(),
                )),
                re_extraction_interval: Duration::from_secs(parse_or(
                    "REEXTRACTION_INTERVAL_SECS",
                    0u64,
                )),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

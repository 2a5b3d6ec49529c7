//! Shared fixtures for the integration tests: an isolated in-memory
//! database per test plus programmable collaborator mocks.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use backend::config::EngineConfig;
use backend::engine::Engine;
use backend::extractor::Extractor;
use backend::marketplace::rate_limiter::RateLimiter;
use backend::marketplace::{
    AnalyticsClient, BrowseQuota, ListingSummary, SearchClient, SearchPage, SearchRequest,
};
use backend::metrics::Metrics;
use backend::model::{AttrMap, ListingType, Seller, Watch, WatchFilters};
use backend::notify::{AlertPayload, Notifier};
use backend::store::Store;
use backend::store::sqlx_store::SqlxStore;

/// Isolated in-memory DB per test. The unique name prevents interference
/// during parallel execution; `cache=shared` lets every pool connection
/// see the same in-memory database.
pub async fn setup_pool() -> AnyPool {
    setup_pool_with(5).await
}

pub async fn setup_pool_with(max_connections: u32) -> AnyPool {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);

    let pool = AnyPoolOptions::new()
        .max_connections(max_connections)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");

    backend::db::schema::migrate(&pool)
        .await
        .expect("migrate schema");

    pool
}

pub fn make_store(pool: &AnyPool) -> Arc<SqlxStore> {
    Arc::new(SqlxStore::new(Arc::new(pool.clone())))
}

/// Engine config suitable for tests: no stagger, one worker.
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        stagger_offset: Duration::ZERO,
        ..EngineConfig::default()
    }
}

/// Engine over mocks; callers may chain `.with_paginator`/`.with_analytics`
/// before wrapping in `Arc`.
pub fn build_engine(
    store: Arc<dyn Store>,
    search: Arc<MockSearchClient>,
    extractor: Arc<MockExtractor>,
    notifier: Arc<MockNotifier>,
    cfg: EngineConfig,
    metrics: Arc<Metrics>,
) -> Engine {
    let limiter = Arc::new(RateLimiter::new(10_000.0, 1_000, 1_000_000));
    Engine::new(store, search, extractor, notifier, limiter, cfg, metrics)
}

/// Run one worker until the queue drains (or the deadline passes).
pub async fn drain_extraction_queue(engine: &Arc<Engine>, store: &dyn Store) {
    let cancel = CancellationToken::new();
    let handles = engine.clone().start_extraction_workers(1, &cancel);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let pending = store
            .count_pending_extraction_jobs()
            .await
            .expect("count pending jobs");
        if pending == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "extraction queue did not drain in time"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
}

/* =========================
Fixtures
========================= */

pub fn watch(name: &str, query: &str, threshold: i32) -> Watch {
    Watch {
        id: Uuid::new_v4(),
        name: name.to_string(),
        query: query.to_string(),
        category: None,
        component_type: None,
        threshold,
        filters: WatchFilters::default(),
        enabled: true,
        last_polled_ms: None,
    }
}

pub async fn insert_watch(pool: &AnyPool, w: &Watch) {
    sqlx::query(
        r#"
INSERT INTO watches (id, name, query, category, component_type, threshold,
                     filters_json, enabled, last_polled_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL);
"#,
    )
    .bind(w.id.to_string())
    .bind(&w.name)
    .bind(&w.query)
    .bind(&w.category)
    .bind(&w.component_type)
    .bind(w.threshold as i64)
    .bind(serde_json::to_string(&w.filters).expect("filters json"))
    .bind(if w.enabled { 1i64 } else { 0i64 })
    .execute(pool)
    .await
    .expect("insert watch");
}

pub fn summary(external_id: &str, title: &str, price: f64) -> ListingSummary {
    ListingSummary {
        external_id: external_id.to_string(),
        title: title.to_string(),
        price,
        shipping: None,
        quantity: 1,
        seller: Seller {
            name: "serversurplus".to_string(),
            feedback_count: 4_812,
            feedback_pct: 99.7,
            top_rated: true,
        },
        condition: "Used".to_string(),
        listing_type: ListingType::BuyNow,
        item_url: Some(format!("https://marketplace.example/itm/{external_id}")),
        image_url: Some("https://img.example/1.jpg".to_string()),
        auction_end_ms: None,
    }
}

/* =========================
Mock collaborators
========================= */

#[derive(Clone)]
pub enum SearchScript {
    Page(Vec<ListingSummary>),
    Paged(Vec<Vec<ListingSummary>>),
    DailyLimit,
    Fail,
}

/// Programmable search client keyed by query string. Unscripted queries
/// return an empty final page.
#[derive(Default)]
pub struct MockSearchClient {
    scripts: Mutex<HashMap<String, SearchScript>>,
    calls: Mutex<Vec<String>>,
    quota: Mutex<Option<BrowseQuota>>,
}

impl MockSearchClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_page(&self, query: &str, items: Vec<ListingSummary>) {
        self.scripts
            .lock()
            .insert(query.to_string(), SearchScript::Page(items));
    }

    pub fn set_daily_limit(&self, query: &str) {
        self.scripts
            .lock()
            .insert(query.to_string(), SearchScript::DailyLimit);
    }

    pub fn set_fail(&self, query: &str) {
        self.scripts
            .lock()
            .insert(query.to_string(), SearchScript::Fail);
    }

    /// Multi-page script; `has_more` stays true until the last page.
    pub fn set_paged(&self, query: &str, pages: Vec<Vec<ListingSummary>>) {
        self.scripts
            .lock()
            .insert(query.to_string(), SearchScript::Paged(pages));
    }

    pub fn set_quota(&self, quota: BrowseQuota) {
        *self.quota.lock() = Some(quota);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SearchClient for MockSearchClient {
    async fn search(&self, req: &SearchRequest) -> Result<SearchPage> {
        self.calls.lock().push(req.query.clone());

        match self.scripts.lock().get(&req.query).cloned() {
            Some(SearchScript::Page(items)) => Ok(SearchPage {
                items,
                has_more: false,
            }),
            Some(SearchScript::Paged(pages)) => {
                let idx = (req.page as usize).min(pages.len().saturating_sub(1));
                Ok(SearchPage {
                    items: pages[idx].clone(),
                    has_more: (req.page as usize) + 1 < pages.len(),
                })
            }
            Some(SearchScript::DailyLimit) => {
                Err(backend::error::AppError::DailyLimitReached.into())
            }
            Some(SearchScript::Fail) => Err(anyhow!("marketplace unavailable")),
            None => Ok(SearchPage::default()),
        }
    }
}

#[async_trait]
impl AnalyticsClient for MockSearchClient {
    async fn browse_quota(&self) -> Result<BrowseQuota> {
        let quota = *self.quota.lock();
        quota.ok_or_else(|| anyhow!("no quota configured"))
    }
}

/// Deterministic extractor: per-title overrides plus a fixed DDR4 default.
pub struct MockExtractor {
    pub fail: AtomicBool,
    outputs: Mutex<HashMap<String, (String, AttrMap)>>,
}

impl MockExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            outputs: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_output(&self, title: &str, component_type: &str, attrs: AttrMap) {
        self.outputs
            .lock()
            .insert(title.to_string(), (component_type.to_string(), attrs));
    }

    pub fn default_output() -> (String, AttrMap) {
        let attrs: AttrMap = serde_json::json!({
            "generation": "DDR4",
            "ecc": "ECC REG",
            "capacity": "32GB",
            "speed": 2666
        })
        .as_object()
        .expect("object")
        .clone();
        ("ram".to_string(), attrs)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn classify_and_extract(
        &self,
        title: &str,
        _context: Option<&AttrMap>,
    ) -> Result<(String, AttrMap)> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("extractor unavailable"));
        }
        Ok(self
            .outputs
            .lock()
            .get(title)
            .cloned()
            .unwrap_or_else(Self::default_output))
    }
}

/// Records every invocation (successful or not); `fail` makes sends error.
pub struct MockNotifier {
    pub fail: AtomicBool,
    singles: Mutex<Vec<AlertPayload>>,
    batches: Mutex<Vec<(String, Vec<AlertPayload>)>>,
}

impl MockNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            singles: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
        })
    }

    pub fn single_count(&self) -> usize {
        self.singles.lock().len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn last_batch(&self) -> Option<(String, Vec<AlertPayload>)> {
        self.batches.lock().last().cloned()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_alert(&self, payload: &AlertPayload) -> Result<()> {
        self.singles.lock().push(payload.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("webhook returned 500"));
        }
        Ok(())
    }

    async fn send_batch(&self, payloads: &[AlertPayload], watch_name: &str) -> Result<()> {
        self.batches
            .lock()
            .push((watch_name.to_string(), payloads.to_vec()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("webhook returned 500"));
        }
        Ok(())
    }
}

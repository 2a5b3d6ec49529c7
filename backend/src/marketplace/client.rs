use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::AppError;
use crate::marketplace::rate_limiter::RateLimiter;
use crate::marketplace::{
    AnalyticsClient, BrowseQuota, ListingSummary, SearchClient, SearchPage, SearchRequest,
};
use crate::metrics::Metrics;
use crate::model::{ListingType, Seller};

const PAGE_SIZE: u32 = 50;

/// HTTP client for the marketplace browse + analytics APIs.
///
/// Every search consumes one permit from the shared rate limiter; quota
/// exhaustion (local or an HTTP 429 from the marketplace) surfaces as the
/// daily-limit sentinel.
pub struct HttpSearchClient {
    http: Client,
    base_url: String,
    token: String,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
}

impl HttpSearchClient {
    pub fn new(
        base_url: String,
        token: String,
        limiter: Arc<RateLimiter>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url,
            token,
            limiter,
            metrics,
        })
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    #[instrument(skip(self), fields(query = %req.query, page = req.page), level = "debug")]
    async fn search(&self, req: &SearchRequest) -> Result<SearchPage> {
        self.limiter.acquire().await?;

        let url = format!("{}/buy/browse/v1/item_summary/search", self.base_url);
        let offset = req.page * PAGE_SIZE;

        let mut request = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("q", req.query.as_str())])
            .query(&[("limit", PAGE_SIZE), ("offset", offset)]);
        if let Some(category) = &req.category {
            request = request.query(&[("category_ids", category.as_str())]);
        }

        let resp = request.send().await?;
        self.metrics
            .marketplace_api_calls
            .fetch_add(1, Ordering::Relaxed);

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::DailyLimitReached.into());
        }
        let resp = resp.error_for_status()?;
        let envelope: SearchEnvelope = resp.json().await?;

        debug!(
            items = envelope.item_summaries.len(),
            total = envelope.total,
            "marketplace page fetched"
        );

        let fetched = offset as u64 + envelope.item_summaries.len() as u64;
        let items = envelope
            .item_summaries
            .into_iter()
            .filter_map(|dto| match dto.into_summary() {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed item summary");
                    None
                }
            })
            .collect();

        Ok(SearchPage {
            items,
            has_more: fetched < envelope.total,
        })
    }
}

#[async_trait]
impl AnalyticsClient for HttpSearchClient {
    async fn browse_quota(&self) -> Result<BrowseQuota> {
        let url = format!("{}/developer/analytics/v1_beta/rate_limit", self.base_url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;

        let dto: QuotaDto = resp.json().await?;
        Ok(BrowseQuota {
            count: dto.count,
            limit: dto.limit,
            remaining: dto.remaining,
            reset_at_ms: dto.reset_at_ms,
        })
    }
}

/* =========================
Wire format
========================= */

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default, rename = "itemSummaries")]
    item_summaries: Vec<ItemSummaryDto>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ItemSummaryDto {
    #[serde(rename = "itemId")]
    item_id: String,
    title: String,
    price: MoneyDto,
    #[serde(rename = "shippingCost")]
    shipping_cost: Option<MoneyDto>,
    #[serde(default = "default_quantity")]
    quantity: u32,
    seller: SellerDto,
    #[serde(default)]
    condition: String,
    #[serde(default, rename = "buyingOptions")]
    buying_options: Vec<String>,
    #[serde(rename = "itemWebUrl")]
    item_web_url: Option<String>,
    #[serde(rename = "imageUrl")]
    image_url: Option<String>,
    #[serde(rename = "itemEndDate")]
    item_end_date: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct MoneyDto {
    value: String,
}

#[derive(Debug, Deserialize)]
struct SellerDto {
    username: String,
    #[serde(default, rename = "feedbackScore")]
    feedback_score: u32,
    #[serde(default, rename = "feedbackPercentage")]
    feedback_percentage: String,
    #[serde(default, rename = "topRatedSeller")]
    top_rated: bool,
}

#[derive(Debug, Deserialize)]
struct QuotaDto {
    count: u64,
    limit: u64,
    remaining: u64,
    #[serde(rename = "resetAt")]
    reset_at_ms: u64,
}

impl ItemSummaryDto {
    fn into_summary(self) -> Result<ListingSummary> {
        let price: f64 = self
            .price
            .value
            .parse()
            .with_context(|| format!("bad price for item {}", self.item_id))?;
        let shipping = match self.shipping_cost {
            Some(m) => Some(
                m.value
                    .parse::<f64>()
                    .with_context(|| format!("bad shipping for item {}", self.item_id))?,
            ),
            None => None,
        };

        let listing_type = if self.buying_options.iter().any(|o| o == "AUCTION") {
            ListingType::Auction
        } else {
            ListingType::BuyNow
        };

        let auction_end_ms = match &self.item_end_date {
            Some(s) => Some(
                chrono::DateTime::parse_from_rfc3339(s)
                    .with_context(|| format!("bad end date for item {}", self.item_id))?
                    .timestamp_millis() as u64,
            ),
            None => None,
        };

        Ok(ListingSummary {
            external_id: self.item_id,
            title: self.title,
            price,
            shipping,
            quantity: self.quantity.max(1),
            seller: Seller {
                name: self.seller.username,
                feedback_count: self.seller.feedback_score,
                feedback_pct: self.seller.feedback_percentage.parse().unwrap_or(0.0),
                top_rated: self.seller.top_rated,
            },
            condition: self.condition,
            listing_type,
            item_url: self.item_web_url,
            image_url: self.image_url,
            auction_end_ms,
        })
    }
}

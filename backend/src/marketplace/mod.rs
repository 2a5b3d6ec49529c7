//! Marketplace search contract: raw listing summaries under a daily-quota
//! discipline.

pub mod client;
pub mod paginator;
pub mod rate_limiter;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Listing, ListingType, Seller, normalize_condition};

/// One search call. `page` is zero-based; the client owns the page size.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub category: Option<String>,
    pub page: u32,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, category: Option<String>) -> Self {
        Self {
            query: query.into(),
            category,
            page: 0,
        }
    }
}

/// Raw listing summary as returned by the marketplace, before extraction.
#[derive(Debug, Clone)]
pub struct ListingSummary {
    pub external_id: String,
    pub title: String,
    pub price: f64,
    pub shipping: Option<f64>,
    pub quantity: u32,
    pub seller: Seller,
    pub condition: String,
    pub listing_type: ListingType,
    pub item_url: Option<String>,
    pub image_url: Option<String>,
    pub auction_end_ms: Option<u64>,
}

impl ListingSummary {
    /// Fresh listing row for this summary; extraction fields start empty.
    pub fn into_listing(self, first_seen_ms: u64) -> Listing {
        let condition_normalized = normalize_condition(&self.condition);
        Listing {
            id: Uuid::new_v4(),
            external_id: self.external_id,
            title: self.title,
            price: self.price,
            shipping: self.shipping,
            quantity: self.quantity.max(1),
            seller: self.seller,
            condition_raw: self.condition,
            condition_normalized,
            listing_type: self.listing_type,
            item_url: self.item_url,
            image_url: self.image_url,
            attrs: None,
            component_type: None,
            extraction_confidence: None,
            product_key: None,
            score: None,
            auction_end_ms: self.auction_end_ms,
            first_seen_ms,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<ListingSummary>,
    pub has_more: bool,
}

/// Authoritative daily-quota numbers from the marketplace analytics API.
#[derive(Debug, Clone, Copy)]
pub struct BrowseQuota {
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at_ms: u64,
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, req: &SearchRequest) -> Result<SearchPage>;
}

#[async_trait]
pub trait AnalyticsClient: Send + Sync {
    async fn browse_quota(&self) -> Result<BrowseQuota>;
}

//! Domain entities shared by the store, engine, and scheduler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type WatchId = uuid::Uuid;
pub type ListingId = uuid::Uuid;
pub type JobId = uuid::Uuid;
pub type AlertId = uuid::Uuid;
pub type RunId = uuid::Uuid;

pub type AttrMap = serde_json::Map<String, serde_json::Value>;

/// Operator-defined saved search with a score threshold.
#[derive(Debug, Clone)]
pub struct Watch {
    pub id: WatchId,
    /// Unique human-readable name; also the per-watch metric label.
    pub name: String,
    pub query: String,
    pub category: Option<String>,
    /// Expected component type for this search, if the operator narrowed it.
    pub component_type: Option<String>,
    /// Minimum score (0..=100) for a listing to raise an alert.
    pub threshold: i32,
    pub filters: WatchFilters,
    pub enabled: bool,
    pub last_polled_ms: Option<u64>,
}

/// Structured predicate a listing must satisfy before it may alert.
///
/// Empty/None fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchFilters {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub max_unit_price: Option<f64>,
    pub min_seller_feedback: Option<u32>,
    pub min_seller_feedback_pct: Option<f64>,
    #[serde(default)]
    pub top_rated_only: bool,
    /// Normalized condition whitelist; empty means any.
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub buy_now_only: bool,
}

impl WatchFilters {
    pub fn matches(&self, listing: &Listing) -> bool {
        if let Some(min) = self.min_price {
            if listing.price < min {
                return false;
            }
        }
        if let Some(max) = self.max_price {
            if listing.price > max {
                return false;
            }
        }
        if let Some(max_unit) = self.max_unit_price {
            if listing.unit_price() > max_unit {
                return false;
            }
        }
        if let Some(min_fb) = self.min_seller_feedback {
            if listing.seller.feedback_count < min_fb {
                return false;
            }
        }
        if let Some(min_pct) = self.min_seller_feedback_pct {
            if listing.seller.feedback_pct < min_pct {
                return false;
            }
        }
        if self.top_rated_only && !listing.seller.top_rated {
            return false;
        }
        if !self.conditions.is_empty()
            && !self.conditions.iter().any(|c| c == &listing.condition_normalized)
        {
            return false;
        }
        if self.buy_now_only && listing.listing_type != ListingType::BuyNow {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Seller {
    pub name: String,
    pub feedback_count: u32,
    pub feedback_pct: f64,
    pub top_rated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingType {
    BuyNow,
    Auction,
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListingType::BuyNow => "buy_now",
            ListingType::Auction => "auction",
        };
        f.write_str(s)
    }
}

impl FromStr for ListingType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy_now" => Ok(ListingType::BuyNow),
            "auction" => Ok(ListingType::Auction),
            other => Err(anyhow::anyhow!("Invalid ListingType value: {}", other)),
        }
    }
}

/// A marketplace item snapshot identified by its external id.
#[derive(Debug, Clone)]
pub struct Listing {
    pub id: ListingId,
    pub external_id: String,
    pub title: String,
    pub price: f64,
    pub shipping: Option<f64>,
    pub quantity: u32,
    pub seller: Seller,
    pub condition_raw: String,
    pub condition_normalized: String,
    pub listing_type: ListingType,
    pub item_url: Option<String>,
    pub image_url: Option<String>,
    /// Structured attributes produced by extraction.
    pub attrs: Option<AttrMap>,
    pub component_type: Option<String>,
    pub extraction_confidence: Option<f64>,
    pub product_key: Option<String>,
    pub score: Option<i32>,
    pub auction_end_ms: Option<u64>,
    pub first_seen_ms: u64,
}

impl Listing {
    /// Effective per-unit cost: (price + shipping) / quantity.
    pub fn unit_price(&self) -> f64 {
        let qty = self.quantity.max(1) as f64;
        (self.price + self.shipping.unwrap_or(0.0)) / qty
    }

    pub fn is_extracted(&self) -> bool {
        self.product_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Map a marketplace condition string onto a small closed vocabulary.
pub fn normalize_condition(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return "unknown".to_string();
    }
    if lower.contains("for parts") || lower.contains("not working") {
        return "for_parts".to_string();
    }
    if lower.contains("refurb") {
        return "refurbished".to_string();
    }
    if lower.contains("open box") || lower.contains("open-box") {
        return "open_box".to_string();
    }
    if lower.contains("used") || lower.contains("pre-owned") || lower.contains("pre owned") {
        return "used".to_string();
    }
    if lower.contains("new") {
        return "new".to_string();
    }
    "unknown".to_string()
}

/// A queued task to classify and extract attributes for one listing.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub id: JobId,
    pub listing_id: ListingId,
    /// 0 = ingest, 1 = re-extract. Lower runs first.
    pub priority: i32,
    pub enqueued_at_ms: u64,
    pub leased_by: Option<String>,
    pub leased_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub error: String,
}

/// Price percentiles over listings sharing a product key.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub product_key: String,
    pub sample_count: u32,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub mean: f64,
    pub updated_ms: u64,
}

impl Baseline {
    /// A baseline is warm once it has at least `min_samples` observations.
    pub fn is_warm(&self, min_samples: u32) -> bool {
        self.sample_count >= min_samples
    }
}

/// A durable record that a listing exceeded a watch's threshold.
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: AlertId,
    pub watch_id: WatchId,
    pub listing_id: ListingId,
    /// Listing score at creation time.
    pub score: i32,
    pub pending: bool,
    pub created_ms: u64,
}

#[derive(Debug, Clone)]
pub struct NotificationAttempt {
    pub id: uuid::Uuid,
    pub alert_id: AlertId,
    pub succeeded: bool,
    pub duration_ms: u64,
    pub error: String,
    pub attempted_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    Crashed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "crashed" => Ok(JobStatus::Crashed),
            other => Err(anyhow::anyhow!("Invalid JobStatus value: {}", other)),
        }
    }
}

/// One execution of a scheduled job with its final status.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: RunId,
    pub job_name: String,
    pub status: JobStatus,
    pub started_ms: u64,
    pub completed_ms: Option<u64>,
    pub error: String,
}

/// Denormalized backlog snapshot computed on demand by the store.
#[derive(Debug, Clone, Default)]
pub struct SystemState {
    pub watches_total: u64,
    pub watches_enabled: u64,
    pub listings_total: u64,
    pub listings_unextracted: u64,
    pub listings_unscored: u64,
    /// Listings with a component type but no product key, per type.
    pub listings_incomplete_by_type: Vec<(String, u64)>,
    pub alerts_pending: u64,
    pub baselines_cold: u64,
    pub baselines_warm: u64,
    pub product_keys_without_baseline: u64,
    pub extraction_queue_depth: u64,
}

/// Persisted mirror of the in-process daily rate limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSnapshot {
    pub daily_count: u64,
    pub daily_max: u64,
    pub reset_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing_with(price: f64, shipping: Option<f64>, quantity: u32) -> Listing {
        Listing {
            id: uuid::Uuid::new_v4(),
            external_id: "x".into(),
            title: "t".into(),
            price,
            shipping,
            quantity,
            seller: Seller {
                name: "s".into(),
                feedback_count: 1000,
                feedback_pct: 99.5,
                top_rated: false,
            },
            condition_raw: "Used".into(),
            condition_normalized: "used".into(),
            listing_type: ListingType::BuyNow,
            item_url: None,
            image_url: None,
            attrs: None,
            component_type: None,
            extraction_confidence: None,
            product_key: None,
            score: None,
            auction_end_ms: None,
            first_seen_ms: 0,
        }
    }

    #[test]
    fn unit_price_spreads_shipping_over_quantity() {
        let l = listing_with(90.0, Some(10.0), 4);
        assert!((l.unit_price() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unit_price_guards_zero_quantity() {
        let l = listing_with(50.0, None, 0);
        assert!((l.unit_price() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn condition_normalization_buckets() {
        assert_eq!(normalize_condition("Brand New"), "new");
        assert_eq!(normalize_condition("Open box"), "open_box");
        assert_eq!(normalize_condition("Seller refurbished"), "refurbished");
        assert_eq!(normalize_condition("Pre-Owned"), "used");
        assert_eq!(normalize_condition("For parts or not working"), "for_parts");
        assert_eq!(normalize_condition(""), "unknown");
    }

    #[test]
    fn filters_price_band() {
        let f = WatchFilters {
            min_price: Some(20.0),
            max_price: Some(100.0),
            ..Default::default()
        };
        assert!(f.matches(&listing_with(50.0, None, 1)));
        assert!(!f.matches(&listing_with(10.0, None, 1)));
        assert!(!f.matches(&listing_with(150.0, None, 1)));
    }

    #[test]
    fn filters_seller_and_condition() {
        let f = WatchFilters {
            min_seller_feedback: Some(500),
            min_seller_feedback_pct: Some(99.0),
            conditions: vec!["used".into(), "refurbished".into()],
            ..Default::default()
        };
        let mut l = listing_with(50.0, None, 1);
        assert!(f.matches(&l));

        l.seller.feedback_count = 10;
        assert!(!f.matches(&l));

        l.seller.feedback_count = 1000;
        l.condition_normalized = "for_parts".into();
        assert!(!f.matches(&l));
    }

    #[test]
    fn filters_buy_now_only_rejects_auctions() {
        let f = WatchFilters {
            buy_now_only: true,
            ..Default::default()
        };
        let mut l = listing_with(50.0, None, 1);
        assert!(f.matches(&l));
        l.listing_type = ListingType::Auction;
        assert!(!f.matches(&l));
    }

    #[test]
    fn empty_filters_match_everything() {
        assert!(WatchFilters::default().matches(&listing_with(1.0, None, 1)));
    }
}

//! Composite listing scorer.
//!
//! Deliberately pure: no async, no IO. The engine fetches the baseline and
//! persists the result; this module only turns features into numbers.

use serde::{Deserialize, Serialize};

use crate::model::{Baseline, Listing, ListingType};

/// Neutral price sub-score used when no warm baseline exists. Keeps the
/// total defined for every listing with a product key, so the pipeline
/// bootstraps on an empty database.
pub const NEUTRAL_PRICE_SCORE: f64 = 50.0;

/// Feature vector extracted from a listing before scoring.
#[derive(Debug, Clone)]
pub struct ListingFeatures {
    pub unit_price: f64,
    pub seller_feedback_count: u32,
    pub seller_feedback_pct: f64,
    pub seller_top_rated: bool,
    pub condition: String,
    pub quantity: u32,
    pub has_image: bool,
    pub has_attributes: bool,
    pub is_auction: bool,
}

impl ListingFeatures {
    pub fn from_listing(listing: &Listing) -> Self {
        Self {
            unit_price: listing.unit_price(),
            seller_feedback_count: listing.seller.feedback_count,
            seller_feedback_pct: listing.seller.feedback_pct,
            seller_top_rated: listing.seller.top_rated,
            condition: listing.condition_normalized.clone(),
            quantity: listing.quantity,
            has_image: listing.image_url.is_some(),
            has_attributes: listing.attrs.as_ref().is_some_and(|a| !a.is_empty()),
            is_auction: listing.listing_type == ListingType::Auction,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub price: f64,
    pub seller: f64,
    pub condition: f64,
    pub completeness: f64,
    /// Baselines under this many samples are treated as cold.
    pub min_baseline_samples: u32,
    /// Flat deduction for auctions: the quoted price is not final.
    pub auction_discount: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            price: 0.5,
            seller: 0.2,
            condition: 0.2,
            completeness: 0.1,
            min_baseline_samples: 10,
            auction_discount: 10.0,
        }
    }
}

/// Persisted alongside the integer total so operators can see why a
/// listing scored the way it did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub price_score: f64,
    pub seller_score: f64,
    pub condition_score: f64,
    pub completeness_score: f64,
    pub auction_discount: f64,
    pub baseline_samples: u32,
    pub cold_start: bool,
    pub total: i32,
}

/// Composite score over `(features, baseline?)`, clamped to 0..=100.
pub fn score(
    features: &ListingFeatures,
    baseline: Option<&Baseline>,
    weights: &ScoreWeights,
) -> (i32, ScoreBreakdown) {
    let warm = baseline.is_some_and(|b| b.is_warm(weights.min_baseline_samples));

    let price_score = match baseline {
        Some(b) if b.is_warm(weights.min_baseline_samples) => {
            price_vs_baseline(features.unit_price, b)
        }
        _ => NEUTRAL_PRICE_SCORE,
    };

    let seller_score = seller_quality(
        features.seller_feedback_count,
        features.seller_feedback_pct,
        features.seller_top_rated,
    );
    let condition_score = condition_rank(&features.condition);
    let completeness_score = completeness(features.has_image, features.has_attributes);
    let auction_discount = if features.is_auction {
        weights.auction_discount
    } else {
        0.0
    };

    let raw = price_score * weights.price
        + seller_score * weights.seller
        + condition_score * weights.condition
        + completeness_score * weights.completeness
        - auction_discount;

    let total = raw.round().clamp(0.0, 100.0) as i32;

    let breakdown = ScoreBreakdown {
        price_score,
        seller_score,
        condition_score,
        completeness_score,
        auction_discount,
        baseline_samples: baseline.map(|b| b.sample_count).unwrap_or(0),
        cold_start: !warm,
        total,
    };

    (total, breakdown)
}

/// Piecewise-linear position of the unit price inside the baseline's
/// percentile ladder: at or below P10 scores 100, at or above P90 scores 0.
fn price_vs_baseline(unit_price: f64, baseline: &Baseline) -> f64 {
    let ladder = [
        (baseline.p10, 100.0),
        (baseline.p25, 75.0),
        (baseline.p50, 50.0),
        (baseline.p75, 25.0),
        (baseline.p90, 0.0),
    ];

    // Degenerate ladder (all samples equal): compare against the median.
    if baseline.p90 - baseline.p10 <= f64::EPSILON {
        return if unit_price < baseline.p50 {
            100.0
        } else if unit_price > baseline.p50 {
            0.0
        } else {
            NEUTRAL_PRICE_SCORE
        };
    }

    if unit_price <= ladder[0].0 {
        return 100.0;
    }
    for pair in ladder.windows(2) {
        let (lo_price, lo_score) = pair[0];
        let (hi_price, hi_score) = pair[1];
        if unit_price <= hi_price {
            if hi_price - lo_price <= f64::EPSILON {
                return hi_score;
            }
            let frac = (unit_price - lo_price) / (hi_price - lo_price);
            return lo_score + (hi_score - lo_score) * frac;
        }
    }
    0.0
}

fn seller_quality(feedback_count: u32, feedback_pct: f64, top_rated: bool) -> f64 {
    // Below 90% positive is disqualifying territory on this marketplace.
    let pct_component = ((feedback_pct - 90.0) / 10.0 * 100.0).clamp(0.0, 100.0);
    let count_component = ((feedback_count as f64) / 1_000.0 * 100.0).min(100.0);
    let bonus = if top_rated { 10.0 } else { 0.0 };
    (0.6 * pct_component + 0.4 * count_component + bonus).min(100.0)
}

fn condition_rank(condition: &str) -> f64 {
    match condition {
        "new" => 100.0,
        "open_box" => 85.0,
        "refurbished" => 70.0,
        "used" => 55.0,
        "for_parts" => 10.0,
        _ => 40.0,
    }
}

fn completeness(has_image: bool, has_attributes: bool) -> f64 {
    let mut s = 0.0;
    if has_image {
        s += 50.0;
    }
    if has_attributes {
        s += 50.0;
    }
    s
}

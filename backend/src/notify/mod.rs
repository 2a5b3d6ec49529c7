//! Alert delivery contract. No retries here; the alert processor is the
//! retry authority via persistence.

pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::model::{Listing, Watch};

/// The rendered fields a notification carries.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub watch_name: String,
    pub title: String,
    pub url: String,
    pub image_url: Option<String>,
    pub price: String,
    pub unit_price: String,
    pub seller: String,
    pub component_type: String,
    pub condition: String,
    pub score: i32,
}

impl AlertPayload {
    pub fn new(watch: &Watch, listing: &Listing, score: i32) -> Self {
        Self {
            watch_name: watch.name.clone(),
            title: listing.title.clone(),
            url: listing.item_url.clone().unwrap_or_default(),
            image_url: listing.image_url.clone(),
            price: format_price(listing.price),
            unit_price: format!("{}/unit", format_price(listing.unit_price())),
            seller: format!(
                "{} ({}, {:.1}%)",
                listing.seller.name, listing.seller.feedback_count, listing.seller.feedback_pct
            ),
            component_type: listing.component_type.clone().unwrap_or_default(),
            condition: listing.condition_normalized.clone(),
            score,
        }
    }
}

pub fn format_price(value: f64) -> String {
    format!("${value:.2}")
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, payload: &AlertPayload) -> Result<()>;
    async fn send_batch(&self, payloads: &[AlertPayload], watch_name: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_formatting() {
        assert_eq!(format_price(45.0), "$45.00");
        assert_eq!(format_price(11.999), "$12.00");
    }
}

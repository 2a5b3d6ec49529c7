//! Listing-title classification and attribute extraction.

pub mod llm;
pub mod product_key;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::AttrMap;

/// Classifies a listing title into a component type and pulls structured
/// attributes out of it.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// `context` carries any attributes already known for the listing;
    /// implementations may use it to disambiguate.
    async fn classify_and_extract(
        &self,
        title: &str,
        context: Option<&AttrMap>,
    ) -> Result<(String, AttrMap)>;
}

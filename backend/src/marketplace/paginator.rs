//! Bounded pagination over the search API.
//!
//! The paginator owns the page cap; the engine only consumes the outcome.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::marketplace::{ListingSummary, SearchClient, SearchRequest};
use crate::store::Store;

/// Why a paginate call stopped. Opaque to the engine; callers that care
/// must inspect it themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The marketplace reported no further pages.
    Exhausted,
    /// The configured page cap was hit.
    PageCap,
    /// A full page of already-known listings was seen (new-only mode).
    KnownListing,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Exhausted => "exhausted",
            StopReason::PageCap => "page_cap",
            StopReason::KnownListing => "known_listing",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct PageOutcome {
    pub new_listings: Vec<ListingSummary>,
    pub pages_used: u32,
    pub total_seen: u32,
    pub stopped_at: StopReason,
}

pub struct Paginator {
    client: Arc<dyn SearchClient>,
    store: Arc<dyn Store>,
    page_cap: u32,
}

impl Paginator {
    pub fn new(client: Arc<dyn SearchClient>, store: Arc<dyn Store>, page_cap: u32) -> Self {
        Self {
            client,
            store,
            page_cap: page_cap.max(1),
        }
    }

    /// Walk result pages until the cap, the end of results, or (in
    /// new-only mode) a page with no unseen external ids.
    pub async fn paginate(&self, req: &SearchRequest, new_only: bool) -> Result<PageOutcome> {
        let mut new_listings = Vec::new();
        let mut pages_used = 0u32;
        let mut total_seen = 0u32;

        let stopped_at = loop {
            if pages_used >= self.page_cap {
                break StopReason::PageCap;
            }

            let page_req = SearchRequest {
                query: req.query.clone(),
                category: req.category.clone(),
                page: pages_used,
            };
            let page = self.client.search(&page_req).await?;
            pages_used += 1;
            total_seen += page.items.len() as u32;

            let had_items = !page.items.is_empty();
            let mut page_new = 0usize;
            for item in page.items {
                if new_only && self.store.get_listing(&item.external_id).await?.is_some() {
                    continue;
                }
                page_new += 1;
                new_listings.push(item);
            }

            if new_only && had_items && page_new == 0 {
                break StopReason::KnownListing;
            }
            if !page.has_more {
                break StopReason::Exhausted;
            }
        };

        Ok(PageOutcome {
            new_listings,
            pages_used,
            total_seen,
            stopped_at,
        })
    }
}

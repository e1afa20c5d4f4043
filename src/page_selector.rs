//! Random, non-repeating upstream page selection
//!
//! For every filter signature the ledger remembers which upstream pages
//! have been handed out. A new request for the same signature gets a page
//! drawn uniformly from the ones not handed out yet, so clients can send
//! `skip` values in any order and still never see the same page twice.

use crate::cache::{CacheError, CacheStore};
use crate::filters::FilterSignature;
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::debug;

/// The upstream refuses to serve pages beyond this one
pub const MAX_UPSTREAM_PAGES: u32 = 500;

/// Outcome of a page selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSelection {
    /// This page has been claimed for the request
    Page(u32),
    /// Every page for the signature has been served
    Exhausted,
}

/// Stateless selector over the served-page ledger
pub struct PageSelector {
    cache: Arc<CacheStore>,
}

impl PageSelector {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self { cache }
    }

    /// Picks and claims a page not yet served for the signature
    ///
    /// The claim is atomic: when two requests race for the same page, the
    /// loser draws again from what is left.
    pub fn select(
        &self,
        signature: &FilterSignature,
        total_pages: u32,
        skip: u32,
    ) -> Result<PageSelection, CacheError> {
        let total_pages = total_pages.min(MAX_UPSTREAM_PAGES);

        loop {
            let served = self.cache.served_pages(signature)?;
            let available: Vec<u32> = (1..=total_pages).filter(|p| !served.contains(p)).collect();

            let Some(&page) = available.choose(&mut rand::thread_rng()) else {
                debug!(total_pages, served = served.len(), "All pages served for signature");
                return Ok(PageSelection::Exhausted);
            };

            if self.cache.claim_page(signature, page, skip)? {
                debug!(
                    page,
                    total_pages,
                    available = available.len(),
                    "Selected upstream page"
                );
                return Ok(PageSelection::Page(page));
            }

            debug!(page, "Page claimed concurrently, drawing again");
        }
    }

    /// Gives a claimed page back after its fetch failed
    pub fn release(&self, signature: &FilterSignature, page: u32) -> Result<(), CacheError> {
        self.cache.release_page(signature, page)
    }
}

/// Picks any page without consulting the ledger
///
/// Used when the ledger cannot be read: repeats become possible, but the
/// request can still be answered.
pub fn fallback_selection(total_pages: u32) -> PageSelection {
    let total_pages = total_pages.min(MAX_UPSTREAM_PAGES);
    if total_pages == 0 {
        return PageSelection::Exhausted;
    }
    PageSelection::Page(rand::thread_rng().gen_range(1..=total_pages))
}

//! External price sources
//!
//! Both providers degrade to empty results when unconfigured or when a batch
//! chunk fails upstream; failures are logged, never returned to the caller.

pub mod catalog;
pub mod history;
pub mod sigv4;

pub use catalog::CatalogClient;
pub use history::HistoryClient;

use crate::types::{RawCatalogItem, RawHistoryItem};
use async_trait::async_trait;

/// Current listing data (price, list price, savings, rank, metadata)
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn fetch_batch(&self, identifiers: &[String]) -> Vec<RawCatalogItem>;

    /// Keyword search, capped at the provider's maximum result count
    async fn search(&self, keywords: &str, max_results: usize) -> Vec<RawCatalogItem>;
}

/// Historical averages and all-time extremes
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn fetch_batch(&self, identifiers: &[String]) -> Vec<RawHistoryItem>;
}

/// Non-empty trimmed string, or None
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

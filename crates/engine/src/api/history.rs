//! History provider client (Keepa product API)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{non_empty, HistoryProvider};
use crate::config::HistoryConfig;
use crate::rate_limiter::RateLimiter;
use crate::types::RawHistoryItem;

const DEFAULT_BASE_URL: &str = "https://api.keepa.com";
pub const MAX_BATCH_SIZE: usize = 100;
/// Days of history used for `avg` and the min/max extremes
const STATS_DAYS: u32 = 180;
/// Stats arrays are indexed by price type; 0 is the marketplace's own offer
const AMAZON_PRICE: usize = 0;

/// History source. `Disabled` when no API key is configured.
pub enum HistoryClient {
    Disabled,
    Enabled(KeepaClient),
}

impl HistoryClient {
    pub fn from_config(config: &HistoryConfig) -> Result<Self> {
        if !config.is_configured() {
            info!("History provider not configured, running without price history");
            return Ok(Self::Disabled);
        }
        Ok(Self::Enabled(KeepaClient::new(config)?))
    }
}

#[async_trait]
impl HistoryProvider for HistoryClient {
    fn is_configured(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    async fn fetch_batch(&self, identifiers: &[String]) -> Vec<RawHistoryItem> {
        match self {
            Self::Disabled => Vec::new(),
            Self::Enabled(client) => client.get_products(identifiers).await,
        }
    }
}

pub struct KeepaClient {
    client: Client,
    base_url: String,
    api_key: String,
    domain: u8,
    batch_size: usize,
    limiter: Arc<RateLimiter>,
}

impl KeepaClient {
    pub fn new(config: &HistoryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: config.api_key.clone(),
            domain: config.domain,
            batch_size: config.batch_size.clamp(1, MAX_BATCH_SIZE),
            limiter: Arc::new(RateLimiter::per_period_secs(
                "history",
                config.requests_per_period,
                config.period_secs,
            )),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Fetch products in chunks; a failed chunk is logged and skipped
    pub async fn get_products(&self, identifiers: &[String]) -> Vec<RawHistoryItem> {
        let mut results = Vec::with_capacity(identifiers.len());

        for chunk in identifiers.chunks(self.batch_size) {
            self.limiter.acquire().await;
            match self.query(chunk).await {
                Ok(resp) => {
                    debug!(
                        requested = chunk.len(),
                        returned = resp.products.len(),
                        tokens_left = resp.tokens_left,
                        "Keepa product query"
                    );
                    results.extend(resp.products.into_iter().map(parse_product));
                }
                Err(e) => error!(chunk = ?chunk, "History query failed: {e:#}"),
            }
        }

        results
    }

    async fn query(&self, asins: &[String]) -> Result<ProductResponse> {
        let url = format!("{}/product", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.clone()),
                ("domain", self.domain.to_string()),
                ("asin", asins.join(",")),
                ("stats", STATS_DAYS.to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Keepa returned {status}: {text}");
        }

        Ok(resp.json().await?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductResponse {
    #[serde(default)]
    products: Vec<KeepaProduct>,
    tokens_left: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct KeepaProduct {
    asin: String,
    title: Option<String>,
    stats: Option<KeepaStats>,
}

#[derive(Debug, Default, Deserialize)]
struct KeepaStats {
    #[serde(default)]
    avg: Vec<Option<StatEntry>>,
    #[serde(default)]
    avg30: Vec<Option<StatEntry>>,
    #[serde(default)]
    avg90: Vec<Option<StatEntry>>,
    #[serde(default)]
    min: Vec<Option<StatEntry>>,
    #[serde(default)]
    max: Vec<Option<StatEntry>>,
}

/// Averages are plain values; extremes come as `[keepa_minutes, value]`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatEntry {
    Value(i64),
    Timed(Vec<i64>),
}

impl StatEntry {
    fn value(&self) -> Option<i64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Timed(pair) => pair.last().copied(),
        }
    }
}

/// Amazon price in major units. Keepa reports minor units; -1 means no data.
fn amazon_price(series: &[Option<StatEntry>]) -> Option<Decimal> {
    series
        .get(AMAZON_PRICE)
        .and_then(|e| e.as_ref())
        .and_then(StatEntry::value)
        .filter(|v| *v > 0)
        .map(|cents| Decimal::new(cents, 2))
}

fn parse_product(product: KeepaProduct) -> RawHistoryItem {
    let stats = product.stats.unwrap_or_default();
    RawHistoryItem {
        identifier: product.asin,
        title: non_empty(product.title),
        avg_30d: amazon_price(&stats.avg30),
        avg_90d: amazon_price(&stats.avg90),
        avg_180d: amazon_price(&stats.avg),
        all_time_low: amazon_price(&stats.min),
        all_time_high: amazon_price(&stats.max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_product_stats() {
        let body = r#"{
            "tokensLeft": 57,
            "products": [
                {
                    "asin": "B00X4WHP5E",
                    "title": "Wireless Headphones",
                    "stats": {
                        "avg": [7999, 8499, -1],
                        "avg30": [6950, null],
                        "avg90": [-1],
                        "min": [[3912340, 4999], null],
                        "max": [[3900000, 12999]]
                    }
                },
                {"asin": "B0NOSTATS", "title": null}
            ]
        }"#;
        let resp: ProductResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.tokens_left, Some(57));
        let items: Vec<_> = resp.products.into_iter().map(parse_product).collect();

        let item = &items[0];
        assert_eq!(item.avg_180d, Some(dec!(79.99)));
        assert_eq!(item.avg_30d, Some(dec!(69.50)));
        assert_eq!(item.avg_90d, None);
        assert_eq!(item.all_time_low, Some(dec!(49.99)));
        assert_eq!(item.all_time_high, Some(dec!(129.99)));

        let bare = &items[1];
        assert_eq!(bare.identifier, "B0NOSTATS");
        assert_eq!(bare.title, None);
        assert_eq!(bare.avg_30d, None);
        assert_eq!(bare.all_time_low, None);
    }

    #[test]
    fn test_empty_series() {
        assert_eq!(amazon_price(&[]), None);
        assert_eq!(amazon_price(&[None]), None);
        assert_eq!(amazon_price(&[Some(StatEntry::Value(0))]), None);
        assert_eq!(amazon_price(&[Some(StatEntry::Timed(vec![]))]), None);
    }

    #[tokio::test]
    async fn test_disabled_returns_empty() {
        let client = HistoryClient::from_config(&HistoryConfig::default()).unwrap();
        assert!(!client.is_configured());
        assert!(client.fetch_batch(&["B00X4WHP5E".to_string()]).await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_yields_empty() {
        let config = HistoryConfig {
            api_key: "key".into(),
            timeout_secs: 2,
            ..Default::default()
        };
        let client = KeepaClient::new(&config).unwrap().with_base_url("http://127.0.0.1:9");
        let ids = vec!["B00X4WHP5E".to_string()];
        assert!(client.get_products(&ids).await.is_empty());
    }
}

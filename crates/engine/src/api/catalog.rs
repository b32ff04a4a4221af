//! Catalog provider client (Amazon Product Advertising API 5.0)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::sigv4::Signer;
use super::{non_empty, CatalogProvider};
use crate::config::CatalogConfig;
use crate::rate_limiter::RateLimiter;
use crate::types::RawCatalogItem;

/// Provider limit on ItemIds per GetItems call and results per SearchItems call
pub const MAX_BATCH_SIZE: usize = 10;
pub const MAX_SEARCH_RESULTS: usize = 10;

const SERVICE: &str = "ProductAdvertisingAPI";
const TARGET_PREFIX: &str = "com.amazon.paapi5.v1.ProductAdvertisingAPIv1.";
const GET_ITEMS_PATH: &str = "/paapi5/getitems";
const SEARCH_ITEMS_PATH: &str = "/paapi5/searchitems";

const RESOURCES: &[&str] = &[
    "ItemInfo.Title",
    "ItemInfo.ByLineInfo",
    "ItemInfo.Classifications",
    "Images.Primary.Large",
    "Offers.Listings.Price",
    "Offers.Listings.SavingBasis",
    "BrowseNodeInfo.WebsiteSalesRank",
];

/// Catalog source. `Disabled` when credentials are missing.
pub enum CatalogClient {
    Disabled,
    Enabled(PaapiClient),
}

impl CatalogClient {
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        if !config.is_configured() {
            info!("Catalog provider not configured, running without listing data");
            return Ok(Self::Disabled);
        }
        Ok(Self::Enabled(PaapiClient::new(config)?))
    }
}

#[async_trait]
impl CatalogProvider for CatalogClient {
    fn is_configured(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    async fn fetch_batch(&self, identifiers: &[String]) -> Vec<RawCatalogItem> {
        match self {
            Self::Disabled => Vec::new(),
            Self::Enabled(client) => client.get_items(identifiers).await,
        }
    }

    async fn search(&self, keywords: &str, max_results: usize) -> Vec<RawCatalogItem> {
        match self {
            Self::Disabled => Vec::new(),
            Self::Enabled(client) => client.search_items(keywords, max_results).await,
        }
    }
}

/// Marketplace host and signing region
fn marketplace_endpoint(marketplace: &str) -> (&'static str, &'static str) {
    match marketplace {
        "www.amazon.co.uk" => ("webservices.amazon.co.uk", "eu-west-1"),
        "www.amazon.de" => ("webservices.amazon.de", "eu-west-1"),
        "www.amazon.ca" => ("webservices.amazon.ca", "us-east-1"),
        _ => ("webservices.amazon.com", "us-east-1"),
    }
}

pub struct PaapiClient {
    client: Client,
    access_key: String,
    secret_key: String,
    partner_tag: String,
    marketplace: String,
    host: &'static str,
    region: &'static str,
    batch_size: usize,
    limiter: Arc<RateLimiter>,
}

impl PaapiClient {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let (host, region) = marketplace_endpoint(&config.marketplace);

        Ok(Self {
            client,
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            partner_tag: config.partner_tag.clone(),
            marketplace: config.marketplace.clone(),
            host,
            region,
            batch_size: config.batch_size.clamp(1, MAX_BATCH_SIZE),
            limiter: Arc::new(RateLimiter::per_period_secs(
                "catalog",
                config.requests_per_period,
                config.period_secs,
            )),
        })
    }

    /// Fetch items in chunks; a failed chunk is logged and skipped
    pub async fn get_items(&self, identifiers: &[String]) -> Vec<RawCatalogItem> {
        let mut results = Vec::with_capacity(identifiers.len());

        for chunk in identifiers.chunks(self.batch_size) {
            self.limiter.acquire().await;
            let body = json!({
                "ItemIds": chunk,
                "PartnerTag": self.partner_tag,
                "PartnerType": "Associates",
                "Marketplace": self.marketplace,
                "Resources": RESOURCES,
            });

            match self
                .post::<GetItemsResponse>("GetItems", GET_ITEMS_PATH, &body)
                .await
            {
                Ok(resp) => {
                    log_item_errors(&resp.errors);
                    let items = resp.items_result.map(|r| r.items).unwrap_or_default();
                    debug!(requested = chunk.len(), returned = items.len(), "GetItems");
                    results.extend(items.into_iter().map(parse_item));
                }
                Err(e) => error!(chunk = ?chunk, "Catalog GetItems failed: {e:#}"),
            }
        }

        results
    }

    pub async fn search_items(&self, keywords: &str, max_results: usize) -> Vec<RawCatalogItem> {
        self.limiter.acquire().await;
        let body = json!({
            "Keywords": keywords,
            "ItemCount": max_results.clamp(1, MAX_SEARCH_RESULTS),
            "PartnerTag": self.partner_tag,
            "PartnerType": "Associates",
            "Marketplace": self.marketplace,
            "Resources": RESOURCES,
        });

        match self
            .post::<SearchItemsResponse>("SearchItems", SEARCH_ITEMS_PATH, &body)
            .await
        {
            Ok(resp) => {
                log_item_errors(&resp.errors);
                resp.search_result
                    .map(|r| r.items)
                    .unwrap_or_default()
                    .into_iter()
                    .map(parse_item)
                    .collect()
            }
            Err(e) => {
                error!(keywords, "Catalog SearchItems failed: {e:#}");
                Vec::new()
            }
        }
    }

    async fn post<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let payload = serde_json::to_string(body)?;
        let signer = Signer {
            access_key: &self.access_key,
            secret_key: &self.secret_key,
            region: self.region,
            service: SERVICE,
        };
        let target = format!("{TARGET_PREFIX}{operation}");
        let headers = signer.sign_post(self.host, path, &target, &payload, Utc::now());

        let mut request = self
            .client
            .post(format!("https://{}{}", self.host, path))
            .body(payload);
        for (name, value) in headers {
            // reqwest derives Host from the URL
            if name != "host" {
                request = request.header(name, value);
            }
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("{operation} returned {status}: {text}");
        }

        Ok(resp.json().await?)
    }
}

fn log_item_errors(errors: &[ApiError]) {
    for e in errors {
        warn!(code = %e.code, "Catalog item error: {}", e.message);
    }
}

// ---------------------------------------------------------------------------
// Response shapes (only the fields we read)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetItemsResponse {
    items_result: Option<ItemsResult>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchItemsResponse {
    search_result: Option<ItemsResult>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsResult {
    #[serde(default)]
    items: Vec<PaapiItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PaapiItem {
    #[serde(rename = "ASIN")]
    asin: String,
    item_info: Option<ItemInfo>,
    images: Option<Images>,
    offers: Option<Offers>,
    browse_node_info: Option<BrowseNodeInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemInfo {
    title: Option<DisplayValue>,
    by_line_info: Option<ByLineInfo>,
    classifications: Option<Classifications>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DisplayValue {
    display_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ByLineInfo {
    brand: Option<DisplayValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Classifications {
    binding: Option<DisplayValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Images {
    primary: Option<ImageSet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageSet {
    large: Option<ImageRef>,
}

#[derive(Debug, Deserialize)]
struct ImageRef {
    #[serde(rename = "URL")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Offers {
    #[serde(default)]
    listings: Vec<Listing>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Listing {
    price: Option<OfferPrice>,
    saving_basis: Option<Amount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OfferPrice {
    amount: Option<Decimal>,
    savings: Option<Savings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Savings {
    percentage: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Amount {
    amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrowseNodeInfo {
    website_sales_rank: Option<WebsiteSalesRank>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WebsiteSalesRank {
    sales_rank: Option<i64>,
}

fn display(value: Option<DisplayValue>) -> Option<String> {
    non_empty(value.and_then(|v| v.display_value))
}

fn parse_item(item: PaapiItem) -> RawCatalogItem {
    let info = item.item_info;
    let (title, brand, category) = match info {
        Some(info) => (
            display(info.title),
            display(info.by_line_info.and_then(|b| b.brand)),
            display(info.classifications.and_then(|c| c.binding)),
        ),
        None => (None, None, None),
    };

    let image_url = non_empty(
        item.images
            .and_then(|i| i.primary)
            .and_then(|p| p.large)
            .and_then(|l| l.url),
    );

    let listing = item.offers.and_then(|o| o.listings.into_iter().next());
    let (current_price, savings_percent, list_price) = match listing {
        Some(listing) => {
            let (amount, savings) = match listing.price {
                Some(p) => (p.amount, p.savings.and_then(|s| s.percentage)),
                None => (None, None),
            };
            (amount, savings, listing.saving_basis.and_then(|b| b.amount))
        }
        None => (None, None, None),
    };

    RawCatalogItem {
        identifier: item.asin,
        title,
        brand,
        category,
        image_url,
        current_price,
        list_price,
        // The featured offer is the buy box
        buy_box_price: current_price,
        savings_percent,
        sales_rank: item
            .browse_node_info
            .and_then(|b| b.website_sales_rank)
            .and_then(|r| r.sales_rank),
    }
}

//! Application configuration
//!
//! Loaded from an optional TOML file, then overridden by environment variables
//! (a `.env` file is honoured by the binary through `dotenvy`). Every field has
//! a default, so an empty file or no file at all is a valid configuration.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Catalog provider (Amazon Product Advertising API 5.0) settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub access_key: String,
    pub secret_key: String,
    pub partner_tag: String,
    /// e.g. "www.amazon.com", "www.amazon.co.uk"
    pub marketplace: String,
    pub requests_per_period: f64,
    pub period_secs: f64,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            partner_tag: String::new(),
            marketplace: "www.amazon.com".to_string(),
            requests_per_period: 1.0,
            period_secs: 1.0,
            batch_size: 10,
            timeout_secs: 30,
        }
    }
}

impl CatalogConfig {
    pub fn is_configured(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty() && !self.partner_tag.is_empty()
    }
}

/// History provider (Keepa) settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub api_key: String,
    /// Keepa domain id (1 = .com)
    pub domain: u8,
    pub requests_per_period: f64,
    pub period_secs: f64,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            domain: 1,
            requests_per_period: 60.0,
            period_secs: 60.0,
            batch_size: 100,
            timeout_secs: 30,
        }
    }
}

impl HistoryConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Deal detection thresholds and the fee model
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub check_interval_minutes: u64,
    pub price_drop_threshold_percent: Decimal,
    pub clearance_keywords: Vec<String>,
    pub min_savings_percent: Decimal,
    pub target_roi_percent: Decimal,
    pub fulfillment_fee_percent: Decimal,
    pub referral_fee_percent: Decimal,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval_minutes: 60,
            price_drop_threshold_percent: dec!(10.0),
            clearance_keywords: ["clearance", "closeout", "liquidation", "discontinued"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_savings_percent: dec!(20.0),
            target_roi_percent: dec!(30.0),
            fulfillment_fee_percent: dec!(15.0),
            referral_fee_percent: dec!(15.0),
        }
    }
}

/// Longest accepted check interval (one week)
pub const MAX_CHECK_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

impl MonitoringConfig {
    pub fn check_interval(&self) -> Duration {
        let minutes = self.check_interval_minutes.clamp(1, MAX_CHECK_INTERVAL_MINUTES);
        Duration::from_secs(minutes * 60)
    }
}

/// Rate budget must be a positive finite number of requests per positive finite period
fn validate_budget(section: &str, requests: f64, period_secs: f64) -> Result<()> {
    if !requests.is_finite() || requests <= 0.0 {
        bail!("{section}.requests_per_period must be a positive number, got {requests}");
    }
    if !period_secs.is_finite() || period_secs <= 0.0 {
        bail!("{section}.period_secs must be a positive number, got {period_secs}");
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/prices.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// An item to track at startup
#[derive(Debug, Clone, Deserialize)]
pub struct WatchlistEntry {
    pub identifier: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub target_buy_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub history: HistoryConfig,
    pub monitoring: MonitoringConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub watchlist: Vec<WatchlistEntry>,
}

impl AppConfig {
    /// Load from `path` if it exists, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            Self::from_toml(&raw).with_context(|| format!("parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings the limiters and the scheduler cannot honour
    pub fn validate(&self) -> Result<()> {
        validate_budget(
            "catalog",
            self.catalog.requests_per_period,
            self.catalog.period_secs,
        )?;
        validate_budget(
            "history",
            self.history.requests_per_period,
            self.history.period_secs,
        )?;

        let minutes = self.monitoring.check_interval_minutes;
        if !(1..=MAX_CHECK_INTERVAL_MINUTES).contains(&minutes) {
            bail!(
                "monitoring.check_interval_minutes must be between 1 and {MAX_CHECK_INTERVAL_MINUTES}, got {minutes}"
            );
        }
        if self.catalog.batch_size == 0 || self.history.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `KEY=value` overrides from any lookup (the environment in production)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut String, key: &str| {
            if let Some(v) = lookup(key) {
                *target = v;
            }
        };
        set(&mut self.catalog.access_key, "CATALOG_ACCESS_KEY");
        set(&mut self.catalog.secret_key, "CATALOG_SECRET_KEY");
        set(&mut self.catalog.partner_tag, "CATALOG_PARTNER_TAG");
        set(&mut self.catalog.marketplace, "CATALOG_MARKETPLACE");
        set(&mut self.history.api_key, "HISTORY_API_KEY");
        set(&mut self.database.path, "PRICE_WATCH_DB_PATH");

        if let Some(domain) = lookup("HISTORY_DOMAIN").and_then(|v| v.parse().ok()) {
            self.history.domain = domain;
        }
        if let Some(minutes) = lookup("CHECK_INTERVAL_MINUTES").and_then(|v| v.parse().ok()) {
            self.monitoring.check_interval_minutes = minutes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.monitoring.check_interval_minutes, 60);
        assert_eq!(config.monitoring.price_drop_threshold_percent, dec!(10));
        assert_eq!(config.monitoring.clearance_keywords.len(), 4);
        assert_eq!(config.catalog.batch_size, 10);
        assert_eq!(config.history.batch_size, 100);
        assert!(!config.catalog.is_configured());
        assert!(!config.history.is_configured());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            [monitoring]
            price_drop_threshold_percent = 12.5
            clearance_keywords = ["clearance"]

            [history]
            api_key = "abc"

            [[watchlist]]
            identifier = "B00X4WHP5E"
            label = "headphones"
            target_buy_price = 49.99
        "#;
        let config = AppConfig::from_toml(raw).unwrap();
        assert_eq!(config.monitoring.price_drop_threshold_percent, dec!(12.5));
        assert_eq!(config.monitoring.clearance_keywords, vec!["clearance"]);
        assert_eq!(config.monitoring.target_roi_percent, dec!(30));
        assert!(config.history.is_configured());
        assert_eq!(config.history.domain, 1);
        assert_eq!(config.watchlist.len(), 1);
        assert_eq!(config.watchlist[0].target_buy_price, Some(dec!(49.99)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CATALOG_ACCESS_KEY", "AK"),
            ("CATALOG_SECRET_KEY", "SK"),
            ("CATALOG_PARTNER_TAG", "tag-20"),
            ("CHECK_INTERVAL_MINUTES", "15"),
            ("HISTORY_DOMAIN", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert!(config.catalog.is_configured());
        assert_eq!(config.monitoring.check_interval(), Duration::from_secs(900));
        assert_eq!(config.history.domain, 1);
    }

    #[test]
    fn test_validate_rejects_unusable_budgets_and_intervals() {
        assert!(AppConfig::default().validate().is_ok());

        let fractional = AppConfig::from_toml("[catalog]\nrequests_per_period = 0.5").unwrap();
        assert!(fractional.validate().is_ok());

        let infinite = AppConfig::from_toml("[history]\nperiod_secs = inf").unwrap();
        let err = infinite.validate().unwrap_err().to_string();
        assert!(err.contains("history.period_secs"), "{err}");

        let zero = AppConfig::from_toml("[catalog]\nrequests_per_period = 0.0").unwrap();
        assert!(zero.validate().is_err());

        let mut huge = AppConfig::default();
        huge.monitoring.check_interval_minutes = u64::MAX;
        assert!(huge.validate().is_err());
        // Still never overflows when used unvalidated
        assert_eq!(
            huge.monitoring.check_interval(),
            Duration::from_secs(MAX_CHECK_INTERVAL_MINUTES * 60)
        );

        let mut zero_interval = AppConfig::default();
        zero_interval.monitoring.check_interval_minutes = 0;
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn test_load_reports_invalid_file() {
        let path = std::env::temp_dir().join(format!("price-watch-invalid-{}.toml", std::process::id()));
        std::fs::write(&path, "[catalog]\nperiod_secs = -1.0\n").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(format!("{err:#}").contains("catalog.period_secs"), "{err:#}");
    }
}

//! Price monitor: fetch, snapshot, classify and reconcile deals per item
//!
//! Provider fetches happen outside any transaction. Each identifier is then
//! reconciled inside its own [`UnitOfWork`]: read the previous snapshot,
//! append the new one, replace the active deal set and record alerts. A failed
//! identifier is rolled back and reported without stopping the batch.
//!
//! Reconciliation is serialized within the process so the scheduler and
//! on-demand checks never interleave their read-then-write sections.

use async_trait::async_trait;
use persistence::repository::{
    items, AlertRecord, AlertRepository, Deal, DealFilter, DealRepository, ItemRepository,
    PriceSnapshot, PriceStats, SnapshotRepository, WatchedItem,
};
use persistence::{now_millis, DbError, SqlitePool, UnitOfWork};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::alerts::AlertDeduplicator;
use crate::api::{CatalogProvider, HistoryProvider};
use crate::detector::DealDetector;
use crate::scheduler::PeriodicJob;
use crate::types::{
    CheckOutcome, HistoricalStats, MergedObservation, ProfitEstimate, RawCatalogItem,
    RawHistoryItem,
};

/// Maximum items included in an export
const EXPORT_LIMIT: i64 = 10_000;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Item with its latest snapshot and active deals
#[derive(Debug, Clone, Serialize)]
pub struct ItemDetail {
    #[serde(flatten)]
    pub item: WatchedItem,
    pub latest: Option<PriceSnapshot>,
    pub active_deals: Vec<Deal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceHistory {
    pub identifier: String,
    pub snapshots: Vec<PriceSnapshot>,
    pub stats: Option<PriceStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub catalog_configured: bool,
    pub history_configured: bool,
    pub active_items: i64,
    pub active_deals: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportDocument {
    pub exported_at: String,
    pub total_items: usize,
    pub items: Vec<ItemDetail>,
}

const CSV_HEADER: [&str; 17] = [
    "identifier",
    "title",
    "brand",
    "category",
    "label",
    "current_price",
    "list_price",
    "buy_box_price",
    "savings_percent",
    "sales_rank",
    "avg_30d",
    "avg_90d",
    "avg_180d",
    "all_time_low",
    "all_time_high",
    "checked_at",
    "active_deals",
];

impl ExportDocument {
    /// One row per item: latest snapshot fields plus a `kind(drop%)` deal summary
    pub fn to_csv(&self) -> anyhow::Result<String> {
        fn cell<T: ToString>(value: Option<T>) -> String {
            value.map(|v| v.to_string()).unwrap_or_default()
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(CSV_HEADER)?;

        for detail in &self.items {
            let item = &detail.item;
            let latest = detail.latest.as_ref();
            let deals = detail
                .active_deals
                .iter()
                .map(|d| match d.drop_percent {
                    Some(drop) => format!("{}({}%)", d.kind, drop),
                    None => d.kind.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; ");
            let checked_at = latest
                .and_then(|s| chrono::DateTime::from_timestamp_millis(s.checked_at))
                .map(|t| t.to_rfc3339());

            writer.write_record([
                item.identifier.clone(),
                item.title.clone(),
                item.brand.clone(),
                item.category.clone(),
                item.label.clone(),
                cell(latest.and_then(|s| s.current_price)),
                cell(latest.and_then(|s| s.list_price)),
                cell(latest.and_then(|s| s.buy_box_price)),
                cell(latest.and_then(|s| s.savings_percent)),
                cell(latest.and_then(|s| s.sales_rank)),
                cell(latest.and_then(|s| s.avg_30d)),
                cell(latest.and_then(|s| s.avg_90d)),
                cell(latest.and_then(|s| s.avg_180d)),
                cell(latest.and_then(|s| s.all_time_low)),
                cell(latest.and_then(|s| s.all_time_high)),
                cell(checked_at),
                deals,
            ])?;
        }

        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Trim and upper-case a catalog identifier
pub fn normalize_identifier(raw: &str) -> MonitorResult<String> {
    let id = raw.trim().to_uppercase();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(MonitorError::InvalidIdentifier(raw.to_string()));
    }
    Ok(id)
}

pub struct PriceMonitor {
    pool: SqlitePool,
    catalog: Arc<dyn CatalogProvider>,
    history: Arc<dyn HistoryProvider>,
    detector: DealDetector,
    reconcile_gate: Mutex<()>,
}

impl PriceMonitor {
    pub fn new(
        pool: SqlitePool,
        catalog: Arc<dyn CatalogProvider>,
        history: Arc<dyn HistoryProvider>,
        detector: DealDetector,
    ) -> Self {
        Self {
            pool,
            catalog,
            history,
            detector,
            reconcile_gate: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Detection pipeline
    // -----------------------------------------------------------------------

    /// Check a batch of identifiers. Returns one outcome per identifier, in input order.
    pub async fn check(&self, identifiers: &[String]) -> Vec<CheckOutcome> {
        if identifiers.is_empty() {
            return Vec::new();
        }

        let catalog: HashMap<String, RawCatalogItem> = self
            .catalog
            .fetch_batch(identifiers)
            .await
            .into_iter()
            .map(|item| (item.identifier.clone(), item))
            .collect();
        let history: HashMap<String, RawHistoryItem> = self
            .history
            .fetch_batch(identifiers)
            .await
            .into_iter()
            .map(|item| (item.identifier.clone(), item))
            .collect();
        debug!(
            requested = identifiers.len(),
            catalog = catalog.len(),
            history = history.len(),
            "Provider fetch complete"
        );

        let mut outcomes = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            let outcome = match self
                .check_one(identifier, catalog.get(identifier), history.get(identifier))
                .await
            {
                Ok((price, deals_found)) => CheckOutcome {
                    identifier: identifier.clone(),
                    price,
                    deals_found,
                    error: None,
                },
                Err(e) => {
                    warn!(identifier = %identifier, "Check failed, rolled back: {e}");
                    CheckOutcome {
                        identifier: identifier.clone(),
                        price: None,
                        deals_found: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Check every active item. No-op when nothing is tracked.
    pub async fn check_all(&self) -> MonitorResult<Vec<CheckOutcome>> {
        let identifiers: Vec<String> = ItemRepository::new(&self.pool)
            .get_all_active()
            .await?
            .into_iter()
            .map(|item| item.identifier)
            .collect();

        if identifiers.is_empty() {
            debug!("No active items to check");
            return Ok(Vec::new());
        }

        info!(items = identifiers.len(), "Checking all active items");
        let outcomes = self.check(&identifiers).await;
        let deals: usize = outcomes.iter().map(|o| o.deals_found).sum();
        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        info!(items = outcomes.len(), deals, failed, "Check complete");

        Ok(outcomes)
    }

    /// One identifier in one transaction
    async fn check_one(
        &self,
        identifier: &str,
        catalog: Option<&RawCatalogItem>,
        history: Option<&RawHistoryItem>,
    ) -> Result<(Option<Decimal>, usize), DbError> {
        let _gate = self.reconcile_gate.lock().await;
        let mut uow = UnitOfWork::begin(&self.pool).await?;

        match self.reconcile(&mut uow, identifier, catalog, history).await {
            Ok(result) => {
                uow.commit().await?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback) = uow.rollback().await {
                    warn!(identifier, "Rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    async fn reconcile(
        &self,
        uow: &mut UnitOfWork,
        identifier: &str,
        catalog: Option<&RawCatalogItem>,
        history: Option<&RawHistoryItem>,
    ) -> Result<(Option<Decimal>, usize), DbError> {
        if let Some(item) = catalog {
            uow.upsert_item_metadata(identifier, &item.metadata()).await?;
        }

        let Some(observation) = MergedObservation::merge(identifier, catalog, history) else {
            debug!(identifier, "No provider data");
            return Ok((None, 0));
        };

        // Must be read before the new snapshot is written
        let previous = uow.latest_snapshot(identifier).await?;

        let price = observation.current_price;
        if price.is_some() {
            uow.insert_snapshot(&observation.to_snapshot(now_millis())).await?;
        }

        let target = uow.target_buy_price(identifier).await?;
        let historical = history.map(HistoricalStats::from);
        let signals = self.detector.classify(
            &observation,
            previous.and_then(|s| s.current_price),
            historical.as_ref(),
            target,
        );

        // Without an observed price the current deal set stays as it is
        if price.is_none() {
            return Ok((None, 0));
        }

        let cleared = uow.deactivate_deals(identifier).await?;
        for signal in &signals {
            let deal = uow.insert_deal(&signal.to_new_deal(identifier)).await?;
            AlertDeduplicator::process_deal(uow, identifier, &deal).await?;
        }

        debug!(
            identifier,
            price = ?price,
            cleared,
            deals = signals.len(),
            "Reconciled"
        );
        Ok((price, signals.len()))
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Start tracking an item and run an initial check
    pub async fn add_item(
        &self,
        identifier: &str,
        label: Option<&str>,
        target_buy_price: Option<Decimal>,
    ) -> MonitorResult<(WatchedItem, CheckOutcome)> {
        let identifier = normalize_identifier(identifier)?;
        items::track(&self.pool, &identifier, label, target_buy_price, "manual").await?;
        info!(identifier = %identifier, "Tracking item");

        let outcome = self
            .check(std::slice::from_ref(&identifier))
            .await
            .pop()
            .unwrap_or(CheckOutcome {
                identifier: identifier.clone(),
                price: None,
                deals_found: 0,
                error: None,
            });

        let item = ItemRepository::new(&self.pool)
            .get(&identifier)
            .await?
            .ok_or_else(|| MonitorError::NotFound(format!("Item {identifier}")))?;
        Ok((item, outcome))
    }

    /// Track config-seeded items without checking them
    pub async fn seed(
        &self,
        identifier: &str,
        label: Option<&str>,
        target_buy_price: Option<Decimal>,
    ) -> MonitorResult<WatchedItem> {
        let identifier = normalize_identifier(identifier)?;
        Ok(items::track(&self.pool, &identifier, label, target_buy_price, "watchlist").await?)
    }

    /// Stop tracking (soft delete)
    pub async fn remove_item(&self, identifier: &str) -> MonitorResult<()> {
        let identifier = normalize_identifier(identifier)?;
        if !ItemRepository::new(&self.pool).deactivate(&identifier).await? {
            return Err(MonitorError::NotFound(format!("Item {identifier}")));
        }
        info!(identifier = %identifier, "Stopped tracking item");
        Ok(())
    }

    pub async fn list_items(&self, offset: i64, limit: i64) -> MonitorResult<Vec<WatchedItem>> {
        Ok(ItemRepository::new(&self.pool).list(offset, limit).await?)
    }

    pub async fn get_item(&self, identifier: &str) -> MonitorResult<ItemDetail> {
        let identifier = normalize_identifier(identifier)?;
        let item = ItemRepository::new(&self.pool)
            .get(&identifier)
            .await?
            .ok_or_else(|| MonitorError::NotFound(format!("Item {identifier}")))?;
        self.detail(item).await
    }

    async fn detail(&self, item: WatchedItem) -> MonitorResult<ItemDetail> {
        let latest = SnapshotRepository::new(&self.pool).latest(&item.identifier).await?;
        let active_deals = DealRepository::new(&self.pool)
            .active_for(&item.identifier)
            .await?;
        Ok(ItemDetail {
            item,
            latest,
            active_deals,
        })
    }

    // -----------------------------------------------------------------------
    // Deals, history, alerts
    // -----------------------------------------------------------------------

    pub async fn list_deals(&self, filter: &DealFilter) -> MonitorResult<Vec<Deal>> {
        Ok(DealRepository::new(&self.pool).get_active(filter).await?)
    }

    pub async fn dismiss_deal(&self, id: i64) -> MonitorResult<()> {
        let _gate = self.reconcile_gate.lock().await;
        if !DealRepository::new(&self.pool).dismiss(id).await? {
            return Err(MonitorError::NotFound(format!("Deal {id}")));
        }
        info!(deal_id = id, "Deal dismissed");
        Ok(())
    }

    pub async fn price_history(&self, identifier: &str, limit: i64) -> MonitorResult<PriceHistory> {
        let identifier = normalize_identifier(identifier)?;
        if ItemRepository::new(&self.pool).get(&identifier).await?.is_none() {
            return Err(MonitorError::NotFound(format!("Item {identifier}")));
        }
        let snapshots = SnapshotRepository::new(&self.pool)
            .history(&identifier, limit)
            .await?;
        let stats = PriceStats::from_snapshots(&snapshots);
        Ok(PriceHistory {
            identifier,
            snapshots,
            stats,
        })
    }

    pub async fn alerts_for(&self, identifier: &str, limit: i64) -> MonitorResult<Vec<AlertRecord>> {
        let identifier = normalize_identifier(identifier)?;
        Ok(AlertRepository::new(&self.pool)
            .get_for_identifier(&identifier, limit)
            .await?)
    }

    // -----------------------------------------------------------------------
    // Passthroughs and reporting
    // -----------------------------------------------------------------------

    pub async fn search(&self, keywords: &str, max_results: usize) -> Vec<RawCatalogItem> {
        self.catalog.search(keywords, max_results).await
    }

    pub fn estimate(&self, sale_price: Decimal, cost: Decimal) -> ProfitEstimate {
        self.detector.estimate(sale_price, cost)
    }

    pub async fn health(&self) -> MonitorResult<HealthReport> {
        Ok(HealthReport {
            catalog_configured: self.catalog.is_configured(),
            history_configured: self.history.is_configured(),
            active_items: ItemRepository::new(&self.pool).count_active().await?,
            active_deals: DealRepository::new(&self.pool).count_active().await?,
        })
    }

    pub async fn export(&self) -> MonitorResult<ExportDocument> {
        let all = ItemRepository::new(&self.pool).list(0, EXPORT_LIMIT).await?;
        let mut items = Vec::with_capacity(all.len());
        for item in all {
            items.push(self.detail(item).await?);
        }

        Ok(ExportDocument {
            exported_at: chrono::Utc::now().to_rfc3339(),
            total_items: items.len(),
            items,
        })
    }
}

#[async_trait]
impl PeriodicJob for PriceMonitor {
    fn name(&self) -> &str {
        "price-check"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.check_all().await?;
        Ok(())
    }
}

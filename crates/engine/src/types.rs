//! Typed records passed between the fetch, merge and detect stages

use persistence::repository::{DealKind, ItemMetadata, NewDeal, NewSnapshot, Provenance};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One item as returned by the catalog provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCatalogItem {
    pub identifier: String,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub current_price: Option<Decimal>,
    pub list_price: Option<Decimal>,
    pub buy_box_price: Option<Decimal>,
    pub savings_percent: Option<Decimal>,
    pub sales_rank: Option<i64>,
}

impl RawCatalogItem {
    pub fn metadata(&self) -> ItemMetadata {
        ItemMetadata {
            title: self.title.clone(),
            brand: self.brand.clone(),
            category: self.category.clone(),
            image_url: self.image_url.clone(),
        }
    }
}

/// One item as returned by the history provider, already in major currency units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawHistoryItem {
    pub identifier: String,
    pub title: Option<String>,
    pub avg_30d: Option<Decimal>,
    pub avg_90d: Option<Decimal>,
    pub avg_180d: Option<Decimal>,
    pub all_time_low: Option<Decimal>,
    pub all_time_high: Option<Decimal>,
}

/// Historical statistics fed to the detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalStats {
    /// Short window (30 days)
    pub avg_short: Option<Decimal>,
    /// Medium window (90 days)
    pub avg_medium: Option<Decimal>,
    /// Long window (180 days)
    pub avg_long: Option<Decimal>,
    pub all_time_low: Option<Decimal>,
}

impl From<&RawHistoryItem> for HistoricalStats {
    fn from(item: &RawHistoryItem) -> Self {
        Self {
            avg_short: item.avg_30d,
            avg_medium: item.avg_90d,
            avg_long: item.avg_180d,
            all_time_low: item.all_time_low,
        }
    }
}

/// Catalog and history data merged for one identifier in one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedObservation {
    pub identifier: String,
    pub title: Option<String>,
    pub current_price: Option<Decimal>,
    pub list_price: Option<Decimal>,
    pub buy_box_price: Option<Decimal>,
    pub savings_percent: Option<Decimal>,
    pub sales_rank: Option<i64>,
    pub avg_30d: Option<Decimal>,
    pub avg_90d: Option<Decimal>,
    pub avg_180d: Option<Decimal>,
    pub all_time_low: Option<Decimal>,
    pub all_time_high: Option<Decimal>,
    pub provenance: Provenance,
}

impl MergedObservation {
    /// Merge provider results. Returns None when neither provider knows the identifier.
    pub fn merge(
        identifier: &str,
        catalog: Option<&RawCatalogItem>,
        history: Option<&RawHistoryItem>,
    ) -> Option<Self> {
        let provenance = match (catalog.is_some(), history.is_some()) {
            (true, true) => Provenance::Both,
            (true, false) => Provenance::Catalog,
            (false, true) => Provenance::History,
            (false, false) => return None,
        };

        Some(Self {
            identifier: identifier.to_string(),
            title: catalog
                .and_then(|c| c.title.clone())
                .or_else(|| history.and_then(|h| h.title.clone())),
            current_price: catalog.and_then(|c| c.current_price),
            list_price: catalog.and_then(|c| c.list_price),
            buy_box_price: catalog.and_then(|c| c.buy_box_price),
            savings_percent: catalog.and_then(|c| c.savings_percent),
            sales_rank: catalog.and_then(|c| c.sales_rank),
            avg_30d: history.and_then(|h| h.avg_30d),
            avg_90d: history.and_then(|h| h.avg_90d),
            avg_180d: history.and_then(|h| h.avg_180d),
            all_time_low: history.and_then(|h| h.all_time_low),
            all_time_high: history.and_then(|h| h.all_time_high),
            provenance,
        })
    }

    pub fn to_snapshot(&self, checked_at: i64) -> NewSnapshot {
        NewSnapshot {
            identifier: self.identifier.clone(),
            checked_at,
            current_price: self.current_price,
            list_price: self.list_price,
            buy_box_price: self.buy_box_price,
            savings_percent: self.savings_percent,
            sales_rank: self.sales_rank,
            avg_30d: self.avg_30d,
            avg_90d: self.avg_90d,
            avg_180d: self.avg_180d,
            all_time_low: self.all_time_low,
            all_time_high: self.all_time_high,
            provenance: self.provenance,
        }
    }
}

/// Detector output for one rule, before it is persisted as a deal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealSignal {
    pub kind: DealKind,
    pub trigger_price: Decimal,
    pub reference_price: Decimal,
    pub drop_percent: Option<Decimal>,
    pub estimated_profit: Option<Decimal>,
    pub estimated_roi: Option<Decimal>,
}

impl DealSignal {
    pub fn to_new_deal(&self, identifier: &str) -> NewDeal {
        NewDeal {
            identifier: identifier.to_string(),
            kind: self.kind,
            trigger_price: Some(self.trigger_price),
            reference_price: Some(self.reference_price),
            drop_percent: self.drop_percent,
            estimated_profit: self.estimated_profit,
            estimated_roi: self.estimated_roi,
        }
    }
}

/// Resale profit breakdown under the fee model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitEstimate {
    pub sale_price: Decimal,
    pub cost: Decimal,
    pub referral_fee: Decimal,
    pub fulfillment_fee: Decimal,
    pub total_fees: Decimal,
    pub profit: Decimal,
    pub roi: Decimal,
    pub margin: Decimal,
}

/// Per-identifier result of a check pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub identifier: String,
    pub price: Option<Decimal>,
    pub deals_found: usize,
    /// Set when the identifier's transaction failed and was rolled back
    pub error: Option<String>,
}

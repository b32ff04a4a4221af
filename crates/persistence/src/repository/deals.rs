//! Deals repository: classified buying opportunities and their lifecycle

use crate::{decimal_column, decimal_text, now_millis, DbResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteExecutor, SqliteRow};
use sqlx::{FromRow, Row, SqlitePool};
use std::fmt;
use std::str::FromStr;

/// The five deal rule categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealKind {
    PriceDrop,
    Clearance,
    BelowAverage,
    AllTimeLow,
    MarginOpportunity,
}

impl DealKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceDrop => "price_drop",
            Self::Clearance => "clearance",
            Self::BelowAverage => "below_average",
            Self::AllTimeLow => "all_time_low",
            Self::MarginOpportunity => "margin_opportunity",
        }
    }

    pub fn all() -> &'static [DealKind] {
        &[
            Self::PriceDrop,
            Self::Clearance,
            Self::BelowAverage,
            Self::AllTimeLow,
            Self::MarginOpportunity,
        ]
    }
}

impl fmt::Display for DealKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown deal kind '{s}'"))
    }
}

/// A persisted deal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: i64,
    pub identifier: String,
    pub kind: DealKind,
    pub trigger_price: Option<Decimal>,
    pub reference_price: Option<Decimal>,
    pub drop_percent: Option<Decimal>,
    pub estimated_profit: Option<Decimal>,
    pub estimated_roi: Option<Decimal>,
    pub is_active: bool,
    pub detected_at: i64,
    pub dismissed_at: Option<i64>,
}

impl<'r> FromRow<'r, SqliteRow> for Deal {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Self {
            id: row.try_get("id")?,
            identifier: row.try_get("identifier")?,
            kind: kind.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "kind".into(),
                source: e.into(),
            })?,
            trigger_price: decimal_column(row, "trigger_price")?,
            reference_price: decimal_column(row, "reference_price")?,
            drop_percent: decimal_column(row, "drop_percent")?,
            estimated_profit: decimal_column(row, "estimated_profit")?,
            estimated_roi: decimal_column(row, "estimated_roi")?,
            is_active: row.try_get("is_active")?,
            detected_at: row.try_get("detected_at")?,
            dismissed_at: row.try_get("dismissed_at")?,
        })
    }
}

/// A deal about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeal {
    pub identifier: String,
    pub kind: DealKind,
    pub trigger_price: Option<Decimal>,
    pub reference_price: Option<Decimal>,
    pub drop_percent: Option<Decimal>,
    pub estimated_profit: Option<Decimal>,
    pub estimated_roi: Option<Decimal>,
}

/// Filters for listing active deals
#[derive(Debug, Clone, Default)]
pub struct DealFilter {
    pub kind: Option<DealKind>,
    pub min_roi: Option<Decimal>,
    pub offset: i64,
    pub limit: i64,
}

const DEAL_COLUMNS: &str = r#"
    id, identifier, kind, trigger_price, reference_price, drop_percent,
    estimated_profit, estimated_roi, is_active, detected_at, dismissed_at
"#;

/// Insert an active deal and return the stored row
pub async fn insert<'e>(exec: impl SqliteExecutor<'e>, deal: &NewDeal) -> DbResult<Deal> {
    let sql = format!(
        r#"INSERT INTO deals
            (identifier, kind, trigger_price, reference_price, drop_percent,
             estimated_profit, estimated_roi, is_active, detected_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)
           RETURNING {DEAL_COLUMNS}"#
    );
    let stored = sqlx::query_as::<_, Deal>(&sql)
        .bind(&deal.identifier)
        .bind(deal.kind.as_str())
        .bind(decimal_text(deal.trigger_price))
        .bind(decimal_text(deal.reference_price))
        .bind(decimal_text(deal.drop_percent))
        .bind(decimal_text(deal.estimated_profit))
        .bind(decimal_text(deal.estimated_roi))
        .bind(now_millis())
        .fetch_one(exec)
        .await?;

    Ok(stored)
}

/// Deactivate every active deal of an identifier. Returns the number of deals touched.
pub async fn deactivate_for_identifier<'e>(
    exec: impl SqliteExecutor<'e>,
    identifier: &str,
) -> DbResult<u64> {
    let result = sqlx::query("UPDATE deals SET is_active = 0 WHERE identifier = ?1 AND is_active = 1")
        .bind(identifier)
        .execute(exec)
        .await?;

    Ok(result.rows_affected())
}

/// Repository for deals
pub struct DealRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DealRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<Deal>> {
        let sql = format!("SELECT {DEAL_COLUMNS} FROM deals WHERE id = ?1");
        let deal = sqlx::query_as::<_, Deal>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(deal)
    }

    /// Active deals, newest first, with optional kind / minimum ROI filters
    pub async fn get_active(&self, filter: &DealFilter) -> DbResult<Vec<Deal>> {
        let sql = format!(
            r#"SELECT {DEAL_COLUMNS} FROM deals
               WHERE is_active = 1
                 AND (?1 IS NULL OR kind = ?1)
                 AND (?2 IS NULL OR CAST(estimated_roi AS REAL) >= CAST(?2 AS REAL))
               ORDER BY detected_at DESC, id DESC
               LIMIT ?3 OFFSET ?4"#
        );
        let deals = sqlx::query_as::<_, Deal>(&sql)
            .bind(filter.kind.map(|k| k.as_str()))
            .bind(decimal_text(filter.min_roi))
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(self.pool)
            .await?;

        Ok(deals)
    }

    /// Active deals of one identifier
    pub async fn active_for(&self, identifier: &str) -> DbResult<Vec<Deal>> {
        let sql = format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE identifier = ?1 AND is_active = 1 ORDER BY id"
        );
        let deals = sqlx::query_as::<_, Deal>(&sql)
            .bind(identifier)
            .fetch_all(self.pool)
            .await?;

        Ok(deals)
    }

    /// User dismissal. Returns false if the deal does not exist.
    pub async fn dismiss(&self, id: i64) -> DbResult<bool> {
        let result =
            sqlx::query("UPDATE deals SET is_active = 0, dismissed_at = ?2 WHERE id = ?1")
                .bind(id)
                .bind(now_millis())
                .execute(self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_active(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM deals WHERE is_active = 1")
            .fetch_one(self.pool)
            .await?;

        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::items::ItemRepository;
    use crate::Database;
    use rust_decimal_macros::dec;

    fn new_deal(identifier: &str, kind: DealKind, roi: Option<Decimal>) -> NewDeal {
        NewDeal {
            identifier: identifier.to_string(),
            kind,
            trigger_price: Some(dec!(40.00)),
            reference_price: Some(dec!(50.00)),
            drop_percent: Some(dec!(20.0)),
            estimated_profit: roi.map(|_| dec!(12.50)),
            estimated_roi: roi,
        }
    }

    #[tokio::test]
    async fn test_insert_deactivate_and_dismiss() {
        let db = Database::in_memory().await.unwrap();
        ItemRepository::new(db.pool()).track("B0DEAL", None, None).await.unwrap();
        let repo = DealRepository::new(db.pool());

        let a = insert(db.pool(), &new_deal("B0DEAL", DealKind::PriceDrop, None)).await.unwrap();
        let b = insert(db.pool(), &new_deal("B0DEAL", DealKind::AllTimeLow, None)).await.unwrap();
        assert!(a.is_active && b.is_active);
        assert_eq!(a.kind, DealKind::PriceDrop);
        assert_eq!(a.drop_percent, Some(dec!(20.0)));
        assert_eq!(repo.active_for("B0DEAL").await.unwrap().len(), 2);

        assert_eq!(deactivate_for_identifier(db.pool(), "B0DEAL").await.unwrap(), 2);
        assert!(repo.active_for("B0DEAL").await.unwrap().is_empty());
        // Reconciliation is not a user dismissal
        assert_eq!(repo.get(a.id).await.unwrap().unwrap().dismissed_at, None);

        let c = insert(db.pool(), &new_deal("B0DEAL", DealKind::Clearance, None)).await.unwrap();
        assert!(repo.dismiss(c.id).await.unwrap());
        let dismissed = repo.get(c.id).await.unwrap().unwrap();
        assert!(!dismissed.is_active);
        assert!(dismissed.dismissed_at.is_some());

        assert!(!repo.dismiss(9_999).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_active_filters() {
        let db = Database::in_memory().await.unwrap();
        ItemRepository::new(db.pool()).track("B0FILT", None, None).await.unwrap();
        let repo = DealRepository::new(db.pool());

        insert(db.pool(), &new_deal("B0FILT", DealKind::PriceDrop, None)).await.unwrap();
        insert(db.pool(), &new_deal("B0FILT", DealKind::MarginOpportunity, Some(dec!(45.5)))).await.unwrap();
        insert(db.pool(), &new_deal("B0FILT", DealKind::MarginOpportunity, Some(dec!(25.0)))).await.unwrap();

        let all = repo
            .get_active(&DealFilter { limit: 100, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        // Newest first
        assert!(all[0].id > all[2].id);

        let margin = repo
            .get_active(&DealFilter {
                kind: Some(DealKind::MarginOpportunity),
                limit: 100,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(margin.len(), 2);

        let high_roi = repo
            .get_active(&DealFilter {
                min_roi: Some(dec!(30)),
                limit: 100,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(high_roi.len(), 1);
        assert_eq!(high_roi[0].estimated_roi, Some(dec!(45.5)));
    }

    #[test]
    fn test_deal_kind_parse() {
        for kind in DealKind::all() {
            assert_eq!(kind.as_str().parse::<DealKind>().unwrap(), *kind);
        }
        assert!("keepa_deal".parse::<DealKind>().is_err());
    }
}

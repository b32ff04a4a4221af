//! Price snapshots repository: append-only price history per identifier

use crate::{decimal_column, decimal_text, DbResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteExecutor, SqliteRow};
use sqlx::{FromRow, Row, SqlitePool};
use std::fmt;
use std::str::FromStr;

/// Which provider(s) contributed to a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Both,
    Catalog,
    History,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Both => "both",
            Self::Catalog => "catalog",
            Self::History => "history",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "both" => Ok(Self::Both),
            "catalog" => Ok(Self::Catalog),
            "history" => Ok(Self::History),
            other => Err(format!("unknown provenance '{other}'")),
        }
    }
}

/// A stored price observation. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub id: i64,
    pub identifier: String,
    pub checked_at: i64,
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

impl<'r> FromRow<'r, SqliteRow> for PriceSnapshot {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let provenance: String = row.try_get("provenance")?;
        Ok(Self {
            id: row.try_get("id")?,
            identifier: row.try_get("identifier")?,
            checked_at: row.try_get("checked_at")?,
            current_price: decimal_column(row, "current_price")?,
            list_price: decimal_column(row, "list_price")?,
            buy_box_price: decimal_column(row, "buy_box_price")?,
            savings_percent: decimal_column(row, "savings_percent")?,
            sales_rank: row.try_get("sales_rank")?,
            avg_30d: decimal_column(row, "avg_30d")?,
            avg_90d: decimal_column(row, "avg_90d")?,
            avg_180d: decimal_column(row, "avg_180d")?,
            all_time_low: decimal_column(row, "all_time_low")?,
            all_time_high: decimal_column(row, "all_time_high")?,
            provenance: provenance.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "provenance".into(),
                source: e.into(),
            })?,
        })
    }
}

/// A snapshot about to be written
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub identifier: String,
    pub checked_at: i64,
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

/// Aggregates over the non-null prices of a history window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub avg_price: Decimal,
    pub record_count: usize,
}

impl PriceStats {
    /// Returns None when no snapshot carries a price
    pub fn from_snapshots(snapshots: &[PriceSnapshot]) -> Option<Self> {
        let prices: Vec<Decimal> = snapshots.iter().filter_map(|s| s.current_price).collect();
        let min_price = prices.iter().min().copied()?;
        let max_price = prices.iter().max().copied()?;
        let sum: Decimal = prices.iter().sum();
        let avg_price = (sum / Decimal::from(prices.len()))
            .round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero);

        Some(Self {
            min_price,
            max_price,
            avg_price,
            record_count: prices.len(),
        })
    }
}

const SELECT_SNAPSHOT: &str = r#"
    SELECT id, identifier, checked_at, current_price, list_price, buy_box_price,
           savings_percent, sales_rank, avg_30d, avg_90d, avg_180d,
           all_time_low, all_time_high, provenance
    FROM price_snapshots
"#;

/// Append a snapshot, returning its row id
pub async fn insert<'e>(exec: impl SqliteExecutor<'e>, snapshot: &NewSnapshot) -> DbResult<i64> {
    let result = sqlx::query(
        r#"INSERT INTO price_snapshots
            (identifier, checked_at, current_price, list_price, buy_box_price,
             savings_percent, sales_rank, avg_30d, avg_90d, avg_180d,
             all_time_low, all_time_high, provenance)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&snapshot.identifier)
    .bind(snapshot.checked_at)
    .bind(decimal_text(snapshot.current_price))
    .bind(decimal_text(snapshot.list_price))
    .bind(decimal_text(snapshot.buy_box_price))
    .bind(decimal_text(snapshot.savings_percent))
    .bind(snapshot.sales_rank)
    .bind(decimal_text(snapshot.avg_30d))
    .bind(decimal_text(snapshot.avg_90d))
    .bind(decimal_text(snapshot.avg_180d))
    .bind(decimal_text(snapshot.all_time_low))
    .bind(decimal_text(snapshot.all_time_high))
    .bind(snapshot.provenance.as_str())
    .execute(exec)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Most recent snapshot (max checked_at, later insert wins a tie)
pub async fn latest<'e>(
    exec: impl SqliteExecutor<'e>,
    identifier: &str,
) -> DbResult<Option<PriceSnapshot>> {
    let sql = format!("{SELECT_SNAPSHOT} WHERE identifier = ?1 ORDER BY checked_at DESC, id DESC LIMIT 1");
    let snapshot = sqlx::query_as::<_, PriceSnapshot>(&sql)
        .bind(identifier)
        .fetch_optional(exec)
        .await?;

    Ok(snapshot)
}

/// Repository for price snapshots
pub struct SnapshotRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SnapshotRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, snapshot: &NewSnapshot) -> DbResult<i64> {
        insert(self.pool, snapshot).await
    }

    pub async fn latest(&self, identifier: &str) -> DbResult<Option<PriceSnapshot>> {
        latest(self.pool, identifier).await
    }

    /// Newest-first history for an identifier
    pub async fn history(&self, identifier: &str, limit: i64) -> DbResult<Vec<PriceSnapshot>> {
        let sql = format!(
            "{SELECT_SNAPSHOT} WHERE identifier = ?1 ORDER BY checked_at DESC, id DESC LIMIT ?2"
        );
        let snapshots = sqlx::query_as::<_, PriceSnapshot>(&sql)
            .bind(identifier)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;

        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::items::ItemRepository;
    use crate::Database;
    use rust_decimal_macros::dec;

    fn snapshot(identifier: &str, checked_at: i64, price: Option<Decimal>) -> NewSnapshot {
        NewSnapshot {
            identifier: identifier.to_string(),
            checked_at,
            current_price: price,
            list_price: Some(dec!(99.99)),
            buy_box_price: price,
            savings_percent: None,
            sales_rank: Some(1200),
            avg_30d: None,
            avg_90d: Some(dec!(80.00)),
            avg_180d: None,
            all_time_low: Some(dec!(45.10)),
            all_time_high: None,
            provenance: Provenance::Both,
        }
    }

    #[tokio::test]
    async fn test_latest_is_max_timestamp_then_last_insert() {
        let db = Database::in_memory().await.unwrap();
        ItemRepository::new(db.pool()).track("B0SNAP", None, None).await.unwrap();
        let repo = SnapshotRepository::new(db.pool());

        assert!(repo.latest("B0SNAP").await.unwrap().is_none());

        repo.insert(&snapshot("B0SNAP", 2_000, Some(dec!(60.00)))).await.unwrap();
        repo.insert(&snapshot("B0SNAP", 1_000, Some(dec!(70.00)))).await.unwrap();
        let latest = repo.latest("B0SNAP").await.unwrap().unwrap();
        assert_eq!(latest.current_price, Some(dec!(60)));

        // Same timestamp: the later insert is the latest
        repo.insert(&snapshot("B0SNAP", 2_000, Some(dec!(55.50)))).await.unwrap();
        let latest = repo.latest("B0SNAP").await.unwrap().unwrap();
        assert_eq!(latest.current_price, Some(dec!(55.50)));
        assert_eq!(latest.all_time_low, Some(dec!(45.10)));
        assert_eq!(latest.provenance, Provenance::Both);
        assert_eq!(latest.sales_rank, Some(1200));
    }

    #[tokio::test]
    async fn test_history_and_stats() {
        let db = Database::in_memory().await.unwrap();
        ItemRepository::new(db.pool()).track("B0HIST", None, None).await.unwrap();
        let repo = SnapshotRepository::new(db.pool());

        repo.insert(&snapshot("B0HIST", 1, Some(dec!(10.00)))).await.unwrap();
        repo.insert(&snapshot("B0HIST", 2, None)).await.unwrap();
        repo.insert(&snapshot("B0HIST", 3, Some(dec!(20.00)))).await.unwrap();
        repo.insert(&snapshot("B0HIST", 4, Some(dec!(15.01)))).await.unwrap();

        let history = repo.history("B0HIST", 10).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].checked_at, 4);

        let stats = PriceStats::from_snapshots(&history).unwrap();
        assert_eq!(stats.min_price, dec!(10));
        assert_eq!(stats.max_price, dec!(20));
        assert_eq!(stats.avg_price, dec!(15.00));
        assert_eq!(stats.record_count, 3);

        assert!(PriceStats::from_snapshots(&[]).is_none());
    }

    #[test]
    fn test_provenance_round_trips_through_text() {
        for p in [Provenance::Both, Provenance::Catalog, Provenance::History] {
            assert_eq!(p.as_str().parse::<Provenance>().unwrap(), p);
        }
        assert!("paapi".parse::<Provenance>().is_err());
    }
}

//! Alerts repository: at most one alert per (identifier, deal, alert kind)

use crate::{now_millis, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteExecutor;
use sqlx::{FromRow, SqlitePool};

/// A recorded alert
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertRecord {
    pub id: i64,
    pub identifier: String,
    pub deal_id: Option<i64>,
    pub alert_kind: String,
    pub message: String,
    pub sent_at: i64,
}

/// Whether an alert already exists for the dedup key
pub async fn exists<'e>(
    exec: impl SqliteExecutor<'e>,
    identifier: &str,
    deal_id: i64,
    alert_kind: &str,
) -> DbResult<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM alerts WHERE identifier = ?1 AND deal_id = ?2 AND alert_kind = ?3",
    )
    .bind(identifier)
    .bind(deal_id)
    .bind(alert_kind)
    .fetch_one(exec)
    .await?;

    Ok(row.0 > 0)
}

/// Insert an alert (INSERT OR IGNORE on the dedup key).
/// Returns None when the key was already present.
pub async fn insert<'e>(
    exec: impl SqliteExecutor<'e>,
    identifier: &str,
    deal_id: i64,
    alert_kind: &str,
    message: &str,
) -> DbResult<Option<AlertRecord>> {
    let record = sqlx::query_as::<_, AlertRecord>(
        r#"INSERT OR IGNORE INTO alerts (identifier, deal_id, alert_kind, message, sent_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           RETURNING id, identifier, deal_id, alert_kind, message, sent_at"#,
    )
    .bind(identifier)
    .bind(deal_id)
    .bind(alert_kind)
    .bind(message)
    .bind(now_millis())
    .fetch_optional(exec)
    .await?;

    Ok(record)
}

/// Repository for alerts
pub struct AlertRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AlertRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Newest-first alerts of one identifier
    pub async fn get_for_identifier(&self, identifier: &str, limit: i64) -> DbResult<Vec<AlertRecord>> {
        let records = sqlx::query_as::<_, AlertRecord>(
            r#"SELECT id, identifier, deal_id, alert_kind, message, sent_at
               FROM alerts
               WHERE identifier = ?1
               ORDER BY sent_at DESC, id DESC
               LIMIT ?2"#,
        )
        .bind(identifier)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::deals::{self, DealKind, NewDeal};
    use crate::repository::items::ItemRepository;
    use crate::Database;

    #[tokio::test]
    async fn test_insert_is_deduplicated_on_key() {
        let db = Database::in_memory().await.unwrap();
        ItemRepository::new(db.pool()).track("B0ALRT", None, None).await.unwrap();
        let deal = deals::insert(
            db.pool(),
            &NewDeal {
                identifier: "B0ALRT".into(),
                kind: DealKind::Clearance,
                trigger_price: None,
                reference_price: None,
                drop_percent: None,
                estimated_profit: None,
                estimated_roi: None,
            },
        )
        .await
        .unwrap();

        assert!(!exists(db.pool(), "B0ALRT", deal.id, "clearance_detected").await.unwrap());

        let first = insert(db.pool(), "B0ALRT", deal.id, "clearance_detected", "msg").await.unwrap();
        assert!(first.is_some());
        let second = insert(db.pool(), "B0ALRT", deal.id, "clearance_detected", "msg").await.unwrap();
        assert!(second.is_none());

        assert!(exists(db.pool(), "B0ALRT", deal.id, "clearance_detected").await.unwrap());
        let stored = AlertRepository::new(db.pool()).get_for_identifier("B0ALRT", 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].deal_id, Some(deal.id));
    }
}

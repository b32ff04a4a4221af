//! Watched items repository: the catalog items a user tracks

use crate::{decimal_column, decimal_text, now_millis, DbResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteExecutor, SqliteRow};
use sqlx::{FromRow, Row, SqlitePool};

/// A tracked catalog item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedItem {
    pub id: i64,
    pub identifier: String,
    pub label: String,
    pub title: String,
    pub brand: String,
    pub category: String,
    pub image_url: String,
    pub target_buy_price: Option<Decimal>,
    pub source: String,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> FromRow<'r, SqliteRow> for WatchedItem {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            identifier: row.try_get("identifier")?,
            label: row.try_get("label")?,
            title: row.try_get("title")?,
            brand: row.try_get("brand")?,
            category: row.try_get("category")?,
            image_url: row.try_get("image_url")?,
            target_buy_price: decimal_column(row, "target_buy_price")?,
            source: row.try_get("source")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Catalog metadata for an item. `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMetadata {
    pub title: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

const SELECT_ITEM: &str = r#"
    SELECT id, identifier, label, title, brand, category, image_url,
           target_buy_price, source, is_active, created_at, updated_at
    FROM watched_items
"#;

/// Start (or resume) tracking an item. Re-activates a soft-deleted item;
/// `label`/`target_buy_price` only overwrite when provided.
pub async fn track<'e>(
    exec: impl SqliteExecutor<'e>,
    identifier: &str,
    label: Option<&str>,
    target_buy_price: Option<Decimal>,
    source: &str,
) -> DbResult<WatchedItem> {
    let item = sqlx::query_as::<_, WatchedItem>(
        r#"INSERT INTO watched_items
            (identifier, label, target_buy_price, source, is_active, created_at, updated_at)
           VALUES (?1, COALESCE(?2, ''), ?3, ?4, 1, ?5, ?5)
           ON CONFLICT(identifier) DO UPDATE SET
             label = COALESCE(?2, label),
             target_buy_price = COALESCE(?3, target_buy_price),
             source = ?4,
             is_active = 1,
             updated_at = ?5
           RETURNING id, identifier, label, title, brand, category, image_url,
                     target_buy_price, source, is_active, created_at, updated_at
        "#,
    )
    .bind(identifier)
    .bind(label)
    .bind(decimal_text(target_buy_price))
    .bind(source)
    .bind(now_millis())
    .fetch_one(exec)
    .await?;

    Ok(item)
}

/// Upsert catalog metadata; only non-null fields overwrite
pub async fn upsert_metadata<'e>(
    exec: impl SqliteExecutor<'e>,
    identifier: &str,
    metadata: &ItemMetadata,
) -> DbResult<()> {
    sqlx::query(
        r#"INSERT INTO watched_items
            (identifier, title, brand, category, image_url, created_at, updated_at)
           VALUES (?1, COALESCE(?2, ''), COALESCE(?3, ''), COALESCE(?4, ''), COALESCE(?5, ''), ?6, ?6)
           ON CONFLICT(identifier) DO UPDATE SET
             title = COALESCE(?2, title),
             brand = COALESCE(?3, brand),
             category = COALESCE(?4, category),
             image_url = COALESCE(?5, image_url),
             updated_at = ?6
        "#,
    )
    .bind(identifier)
    .bind(&metadata.title)
    .bind(&metadata.brand)
    .bind(&metadata.category)
    .bind(&metadata.image_url)
    .bind(now_millis())
    .execute(exec)
    .await?;

    Ok(())
}

pub async fn get<'e>(
    exec: impl SqliteExecutor<'e>,
    identifier: &str,
) -> DbResult<Option<WatchedItem>> {
    let sql = format!("{SELECT_ITEM} WHERE identifier = ?1");
    let item = sqlx::query_as::<_, WatchedItem>(&sql)
        .bind(identifier)
        .fetch_optional(exec)
        .await?;

    Ok(item)
}

/// Target buy price of an item, if the item exists and has one
pub async fn target_buy_price<'e>(
    exec: impl SqliteExecutor<'e>,
    identifier: &str,
) -> DbResult<Option<Decimal>> {
    let row = sqlx::query("SELECT target_buy_price FROM watched_items WHERE identifier = ?1")
        .bind(identifier)
        .fetch_optional(exec)
        .await?;

    match row {
        Some(row) => Ok(decimal_column(&row, "target_buy_price")?),
        None => Ok(None),
    }
}

/// Repository for tracked items
pub struct ItemRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ItemRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn track(
        &self,
        identifier: &str,
        label: Option<&str>,
        target_buy_price: Option<Decimal>,
    ) -> DbResult<WatchedItem> {
        track(self.pool, identifier, label, target_buy_price, "manual").await
    }

    pub async fn get(&self, identifier: &str) -> DbResult<Option<WatchedItem>> {
        get(self.pool, identifier).await
    }

    /// All active items, oldest first
    pub async fn get_all_active(&self) -> DbResult<Vec<WatchedItem>> {
        let sql = format!("{SELECT_ITEM} WHERE is_active = 1 ORDER BY id");
        let items = sqlx::query_as::<_, WatchedItem>(&sql)
            .fetch_all(self.pool)
            .await?;

        Ok(items)
    }

    pub async fn list(&self, offset: i64, limit: i64) -> DbResult<Vec<WatchedItem>> {
        let sql = format!("{SELECT_ITEM} ORDER BY id LIMIT ?1 OFFSET ?2");
        let items = sqlx::query_as::<_, WatchedItem>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await?;

        Ok(items)
    }

    /// Soft-delete. Returns false if the identifier is unknown.
    pub async fn deactivate(&self, identifier: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE watched_items SET is_active = 0, updated_at = ?2 WHERE identifier = ?1",
        )
        .bind(identifier)
        .bind(now_millis())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_active(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watched_items WHERE is_active = 1")
            .fetch_one(self.pool)
            .await?;

        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_track_then_deactivate_and_retrack() {
        let db = Database::in_memory().await.unwrap();
        let repo = ItemRepository::new(db.pool());

        let item = repo.track("B000TEST01", Some("desk lamp"), Some(dec!(25.00))).await.unwrap();
        assert!(item.is_active);
        assert_eq!(item.label, "desk lamp");
        assert_eq!(item.target_buy_price, Some(dec!(25)));

        assert!(repo.deactivate("B000TEST01").await.unwrap());
        assert_eq!(repo.count_active().await.unwrap(), 0);

        // Re-tracking without a label keeps the old one and re-activates
        let item = repo.track("B000TEST01", None, None).await.unwrap();
        assert!(item.is_active);
        assert_eq!(item.label, "desk lamp");
        assert_eq!(item.target_buy_price, Some(dec!(25)));
    }

    #[tokio::test]
    async fn test_deactivate_unknown_item() {
        let db = Database::in_memory().await.unwrap();
        let repo = ItemRepository::new(db.pool());
        assert!(!repo.deactivate("NOPE").await.unwrap());
    }

    #[tokio::test]
    async fn test_metadata_only_overwrites_present_fields() {
        let db = Database::in_memory().await.unwrap();
        let repo = ItemRepository::new(db.pool());
        repo.track("B000TEST02", Some("kettle"), None).await.unwrap();

        let full = ItemMetadata {
            title: Some("Electric Kettle".into()),
            brand: Some("Acme".into()),
            category: Some("Kitchen".into()),
            image_url: Some("https://img.example/k.jpg".into()),
        };
        upsert_metadata(db.pool(), "B000TEST02", &full).await.unwrap();

        let partial = ItemMetadata {
            title: Some("Electric Kettle 1.7L".into()),
            ..Default::default()
        };
        upsert_metadata(db.pool(), "B000TEST02", &partial).await.unwrap();

        let item = repo.get("B000TEST02").await.unwrap().unwrap();
        assert_eq!(item.title, "Electric Kettle 1.7L");
        assert_eq!(item.brand, "Acme");
        assert_eq!(item.label, "kettle");
        assert_eq!(target_buy_price(db.pool(), "B000TEST02").await.unwrap(), None);
    }
}

//! Transaction scope for one per-identifier pipeline run
//!
//! Everything done through a [`UnitOfWork`] is committed or rolled back as a
//! single unit. Dropping it without `commit` rolls back.

use crate::repository::{alerts, deals, items, snapshots};
use crate::repository::{AlertRecord, Deal, ItemMetadata, NewDeal, NewSnapshot, PriceSnapshot};
use crate::DbResult;
use rust_decimal::Decimal;
use sqlx::{Sqlite, SqlitePool, Transaction};

pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub async fn begin(pool: &SqlitePool) -> DbResult<Self> {
        let tx = pool.begin().await?;
        Ok(Self { tx })
    }

    pub async fn commit(self) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    pub async fn upsert_item_metadata(&mut self, identifier: &str, metadata: &ItemMetadata) -> DbResult<()> {
        items::upsert_metadata(&mut *self.tx, identifier, metadata).await
    }

    pub async fn target_buy_price(&mut self, identifier: &str) -> DbResult<Option<Decimal>> {
        items::target_buy_price(&mut *self.tx, identifier).await
    }

    pub async fn latest_snapshot(&mut self, identifier: &str) -> DbResult<Option<PriceSnapshot>> {
        snapshots::latest(&mut *self.tx, identifier).await
    }

    pub async fn insert_snapshot(&mut self, snapshot: &NewSnapshot) -> DbResult<i64> {
        snapshots::insert(&mut *self.tx, snapshot).await
    }

    pub async fn deactivate_deals(&mut self, identifier: &str) -> DbResult<u64> {
        deals::deactivate_for_identifier(&mut *self.tx, identifier).await
    }

    pub async fn insert_deal(&mut self, deal: &NewDeal) -> DbResult<Deal> {
        deals::insert(&mut *self.tx, deal).await
    }

    pub async fn alert_exists(&mut self, identifier: &str, deal_id: i64, alert_kind: &str) -> DbResult<bool> {
        alerts::exists(&mut *self.tx, identifier, deal_id, alert_kind).await
    }

    pub async fn insert_alert(
        &mut self,
        identifier: &str,
        deal_id: i64,
        alert_kind: &str,
        message: &str,
    ) -> DbResult<Option<AlertRecord>> {
        alerts::insert(&mut *self.tx, identifier, deal_id, alert_kind, message).await
    }
}

//! At-most-once alert records per (identifier, deal, alert kind)

use persistence::repository::{AlertRecord, Deal};
use persistence::{DbResult, UnitOfWork};
use tracing::{debug, info};

pub struct AlertDeduplicator;

impl AlertDeduplicator {
    pub fn alert_kind(deal: &Deal) -> String {
        format!("{}_detected", deal.kind)
    }

    /// Record an alert for `deal` unless one already exists.
    /// Returns the new record, or None when it was a duplicate.
    pub async fn process_deal(
        uow: &mut UnitOfWork,
        identifier: &str,
        deal: &Deal,
    ) -> DbResult<Option<AlertRecord>> {
        let alert_kind = Self::alert_kind(deal);
        if uow.alert_exists(identifier, deal.id, &alert_kind).await? {
            debug!(identifier, deal_id = deal.id, "Alert already recorded");
            return Ok(None);
        }

        let message = format_message(identifier, deal);
        let record = uow
            .insert_alert(identifier, deal.id, &alert_kind, &message)
            .await?;
        if record.is_some() {
            info!(identifier, kind = %deal.kind, "DEAL ALERT {message}");
        }
        Ok(record)
    }
}

pub fn format_message(identifier: &str, deal: &Deal) -> String {
    let mut parts = vec![format!("{} for {identifier}", deal.kind.as_str().to_uppercase())];

    if let Some(price) = deal.trigger_price {
        parts.push(format!("Price: ${price:.2}"));
    }
    if let Some(reference) = deal.reference_price {
        parts.push(format!("Reference: ${reference:.2}"));
    }
    if let Some(drop) = deal.drop_percent {
        parts.push(format!("Drop: {drop:.1}%"));
    }
    if let Some(profit) = deal.estimated_profit {
        parts.push(format!("Est. Profit: ${profit:.2}"));
    }
    if let Some(roi) = deal.estimated_roi {
        parts.push(format!("ROI: {roi:.1}%"));
    }

    parts.join(" | ")
}

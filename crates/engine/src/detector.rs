//! Rule-based deal classification and resale profit estimation
//!
//! Pure and deterministic: the same inputs always yield the same signals, in
//! rule order (price drop, clearance, below average, all-time low, margin).

use persistence::repository::DealKind;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::config::MonitoringConfig;
use crate::types::{DealSignal, HistoricalStats, MergedObservation, ProfitEstimate};

fn round(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// `(reference - price) / reference * 100`, unrounded
fn percent_below(reference: Decimal, price: Decimal) -> Decimal {
    (reference - price) / reference * dec!(100)
}

#[derive(Debug, Clone)]
pub struct DealDetector {
    drop_threshold: Decimal,
    clearance_keywords: Vec<String>,
    min_savings: Decimal,
    target_roi: Decimal,
    /// Fractions of the sale price
    referral_fee: Decimal,
    fulfillment_fee: Decimal,
}

impl DealDetector {
    pub fn new(config: &MonitoringConfig) -> Self {
        Self {
            drop_threshold: config.price_drop_threshold_percent,
            clearance_keywords: config
                .clearance_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            min_savings: config.min_savings_percent,
            target_roi: config.target_roi_percent,
            referral_fee: config.referral_fee_percent / dec!(100),
            fulfillment_fee: config.fulfillment_fee_percent / dec!(100),
        }
    }

    /// Classify one observation. Nothing is emitted without a current price.
    pub fn classify(
        &self,
        current: &MergedObservation,
        previous_price: Option<Decimal>,
        historical: Option<&HistoricalStats>,
        target_buy_price: Option<Decimal>,
    ) -> Vec<DealSignal> {
        let Some(price) = current.current_price else {
            return Vec::new();
        };

        let mut signals = Vec::new();
        let signal = |kind, reference_price, drop_percent| DealSignal {
            kind,
            trigger_price: price,
            reference_price,
            drop_percent,
            estimated_profit: None,
            estimated_roi: None,
        };

        // 1. Drop since the previous snapshot
        if let Some(previous) = previous_price.filter(|p| *p > Decimal::ZERO) {
            let drop = percent_below(previous, price);
            if drop >= self.drop_threshold {
                signals.push(signal(DealKind::PriceDrop, previous, Some(round(drop, 1))));
            }
        }

        // 2. Clearance keyword or deep listed savings
        let title = current.title.as_deref().unwrap_or_default().to_lowercase();
        let keyword_hit = self.clearance_keywords.iter().any(|k| title.contains(k.as_str()));
        let savings_hit = current
            .savings_percent
            .is_some_and(|s| s >= self.min_savings);
        if keyword_hit || savings_hit {
            let reference = current
                .list_price
                .filter(|p| *p > Decimal::ZERO)
                .unwrap_or(price);
            let drop = current.savings_percent.map(|s| round(s, 1));
            signals.push(signal(DealKind::Clearance, reference, drop));
        }

        if let Some(stats) = historical {
            // 3. Below average, shortest qualifying window only
            for average in [stats.avg_short, stats.avg_medium, stats.avg_long]
                .into_iter()
                .flatten()
            {
                if average <= Decimal::ZERO || price >= average {
                    continue;
                }
                let drop = percent_below(average, price);
                if drop >= self.drop_threshold {
                    signals.push(signal(DealKind::BelowAverage, average, Some(round(drop, 1))));
                    break;
                }
            }

            // 4. At or under the historical floor
            if let Some(low) = stats.all_time_low.filter(|l| *l > Decimal::ZERO) {
                if price <= low {
                    signals.push(signal(DealKind::AllTimeLow, low, Some(dec!(0.0))));
                }
            }
        }

        // 5. Resale margin under the target buy price
        if let Some(target) = target_buy_price {
            if price <= target {
                let resale = current
                    .list_price
                    .filter(|p| *p > Decimal::ZERO)
                    .or_else(|| historical.and_then(|h| h.avg_medium));
                if let Some(resale) = resale.filter(|r| *r > price) {
                    let estimate = self.estimate(resale, price);
                    if estimate.roi >= self.target_roi {
                        signals.push(DealSignal {
                            kind: DealKind::MarginOpportunity,
                            trigger_price: price,
                            reference_price: resale,
                            drop_percent: Some(round(percent_below(resale, price), 1)),
                            estimated_profit: Some(estimate.profit),
                            estimated_roi: Some(estimate.roi),
                        });
                    }
                }
            }
        }

        signals
    }

    /// Profit from buying at `cost` and reselling at `sale_price` after fees
    pub fn estimate(&self, sale_price: Decimal, cost: Decimal) -> ProfitEstimate {
        let referral_fee = round(sale_price * self.referral_fee, 2);
        let fulfillment_fee = round(sale_price * self.fulfillment_fee, 2);
        let total_fees = round(referral_fee + fulfillment_fee, 2);
        let profit = round(sale_price - cost - total_fees, 2);
        let roi = if cost > Decimal::ZERO {
            round(profit / cost * dec!(100), 1)
        } else {
            Decimal::ZERO
        };
        let margin = if sale_price > Decimal::ZERO {
            round(profit / sale_price * dec!(100), 1)
        } else {
            Decimal::ZERO
        };

        ProfitEstimate {
            sale_price,
            cost,
            referral_fee,
            fulfillment_fee,
            total_fees,
            profit,
            roi,
            margin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::repository::Provenance;

    fn detector() -> DealDetector {
        DealDetector::new(&MonitoringConfig::default())
    }

    fn observation(price: Option<Decimal>) -> MergedObservation {
        MergedObservation {
            identifier: "B0DETECT".into(),
            title: Some("Stainless Kettle".into()),
            current_price: price,
            list_price: None,
            buy_box_price: price,
            savings_percent: None,
            sales_rank: None,
            avg_30d: None,
            avg_90d: None,
            avg_180d: None,
            all_time_low: None,
            all_time_high: None,
            provenance: Provenance::Catalog,
        }
    }

    fn kinds(signals: &[DealSignal]) -> Vec<DealKind> {
        signals.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn test_no_price_no_signals() {
        let stats = HistoricalStats {
            avg_short: Some(dec!(100)),
            all_time_low: Some(dec!(1)),
            ..Default::default()
        };
        let signals = detector().classify(&observation(None), Some(dec!(50)), Some(&stats), Some(dec!(999)));
        assert!(signals.is_empty());
    }

    #[test]
    fn test_price_drop() {
        let d = detector();
        let signals = d.classify(&observation(Some(dec!(26.99))), Some(dec!(29.99)), None, None);
        assert_eq!(kinds(&signals), vec![DealKind::PriceDrop]);
        assert_eq!(signals[0].reference_price, dec!(29.99));
        assert_eq!(signals[0].trigger_price, dec!(26.99));
        // 3.00 / 29.99 = 10.0033..%
        assert_eq!(signals[0].drop_percent, Some(dec!(10.0)));

        // 9.9% is under the default threshold
        let below = d.classify(&observation(Some(dec!(90.10))), Some(dec!(100)), None, None);
        assert!(below.is_empty());

        // Zero or missing previous price never triggers
        assert!(d.classify(&observation(Some(dec!(1))), Some(Decimal::ZERO), None, None).is_empty());
        assert!(d.classify(&observation(Some(dec!(1))), None, None, None).is_empty());
    }

    #[test]
    fn test_price_increase_is_not_a_drop() {
        let signals = detector().classify(&observation(Some(dec!(40))), Some(dec!(20)), None, None);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_clearance_by_keyword() {
        let mut obs = observation(Some(dec!(15)));
        obs.title = Some("Kettle - CLOSEOUT Sale".into());
        let signals = detector().classify(&obs, None, None, None);
        assert_eq!(kinds(&signals), vec![DealKind::Clearance]);
        assert_eq!(signals[0].reference_price, dec!(15));
        assert_eq!(signals[0].drop_percent, None);
    }

    #[test]
    fn test_clearance_by_savings() {
        let mut obs = observation(Some(dec!(60)));
        obs.list_price = Some(dec!(100));
        obs.savings_percent = Some(dec!(40));
        let signals = detector().classify(&obs, None, None, None);
        assert_eq!(kinds(&signals), vec![DealKind::Clearance]);
        assert_eq!(signals[0].reference_price, dec!(100));
        assert_eq!(signals[0].drop_percent, Some(dec!(40.0)));

        obs.savings_percent = Some(dec!(19.9));
        assert!(detector().classify(&obs, None, None, None).is_empty());
    }

    #[test]
    fn test_below_average_first_window_wins() {
        let stats = HistoricalStats {
            avg_short: Some(dec!(100)),
            avg_medium: Some(dec!(120)),
            avg_long: Some(dec!(150)),
            all_time_low: None,
        };
        let signals = detector().classify(&observation(Some(dec!(80))), None, Some(&stats), None);
        assert_eq!(kinds(&signals), vec![DealKind::BelowAverage]);
        assert_eq!(signals[0].reference_price, dec!(100));
        assert_eq!(signals[0].drop_percent, Some(dec!(20.0)));
    }

    #[test]
    fn test_below_average_skips_non_qualifying_windows() {
        // Short window too close, missing medium, long qualifies
        let stats = HistoricalStats {
            avg_short: Some(dec!(82)),
            avg_medium: None,
            avg_long: Some(dec!(100)),
            all_time_low: None,
        };
        let signals = detector().classify(&observation(Some(dec!(80))), None, Some(&stats), None);
        assert_eq!(kinds(&signals), vec![DealKind::BelowAverage]);
        assert_eq!(signals[0].reference_price, dec!(100));
    }

    #[test]
    fn test_all_time_low() {
        let stats = HistoricalStats {
            all_time_low: Some(dec!(50)),
            ..Default::default()
        };
        let d = detector();

        let at = d.classify(&observation(Some(dec!(50))), None, Some(&stats), None);
        assert_eq!(kinds(&at), vec![DealKind::AllTimeLow]);
        assert_eq!(at[0].drop_percent, Some(dec!(0.0)));
        assert_eq!(at[0].reference_price, dec!(50));

        let under = d.classify(&observation(Some(dec!(45))), None, Some(&stats), None);
        assert_eq!(kinds(&under), vec![DealKind::AllTimeLow]);
        assert_eq!(under[0].drop_percent, Some(dec!(0.0)));

        let above = d.classify(&observation(Some(dec!(50.01))), None, Some(&stats), None);
        assert!(above.is_empty());
    }

    #[test]
    fn test_margin_opportunity() {
        let mut obs = observation(Some(dec!(50)));
        obs.list_price = Some(dec!(100));
        let signals = detector().classify(&obs, None, None, Some(dec!(55)));
        assert_eq!(kinds(&signals), vec![DealKind::MarginOpportunity]);
        let s = &signals[0];
        assert_eq!(s.reference_price, dec!(100));
        assert_eq!(s.drop_percent, Some(dec!(50.0)));
        assert_eq!(s.estimated_profit, Some(dec!(20.00)));
        assert_eq!(s.estimated_roi, Some(dec!(40.0)));
    }

    #[test]
    fn test_margin_uses_medium_average_and_roi_floor() {
        let stats = HistoricalStats {
            avg_medium: Some(dec!(70)),
            ..Default::default()
        };
        // 70 resale, 40 cost: fees 21.00, profit 9.00, roi 22.5 < 30
        let signals = detector().classify(&observation(Some(dec!(40))), None, Some(&stats), Some(dec!(45)));
        assert!(!kinds(&signals).contains(&DealKind::MarginOpportunity));

        // 70 resale, 30 cost: profit 19.00, roi 63.3
        let signals = detector().classify(&observation(Some(dec!(30))), None, Some(&stats), Some(dec!(45)));
        let margin = signals.iter().find(|s| s.kind == DealKind::MarginOpportunity).unwrap();
        assert_eq!(margin.reference_price, dec!(70));
        assert_eq!(margin.estimated_roi, Some(dec!(63.3)));

        // Above target buy price
        let signals = detector().classify(&observation(Some(dec!(50))), None, Some(&stats), Some(dec!(45)));
        assert_eq!(kinds(&signals), vec![DealKind::BelowAverage]);
    }

    #[test]
    fn test_all_rules_fire_in_order() {
        let mut obs = observation(Some(dec!(40)));
        obs.title = Some("Clearance kettle".into());
        obs.list_price = Some(dec!(100));
        let stats = HistoricalStats {
            avg_short: Some(dec!(80)),
            avg_medium: Some(dec!(90)),
            avg_long: Some(dec!(95)),
            all_time_low: Some(dec!(45)),
        };
        let signals = detector().classify(&obs, Some(dec!(60)), Some(&stats), Some(dec!(50)));
        assert_eq!(
            kinds(&signals),
            vec![
                DealKind::PriceDrop,
                DealKind::Clearance,
                DealKind::BelowAverage,
                DealKind::AllTimeLow,
                DealKind::MarginOpportunity,
            ]
        );
    }

    #[test]
    fn test_estimate() {
        let e = detector().estimate(dec!(100), dec!(50));
        assert_eq!(e.referral_fee, dec!(15.00));
        assert_eq!(e.fulfillment_fee, dec!(15.00));
        assert_eq!(e.total_fees, dec!(30.00));
        assert_eq!(e.profit, dec!(20.00));
        assert_eq!(e.roi, dec!(40.0));
        assert_eq!(e.margin, dec!(20.0));
    }

    #[test]
    fn test_estimate_degenerate_inputs() {
        let d = detector();
        let free = d.estimate(dec!(10), Decimal::ZERO);
        assert_eq!(free.roi, Decimal::ZERO);
        assert_eq!(free.profit, dec!(7.00));

        let unsellable = d.estimate(Decimal::ZERO, dec!(5));
        assert_eq!(unsellable.margin, Decimal::ZERO);
        assert_eq!(unsellable.profit, dec!(-5));
    }
}

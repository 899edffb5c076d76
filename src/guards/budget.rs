//! Append-only cost ledger with in-memory daily/monthly aggregates (§4.5,
//! §3 `CostLedgerEntry`).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::Mutex;

use crate::config::BudgetCaps;
use crate::error::GuardError;

/// One append-only ledger line.
#[derive(Debug, Clone)]
pub struct CostLedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub units: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

struct Totals {
    day: NaiveDate,
    daily: Decimal,
    month: u32,
    monthly: Decimal,
    alerted_fractions: Vec<f64>,
}

impl Totals {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            day: now.date_naive(),
            daily: Decimal::ZERO,
            month: now.format("%Y%m").to_string().parse().unwrap_or(0),
            monthly: Decimal::ZERO,
            alerted_fractions: Vec::new(),
        }
    }

    fn roll_if_needed(&mut self, now: DateTime<Utc>) {
        if now.date_naive() != self.day {
            self.day = now.date_naive();
            self.daily = Decimal::ZERO;
        }
        let month: u32 = now.format("%Y%m").to_string().parse().unwrap_or(0);
        if month != self.month {
            self.month = month;
            self.monthly = Decimal::ZERO;
            self.alerted_fractions.clear();
        }
    }
}

/// A callback invoked when a spend crosses an alert threshold fraction of
/// its cap (§4.5 "Emit threshold alerts at 50/75/90%"). The orchestrator
/// wires this to whatever alert sink it has configured, or leaves it
/// unset when none is configured.
pub type AlertSink = Box<dyn Fn(&str, f64, Decimal, Decimal) + Send + Sync>;

pub struct BudgetLedger {
    caps: BudgetCaps,
    entries: Mutex<Vec<CostLedgerEntry>>,
    totals: Mutex<Totals>,
    alert_sink: Option<AlertSink>,
}

impl BudgetLedger {
    pub fn new(caps: BudgetCaps, now: DateTime<Utc>) -> Self {
        Self {
            caps,
            entries: Mutex::new(Vec::new()),
            totals: Mutex::new(Totals::new(now)),
            alert_sink: None,
        }
    }

    pub fn with_alert_sink(mut self, sink: AlertSink) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    /// Compute projected daily/monthly sums including `estimated_cost` and
    /// reject with `BudgetExceeded` if either cap would be breached (§4.5).
    pub async fn check_and_reserve(
        &self,
        scope: &str,
        estimated_cost: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), GuardError> {
        let mut totals = self.totals.lock().await;
        totals.roll_if_needed(now);

        let projected_daily = totals.daily + estimated_cost;
        if projected_daily > self.caps.daily {
            return Err(GuardError::BudgetExceeded {
                scope: format!("{scope}:daily"),
                projected: projected_daily,
                cap: self.caps.daily,
            });
        }

        let projected_monthly = totals.monthly + estimated_cost;
        if projected_monthly > self.caps.monthly {
            return Err(GuardError::BudgetExceeded {
                scope: format!("{scope}:monthly"),
                projected: projected_monthly,
                cap: self.caps.monthly,
            });
        }

        totals.daily = projected_daily;
        totals.monthly = projected_monthly;
        self.maybe_alert(&mut totals, scope);
        Ok(())
    }

    fn maybe_alert(&self, totals: &mut Totals, scope: &str) {
        let Some(sink) = &self.alert_sink else { return };
        let fraction = if self.caps.daily.is_zero() {
            0.0
        } else {
            (totals.daily / self.caps.daily).to_f64().unwrap_or(0.0)
        };
        for threshold in &self.caps.alert_fractions {
            if fraction >= *threshold && !totals.alerted_fractions.contains(threshold) {
                totals.alerted_fractions.push(*threshold);
                sink(scope, *threshold, totals.daily, self.caps.daily);
            }
        }
    }

    /// Append a completed ledger entry. Called after a billable call
    /// finishes, with the actual (not estimated) cost.
    pub async fn record(&self, entry: CostLedgerEntry) {
        self.entries.lock().await.push(entry);
    }

    pub async fn daily_total(&self) -> Decimal {
        self.totals.lock().await.daily
    }

    pub async fn monthly_total(&self) -> Decimal {
        self.totals.lock().await.monthly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn caps() -> BudgetCaps {
        BudgetCaps {
            daily: dec!(100),
            monthly: dec!(500),
            alert_fractions: vec![0.5, 0.75, 0.9],
        }
    }

    #[tokio::test]
    async fn accepts_spend_within_caps() {
        let ledger = BudgetLedger::new(caps(), at(2026, 1, 1, 0));
        let result = ledger.check_and_reserve("export_pdf", dec!(10), at(2026, 1, 1, 1)).await;
        assert!(result.is_ok());
        assert_eq!(ledger.daily_total().await, dec!(10));
    }

    #[tokio::test]
    async fn rejects_spend_exceeding_daily_cap() {
        let ledger = BudgetLedger::new(caps(), at(2026, 1, 1, 0));
        ledger.check_and_reserve("a", dec!(90), at(2026, 1, 1, 1)).await.unwrap();
        let err = ledger
            .check_and_reserve("a", dec!(20), at(2026, 1, 1, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::BudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn daily_total_resets_on_utc_midnight_rollover() {
        let ledger = BudgetLedger::new(caps(), at(2026, 1, 1, 0));
        ledger.check_and_reserve("a", dec!(90), at(2026, 1, 1, 23)).await.unwrap();
        ledger.check_and_reserve("a", dec!(50), at(2026, 1, 2, 0)).await.unwrap();
        assert_eq!(ledger.daily_total().await, dec!(50));
    }

    #[tokio::test]
    async fn monthly_total_resets_on_month_rollover() {
        let ledger = BudgetLedger::new(caps(), at(2026, 1, 31, 0));
        ledger.check_and_reserve("a", dec!(50), at(2026, 1, 31, 23)).await.unwrap();
        ledger.check_and_reserve("a", dec!(50), at(2026, 2, 1, 0)).await.unwrap();
        assert_eq!(ledger.monthly_total().await, dec!(50));
    }
}

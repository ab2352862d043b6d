//! Trading calendar and rebalance schedule.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceMode {
    /// Every `rebalance_freq` trading days, starting at the first.
    EveryN,
    /// Last trading day of each month, keeping every `rebalance_freq`-th.
    MonthEnd,
}

impl RebalanceMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "every_n" | "every_n_days" => Some(RebalanceMode::EveryN),
            "month_end" | "monthly" => Some(RebalanceMode::MonthEnd),
            _ => None,
        }
    }
}

/// Sorted, de-duplicated trading dates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
}

impl TradingCalendar {
    pub fn new(mut dates: Vec<NaiveDate>) -> Self {
        dates.sort();
        dates.dedup();
        Self { dates }
    }

    /// Monday to Friday, both bounds inclusive. No holiday awareness.
    pub fn business_days(start: NaiveDate, end: NaiveDate) -> Self {
        let dates = start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .collect();
        Self { dates }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Dates within `[start, end]`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> &[NaiveDate] {
        let lo = self.dates.partition_point(|d| *d < start);
        let hi = self.dates.partition_point(|d| *d <= end);
        &self.dates[lo..hi.max(lo)]
    }

    /// Moves `n` trading days from `base`.
    ///
    /// A base that is not itself a trading day counts from the next trading
    /// day. Results clamp to the first and last calendar dates; `None` only
    /// for an empty calendar.
    pub fn shift(&self, base: NaiveDate, n: i64) -> Option<NaiveDate> {
        let last = *self.dates.last()?;
        let pos = self.dates.partition_point(|d| *d < base);
        if pos >= self.dates.len() {
            return Some(last);
        }
        let target = (pos as i64 + n).clamp(0, self.dates.len() as i64 - 1);
        Some(self.dates[target as usize])
    }

    /// Rebalance dates within `[start, end]`.
    pub fn rebalance_dates(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        mode: RebalanceMode,
        freq: usize,
    ) -> Vec<NaiveDate> {
        let window = self.between(start, end);
        let step = freq.max(1);
        match mode {
            RebalanceMode::EveryN => window.iter().step_by(step).copied().collect(),
            RebalanceMode::MonthEnd => {
                let mut month_ends: Vec<NaiveDate> = Vec::new();
                for d in window {
                    match month_ends.last_mut() {
                        Some(last) if (last.year(), last.month()) == (d.year(), d.month()) => {
                            *last = *d
                        }
                        _ => month_ends.push(*d),
                    }
                }
                month_ends.into_iter().step_by(step).collect()
            }
        }
    }
}

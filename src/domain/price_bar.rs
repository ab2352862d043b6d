//! Daily price bar and delisting record.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// close * volume
    pub fn dollar_volume(&self) -> f64 {
        self.close * self.volume
    }

    /// Opening price, falling back to the close when the open is unusable.
    pub fn reference_price(&self) -> f64 {
        if self.open.is_finite() && self.open > 0.0 {
            self.open
        } else {
            self.close
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelistingRecord {
    pub symbol: String,
    pub delisted_date: NaiveDate,
    pub reason: Option<String>,
}

/// Simple returns close-to-close; the first bar has no return.
pub fn pct_changes(bars: &[PriceBar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| (w[1].close - w[0].close) / w[0].close)
        .collect()
}

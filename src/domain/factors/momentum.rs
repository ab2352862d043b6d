//! Price momentum with a skip window.

use super::{aligned_returns, finite_std, FactorProvider};
use crate::domain::error::FactorbenchError;
use crate::domain::market_data::MarketData;
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MomentumParams {
    /// Formation window in trading days.
    pub lookback: usize,
    /// Most recent trading days excluded from the formation window.
    pub skip: usize,
    /// Measure on month-end closes instead of daily closes.
    pub use_monthly: bool,
    /// Fall back to the daily measure when too few month-ends exist.
    pub fallback_daily: bool,
    pub lookback_months: Option<usize>,
    pub skip_months: Option<usize>,
    /// Divide by trailing return volatility over this many bars.
    pub vol_lookback: Option<usize>,
}

impl Default for MomentumParams {
    fn default() -> Self {
        MomentumParams {
            lookback: 120,
            skip: 20,
            use_monthly: false,
            fallback_daily: true,
            lookback_months: None,
            skip_months: None,
            vol_lookback: None,
        }
    }
}

pub struct Momentum {
    params: MomentumParams,
}

impl Momentum {
    pub fn new(params: MomentumParams) -> Self {
        Self { params }
    }

    fn months(&self) -> (usize, usize) {
        let p = &self.params;
        let lb = p
            .lookback_months
            .unwrap_or_else(|| ((p.lookback as f64 / 21.0).round() as usize).max(1));
        let sk = p
            .skip_months
            .unwrap_or_else(|| (p.skip as f64 / 21.0).round() as usize);
        (lb, sk)
    }
}

/// ln(closes[n-skip-1] / closes[n-skip-lookback-1])
fn log_change(closes: &[f64], lookback: usize, skip: usize) -> Option<f64> {
    let n = closes.len();
    if n < lookback + skip + 1 {
        return None;
    }
    let end = closes[n - skip - 1];
    let start = closes[n - skip - lookback - 1];
    if !(start > 0.0) || !end.is_finite() {
        return None;
    }
    let v = (end / start).ln();
    v.is_finite().then_some(v)
}

impl FactorProvider for Momentum {
    fn name(&self) -> &str {
        "momentum"
    }

    fn value(
        &self,
        data: &MarketData,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, FactorbenchError> {
        let p = &self.params;
        let span = (p.lookback + p.skip) as i64 * 2;
        let Some(window) = data
            .prices
            .get(symbol, Some(date - Duration::days(span)), Some(date))?
        else {
            return Ok(None);
        };
        if window.len() < p.lookback + p.skip + 1 {
            return Ok(None);
        }
        let closes = window.closes();

        let mut signal = None;
        if p.use_monthly {
            let mut month_ends: Vec<f64> = Vec::new();
            let mut current: Option<(i32, u32)> = None;
            for bar in window.iter() {
                let key = (bar.date.year(), bar.date.month());
                if current == Some(key) {
                    if let Some(last) = month_ends.last_mut() {
                        *last = bar.close;
                    }
                } else {
                    month_ends.push(bar.close);
                    current = Some(key);
                }
            }
            let (lb, sk) = self.months();
            signal = log_change(&month_ends, lb, sk);
            if signal.is_none() {
                if !p.fallback_daily {
                    return Ok(None);
                }
                debug!(
                    %symbol,
                    %date,
                    month_ends = month_ends.len(),
                    needed = lb + sk + 1,
                    "too few month-ends, using daily momentum"
                );
            }
        }

        let Some(mut signal) = signal.or_else(|| log_change(&closes, p.lookback, p.skip)) else {
            return Ok(None);
        };

        if let Some(vol_lb) = p.vol_lookback.filter(|v| *v > 0) {
            let rets = aligned_returns(&window, false);
            let tail = &rets[rets.len().saturating_sub(vol_lb)..];
            if let Some(vol) = finite_std(tail).filter(|v| v.is_finite() && *v > 0.0) {
                signal /= vol;
            }
        }

        Ok(Some(signal))
    }
}

//! Short-term reversal.

use super::{aligned_returns, finite_std, FactorProvider};
use crate::domain::error::FactorbenchError;
use crate::domain::market_data::MarketData;
use chrono::{Duration, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalMode {
    /// Negated sum of close-to-close returns.
    MultiDay,
    /// Negated mean of open-to-close returns.
    Intraday,
}

impl ReversalMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "multi_day" => Some(ReversalMode::MultiDay),
            "intraday" => Some(ReversalMode::Intraday),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReversalParams {
    pub lookback: usize,
    pub mode: ReversalMode,
    pub vol_lookback: Option<usize>,
}

impl Default for ReversalParams {
    fn default() -> Self {
        ReversalParams {
            lookback: 5,
            mode: ReversalMode::MultiDay,
            vol_lookback: None,
        }
    }
}

pub struct Reversal {
    params: ReversalParams,
}

impl Reversal {
    pub fn new(params: ReversalParams) -> Self {
        Self { params }
    }
}

impl FactorProvider for Reversal {
    fn name(&self) -> &str {
        "reversal"
    }

    fn value(
        &self,
        data: &MarketData,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, FactorbenchError> {
        let p = &self.params;
        let vol_lb = p.vol_lookback.filter(|v| *v > 0);

        let span = match p.mode {
            ReversalMode::MultiDay => p.lookback * 3,
            ReversalMode::Intraday => (p.lookback * 3).max(vol_lb.unwrap_or(0) * 2).max(30),
        };
        let Some(window) = data
            .prices
            .get(symbol, Some(date - Duration::days(span as i64)), Some(date))?
        else {
            return Ok(None);
        };

        let mut signal = match p.mode {
            ReversalMode::MultiDay => {
                if window.len() < p.lookback {
                    return Ok(None);
                }
                let rets = aligned_returns(&window, false);
                let recent = &rets[rets.len() - p.lookback..];
                -recent.iter().filter(|r| r.is_finite()).sum::<f64>()
            }
            ReversalMode::Intraday => {
                let intraday: Vec<f64> = window
                    .iter()
                    .filter(|b| b.open.is_finite() && b.close.is_finite() && b.open > 0.0)
                    .map(|b| b.close / b.open - 1.0)
                    .collect();
                if intraday.len() < p.lookback || p.lookback == 0 {
                    return Ok(None);
                }
                let recent = &intraday[intraday.len() - p.lookback..];
                -(recent.iter().sum::<f64>() / recent.len() as f64)
            }
        };

        if let Some(vol_lb) = vol_lb {
            if window.len() >= vol_lb {
                let rets = aligned_returns(&window, false);
                let tail = &rets[rets.len() - vol_lb..];
                if let Some(vol) = finite_std(tail).filter(|v| v.is_finite() && *v > 0.0) {
                    signal /= vol;
                }
            }
        }

        Ok(Some(signal))
    }
}

//! Low volatility: negated trailing return volatility.

use super::{aligned_returns, finite_std, join_on_date, regression_beta, FactorProvider};
use crate::domain::error::FactorbenchError;
use crate::domain::market_data::MarketData;
use chrono::{Duration, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowVolParams {
    pub window: usize,
    pub log_returns: bool,
    /// Measure idiosyncratic volatility after removing benchmark beta.
    pub use_residual: bool,
    /// Only negative returns contribute; the rest count as zero.
    pub downside_only: bool,
    pub bench_symbol: String,
}

impl Default for LowVolParams {
    fn default() -> Self {
        LowVolParams {
            window: 60,
            log_returns: true,
            use_residual: false,
            downside_only: false,
            bench_symbol: "SPY".to_string(),
        }
    }
}

pub struct LowVol {
    params: LowVolParams,
}

impl LowVol {
    pub fn new(params: LowVolParams) -> Self {
        Self { params }
    }
}

fn downside(values: impl Iterator<Item = f64>) -> Vec<f64> {
    values.map(|r| if r < 0.0 { r } else { 0.0 }).collect()
}

impl FactorProvider for LowVol {
    fn name(&self) -> &str {
        "low_vol"
    }

    fn value(
        &self,
        data: &MarketData,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, FactorbenchError> {
        let p = &self.params;
        let start = date - Duration::days(p.window as i64 * 2);
        let Some(window) = data.prices.get(symbol, Some(start), Some(date))? else {
            return Ok(None);
        };
        if window.len() < p.window || p.window == 0 {
            return Ok(None);
        }
        let rets = aligned_returns(&window, p.log_returns);

        let volatility = if p.use_residual {
            let Some(bench) = data.prices.get(&p.bench_symbol, Some(start), Some(date))? else {
                return Ok(None);
            };
            if bench.len() < p.window {
                return Ok(None);
            }
            let bench_rets = aligned_returns(&bench, p.log_returns);
            let joined = join_on_date(&window, &rets, &bench, &bench_rets);
            if joined.len() < p.window {
                return Ok(None);
            }
            let recent = &joined[joined.len() - p.window..];
            let Some(beta) = regression_beta(recent) else {
                return Ok(None);
            };
            let resid = recent.iter().map(|(r, m)| r - beta * m);
            if p.downside_only {
                finite_std(&downside(resid))
            } else {
                finite_std(&resid.collect::<Vec<_>>())
            }
        } else {
            let recent = rets[rets.len() - p.window..].iter().copied();
            if p.downside_only {
                finite_std(&downside(recent))
            } else {
                finite_std(&recent.collect::<Vec<_>>())
            }
        };

        Ok(volatility.filter(|v| v.is_finite()).map(|v| -v))
    }
}

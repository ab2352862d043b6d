//! Market beta against a benchmark symbol.

use super::{aligned_returns, join_on_date, regression_beta, FactorProvider};
use crate::domain::error::FactorbenchError;
use crate::domain::market_data::MarketData;
use chrono::{Duration, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BetaParams {
    pub window: usize,
    pub bench_symbol: String,
    pub log_returns: bool,
}

impl Default for BetaParams {
    fn default() -> Self {
        BetaParams {
            window: 252,
            bench_symbol: "SPY".to_string(),
            log_returns: true,
        }
    }
}

pub struct Beta {
    params: BetaParams,
}

impl Beta {
    pub fn new(params: BetaParams) -> Self {
        Self { params }
    }
}

impl FactorProvider for Beta {
    fn name(&self) -> &str {
        "beta"
    }

    fn value(
        &self,
        data: &MarketData,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, FactorbenchError> {
        let p = &self.params;
        let start = date - Duration::days(p.window as i64 * 3);
        let stock = data.prices.get(symbol, Some(start), Some(date))?;
        let bench = data.prices.get(&p.bench_symbol, Some(start), Some(date))?;
        let (Some(stock), Some(bench)) = (stock, bench) else {
            return Ok(None);
        };
        if p.window < 2 || stock.len() < p.window || bench.len() < p.window {
            return Ok(None);
        }

        let joined = join_on_date(
            &stock,
            &aligned_returns(&stock, p.log_returns),
            &bench,
            &aligned_returns(&bench, p.log_returns),
        );
        if joined.len() < p.window {
            return Ok(None);
        }
        Ok(regression_beta(&joined[joined.len() - p.window..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::factors::test_support::{daily, day, market, FactorPort};
    use std::collections::HashMap;

    #[test]
    fn scaled_log_moves_give_matching_beta() {
        let bench: Vec<f64> = (0..40).map(|i| 100.0 * (0.01 * ((i % 4) as f64)).exp()).collect();
        // ln(stock) = 1.5 * ln(bench) + c, so log returns scale exactly.
        let stock: Vec<f64> = bench.iter().map(|b| 3.0 * (1.5 * b.ln()).exp() / 1000.0).collect();
        let port = FactorPort {
            bars: HashMap::from([
                ("SPY".to_string(), daily("SPY", "2020-01-01", &bench)),
                ("AAA".to_string(), daily("AAA", "2020-01-01", &stock)),
            ]),
            ..FactorPort::default()
        };
        let data = market(port);
        let beta = Beta::new(BetaParams {
            window: 30,
            ..BetaParams::default()
        });
        let b = beta.value(&data, "AAA", day("2020-02-09")).unwrap().unwrap();
        assert!((b - 1.5).abs() < 1e-9);

        let spy = beta.value(&data, "SPY", day("2020-02-09")).unwrap().unwrap();
        assert!((spy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn short_history_is_absent() {
        let port = FactorPort {
            bars: HashMap::from([
                ("SPY".to_string(), daily("SPY", "2020-01-01", &[1.0, 2.0, 3.0])),
                ("AAA".to_string(), daily("AAA", "2020-01-01", &[1.0, 2.0, 3.0])),
            ]),
            ..FactorPort::default()
        };
        let data = market(port);
        let beta = Beta::new(BetaParams::default());
        assert_eq!(beta.value(&data, "AAA", day("2020-01-03")).unwrap(), None);
    }
}

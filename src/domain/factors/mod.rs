//! Factor providers and the look-ahead lag contract.
//!
//! A provider computes one raw, unstandardised value per `(symbol, date)`
//! from point-in-time data. The signal pipeline evaluates each provider at
//! its lagged date, so a provider only ever sees bars up to that date.

pub mod beta;
pub mod composite;
pub mod low_vol;
pub mod momentum;
pub mod reversal;
pub mod size;

use crate::domain::error::FactorbenchError;
use crate::domain::market_data::MarketData;
use crate::domain::price_bar::PriceBar;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

pub use beta::{Beta, BetaParams};
pub use composite::{CompositeParams, FundamentalComposite};
pub use low_vol::{LowVol, LowVolParams};
pub use momentum::{Momentum, MomentumParams};
pub use reversal::{Reversal, ReversalMode, ReversalParams};
pub use size::Size;

/// Names of the providers registered by [`builtin_providers`].
pub const BUILTIN_FACTORS: [&str; 7] = [
    "momentum", "reversal", "low_vol", "beta", "size", "quality", "value",
];

pub trait FactorProvider {
    fn name(&self) -> &str;

    /// Raw factor value as of `date`; `Ok(None)` when it cannot be computed.
    fn value(
        &self,
        data: &MarketData,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, FactorbenchError>;
}

/// `date` moved back by `lag_days` calendar days.
pub fn lag_date(date: NaiveDate, lag_days: i64) -> NaiveDate {
    if lag_days == 0 {
        return date;
    }
    date - Duration::days(lag_days)
}

/// Evaluation date for one factor: a per-factor lag overrides the global lag.
pub fn resolve_factor_date(
    signal_date: NaiveDate,
    global_lag: i64,
    factor_lag: Option<i64>,
) -> NaiveDate {
    lag_date(signal_date, factor_lag.unwrap_or(global_lag))
}

/// Parameters of every built-in provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FactorParams {
    pub momentum: MomentumParams,
    pub reversal: ReversalParams,
    pub low_vol: LowVolParams,
    pub beta: BetaParams,
    pub quality: CompositeParams,
    pub value: CompositeParams,
}

pub fn builtin_providers(params: &FactorParams) -> Vec<Box<dyn FactorProvider>> {
    vec![
        Box::new(Momentum::new(params.momentum.clone())),
        Box::new(Reversal::new(params.reversal.clone())),
        Box::new(LowVol::new(params.low_vol.clone())),
        Box::new(Beta::new(params.beta.clone())),
        Box::new(Size),
        Box::new(FundamentalComposite::quality(params.quality.clone())),
        Box::new(FundamentalComposite::value(params.value.clone())),
    ]
}

/// Per-bar returns aligned with `bars`; the first entry is NaN.
/// Log returns use NaN for non-positive closes.
pub(crate) fn aligned_returns(bars: &[PriceBar], log: bool) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    out.push(f64::NAN);
    for w in bars.windows(2) {
        let (prev, cur) = (w[0].close, w[1].close);
        let r = if log {
            if prev > 0.0 && cur > 0.0 {
                (cur / prev).ln()
            } else {
                f64::NAN
            }
        } else {
            (cur - prev) / prev
        };
        out.push(r);
    }
    out
}

/// Sample std of the finite entries.
pub(crate) fn finite_std(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    crate::domain::stats::std_dev(&finite, 1)
}

/// Inner join of two aligned return series on date, in date order.
pub(crate) fn join_on_date(
    bars: &[PriceBar],
    rets: &[f64],
    bench_bars: &[PriceBar],
    bench_rets: &[f64],
) -> Vec<(f64, f64)> {
    let bench: BTreeMap<NaiveDate, f64> = bench_bars
        .iter()
        .zip(bench_rets)
        .map(|(b, r)| (b.date, *r))
        .collect();
    bars.iter()
        .zip(rets)
        .filter_map(|(b, r)| bench.get(&b.date).map(|m| (*r, *m)))
        .collect()
}

/// OLS slope of `r` on `m` over jointly finite pairs.
pub(crate) fn regression_beta(pairs: &[(f64, f64)]) -> Option<f64> {
    let (r, m): (Vec<f64>, Vec<f64>) = pairs
        .iter()
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .copied()
        .unzip();
    let var_m = crate::domain::stats::std_dev(&m, 1)?.powi(2);
    if var_m.is_nan() || var_m <= 0.0 {
        return None;
    }
    let cov = crate::domain::stats::covariance(&r, &m)?;
    let beta = cov / var_m;
    beta.is_finite().then_some(beta)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::error::FactorbenchError;
    use crate::domain::fundamentals::{FundamentalDataset, FundamentalRecord};
    use crate::domain::market_cap::MarketCapPoint;
    use crate::domain::market_data::MarketData;
    use crate::domain::price_bar::{DelistingRecord, PriceBar};
    use crate::ports::data_port::DataPort;
    use chrono::{Duration, NaiveDate};
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Default)]
    pub struct FactorPort {
        pub bars: HashMap<String, Vec<PriceBar>>,
        pub caps: HashMap<String, Vec<MarketCapPoint>>,
        pub quality: HashMap<String, Vec<FundamentalRecord>>,
    }

    impl DataPort for FactorPort {
        fn load_prices(&self, symbol: &str) -> Result<Option<Vec<PriceBar>>, FactorbenchError> {
            Ok(self.bars.get(symbol).cloned())
        }
        fn list_symbols(&self) -> Result<Vec<String>, FactorbenchError> {
            Ok(self.bars.keys().cloned().collect())
        }
        fn load_delistings(&self) -> Result<Vec<DelistingRecord>, FactorbenchError> {
            Ok(vec![])
        }
        fn has_market_caps(&self) -> bool {
            !self.caps.is_empty()
        }
        fn load_market_caps(
            &self,
            symbol: &str,
        ) -> Result<Option<Vec<MarketCapPoint>>, FactorbenchError> {
            Ok(self.caps.get(symbol).cloned())
        }
        fn load_fundamentals(
            &self,
            dataset: FundamentalDataset,
            symbol: &str,
        ) -> Result<Option<Vec<FundamentalRecord>>, FactorbenchError> {
            match dataset {
                FundamentalDataset::Quality => Ok(self.quality.get(symbol).cloned()),
                FundamentalDataset::Value => Ok(None),
            }
        }
    }

    pub fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// One bar per calendar day starting at `start`, open == close.
    pub fn daily(symbol: &str, start: &str, closes: &[f64]) -> Vec<PriceBar> {
        let start = day(start);
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| PriceBar {
                symbol: symbol.into(),
                date: start + Duration::days(i as i64),
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: 1_000.0,
            })
            .collect()
    }

    pub fn market(port: FactorPort) -> MarketData {
        MarketData::new(Rc::new(port)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::day;

    #[test]
    fn lag_date_subtracts_calendar_days() {
        assert_eq!(lag_date(day("2020-01-15"), 0), day("2020-01-15"));
        assert_eq!(lag_date(day("2020-01-15"), 1), day("2020-01-14"));
        assert_eq!(lag_date(day("2020-01-15"), 5), day("2020-01-10"));
    }

    #[test]
    fn factor_lag_overrides_global_lag() {
        assert_eq!(resolve_factor_date(day("2020-01-15"), 2, None), day("2020-01-13"));
        assert_eq!(resolve_factor_date(day("2020-01-15"), 2, Some(5)), day("2020-01-10"));
        assert_eq!(resolve_factor_date(day("2020-01-15"), 2, Some(0)), day("2020-01-15"));
    }

    #[test]
    fn builtin_names_match_registry() {
        let providers = builtin_providers(&FactorParams::default());
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, BUILTIN_FACTORS.to_vec());
    }

    #[test]
    fn regression_beta_recovers_slope() {
        let pairs: Vec<(f64, f64)> = (1..=10)
            .map(|i| {
                let m = i as f64 * 0.01 - 0.05;
                (1.5 * m + 0.001, m)
            })
            .chain(std::iter::once((f64::NAN, 0.2)))
            .collect();
        let b = regression_beta(&pairs).unwrap();
        assert!((b - 1.5).abs() < 1e-9);
        assert!(regression_beta(&[(0.1, 0.0), (0.2, 0.0)]).is_none());
    }
}

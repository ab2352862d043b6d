//! Tradable universe screen.
//!
//! Applies a fixed filter ladder to every known symbol using only bars dated
//! on or before the as-of date, and keeps an append-only audit record per
//! query. The first failing filter is the only one counted.

use crate::domain::market_data::MarketData;
use crate::domain::price_bar::pct_changes;
use crate::domain::stats;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniverseConfig {
    pub min_price: f64,
    pub min_dollar_volume: f64,
    /// `None` disables the market-cap stage.
    pub min_market_cap: Option<f64>,
    /// Reject symbols with no market cap on record (otherwise pass them through).
    pub market_cap_strict: bool,
    /// Trailing bars used for the price and dollar-volume averages.
    pub lookback: usize,
    pub max_volatility: Option<f64>,
    pub vol_lookback: Option<usize>,
    pub exclude_symbols: BTreeSet<String>,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        UniverseConfig {
            min_price: 5.0,
            min_dollar_volume: 1e6,
            min_market_cap: Some(500e6),
            market_cap_strict: true,
            lookback: 20,
            max_volatility: None,
            vol_lookback: None,
            exclude_symbols: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Excluded,
    Delisted,
    InsufficientHistory,
    Price,
    DollarVolume,
    Volatility,
    MarketCapMissing,
    MarketCap,
    StorageError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectionCounts {
    pub excluded: usize,
    pub delisted: usize,
    pub insufficient_history: usize,
    pub price: usize,
    pub dollar_volume: usize,
    pub volatility: usize,
    pub market_cap_missing: usize,
    pub market_cap: usize,
    pub storage_error: usize,
}

impl RejectionCounts {
    fn record(&mut self, reason: Rejection) {
        let slot = match reason {
            Rejection::Excluded => &mut self.excluded,
            Rejection::Delisted => &mut self.delisted,
            Rejection::InsufficientHistory => &mut self.insufficient_history,
            Rejection::Price => &mut self.price,
            Rejection::DollarVolume => &mut self.dollar_volume,
            Rejection::Volatility => &mut self.volatility,
            Rejection::MarketCapMissing => &mut self.market_cap_missing,
            Rejection::MarketCap => &mut self.market_cap,
            Rejection::StorageError => &mut self.storage_error,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.excluded
            + self.delisted
            + self.insufficient_history
            + self.price
            + self.dollar_volume
            + self.volatility
            + self.market_cap_missing
            + self.market_cap
            + self.storage_error
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniverseAudit {
    pub date: NaiveDate,
    pub lookback: usize,
    pub total_symbols: usize,
    pub rejections: RejectionCounts,
    pub passed: usize,
    pub rejected: usize,
    pub thresholds: UniverseConfig,
}

pub struct UniverseFilter {
    config: UniverseConfig,
    audits: Vec<UniverseAudit>,
}

impl UniverseFilter {
    pub fn new(config: UniverseConfig) -> Self {
        Self {
            config,
            audits: Vec::new(),
        }
    }

    pub fn config(&self) -> &UniverseConfig {
        &self.config
    }

    /// Tradable symbols at `date`, sorted, using a `lookback`-bar liquidity window.
    pub fn universe(&mut self, data: &MarketData, date: NaiveDate, lookback: usize) -> Vec<String> {
        let symbols = data.prices.symbols();
        let mut rejections = RejectionCounts::default();
        let mut passed = Vec::new();

        for symbol in symbols {
            match self.screen(data, symbol, date, lookback) {
                Ok(()) => passed.push(symbol.clone()),
                Err(reason) => rejections.record(reason),
            }
        }

        debug!(
            %date,
            total = symbols.len(),
            passed = passed.len(),
            "universe screened"
        );

        self.audits.push(UniverseAudit {
            date,
            lookback,
            total_symbols: symbols.len(),
            rejected: rejections.total(),
            rejections,
            passed: passed.len(),
            thresholds: self.config.clone(),
        });

        passed
    }

    /// The most recent audit recorded for `date`.
    pub fn audit(&self, date: NaiveDate) -> Option<&UniverseAudit> {
        self.audits.iter().rev().find(|a| a.date == date)
    }

    /// Every audit in query order.
    pub fn audits(&self) -> &[UniverseAudit] {
        &self.audits
    }

    fn screen(
        &self,
        data: &MarketData,
        symbol: &str,
        date: NaiveDate,
        lookback: usize,
    ) -> Result<(), Rejection> {
        let cfg = &self.config;

        if cfg.exclude_symbols.contains(symbol) {
            return Err(Rejection::Excluded);
        }
        if data.prices.is_delisted(symbol, date) {
            return Err(Rejection::Delisted);
        }

        let start = date - Duration::days(lookback as i64 * 2);
        let window = match data.prices.get(symbol, Some(start), Some(date)) {
            Ok(Some(w)) if w.len() >= lookback.max(1) => w,
            Ok(_) => return Err(Rejection::InsufficientHistory),
            Err(e) => {
                warn!(symbol, %date, error = %e, "price lookup failed during universe screen");
                return Err(Rejection::StorageError);
            }
        };

        let recent = window.tail(lookback);
        let closes: Vec<f64> = recent.iter().map(|b| b.close).collect();
        match stats::mean(&closes) {
            Some(p) if p >= cfg.min_price => {}
            _ => return Err(Rejection::Price),
        }

        let dollar: Vec<f64> = recent.iter().map(|b| b.dollar_volume()).collect();
        match stats::mean(&dollar) {
            Some(dv) if dv >= cfg.min_dollar_volume => {}
            _ => return Err(Rejection::DollarVolume),
        }

        if let (Some(max_vol), Some(vol_lb)) = (cfg.max_volatility, cfg.vol_lookback) {
            if vol_lb > 0 {
                if window.len() < vol_lb + 1 {
                    return Err(Rejection::Volatility);
                }
                let rets = pct_changes(&window);
                let tail = &rets[rets.len() - vol_lb..];
                match stats::std_dev(tail, 1) {
                    Some(v) if v.is_finite() && v <= max_vol => {}
                    _ => return Err(Rejection::Volatility),
                }
            }
        }

        if let Some(min_cap) = cfg.min_market_cap {
            if data.market_caps.is_available() {
                match data.market_caps.get(symbol, date) {
                    Ok(Some(cap)) if cap < min_cap => return Err(Rejection::MarketCap),
                    Ok(Some(_)) => {}
                    Ok(None) if cfg.market_cap_strict => return Err(Rejection::MarketCapMissing),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(symbol, %date, error = %e, "market cap lookup failed");
                        return Err(Rejection::StorageError);
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::FactorbenchError;
    use crate::domain::market_cap::MarketCapPoint;
    use crate::domain::price_bar::{DelistingRecord, PriceBar};
    use crate::ports::data_port::DataPort;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Default)]
    struct ScreenPort {
        bars: HashMap<String, Vec<PriceBar>>,
        delistings: Vec<DelistingRecord>,
        caps: Option<HashMap<String, f64>>,
    }

    impl DataPort for ScreenPort {
        fn load_prices(&self, symbol: &str) -> Result<Option<Vec<PriceBar>>, FactorbenchError> {
            if symbol == "BAD" {
                return Err(FactorbenchError::storage("truncated file"));
            }
            Ok(self.bars.get(symbol).cloned())
        }
        fn list_symbols(&self) -> Result<Vec<String>, FactorbenchError> {
            let mut s: Vec<String> = self.bars.keys().cloned().collect();
            s.push("BAD".into());
            Ok(s)
        }
        fn load_delistings(&self) -> Result<Vec<DelistingRecord>, FactorbenchError> {
            Ok(self.delistings.clone())
        }
        fn has_market_caps(&self) -> bool {
            self.caps.is_some()
        }
        fn load_market_caps(
            &self,
            symbol: &str,
        ) -> Result<Option<Vec<MarketCapPoint>>, FactorbenchError> {
            Ok(self.caps.as_ref().and_then(|c| c.get(symbol)).map(|cap| {
                vec![MarketCapPoint {
                    date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
                    market_cap: *cap,
                }]
            }))
        }
    }

    fn series(symbol: &str, days: i64, close: impl Fn(i64) -> f64, volume: f64) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..days)
            .map(|i| {
                let c = close(i);
                PriceBar {
                    symbol: symbol.into(),
                    date: start + Duration::days(i),
                    open: c,
                    high: c,
                    low: c,
                    close: c,
                    volume,
                }
            })
            .collect()
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
    }

    fn data(port: ScreenPort) -> MarketData {
        MarketData::new(Rc::new(port)).unwrap()
    }

    fn base_port() -> ScreenPort {
        let mut bars = HashMap::new();
        bars.insert("GOOD".to_string(), series("GOOD", 60, |_| 50.0, 1e6));
        bars.insert("CHEAP".to_string(), series("CHEAP", 60, |_| 2.0, 1e8));
        bars.insert("THIN".to_string(), series("THIN", 60, |_| 50.0, 10.0));
        bars.insert("NEW".to_string(), series("NEW", 3, |_| 50.0, 1e6));
        bars.insert(
            "JUMPY".to_string(),
            series("JUMPY", 60, |i| if i % 2 == 0 { 40.0 } else { 60.0 }, 1e6),
        );
        bars.insert("GONE".to_string(), series("GONE", 60, |_| 50.0, 1e6));
        bars.insert("SKIP".to_string(), series("SKIP", 60, |_| 50.0, 1e6));
        ScreenPort {
            bars,
            delistings: vec![DelistingRecord {
                symbol: "GONE".into(),
                delisted_date: NaiveDate::from_ymd_opt(2024, 2, 20).unwrap(),
                reason: Some("acquired".into()),
            }],
            caps: None,
        }
    }

    fn config() -> UniverseConfig {
        UniverseConfig {
            max_volatility: Some(0.05),
            vol_lookback: Some(10),
            exclude_symbols: BTreeSet::from(["SKIP".to_string()]),
            ..UniverseConfig::default()
        }
    }

    #[test]
    fn ladder_counts_each_rejection_once() {
        let data = data(base_port());
        let mut filter = UniverseFilter::new(config());
        let uni = filter.universe(&data, as_of(), 20);
        assert_eq!(uni, vec!["GOOD".to_string()]);

        let audit = filter.audit(as_of()).unwrap();
        assert_eq!(audit.total_symbols, 8);
        assert_eq!(audit.passed, 1);
        assert_eq!(audit.rejected, 7);
        let r = &audit.rejections;
        assert_eq!(r.excluded, 1);
        assert_eq!(r.delisted, 1);
        assert_eq!(r.insufficient_history, 1);
        assert_eq!(r.price, 1);
        assert_eq!(r.dollar_volume, 1);
        assert_eq!(r.volatility, 1);
        assert_eq!(r.storage_error, 1);
        assert_eq!(r.market_cap, 0);
    }

    #[test]
    fn window_ends_at_as_of_date() {
        let data = data(base_port());
        let mut filter = UniverseFilter::new(UniverseConfig::default());
        // Only 5 bars exist on or before Jan 5.
        let uni = filter.universe(&data, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(), 20);
        assert!(uni.is_empty());
        let uni = filter.universe(&data, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(), 5);
        assert!(uni.contains(&"GOOD".to_string()));
        // audit() reflects the latest call for the date
        assert_eq!(filter.audit(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()).unwrap().lookback, 5);
        assert_eq!(filter.audits().len(), 2);
    }

    #[test]
    fn market_cap_strict_and_lenient() {
        let mut port = base_port();
        port.caps = Some(HashMap::from([("GOOD".to_string(), 100e6)]));
        port.bars
            .insert("NOCAP".to_string(), series("NOCAP", 60, |_| 50.0, 1e6));
        let data = data(port);

        let mut strict = UniverseFilter::new(UniverseConfig {
            min_market_cap: Some(50e6),
            ..UniverseConfig::default()
        });
        let uni = strict.universe(&data, as_of(), 20);
        assert!(uni.contains(&"GOOD".to_string()));
        assert!(!uni.contains(&"NOCAP".to_string()));
        assert!(strict.audit(as_of()).unwrap().rejections.market_cap_missing >= 1);

        let mut lenient = UniverseFilter::new(UniverseConfig {
            min_market_cap: Some(50e6),
            market_cap_strict: false,
            ..UniverseConfig::default()
        });
        let uni = lenient.universe(&data, as_of(), 20);
        assert!(uni.contains(&"NOCAP".to_string()));

        let mut high_bar = UniverseFilter::new(UniverseConfig {
            min_market_cap: Some(500e6),
            market_cap_strict: false,
            ..UniverseConfig::default()
        });
        let uni = high_bar.universe(&data, as_of(), 20);
        assert!(!uni.contains(&"GOOD".to_string()));
        assert_eq!(high_bar.audit(as_of()).unwrap().rejections.market_cap, 1);
    }
}

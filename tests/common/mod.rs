#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use factorbench::domain::config::RunConfig;
use factorbench::domain::error::FactorbenchError;
use factorbench::domain::factors::MomentumParams;
pub use factorbench::domain::price_bar::{DelistingRecord, PriceBar};
use factorbench::domain::signal::FactorWeights;
use factorbench::domain::universe::UniverseConfig;
use factorbench::ports::data_port::DataPort;
use std::collections::HashMap;
use std::io::Write;

#[derive(Default)]
pub struct MockDataPort {
    pub data: HashMap<String, Vec<PriceBar>>,
    pub errors: HashMap<String, String>,
    pub delistings: Vec<DelistingRecord>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    pub fn with_delisting(mut self, symbol: &str, date: &str, reason: Option<&str>) -> Self {
        self.delistings.push(DelistingRecord {
            symbol: symbol.to_string(),
            delisted_date: parse(date),
            reason: reason.map(str::to_string),
        });
        self
    }
}

impl DataPort for MockDataPort {
    fn load_prices(&self, symbol: &str) -> Result<Option<Vec<PriceBar>>, FactorbenchError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(FactorbenchError::storage(reason.clone()));
        }
        Ok(self.data.get(symbol).cloned())
    }

    fn list_symbols(&self) -> Result<Vec<String>, FactorbenchError> {
        let mut symbols: Vec<String> = self
            .data
            .keys()
            .chain(self.errors.keys())
            .cloned()
            .collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }

    fn load_delistings(&self) -> Result<Vec<DelistingRecord>, FactorbenchError> {
        Ok(self.delistings.clone())
    }
}

pub fn parse(date: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(symbol: &str, date: &str, close: f64) -> PriceBar {
    PriceBar {
        symbol: symbol.to_string(),
        date: parse(date),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000.0,
    }
}

/// One bar per calendar day starting at `start`.
pub fn generate_bars(symbol: &str, start: &str, closes: &[f64]) -> Vec<PriceBar> {
    let start = parse(start);
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| PriceBar {
            symbol: symbol.to_string(),
            date: start + Duration::days(i as i64),
            open: *close,
            high: *close,
            low: *close,
            close: *close,
            volume: 1000.0,
        })
        .collect()
}

pub fn compounding(growth: f64, n: usize) -> Vec<f64> {
    (0..n).map(|t| 100.0 * (1.0 + growth).powi(t as i32)).collect()
}

/// Six symbols S1..S6 compounding at 0.1% .. 0.6% per day for 100 days from 2020-01-01.
pub fn trending_port() -> MockDataPort {
    (1..=6).fold(MockDataPort::new(), |port, i| {
        let symbol = format!("S{i}");
        let bars = generate_bars(&symbol, "2020-01-01", &compounding(0.001 * i as f64, 100));
        port.with_bars(&symbol, bars)
    })
}

/// Momentum-only configuration over an unfiltered universe.
pub fn open_config(start: &str, end: &str) -> RunConfig {
    let weights = FactorWeights::from([("momentum".to_string(), 1.0)]);
    let mut cfg = RunConfig::new(parse(start), parse(end), weights);
    cfg.data.price_dir = Some("unused".into());
    cfg.universe = UniverseConfig {
        min_price: 0.0,
        min_dollar_volume: 0.0,
        min_market_cap: None,
        lookback: 5,
        ..UniverseConfig::default()
    };
    cfg.signal.universe_lookback = 5;
    cfg.factors.momentum = MomentumParams {
        lookback: 5,
        skip: 0,
        ..MomentumParams::default()
    };
    cfg.backtest.holding_period = 5;
    cfg.backtest.long_pct = 0.34;
    cfg
}

pub fn write_temp_ini(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Writes each symbol's bars as `{dir}/{symbol}.csv`.
pub fn write_price_csvs(dir: &std::path::Path, port: &MockDataPort) {
    for (symbol, bars) in &port.data {
        let mut wtr = csv::Writer::from_path(dir.join(format!("{symbol}.csv"))).unwrap();
        wtr.write_record(["date", "open", "high", "low", "close", "volume"])
            .unwrap();
        for b in bars {
            wtr.write_record([
                b.date.to_string(),
                b.open.to_string(),
                b.high.to_string(),
                b.low.to_string(),
                b.close.to_string(),
                b.volume.to_string(),
            ])
            .unwrap();
        }
        wtr.flush().unwrap();
    }
}

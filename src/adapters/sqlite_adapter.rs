//! SQLite data adapter.
//!
//! Prices, delistings, market caps, fundamentals and the industry map live in
//! one database file. Fundamentals are stored long-form, one row per metric.

use crate::domain::config::DataConfig;
use crate::domain::error::FactorbenchError;
use crate::domain::fundamentals::{FundamentalDataset, FundamentalRecord};
use crate::domain::market_cap::MarketCapPoint;
use crate::domain::price_bar::{DelistingRecord, PriceBar};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::collections::{BTreeMap, HashMap};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_error(e: r2d2::Error) -> FactorbenchError {
    FactorbenchError::storage(format!("sqlite pool: {e}"))
}

fn query_error(e: rusqlite::Error) -> FactorbenchError {
    FactorbenchError::storage(format!("sqlite query: {e}"))
}

fn parse_date(raw: &str) -> Result<NaiveDate, FactorbenchError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| FactorbenchError::storage(format!("invalid date '{raw}': {e}")))
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

impl SqliteAdapter {
    pub fn from_config(config: &DataConfig) -> Result<Self, FactorbenchError> {
        let path = config
            .sqlite_path
            .as_ref()
            .ok_or_else(|| FactorbenchError::ConfigMissing {
                section: "data".into(),
                key: "sqlite_path".into(),
            })?;

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, FactorbenchError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, FactorbenchError> {
        self.pool.get().map_err(pool_error)
    }

    pub fn initialize_schema(&self) -> Result<(), FactorbenchError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS prices (
                    symbol TEXT NOT NULL,
                    date TEXT NOT NULL,
                    open REAL,
                    high REAL,
                    low REAL,
                    close REAL,
                    volume REAL,
                    PRIMARY KEY (symbol, date)
                );
                CREATE TABLE IF NOT EXISTS delistings (
                    symbol TEXT PRIMARY KEY,
                    delisted_date TEXT NOT NULL,
                    reason TEXT
                );
                CREATE TABLE IF NOT EXISTS market_caps (
                    symbol TEXT NOT NULL,
                    date TEXT NOT NULL,
                    market_cap REAL,
                    PRIMARY KEY (symbol, date)
                );
                CREATE TABLE IF NOT EXISTS fundamentals (
                    dataset TEXT NOT NULL,
                    symbol TEXT NOT NULL,
                    date TEXT NOT NULL,
                    available_date TEXT,
                    metric TEXT NOT NULL,
                    value REAL,
                    PRIMARY KEY (dataset, symbol, date, metric)
                );
                CREATE TABLE IF NOT EXISTS industries (
                    symbol TEXT PRIMARY KEY,
                    industry TEXT NOT NULL
                );",
            )
            .map_err(query_error)
    }

    pub fn insert_bars(&self, bars: &[PriceBar]) -> Result<(), FactorbenchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO prices (symbol, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    bar.symbol,
                    format_date(bar.date),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(query_error)?;
        }
        tx.commit().map_err(query_error)
    }

    pub fn insert_delisting(&self, record: &DelistingRecord) -> Result<(), FactorbenchError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO delistings (symbol, delisted_date, reason) VALUES (?1, ?2, ?3)",
                params![record.symbol, format_date(record.delisted_date), record.reason],
            )
            .map_err(query_error)?;
        Ok(())
    }

    pub fn insert_market_caps(
        &self,
        symbol: &str,
        points: &[MarketCapPoint],
    ) -> Result<(), FactorbenchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;
        for p in points {
            tx.execute(
                "INSERT OR REPLACE INTO market_caps (symbol, date, market_cap) VALUES (?1, ?2, ?3)",
                params![symbol, format_date(p.date), p.market_cap],
            )
            .map_err(query_error)?;
        }
        tx.commit().map_err(query_error)
    }

    pub fn insert_fundamentals(
        &self,
        dataset: FundamentalDataset,
        symbol: &str,
        records: &[FundamentalRecord],
    ) -> Result<(), FactorbenchError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;
        for r in records {
            for (metric, value) in &r.metrics {
                tx.execute(
                    "INSERT OR REPLACE INTO fundamentals
                     (dataset, symbol, date, available_date, metric, value)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        dataset.as_str(),
                        symbol,
                        format_date(r.date),
                        r.available_date.map(format_date),
                        metric,
                        value
                    ],
                )
                .map_err(query_error)?;
            }
        }
        tx.commit().map_err(query_error)
    }

    pub fn insert_industry(&self, symbol: &str, industry: &str) -> Result<(), FactorbenchError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO industries (symbol, industry) VALUES (?1, ?2)",
                params![symbol, industry],
            )
            .map_err(query_error)?;
        Ok(())
    }
}

impl DataPort for SqliteAdapter {
    fn load_prices(&self, symbol: &str) -> Result<Option<Vec<PriceBar>>, FactorbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date, open, high, low, close, volume FROM prices
                 WHERE symbol = ?1 ORDER BY date ASC",
            )
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![symbol], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                ))
            })
            .map_err(query_error)?;

        let mut bars = Vec::new();
        for row in rows {
            let (date, open, high, low, close, volume) = row.map_err(query_error)?;
            let nan = |v: Option<f64>| v.unwrap_or(f64::NAN);
            bars.push(PriceBar {
                symbol: symbol.to_string(),
                date: parse_date(&date)?,
                open: nan(open),
                high: nan(high),
                low: nan(low),
                close: nan(close),
                volume: nan(volume),
            });
        }
        Ok((!bars.is_empty()).then_some(bars))
    }

    fn list_symbols(&self) -> Result<Vec<String>, FactorbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM prices ORDER BY symbol")
            .map_err(query_error)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(query_error)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(query_error)
    }

    fn load_delistings(&self) -> Result<Vec<DelistingRecord>, FactorbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT symbol, delisted_date, reason FROM delistings ORDER BY symbol")
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(query_error)?;

        let mut records = Vec::new();
        for row in rows {
            let (symbol, date, reason) = row.map_err(query_error)?;
            records.push(DelistingRecord {
                symbol,
                delisted_date: parse_date(&date)?,
                reason: reason.filter(|r| !r.trim().is_empty()),
            });
        }
        Ok(records)
    }

    fn has_market_caps(&self) -> bool {
        self.conn()
            .ok()
            .and_then(|conn| {
                conn.query_row("SELECT 1 FROM market_caps LIMIT 1", [], |_| Ok(()))
                    .optional()
                    .ok()
                    .flatten()
            })
            .is_some()
    }

    fn load_market_caps(&self, symbol: &str) -> Result<Option<Vec<MarketCapPoint>>, FactorbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT date, market_cap FROM market_caps WHERE symbol = ?1 ORDER BY date ASC")
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![symbol], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<f64>>(1)?))
            })
            .map_err(query_error)?;

        let mut points = Vec::new();
        for row in rows {
            let (date, cap) = row.map_err(query_error)?;
            points.push(MarketCapPoint {
                date: parse_date(&date)?,
                market_cap: cap.unwrap_or(f64::NAN),
            });
        }
        Ok((!points.is_empty()).then_some(points))
    }

    fn load_fundamentals(
        &self,
        dataset: FundamentalDataset,
        symbol: &str,
    ) -> Result<Option<Vec<FundamentalRecord>>, FactorbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date, available_date, metric, value FROM fundamentals
                 WHERE dataset = ?1 AND symbol = ?2 ORDER BY date ASC",
            )
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![dataset.as_str(), symbol], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })
            .map_err(query_error)?;

        let mut by_date: BTreeMap<(NaiveDate, Option<NaiveDate>), BTreeMap<String, f64>> =
            BTreeMap::new();
        for row in rows {
            let (date, available, metric, value) = row.map_err(query_error)?;
            let available = available.as_deref().map(parse_date).transpose()?;
            let metrics = by_date.entry((parse_date(&date)?, available)).or_default();
            if let Some(v) = value.filter(|v| v.is_finite()) {
                metrics.insert(metric, v);
            }
        }

        let records: Vec<FundamentalRecord> = by_date
            .into_iter()
            .map(|((date, available_date), metrics)| FundamentalRecord {
                date,
                available_date,
                metrics,
            })
            .collect();
        Ok((!records.is_empty()).then_some(records))
    }

    fn load_industries(&self) -> Result<HashMap<String, String>, FactorbenchError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT symbol, industry FROM industries")
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(query_error)?;
        rows.collect::<Result<HashMap<_, _>, _>>().map_err(query_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn bar(symbol: &str, date: &str, close: f64) -> PriceBar {
        PriceBar {
            symbol: symbol.to_string(),
            date: d(date),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    fn adapter() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        adapter
    }

    #[test]
    fn from_config_missing_path() {
        let result = SqliteAdapter::from_config(&DataConfig::default());
        assert!(matches!(
            result,
            Err(FactorbenchError::ConfigMissing { ref key, .. }) if key == "sqlite_path"
        ));
    }

    #[test]
    fn prices_round_trip_in_date_order() {
        let adapter = adapter();
        adapter
            .insert_bars(&[bar("AAA", "2024-01-02", 101.5), bar("AAA", "2024-01-01", 100.5)])
            .unwrap();

        let fetched = adapter.load_prices("AAA").unwrap().unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].date, d("2024-01-01"));
        assert_eq!(fetched[1].close, 101.5);
        assert_eq!(adapter.load_prices("ZZZ").unwrap(), None);
    }

    #[test]
    fn list_symbols_is_sorted_and_distinct() {
        let adapter = adapter();
        adapter
            .insert_bars(&[
                bar("CCC", "2024-01-01", 1.0),
                bar("AAA", "2024-01-01", 1.0),
                bar("AAA", "2024-01-02", 1.0),
            ])
            .unwrap();
        assert_eq!(adapter.list_symbols().unwrap(), vec!["AAA", "CCC"]);
    }

    #[test]
    fn delistings_and_industries_load() {
        let adapter = adapter();
        adapter
            .insert_delisting(&DelistingRecord {
                symbol: "GONE".into(),
                delisted_date: d("2023-06-02"),
                reason: Some("bankruptcy".into()),
            })
            .unwrap();
        adapter.insert_industry("AAA", "Tech").unwrap();

        let records = adapter.load_delistings().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason.as_deref(), Some("bankruptcy"));
        assert_eq!(
            adapter.load_industries().unwrap().get("AAA").map(String::as_str),
            Some("Tech")
        );
    }

    #[test]
    fn market_caps_flag_follows_table_contents() {
        let adapter = adapter();
        assert!(!adapter.has_market_caps());
        adapter
            .insert_market_caps(
                "AAA",
                &[MarketCapPoint {
                    date: d("2024-01-01"),
                    market_cap: 1e9,
                }],
            )
            .unwrap();
        assert!(adapter.has_market_caps());
        assert_eq!(adapter.load_market_caps("AAA").unwrap().unwrap()[0].market_cap, 1e9);
    }

    #[test]
    fn fundamentals_regroup_by_report_date() {
        let adapter = adapter();
        let record = FundamentalRecord {
            date: d("2023-12-31"),
            available_date: Some(d("2024-02-10")),
            metrics: BTreeMap::from([("roe".to_string(), 0.15), ("roa".to_string(), 0.05)]),
        };
        adapter
            .insert_fundamentals(FundamentalDataset::Quality, "AAA", std::slice::from_ref(&record))
            .unwrap();

        let loaded = adapter
            .load_fundamentals(FundamentalDataset::Quality, "AAA")
            .unwrap()
            .unwrap();
        assert_eq!(loaded, vec![record]);
        assert_eq!(
            adapter.load_fundamentals(FundamentalDataset::Value, "AAA").unwrap(),
            None
        );
    }
}

//! CSV file data adapter.
//!
//! One file per symbol, `<SYMBOL>.csv`, with a header row. Price files need
//! `date`, `close` (or `adjClose`) and `volume`; missing open, high or low
//! columns fall back to the close. Delisted symbols live in a separate
//! directory and are listed in a `symbol,delistedDate[,reason]` table.

use crate::domain::config::DataConfig;
use crate::domain::error::FactorbenchError;
use crate::domain::fundamentals::{FundamentalDataset, FundamentalRecord};
use crate::domain::market_cap::MarketCapPoint;
use crate::domain::price_bar::{DelistingRecord, PriceBar};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use csv::StringRecord;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

const AVAILABLE_DATE_COLUMNS: [&str; 3] = ["available_date", "availableDate", "fillingDate"];

#[derive(Debug, Clone, Default)]
pub struct CsvAdapter {
    price_dir: PathBuf,
    delisted_dir: Option<PathBuf>,
    delisted_info: Option<PathBuf>,
    market_cap_dir: Option<PathBuf>,
    quality_dir: Option<PathBuf>,
    value_dir: Option<PathBuf>,
    industry_map: Option<PathBuf>,
}

/// Header-indexed rows of one CSV file.
struct Table {
    path: PathBuf,
    headers: HashMap<String, usize>,
    rows: Vec<StringRecord>,
}

impl Table {
    /// `Ok(None)` when the file does not exist.
    fn read(path: &Path) -> Result<Option<Self>, FactorbenchError> {
        if !path.is_file() {
            return Ok(None);
        }
        let mut rdr = csv::Reader::from_path(path).map_err(|e| {
            FactorbenchError::storage(format!("failed to open {}: {e}", path.display()))
        })?;
        let headers = rdr
            .headers()
            .map_err(|e| FactorbenchError::storage(format!("{}: bad header: {e}", path.display())))?
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect();
        let rows = rdr
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| FactorbenchError::storage(format!("{}: CSV parse error: {e}", path.display())))?;
        Ok(Some(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        }))
    }

    fn column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.headers.get(*n).copied())
    }

    fn require(&self, names: &[&str]) -> Result<usize, FactorbenchError> {
        self.column(names).ok_or_else(|| {
            FactorbenchError::storage(format!("{}: missing {} column", self.path.display(), names[0]))
        })
    }

    fn cell<'r>(&self, row: &'r StringRecord, col: usize) -> &'r str {
        row.get(col).map(str::trim).unwrap_or("")
    }

    fn date(&self, row: &StringRecord, col: usize) -> Result<NaiveDate, FactorbenchError> {
        let raw = self.cell(row, col);
        // Timestamps keep only their date part.
        let day = raw.get(..10).unwrap_or(raw);
        NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| {
            FactorbenchError::storage(format!("{}: invalid date '{raw}': {e}", self.path.display()))
        })
    }

    /// Empty cells read as NaN.
    fn number(&self, row: &StringRecord, col: usize) -> Result<f64, FactorbenchError> {
        let raw = self.cell(row, col);
        if raw.is_empty() {
            return Ok(f64::NAN);
        }
        raw.parse().map_err(|e| {
            FactorbenchError::storage(format!("{}: invalid number '{raw}': {e}", self.path.display()))
        })
    }
}

fn csv_symbols(dir: &Path) -> Result<Vec<String>, FactorbenchError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| {
        FactorbenchError::storage(format!("failed to read directory {}: {e}", dir.display()))
    })?;
    let mut symbols = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FactorbenchError::storage(e.to_string()))?;
        let name = entry.file_name();
        if let Some(symbol) = name.to_str().and_then(|n| n.strip_suffix(".csv")) {
            symbols.push(symbol.to_string());
        }
    }
    Ok(symbols)
}

impl CsvAdapter {
    pub fn new(price_dir: impl Into<PathBuf>) -> Self {
        Self {
            price_dir: price_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_config(config: &DataConfig) -> Result<Self, FactorbenchError> {
        let price_dir = config
            .price_dir
            .clone()
            .ok_or_else(|| FactorbenchError::ConfigMissing {
                section: "data".to_string(),
                key: "price_dir".to_string(),
            })?;
        Ok(Self {
            price_dir,
            delisted_dir: config.delisted_price_dir.clone(),
            delisted_info: config.delisted_info.clone(),
            market_cap_dir: config.market_cap_dir.clone(),
            quality_dir: config.quality_dir.clone(),
            value_dir: config.value_dir.clone(),
            industry_map: config.industry_map.clone(),
        })
    }

    pub fn with_delisted(mut self, dir: impl Into<PathBuf>, info: impl Into<PathBuf>) -> Self {
        self.delisted_dir = Some(dir.into());
        self.delisted_info = Some(info.into());
        self
    }

    pub fn with_market_caps(mut self, dir: impl Into<PathBuf>) -> Self {
        self.market_cap_dir = Some(dir.into());
        self
    }

    pub fn with_fundamentals(mut self, dataset: FundamentalDataset, dir: impl Into<PathBuf>) -> Self {
        match dataset {
            FundamentalDataset::Quality => self.quality_dir = Some(dir.into()),
            FundamentalDataset::Value => self.value_dir = Some(dir.into()),
        }
        self
    }

    pub fn with_industry_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.industry_map = Some(path.into());
        self
    }

    fn symbol_file(dir: &Path, symbol: &str) -> PathBuf {
        dir.join(format!("{symbol}.csv"))
    }

    fn parse_prices(symbol: &str, table: &Table) -> Result<Vec<PriceBar>, FactorbenchError> {
        let date = table.require(&["date"])?;
        let close = table.require(&["close", "adjClose"])?;
        let volume = table.require(&["volume"])?;
        let adjusted = table.column(&["close"]).is_none();
        let pick = |plain: &str, adj: &str| {
            if adjusted {
                table.column(&[adj, plain])
            } else {
                table.column(&[plain])
            }
        };
        let (open, high, low) = (pick("open", "adjOpen"), pick("high", "adjHigh"), pick("low", "adjLow"));

        table
            .rows
            .iter()
            .map(|row| {
                let close_px = table.number(row, close)?;
                let or_close = |col: Option<usize>| -> Result<f64, FactorbenchError> {
                    col.map_or(Ok(close_px), |c| table.number(row, c))
                };
                Ok(PriceBar {
                    symbol: symbol.to_string(),
                    date: table.date(row, date)?,
                    open: or_close(open)?,
                    high: or_close(high)?,
                    low: or_close(low)?,
                    close: close_px,
                    volume: table.number(row, volume)?,
                })
            })
            .collect()
    }

    fn fundamentals_dir(&self, dataset: FundamentalDataset) -> Option<&PathBuf> {
        match dataset {
            FundamentalDataset::Quality => self.quality_dir.as_ref(),
            FundamentalDataset::Value => self.value_dir.as_ref(),
        }
    }
}

impl DataPort for CsvAdapter {
    fn load_prices(&self, symbol: &str) -> Result<Option<Vec<PriceBar>>, FactorbenchError> {
        let dirs = std::iter::once(&self.price_dir).chain(self.delisted_dir.iter());
        for dir in dirs {
            if let Some(table) = Table::read(&Self::symbol_file(dir, symbol))? {
                return Self::parse_prices(symbol, &table).map(Some);
            }
        }
        Ok(None)
    }

    fn list_symbols(&self) -> Result<Vec<String>, FactorbenchError> {
        let mut symbols: BTreeSet<String> = csv_symbols(&self.price_dir)?.into_iter().collect();
        if let Some(dir) = &self.delisted_dir {
            symbols.extend(csv_symbols(dir)?);
        }
        Ok(symbols.into_iter().collect())
    }

    fn load_delistings(&self) -> Result<Vec<DelistingRecord>, FactorbenchError> {
        let Some(path) = &self.delisted_info else {
            return Ok(Vec::new());
        };
        let Some(table) = Table::read(path)? else {
            return Ok(Vec::new());
        };
        let symbol = table.require(&["symbol"])?;
        let date = table.require(&["delistedDate", "delisted_date"])?;
        let reason = table.column(&["reason"]);

        let mut records: BTreeMap<String, DelistingRecord> = BTreeMap::new();
        for row in &table.rows {
            let sym = table.cell(row, symbol);
            if sym.is_empty() {
                continue;
            }
            let record = DelistingRecord {
                symbol: sym.to_string(),
                delisted_date: table.date(row, date)?,
                reason: reason
                    .map(|c| table.cell(row, c))
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
            };
            // One record per symbol; the last row wins.
            records.insert(record.symbol.clone(), record);
        }
        Ok(records.into_values().collect())
    }

    fn has_market_caps(&self) -> bool {
        self.market_cap_dir
            .as_ref()
            .and_then(|dir| csv_symbols(dir).ok())
            .is_some_and(|s| !s.is_empty())
    }

    fn load_market_caps(&self, symbol: &str) -> Result<Option<Vec<MarketCapPoint>>, FactorbenchError> {
        let Some(dir) = &self.market_cap_dir else {
            return Ok(None);
        };
        let Some(table) = Table::read(&Self::symbol_file(dir, symbol))? else {
            return Ok(None);
        };
        let date = table.require(&["date"])?;
        let cap = table.require(&["marketCap", "market_cap"])?;
        let points = table
            .rows
            .iter()
            .map(|row| {
                Ok(MarketCapPoint {
                    date: table.date(row, date)?,
                    market_cap: table.number(row, cap)?,
                })
            })
            .collect::<Result<Vec<_>, FactorbenchError>>()?;
        Ok(Some(points))
    }

    fn load_fundamentals(
        &self,
        dataset: FundamentalDataset,
        symbol: &str,
    ) -> Result<Option<Vec<FundamentalRecord>>, FactorbenchError> {
        let Some(dir) = self.fundamentals_dir(dataset) else {
            return Ok(None);
        };
        let Some(table) = Table::read(&Self::symbol_file(dir, symbol))? else {
            return Ok(None);
        };
        let date = table.require(&["date"])?;
        let available = table.column(&AVAILABLE_DATE_COLUMNS);
        let skip: BTreeSet<usize> = [Some(date), available, table.column(&["symbol"])]
            .into_iter()
            .flatten()
            .collect();
        let metric_cols: Vec<(&String, usize)> = table
            .headers
            .iter()
            .filter(|(_, i)| !skip.contains(i))
            .map(|(name, i)| (name, *i))
            .collect();

        let mut records = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let available_date = match available {
                Some(c) if !table.cell(row, c).is_empty() => Some(table.date(row, c)?),
                _ => None,
            };
            let mut metrics = BTreeMap::new();
            for (name, col) in &metric_cols {
                let v = table.number(row, *col)?;
                if v.is_finite() {
                    metrics.insert((*name).clone(), v);
                }
            }
            records.push(FundamentalRecord {
                date: table.date(row, date)?,
                available_date,
                metrics,
            });
        }
        Ok(Some(records))
    }

    fn load_industries(&self) -> Result<HashMap<String, String>, FactorbenchError> {
        let Some(path) = &self.industry_map else {
            return Ok(HashMap::new());
        };
        let Some(table) = Table::read(path)? else {
            return Ok(HashMap::new());
        };
        let symbol = table.require(&["symbol"])?;
        let group = table.require(&["industry", "sector"])?;
        Ok(table
            .rows
            .iter()
            .filter_map(|row| {
                let (s, g) = (table.cell(row, symbol), table.cell(row, group));
                (!s.is_empty() && !g.is_empty()).then(|| (s.to_string(), g.to_string()))
            })
            .collect())
    }
}

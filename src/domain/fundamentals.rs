//! Point-in-time fundamentals lookup.
//!
//! A record becomes visible on its `available_date` (the filing date) when
//! one is recorded, otherwise on its period `date`.

use crate::domain::error::FactorbenchError;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

pub const DEFAULT_MAX_STALENESS_DAYS: i64 = 270;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundamentalDataset {
    Quality,
    Value,
}

impl FundamentalDataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundamentalDataset::Quality => "quality",
            FundamentalDataset::Value => "value",
        }
    }
}

impl fmt::Display for FundamentalDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalRecord {
    pub date: NaiveDate,
    pub available_date: Option<NaiveDate>,
    pub metrics: BTreeMap<String, f64>,
}

impl FundamentalRecord {
    pub fn effective_date(&self) -> NaiveDate {
        self.available_date.unwrap_or(self.date)
    }
}

pub struct FundamentalsStore {
    port: Rc<dyn DataPort>,
    dataset: FundamentalDataset,
    max_staleness_days: i64,
    cache: RefCell<HashMap<String, Option<Rc<[FundamentalRecord]>>>>,
}

impl FundamentalsStore {
    pub fn new(port: Rc<dyn DataPort>, dataset: FundamentalDataset) -> Self {
        Self {
            port,
            dataset,
            max_staleness_days: DEFAULT_MAX_STALENESS_DAYS,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_max_staleness(mut self, days: i64) -> Self {
        self.max_staleness_days = days;
        self
    }

    pub fn dataset(&self) -> FundamentalDataset {
        self.dataset
    }

    /// Most recent record visible at `as_of`, unless it is older than the
    /// staleness limit.
    pub fn latest(
        &self,
        symbol: &str,
        as_of: NaiveDate,
    ) -> Result<Option<FundamentalRecord>, FactorbenchError> {
        let Some(records) = self.history(symbol)? else {
            return Ok(None);
        };
        let idx = records.partition_point(|r| r.effective_date() <= as_of);
        let Some(record) = idx.checked_sub(1).map(|i| &records[i]) else {
            return Ok(None);
        };
        if (as_of - record.effective_date()).num_days() > self.max_staleness_days {
            return Ok(None);
        }
        Ok(Some(record.clone()))
    }

    fn history(&self, symbol: &str) -> Result<Option<Rc<[FundamentalRecord]>>, FactorbenchError> {
        if let Some(cached) = self.cache.borrow().get(symbol) {
            return Ok(cached.clone());
        }
        let loaded = self
            .port
            .load_fundamentals(self.dataset, symbol)?
            .and_then(|mut records| {
                records.sort_by_key(|r| (r.effective_date(), r.date));
                (!records.is_empty()).then(|| Rc::<[FundamentalRecord]>::from(records))
            });
        self.cache
            .borrow_mut()
            .insert(symbol.to_string(), loaded.clone());
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price_bar::{DelistingRecord, PriceBar};

    struct FundamentalsPort;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(date: &str, available: Option<&str>, roe: f64) -> FundamentalRecord {
        FundamentalRecord {
            date: d(date),
            available_date: available.map(d),
            metrics: BTreeMap::from([("roe".to_string(), roe)]),
        }
    }

    impl DataPort for FundamentalsPort {
        fn load_prices(&self, _symbol: &str) -> Result<Option<Vec<PriceBar>>, FactorbenchError> {
            Ok(None)
        }
        fn list_symbols(&self) -> Result<Vec<String>, FactorbenchError> {
            Ok(vec![])
        }
        fn load_delistings(&self) -> Result<Vec<DelistingRecord>, FactorbenchError> {
            Ok(vec![])
        }
        fn load_fundamentals(
            &self,
            dataset: FundamentalDataset,
            _symbol: &str,
        ) -> Result<Option<Vec<FundamentalRecord>>, FactorbenchError> {
            match dataset {
                FundamentalDataset::Quality => Ok(Some(vec![
                    record("2020-03-31", Some("2020-05-10"), 0.10),
                    record("2020-06-30", Some("2020-08-09"), 0.20),
                    record("2019-12-31", None, 0.05),
                ])),
                FundamentalDataset::Value => Ok(None),
            }
        }
    }

    #[test]
    fn filing_date_gates_visibility() {
        let store = FundamentalsStore::new(Rc::new(FundamentalsPort), FundamentalDataset::Quality);
        // Q1 period has ended but is not filed yet.
        let r = store.latest("AAA", d("2020-05-01")).unwrap().unwrap();
        assert_eq!(r.metrics["roe"], 0.05);
        let r = store.latest("AAA", d("2020-05-10")).unwrap().unwrap();
        assert_eq!(r.metrics["roe"], 0.10);
        assert!(store.latest("AAA", d("2019-12-30")).unwrap().is_none());
    }

    #[test]
    fn stale_records_are_ignored() {
        let store = FundamentalsStore::new(Rc::new(FundamentalsPort), FundamentalDataset::Quality)
            .with_max_staleness(30);
        assert!(store.latest("AAA", d("2020-09-08")).unwrap().is_some());
        assert!(store.latest("AAA", d("2020-09-09")).unwrap().is_none());
    }

    #[test]
    fn missing_dataset_is_absent() {
        let store = FundamentalsStore::new(Rc::new(FundamentalsPort), FundamentalDataset::Value);
        assert!(store.latest("AAA", d("2021-01-01")).unwrap().is_none());
    }
}

//! Point-in-time price lookup with delisting cutoff.
//!
//! Each symbol is loaded from the [`DataPort`] at most once and kept for the
//! lifetime of the store. Queries never return bars dated after a symbol's
//! delisting date, whatever end date the caller asks for.

use crate::domain::error::FactorbenchError;
use crate::domain::price_bar::{DelistingRecord, PriceBar};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::{Deref, Range};
use std::rc::Rc;
use tracing::debug;

/// A contiguous, date-ordered view into one symbol's cached history.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    bars: Rc<[PriceBar]>,
    range: Range<usize>,
}

impl PriceWindow {
    pub fn first_date(&self) -> NaiveDate {
        self[0].date
    }

    pub fn last_date(&self) -> NaiveDate {
        self[self.len() - 1].date
    }

    pub fn closes(&self) -> Vec<f64> {
        self.iter().map(|b| b.close).collect()
    }

    /// The trailing `n` bars (or all of them when fewer exist).
    pub fn tail(&self, n: usize) -> &[PriceBar] {
        let len = self.len();
        &self[len.saturating_sub(n)..]
    }
}

impl Deref for PriceWindow {
    type Target = [PriceBar];

    fn deref(&self) -> &[PriceBar] {
        &self.bars[self.range.clone()]
    }
}

pub struct PriceStore {
    port: Rc<dyn DataPort>,
    symbols: Vec<String>,
    delistings: HashMap<String, DelistingRecord>,
    cache: RefCell<HashMap<String, Option<Rc<[PriceBar]>>>>,
}

impl PriceStore {
    /// Reads the symbol inventory and delisting table up front; price
    /// histories are loaded lazily.
    pub fn new(port: Rc<dyn DataPort>) -> Result<Self, FactorbenchError> {
        let mut symbols = port.list_symbols()?;
        symbols.sort();
        symbols.dedup();

        let delistings = port
            .load_delistings()?
            .into_iter()
            .map(|d| (d.symbol.clone(), d))
            .collect::<HashMap<_, _>>();

        debug!(
            symbols = symbols.len(),
            delisted = delistings.len(),
            "price store inventory loaded"
        );

        Ok(Self {
            port,
            symbols,
            delistings,
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// All known symbols, sorted.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn delisting(&self, symbol: &str) -> Option<&DelistingRecord> {
        self.delistings.get(symbol)
    }

    /// True once `date` reaches the symbol's delisting date.
    pub fn is_delisted(&self, symbol: &str, date: NaiveDate) -> bool {
        self.delistings
            .get(symbol)
            .is_some_and(|d| date >= d.delisted_date)
    }

    /// Bars with `start <= date <= end` (both bounds inclusive and optional).
    ///
    /// The effective end is clamped to the delisting date. Unknown symbols and
    /// empty ranges resolve to `Ok(None)`.
    pub fn get(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<PriceWindow>, FactorbenchError> {
        let end = match (end, self.delistings.get(symbol)) {
            (Some(e), Some(d)) => Some(e.min(d.delisted_date)),
            (None, Some(d)) => Some(d.delisted_date),
            (e, None) => e,
        };

        let Some(bars) = self.history(symbol)? else {
            return Ok(None);
        };

        let lo = match start {
            Some(s) => bars.partition_point(|b| b.date < s),
            None => 0,
        };
        let hi = match end {
            Some(e) => bars.partition_point(|b| b.date <= e),
            None => bars.len(),
        };

        if lo >= hi {
            return Ok(None);
        }

        Ok(Some(PriceWindow {
            bars,
            range: lo..hi,
        }))
    }

    fn history(&self, symbol: &str) -> Result<Option<Rc<[PriceBar]>>, FactorbenchError> {
        if let Some(cached) = self.cache.borrow().get(symbol) {
            return Ok(cached.clone());
        }

        // Errors are not cached: a later call retries the load.
        let loaded = self.port.load_prices(symbol)?.and_then(|mut bars| {
            bars.retain(|b| b.close.is_finite());
            bars.sort_by_key(|b| b.date);
            bars.dedup_by_key(|b| b.date);
            if bars.is_empty() {
                None
            } else {
                Some(Rc::<[PriceBar]>::from(bars))
            }
        });

        self.cache
            .borrow_mut()
            .insert(symbol.to_string(), loaded.clone());
        Ok(loaded)
    }
}

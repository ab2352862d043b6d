//! Point-in-time market capitalisation lookup.

use crate::domain::error::FactorbenchError;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketCapPoint {
    pub date: NaiveDate,
    pub market_cap: f64,
}

pub struct MarketCapStore {
    port: Rc<dyn DataPort>,
    cache: RefCell<HashMap<String, Option<Rc<[MarketCapPoint]>>>>,
}

impl MarketCapStore {
    pub fn new(port: Rc<dyn DataPort>) -> Self {
        Self {
            port,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// False when no market-cap source is configured; the universe filter
    /// then skips its market-cap stage entirely.
    pub fn is_available(&self) -> bool {
        self.port.has_market_caps()
    }

    /// Last recorded value dated on or before `as_of`.
    pub fn get(&self, symbol: &str, as_of: NaiveDate) -> Result<Option<f64>, FactorbenchError> {
        let Some(points) = self.history(symbol)? else {
            return Ok(None);
        };
        let idx = points.partition_point(|p| p.date <= as_of);
        Ok(idx.checked_sub(1).map(|i| points[i].market_cap))
    }

    fn history(&self, symbol: &str) -> Result<Option<Rc<[MarketCapPoint]>>, FactorbenchError> {
        if let Some(cached) = self.cache.borrow().get(symbol) {
            return Ok(cached.clone());
        }
        let loaded = self.port.load_market_caps(symbol)?.and_then(|mut points| {
            points.retain(|p| p.market_cap.is_finite());
            points.sort_by_key(|p| p.date);
            (!points.is_empty()).then(|| Rc::<[MarketCapPoint]>::from(points))
        });
        self.cache
            .borrow_mut()
            .insert(symbol.to_string(), loaded.clone());
        Ok(loaded)
    }
}

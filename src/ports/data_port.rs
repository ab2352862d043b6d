//! Point-in-time data access port.
//!
//! Every method returns `Ok(None)` (or an empty collection) when the
//! requested key is simply not present; `Err` is reserved for storage that
//! exists but cannot be read or parsed.

use crate::domain::error::FactorbenchError;
use crate::domain::fundamentals::{FundamentalDataset, FundamentalRecord};
use crate::domain::market_cap::MarketCapPoint;
use crate::domain::price_bar::{DelistingRecord, PriceBar};
use std::collections::HashMap;

pub trait DataPort {
    /// Full price history for `symbol`, in any order.
    fn load_prices(&self, symbol: &str) -> Result<Option<Vec<PriceBar>>, FactorbenchError>;

    /// Every symbol with price history, active or delisted.
    fn list_symbols(&self) -> Result<Vec<String>, FactorbenchError>;

    /// At most one record per symbol.
    fn load_delistings(&self) -> Result<Vec<DelistingRecord>, FactorbenchError>;

    /// Whether a market-cap history source is configured at all.
    fn has_market_caps(&self) -> bool {
        false
    }

    fn load_market_caps(
        &self,
        _symbol: &str,
    ) -> Result<Option<Vec<MarketCapPoint>>, FactorbenchError> {
        Ok(None)
    }

    fn load_fundamentals(
        &self,
        _dataset: FundamentalDataset,
        _symbol: &str,
    ) -> Result<Option<Vec<FundamentalRecord>>, FactorbenchError> {
        Ok(None)
    }

    /// Symbol to industry (or sector) group.
    fn load_industries(&self) -> Result<HashMap<String, String>, FactorbenchError> {
        Ok(HashMap::new())
    }
}

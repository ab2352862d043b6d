//! Bundle of the point-in-time stores a run reads from.

use crate::domain::error::FactorbenchError;
use crate::domain::fundamentals::{FundamentalDataset, FundamentalsStore};
use crate::domain::market_cap::MarketCapStore;
use crate::domain::price_store::PriceStore;
use crate::ports::data_port::DataPort;
use std::collections::HashMap;
use std::rc::Rc;

pub struct MarketData {
    pub prices: PriceStore,
    pub market_caps: MarketCapStore,
    pub quality: FundamentalsStore,
    pub value: FundamentalsStore,
    pub industries: HashMap<String, String>,
}

impl MarketData {
    pub fn new(port: Rc<dyn DataPort>) -> Result<Self, FactorbenchError> {
        let prices = PriceStore::new(port.clone())?;
        let industries = port.load_industries()?;
        Ok(Self {
            prices,
            market_caps: MarketCapStore::new(port.clone()),
            quality: FundamentalsStore::new(port.clone(), FundamentalDataset::Quality),
            value: FundamentalsStore::new(port, FundamentalDataset::Value),
            industries,
        })
    }

    pub fn with_staleness(mut self, quality_days: i64, value_days: i64) -> Self {
        self.quality = self.quality.with_max_staleness(quality_days);
        self.value = self.value.with_max_staleness(value_days);
        self
    }

    pub fn fundamentals(&self, dataset: FundamentalDataset) -> &FundamentalsStore {
        match dataset {
            FundamentalDataset::Quality => &self.quality,
            FundamentalDataset::Value => &self.value,
        }
    }

    pub fn industry(&self, symbol: &str) -> Option<&str> {
        self.industries.get(symbol).map(String::as_str)
    }
}

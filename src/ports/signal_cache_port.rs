//! Signal cache persistence port.

use crate::domain::error::FactorbenchError;
use crate::domain::signal::Signal;
use chrono::NaiveDate;

/// Identifies one cached cross-section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub config_hash: String,
    pub weights_hash: String,
    pub date: NaiveDate,
}

pub trait SignalCachePort {
    /// `Ok(None)` on a miss. An entry that exists but cannot be decoded is an `Err`.
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<Signal>>, FactorbenchError>;

    fn put(&mut self, key: &CacheKey, signals: &[Signal]) -> Result<(), FactorbenchError>;
}

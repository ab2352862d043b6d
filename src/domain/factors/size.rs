//! Size: point-in-time market capitalisation.

use super::FactorProvider;
use crate::domain::error::FactorbenchError;
use crate::domain::market_data::MarketData;
use chrono::NaiveDate;

pub struct Size;

impl FactorProvider for Size {
    fn name(&self) -> &str {
        "size"
    }

    fn value(
        &self,
        data: &MarketData,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, FactorbenchError> {
        if !data.market_caps.is_available() {
            return Ok(None);
        }
        data.market_caps.get(symbol, date)
    }
}

//! Quality and value: weighted composites of fundamental metrics.
//!
//! Each metric is compressed with a signed log, `sign(v) * ln(1 + |v|)`, so a
//! single large ratio cannot dominate the score.

use super::FactorProvider;
use crate::domain::error::FactorbenchError;
use crate::domain::fundamentals::{FundamentalDataset, DEFAULT_MAX_STALENESS_DAYS};
use crate::domain::market_data::MarketData;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeParams {
    /// Metric name to weight. Negative weights reward low values.
    pub weights: BTreeMap<String, f64>,
    pub max_staleness_days: i64,
}

impl Default for CompositeParams {
    fn default() -> Self {
        CompositeParams {
            weights: BTreeMap::new(),
            max_staleness_days: DEFAULT_MAX_STALENESS_DAYS,
        }
    }
}

pub struct FundamentalComposite {
    dataset: FundamentalDataset,
    params: CompositeParams,
}

impl FundamentalComposite {
    pub fn quality(params: CompositeParams) -> Self {
        Self {
            dataset: FundamentalDataset::Quality,
            params,
        }
    }

    pub fn value(params: CompositeParams) -> Self {
        Self {
            dataset: FundamentalDataset::Value,
            params,
        }
    }
}

fn compress(v: f64) -> f64 {
    v.signum() * v.abs().ln_1p()
}

impl FactorProvider for FundamentalComposite {
    fn name(&self) -> &str {
        self.dataset.as_str()
    }

    fn value(
        &self,
        data: &MarketData,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, FactorbenchError> {
        let Some(record) = data.fundamentals(self.dataset).latest(symbol, date)? else {
            return Ok(None);
        };

        let (mut score, mut weight_sum) = (0.0, 0.0);
        for (metric, w) in &self.params.weights {
            let Some(v) = record.metrics.get(metric).filter(|v| v.is_finite()) else {
                continue;
            };
            score += w * compress(*v);
            weight_sum += w.abs();
        }

        if weight_sum <= 0.0 {
            return Ok(None);
        }
        Ok(Some(score / weight_sum))
    }
}

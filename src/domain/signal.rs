//! Cross-sectional signal construction.
//!
//! For one rebalance date the pipeline screens the universe, evaluates every
//! weighted factor at its lagged date, combines the available values into a
//! weighted score and standardizes the resulting cross-section.

use crate::domain::error::FactorbenchError;
use crate::domain::factors::{builtin_providers, resolve_factor_date, FactorParams, FactorProvider};
use crate::domain::market_data::MarketData;
use crate::domain::standardize::{standardize, Exposures, StandardizeConfig};
use crate::domain::universe::UniverseFilter;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Factor name to weight.
pub type FactorWeights = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub date: NaiveDate,
    pub value: f64,
}

/// What a weighted factor contributes when it has no value for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Skip the factor; the score sums the available factors only.
    Drop,
    /// Use this value in place of the missing one.
    Fill(f64),
    /// Propagate NaN into the score.
    Keep,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalConfig {
    pub lag_days: i64,
    /// Per-factor lag overrides.
    pub factor_lags: BTreeMap<String, i64>,
    pub missing_policy: MissingPolicy,
    pub standardize: StandardizeConfig,
    /// Trailing bars for the universe liquidity screen.
    pub universe_lookback: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            lag_days: 0,
            factor_lags: BTreeMap::new(),
            missing_policy: MissingPolicy::Drop,
            standardize: StandardizeConfig::default(),
            universe_lookback: 20,
        }
    }
}

/// One symbol's factor values and combined score before standardization.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorRow {
    pub symbol: String,
    pub factors: BTreeMap<String, Option<f64>>,
    pub score: f64,
}

pub struct SignalPipeline {
    providers: BTreeMap<String, Box<dyn FactorProvider>>,
    universe: UniverseFilter,
    config: SignalConfig,
    symbol_errors: usize,
}

impl SignalPipeline {
    pub fn new(config: SignalConfig, universe: UniverseFilter) -> Self {
        Self {
            providers: BTreeMap::new(),
            universe,
            config,
            symbol_errors: 0,
        }
    }

    /// A pipeline with every built-in provider registered.
    pub fn with_builtin(config: SignalConfig, universe: UniverseFilter, params: &FactorParams) -> Self {
        let mut pipeline = Self::new(config, universe);
        for provider in builtin_providers(params) {
            pipeline.register(provider);
        }
        pipeline
    }

    /// Register a provider under its own name, replacing any previous one.
    pub fn register(&mut self, provider: Box<dyn FactorProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn factor_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    pub fn universe_filter_mut(&mut self) -> &mut UniverseFilter {
        &mut self.universe
    }

    /// Per-symbol factor failures recovered so far.
    pub fn symbol_errors(&self) -> usize {
        self.symbol_errors
    }

    /// Every weighted factor and neutralization column must have a provider.
    pub fn validate_weights(&self, weights: &FactorWeights) -> Result<(), FactorbenchError> {
        let names = weights
            .keys()
            .chain(self.config.standardize.neutralize_cols.iter());
        for name in names {
            if !self.providers.contains_key(name) {
                return Err(FactorbenchError::UnknownFactor { name: name.clone() });
            }
        }
        Ok(())
    }

    /// Values of the `needed` factors for one symbol, each at its lagged date.
    pub fn factor_values(
        &self,
        data: &MarketData,
        symbol: &str,
        date: NaiveDate,
        needed: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Option<f64>>, FactorbenchError> {
        let mut out = BTreeMap::new();
        for name in needed {
            let provider = self
                .providers
                .get(name)
                .ok_or_else(|| FactorbenchError::UnknownFactor { name: name.clone() })?;
            let factor_date = resolve_factor_date(
                date,
                self.config.lag_days,
                self.config.factor_lags.get(name).copied(),
            );
            let value = provider
                .value(data, symbol, factor_date)?
                .filter(|v| !v.is_nan());
            out.insert(name.clone(), value);
        }
        Ok(out)
    }

    /// Raw combined scores for the universe at `date`.
    pub fn factor_rows(
        &mut self,
        data: &MarketData,
        date: NaiveDate,
        weights: &FactorWeights,
    ) -> Result<Vec<FactorRow>, FactorbenchError> {
        self.validate_weights(weights)?;

        let universe = self
            .universe
            .universe(data, date, self.config.universe_lookback);
        if universe.is_empty() {
            return Ok(Vec::new());
        }

        let active: Vec<(&String, f64)> = weights
            .iter()
            .filter(|(_, w)| w.is_finite() && **w != 0.0)
            .map(|(k, w)| (k, *w))
            .collect();
        let mut needed: BTreeSet<String> = active.iter().map(|(k, _)| (*k).clone()).collect();
        needed.extend(self.config.standardize.neutralize_cols.iter().cloned());

        let mut rows = Vec::with_capacity(universe.len());
        for symbol in universe {
            let factors = match self.factor_values(data, &symbol, date, &needed) {
                Ok(f) => f,
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    warn!(%symbol, %date, error = %e, "factor evaluation failed");
                    self.symbol_errors += 1;
                    continue;
                }
            };

            let mut score = 0.0;
            let mut used = false;
            let mut poisoned = false;
            for (name, w) in &active {
                match factors.get(*name).copied().flatten() {
                    Some(v) => {
                        score += w * v;
                        used = true;
                    }
                    None => match self.config.missing_policy {
                        MissingPolicy::Drop => {}
                        MissingPolicy::Fill(fill) => score += w * fill,
                        MissingPolicy::Keep => poisoned = true,
                    },
                }
            }
            if !used {
                continue;
            }
            rows.push(FactorRow {
                symbol,
                factors,
                score: if poisoned { f64::NAN } else { score },
            });
        }

        if self.config.missing_policy != MissingPolicy::Keep {
            rows.retain(|r| r.score.is_finite());
        }
        Ok(rows)
    }

    /// Standardized signal cross-section at `date`.
    pub fn compute(
        &mut self,
        data: &MarketData,
        date: NaiveDate,
        weights: &FactorWeights,
    ) -> Result<Vec<Signal>, FactorbenchError> {
        let rows = self.factor_rows(data, date, weights)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let scores: Vec<f64> = rows.iter().map(|r| r.score).collect();
        let cfg = &self.config.standardize;
        let values = if cfg.is_active() {
            let exposures = Exposures {
                industries: rows.iter().map(|r| data.industry(&r.symbol)).collect(),
                columns: cfg
                    .neutralize_cols
                    .iter()
                    .map(|c| {
                        rows.iter()
                            .map(|r| r.factors.get(c).copied().flatten().unwrap_or(f64::NAN))
                            .collect()
                    })
                    .collect(),
            };
            standardize(&scores, &exposures, cfg)
        } else {
            scores
        };

        let keep_nan = self.config.missing_policy == MissingPolicy::Keep;
        let signals: Vec<Signal> = rows
            .into_iter()
            .zip(values)
            .filter(|(_, v)| keep_nan || !v.is_nan())
            .map(|(r, value)| Signal {
                symbol: r.symbol,
                date,
                value,
            })
            .collect();

        debug!(%date, signals = signals.len(), "signals computed");
        Ok(signals)
    }
}

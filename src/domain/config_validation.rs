//! Range and consistency checks on a parsed [`RunConfig`].
//!
//! Parsing only rejects malformed values; everything here is about values
//! that parse but cannot describe a sensible run.

use crate::domain::config::{Backend, OosConfig, RunConfig, SmoothMethod};
use crate::domain::error::FactorbenchError;
use crate::domain::signal::MissingPolicy;

pub fn validate_run_config(config: &RunConfig) -> Result<(), FactorbenchError> {
    validate_dates(config)?;
    validate_schedule(config)?;
    validate_buckets(config)?;
    validate_weights(config)?;
    validate_universe(config)?;
    validate_signal(config)?;
    validate_execution(config)?;
    validate_smoothing(config)?;
    validate_data(config)?;
    Ok(())
}

/// Checks the `[oos]` windows; the section is required by the caller.
pub fn validate_oos(config: &RunConfig) -> Result<OosConfig, FactorbenchError> {
    let Some(oos) = config.oos else {
        return Err(FactorbenchError::ConfigMissing {
            section: "oos".to_string(),
            key: "train_start".to_string(),
        });
    };
    if oos.train_start >= oos.train_end {
        return Err(FactorbenchError::invalid(
            "oos",
            "train_start",
            "train_start must be before train_end",
        ));
    }
    if oos.test_start >= oos.test_end {
        return Err(FactorbenchError::invalid(
            "oos",
            "test_start",
            "test_start must be before test_end",
        ));
    }
    if oos.test_start <= oos.train_end {
        return Err(FactorbenchError::invalid(
            "oos",
            "test_start",
            "test window must start after the train window ends",
        ));
    }
    Ok(oos)
}

fn validate_dates(config: &RunConfig) -> Result<(), FactorbenchError> {
    if config.backtest.start_date >= config.backtest.end_date {
        return Err(FactorbenchError::invalid(
            "backtest",
            "start_date",
            "start_date must be before end_date",
        ));
    }
    Ok(())
}

fn validate_schedule(config: &RunConfig) -> Result<(), FactorbenchError> {
    if config.backtest.rebalance_freq == 0 {
        return Err(FactorbenchError::invalid(
            "backtest",
            "rebalance_freq",
            "rebalance_freq must be at least 1",
        ));
    }
    if config.backtest.holding_period == 0 {
        return Err(FactorbenchError::invalid(
            "backtest",
            "holding_period",
            "holding_period must be at least 1",
        ));
    }
    Ok(())
}

fn validate_buckets(config: &RunConfig) -> Result<(), FactorbenchError> {
    let bt = &config.backtest;
    if !(0.0..=1.0).contains(&bt.long_pct) {
        return Err(FactorbenchError::invalid(
            "backtest",
            "long_pct",
            "long_pct must be between 0 and 1",
        ));
    }
    if !(0.0..=1.0).contains(&bt.short_pct) {
        return Err(FactorbenchError::invalid(
            "backtest",
            "short_pct",
            "short_pct must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_weights(config: &RunConfig) -> Result<(), FactorbenchError> {
    if config.weights.is_empty() {
        return Err(FactorbenchError::ConfigMissing {
            section: "weights".to_string(),
            key: "<factor>".to_string(),
        });
    }
    if let Some((name, _)) = config.weights.iter().find(|(_, w)| !w.is_finite()) {
        return Err(FactorbenchError::invalid("weights", name, "weight must be finite"));
    }
    if config.weights.values().all(|w| *w == 0.0) {
        return Err(FactorbenchError::invalid(
            "weights",
            "<factor>",
            "at least one weight must be non-zero",
        ));
    }
    Ok(())
}

fn validate_universe(config: &RunConfig) -> Result<(), FactorbenchError> {
    let u = &config.universe;
    if u.min_price < 0.0 {
        return Err(FactorbenchError::invalid(
            "universe",
            "min_price",
            "min_price must be non-negative",
        ));
    }
    if u.min_dollar_volume < 0.0 {
        return Err(FactorbenchError::invalid(
            "universe",
            "min_dollar_volume",
            "min_dollar_volume must be non-negative",
        ));
    }
    if u.min_market_cap.is_some_and(|m| m < 0.0) {
        return Err(FactorbenchError::invalid(
            "universe",
            "min_market_cap",
            "min_market_cap must be non-negative",
        ));
    }
    if u.lookback == 0 {
        return Err(FactorbenchError::invalid(
            "universe",
            "lookback",
            "lookback must be at least 1",
        ));
    }
    if u.max_volatility.is_some_and(|v| v <= 0.0) {
        return Err(FactorbenchError::invalid(
            "universe",
            "max_volatility",
            "max_volatility must be positive",
        ));
    }
    Ok(())
}

fn validate_signal(config: &RunConfig) -> Result<(), FactorbenchError> {
    let s = &config.signal;
    if s.lag_days < 0 {
        return Err(FactorbenchError::invalid(
            "signal",
            "lag_days",
            "lag_days must be non-negative",
        ));
    }
    if let Some((name, _)) = s.factor_lags.iter().find(|(_, lag)| **lag < 0) {
        return Err(FactorbenchError::invalid("lags", name, "lag must be non-negative"));
    }
    if let Some((low, high)) = s.standardize.winsor_pct {
        if !(0.0..1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
            return Err(FactorbenchError::invalid(
                "signal",
                "winsor_pct_low",
                "percentile bounds must satisfy 0 <= low < high <= 1",
            ));
        }
    }
    if s.standardize.winsor_z.is_some_and(|z| z <= 0.0) {
        return Err(FactorbenchError::invalid(
            "signal",
            "winsor_z",
            "winsor_z must be positive",
        ));
    }
    if s.standardize.industry_min_group == 0 {
        return Err(FactorbenchError::invalid(
            "signal",
            "industry_min_group",
            "industry_min_group must be at least 1",
        ));
    }
    if let MissingPolicy::Fill(v) = s.missing_policy {
        if !v.is_finite() {
            return Err(FactorbenchError::invalid(
                "signal",
                "missing_fill",
                "missing_fill must be finite",
            ));
        }
    }
    Ok(())
}

fn validate_execution(config: &RunConfig) -> Result<(), FactorbenchError> {
    let e = &config.execution;
    if e.transaction_cost < 0.0 {
        return Err(FactorbenchError::invalid(
            "execution",
            "transaction_cost",
            "transaction_cost must be non-negative",
        ));
    }
    if e.execution_delay < 0 {
        return Err(FactorbenchError::invalid(
            "execution",
            "execution_delay",
            "execution_delay must be non-negative",
        ));
    }
    if e.cost_multiplier < 0.0 {
        return Err(FactorbenchError::invalid(
            "execution",
            "cost_multiplier",
            "cost_multiplier must be non-negative",
        ));
    }
    if e.trade_size_usd <= 0.0 {
        return Err(FactorbenchError::invalid(
            "execution",
            "trade_size_usd",
            "trade_size_usd must be positive",
        ));
    }
    if !(e.limit_up_down_pct > 0.0 && e.limit_up_down_pct < 1.0) {
        return Err(FactorbenchError::invalid(
            "execution",
            "limit_up_down_pct",
            "limit_up_down_pct must be between 0 and 1",
        ));
    }
    if e.stamp_tax_rate < 0.0 {
        return Err(FactorbenchError::invalid(
            "execution",
            "stamp_tax_rate",
            "stamp_tax_rate must be non-negative",
        ));
    }
    Ok(())
}

fn validate_smoothing(config: &RunConfig) -> Result<(), FactorbenchError> {
    let sm = &config.backtest.smoothing;
    if sm.method == SmoothMethod::Ema && sm.alpha.is_some_and(|a| !(a > 0.0 && a < 1.0)) {
        return Err(FactorbenchError::invalid(
            "backtest",
            "smooth_alpha",
            "smooth_alpha must be in (0, 1)",
        ));
    }
    Ok(())
}

fn validate_data(config: &RunConfig) -> Result<(), FactorbenchError> {
    let d = &config.data;
    let (key, present) = match d.backend {
        Backend::Csv => ("price_dir", d.price_dir.is_some()),
        Backend::Sqlite => ("sqlite_path", d.sqlite_path.is_some()),
    };
    if !present {
        return Err(FactorbenchError::ConfigMissing {
            section: "data".to_string(),
            key: key.to_string(),
        });
    }
    if d.pool_size == 0 {
        return Err(FactorbenchError::invalid(
            "data",
            "pool_size",
            "pool_size must be at least 1",
        ));
    }
    Ok(())
}

//! Run configuration assembled from a [`ConfigPort`].
//!
//! Every section parses into a typed struct with defaults. Malformed values
//! are configuration errors; range checks live in `config_validation`.
//! The whole `RunConfig` (minus `[cache]`) is hashed to namespace cached
//! signals, so any field change moves the cache key.

use crate::domain::calendar::RebalanceMode;
use crate::domain::error::FactorbenchError;
use crate::domain::execution::ExecutionConfig;
use crate::domain::factors::{
    BetaParams, CompositeParams, FactorParams, LowVolParams, MomentumParams, ReversalMode,
    ReversalParams,
};
use crate::domain::signal::{FactorWeights, MissingPolicy, SignalConfig};
use crate::domain::standardize::{RankMethod, StandardizeConfig};
use crate::domain::universe::UniverseConfig;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Csv,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataConfig {
    pub backend: Backend,
    pub price_dir: Option<PathBuf>,
    pub delisted_price_dir: Option<PathBuf>,
    pub delisted_info: Option<PathBuf>,
    pub market_cap_dir: Option<PathBuf>,
    pub quality_dir: Option<PathBuf>,
    pub value_dir: Option<PathBuf>,
    pub industry_map: Option<PathBuf>,
    pub sqlite_path: Option<PathBuf>,
    pub pool_size: u32,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            backend: Backend::Csv,
            price_dir: None,
            delisted_price_dir: None,
            delisted_info: None,
            market_cap_dir: None,
            quality_dir: None,
            value_dir: None,
            industry_map: None,
            sqlite_path: None,
            pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothMethod {
    Sma,
    Ema,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmoothingConfig {
    /// Number of rebalance dates averaged; 0 or 1 disables smoothing.
    pub window: usize,
    pub method: SmoothMethod,
    /// EMA weight on the newest value; defaults to `2 / (window + 1)`.
    pub alpha: Option<f64>,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        SmoothingConfig {
            window: 0,
            method: SmoothMethod::Sma,
            alpha: None,
        }
    }
}

/// The run window and smoothing are applied after signals are computed, so
/// they stay out of the serialized form that names the cache namespace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestConfig {
    #[serde(skip)]
    pub start_date: NaiveDate,
    #[serde(skip)]
    pub end_date: NaiveDate,
    pub rebalance_freq: usize,
    pub holding_period: usize,
    pub long_pct: f64,
    pub short_pct: f64,
    pub rebalance_mode: RebalanceMode,
    pub calendar_symbol: Option<String>,
    #[serde(skip)]
    pub smoothing: SmoothingConfig,
}

impl BacktestConfig {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        BacktestConfig {
            start_date,
            end_date,
            rebalance_freq: 5,
            holding_period: 10,
            long_pct: 0.2,
            short_pct: 0.0,
            rebalance_mode: RebalanceMode::EveryN,
            calendar_symbol: None,
            smoothing: SmoothingConfig::default(),
        }
    }
}

/// Train and test windows for an out-of-sample comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OosConfig {
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
    pub enabled: bool,
    /// Recompute every date and overwrite existing entries.
    pub refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    pub data: DataConfig,
    pub universe: UniverseConfig,
    pub signal: SignalConfig,
    pub factors: FactorParams,
    pub execution: ExecutionConfig,
    pub backtest: BacktestConfig,
    #[serde(skip)]
    pub oos: Option<OosConfig>,
    #[serde(skip)]
    pub weights: FactorWeights,
    #[serde(skip)]
    pub cache: CacheConfig,
}

impl RunConfig {
    /// Defaults for every section with the given date range and weights.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, weights: FactorWeights) -> Self {
        RunConfig {
            data: DataConfig::default(),
            universe: UniverseConfig::default(),
            signal: SignalConfig::default(),
            factors: FactorParams::default(),
            execution: ExecutionConfig::default(),
            backtest: BacktestConfig::new(start_date, end_date),
            oos: None,
            weights,
            cache: CacheConfig::default(),
        }
    }

    pub fn from_port(port: &dyn ConfigPort) -> Result<Self, FactorbenchError> {
        let universe = parse_universe(port)?;
        let mut signal = parse_signal(port)?;
        signal.universe_lookback = universe.lookback;

        Ok(RunConfig {
            data: parse_data(port)?,
            universe,
            signal,
            factors: parse_factors(port)?,
            execution: parse_execution(port)?,
            backtest: parse_backtest(port)?,
            oos: parse_oos(port)?,
            weights: parse_weights(port)?,
            cache: parse_cache(port)?,
        })
    }

    pub fn config_hash(&self) -> Result<String, FactorbenchError> {
        stable_hash(self)
    }

    pub fn weights_hash(&self) -> Result<String, FactorbenchError> {
        stable_hash(&self.weights)
    }
}

/// Hex blake3 digest of the JSON serialization of `value`.
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, FactorbenchError> {
    let bytes = serde_json::to_vec(value).map_err(|e| FactorbenchError::Cache {
        reason: format!("cannot serialize value for hashing: {e}"),
    })?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

pub fn parse_date(section: &str, key: &str, value: &str) -> Result<NaiveDate, FactorbenchError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        FactorbenchError::invalid(section, key, format!("'{value}' is not a YYYY-MM-DD date"))
    })
}

/// Non-empty trimmed value, or `None`.
fn text(port: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    port.get_string(section, key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn number<T: FromStr>(
    port: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, FactorbenchError> {
    match text(port, section, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| FactorbenchError::invalid(section, key, format!("'{raw}' is not a number"))),
    }
}

fn number_or<T: FromStr>(
    port: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, FactorbenchError> {
    Ok(number(port, section, key)?.unwrap_or(default))
}

fn flag(
    port: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: bool,
) -> Result<bool, FactorbenchError> {
    match text(port, section, key) {
        None => Ok(default),
        Some(raw) => parse_bool(&raw)
            .ok_or_else(|| FactorbenchError::invalid(section, key, format!("'{raw}' is not a boolean"))),
    }
}

fn path(port: &dyn ConfigPort, section: &str, key: &str) -> Option<PathBuf> {
    text(port, section, key).map(PathBuf::from)
}

fn list(port: &dyn ConfigPort, section: &str, key: &str) -> Vec<String> {
    text(port, section, key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn required_date(
    port: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<NaiveDate, FactorbenchError> {
    let raw = text(port, section, key).ok_or_else(|| FactorbenchError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    })?;
    parse_date(section, key, &raw)
}

/// `metric:weight, metric:weight` pairs.
fn metric_weights(
    port: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<BTreeMap<String, f64>, FactorbenchError> {
    let mut out = BTreeMap::new();
    for item in list(port, section, key) {
        let Some((metric, weight)) = item.split_once(':') else {
            return Err(FactorbenchError::invalid(
                section,
                key,
                format!("'{item}' is not metric:weight"),
            ));
        };
        let weight: f64 = weight.trim().parse().map_err(|_| {
            FactorbenchError::invalid(section, key, format!("'{item}' has a malformed weight"))
        })?;
        out.insert(metric.trim().to_string(), weight);
    }
    Ok(out)
}

fn parse_data(port: &dyn ConfigPort) -> Result<DataConfig, FactorbenchError> {
    let backend = match text(port, "data", "backend").as_deref() {
        None | Some("csv") => Backend::Csv,
        Some("sqlite") => Backend::Sqlite,
        Some(other) => {
            return Err(FactorbenchError::invalid(
                "data",
                "backend",
                format!("unknown backend '{other}'"),
            ));
        }
    };
    Ok(DataConfig {
        backend,
        price_dir: path(port, "data", "price_dir"),
        delisted_price_dir: path(port, "data", "delisted_price_dir"),
        delisted_info: path(port, "data", "delisted_info"),
        market_cap_dir: path(port, "data", "market_cap_dir"),
        quality_dir: path(port, "data", "quality_dir"),
        value_dir: path(port, "data", "value_dir"),
        industry_map: path(port, "data", "industry_map"),
        sqlite_path: path(port, "data", "sqlite_path"),
        pool_size: number_or(port, "data", "pool_size", 4)?,
    })
}

fn parse_universe(port: &dyn ConfigPort) -> Result<UniverseConfig, FactorbenchError> {
    let d = UniverseConfig::default();
    let min_market_cap = match text(port, "universe", "min_market_cap") {
        None => d.min_market_cap,
        Some(raw) if raw.eq_ignore_ascii_case("none") => None,
        Some(_) => number(port, "universe", "min_market_cap")?,
    };
    Ok(UniverseConfig {
        min_price: number_or(port, "universe", "min_price", d.min_price)?,
        min_dollar_volume: number_or(port, "universe", "min_dollar_volume", d.min_dollar_volume)?,
        min_market_cap,
        market_cap_strict: flag(port, "universe", "market_cap_strict", d.market_cap_strict)?,
        lookback: number_or(port, "universe", "lookback", d.lookback)?,
        max_volatility: number(port, "universe", "max_volatility")?,
        vol_lookback: number(port, "universe", "vol_lookback")?,
        exclude_symbols: list(port, "universe", "exclude_symbols").into_iter().collect(),
    })
}

fn parse_signal(port: &dyn ConfigPort) -> Result<SignalConfig, FactorbenchError> {
    let d = StandardizeConfig::default();
    let rank = flag(port, "signal", "rank", d.rank)?;
    let rank_method = match text(port, "signal", "rank_method") {
        None => d.rank_method,
        Some(raw) => RankMethod::parse(&raw).ok_or_else(|| {
            FactorbenchError::invalid("signal", "rank_method", format!("unknown method '{raw}'"))
        })?,
    };
    let low: Option<f64> = number(port, "signal", "winsor_pct_low")?;
    let high: Option<f64> = number(port, "signal", "winsor_pct_high")?;
    let winsor_pct = match (low, high) {
        (Some(l), Some(h)) => Some((l, h)),
        _ if rank => Some((0.01, 0.99)),
        _ => None,
    };

    let missing_policy = match text(port, "signal", "missing_policy").as_deref() {
        None | Some("drop") => MissingPolicy::Drop,
        Some("keep") => MissingPolicy::Keep,
        Some("fill") => {
            let fill = number(port, "signal", "missing_fill")?.ok_or_else(|| {
                FactorbenchError::ConfigMissing {
                    section: "signal".to_string(),
                    key: "missing_fill".to_string(),
                }
            })?;
            MissingPolicy::Fill(fill)
        }
        Some(other) => {
            return Err(FactorbenchError::invalid(
                "signal",
                "missing_policy",
                format!("unknown policy '{other}'"),
            ));
        }
    };

    let mut factor_lags = BTreeMap::new();
    for factor in port.keys("lags") {
        if let Some(lag) = number(port, "lags", &factor)? {
            factor_lags.insert(factor, lag);
        }
    }

    Ok(SignalConfig {
        lag_days: number_or(port, "signal", "lag_days", 0)?,
        factor_lags,
        missing_policy,
        standardize: StandardizeConfig {
            zscore: flag(port, "signal", "zscore", d.zscore)?,
            rank,
            rank_method,
            rank_pct: flag(port, "signal", "rank_pct", d.rank_pct)?,
            winsor_z: number(port, "signal", "winsor_z")?,
            winsor_pct,
            industry_neutral: flag(port, "signal", "industry_neutral", d.industry_neutral)?,
            industry_min_group: number_or(port, "signal", "industry_min_group", d.industry_min_group)?,
            neutralize_cols: list(port, "signal", "neutralize_cols"),
        },
        universe_lookback: UniverseConfig::default().lookback,
    })
}

fn parse_weights(port: &dyn ConfigPort) -> Result<FactorWeights, FactorbenchError> {
    let mut weights = FactorWeights::new();
    for factor in port.keys("weights") {
        if let Some(w) = number(port, "weights", &factor)? {
            weights.insert(factor, w);
        }
    }
    Ok(weights)
}

fn parse_factors(port: &dyn ConfigPort) -> Result<FactorParams, FactorbenchError> {
    const S: &str = "factors";
    let mom = MomentumParams::default();
    let rev = ReversalParams::default();
    let lv = LowVolParams::default();
    let beta = BetaParams::default();
    let comp = CompositeParams::default();

    let reversal_mode = match text(port, S, "reversal_mode") {
        None => rev.mode,
        Some(raw) => ReversalMode::parse(&raw).ok_or_else(|| {
            FactorbenchError::invalid(S, "reversal_mode", format!("unknown mode '{raw}'"))
        })?,
    };

    Ok(FactorParams {
        momentum: MomentumParams {
            lookback: number_or(port, S, "momentum_lookback", mom.lookback)?,
            skip: number_or(port, S, "momentum_skip", mom.skip)?,
            use_monthly: flag(port, S, "momentum_use_monthly", mom.use_monthly)?,
            fallback_daily: flag(port, S, "momentum_fallback_daily", mom.fallback_daily)?,
            lookback_months: number(port, S, "momentum_lookback_months")?,
            skip_months: number(port, S, "momentum_skip_months")?,
            vol_lookback: number(port, S, "momentum_vol_lookback")?,
        },
        reversal: ReversalParams {
            lookback: number_or(port, S, "reversal_lookback", rev.lookback)?,
            mode: reversal_mode,
            vol_lookback: number(port, S, "reversal_vol_lookback")?,
        },
        low_vol: LowVolParams {
            window: number_or(port, S, "low_vol_window", lv.window)?,
            log_returns: flag(port, S, "low_vol_log_return", lv.log_returns)?,
            use_residual: flag(port, S, "low_vol_use_residual", lv.use_residual)?,
            downside_only: flag(port, S, "low_vol_downside_only", lv.downside_only)?,
            bench_symbol: text(port, S, "low_vol_bench_symbol").unwrap_or(lv.bench_symbol),
        },
        beta: BetaParams {
            window: number_or(port, S, "beta_lookback", beta.window)?,
            bench_symbol: text(port, S, "beta_bench_symbol").unwrap_or(beta.bench_symbol),
            log_returns: flag(port, S, "beta_use_log_return", beta.log_returns)?,
        },
        quality: CompositeParams {
            weights: metric_weights(port, S, "quality_weights")?,
            max_staleness_days: number_or(
                port,
                S,
                "quality_max_staleness_days",
                comp.max_staleness_days,
            )?,
        },
        value: CompositeParams {
            weights: metric_weights(port, S, "value_weights")?,
            max_staleness_days: number_or(
                port,
                S,
                "value_max_staleness_days",
                comp.max_staleness_days,
            )?,
        },
    })
}

fn parse_execution(port: &dyn ConfigPort) -> Result<ExecutionConfig, FactorbenchError> {
    const S: &str = "execution";
    let d = ExecutionConfig::default();
    Ok(ExecutionConfig {
        transaction_cost: number_or(port, S, "transaction_cost", d.transaction_cost)?,
        execution_delay: number_or(port, S, "execution_delay", d.execution_delay)?,
        use_trading_days: flag(port, S, "use_trading_days", d.use_trading_days)?,
        quality_filter: flag(port, S, "quality_filter", d.quality_filter)?,
        smart_delisting: flag(port, S, "smart_delisting", d.smart_delisting)?,
        dynamic_cost: flag(port, S, "dynamic_cost", d.dynamic_cost)?,
        cost_multiplier: number_or(port, S, "cost_multiplier", d.cost_multiplier)?,
        trade_size_usd: number_or(port, S, "trade_size_usd", d.trade_size_usd)?,
        limit_up_down: flag(port, S, "limit_up_down", d.limit_up_down)?,
        limit_up_down_pct: number_or(port, S, "limit_up_down_pct", d.limit_up_down_pct)?,
        stamp_tax: flag(port, S, "stamp_tax", d.stamp_tax)?,
        stamp_tax_rate: number_or(port, S, "stamp_tax_rate", d.stamp_tax_rate)?,
    })
}

fn parse_backtest(port: &dyn ConfigPort) -> Result<BacktestConfig, FactorbenchError> {
    const S: &str = "backtest";
    let d = BacktestConfig::new(NaiveDate::MIN, NaiveDate::MAX);
    let rebalance_mode = match text(port, S, "rebalance_mode") {
        None => d.rebalance_mode,
        Some(raw) => RebalanceMode::parse(&raw).ok_or_else(|| {
            FactorbenchError::invalid(S, "rebalance_mode", format!("unknown mode '{raw}'"))
        })?,
    };
    let method = match text(port, S, "smooth_method").as_deref() {
        None | Some("sma") => SmoothMethod::Sma,
        Some("ema") => SmoothMethod::Ema,
        Some(other) => {
            return Err(FactorbenchError::invalid(
                S,
                "smooth_method",
                format!("unknown method '{other}'"),
            ));
        }
    };
    Ok(BacktestConfig {
        start_date: required_date(port, S, "start_date")?,
        end_date: required_date(port, S, "end_date")?,
        rebalance_freq: number_or(port, S, "rebalance_freq", d.rebalance_freq)?,
        holding_period: number_or(port, S, "holding_period", d.holding_period)?,
        long_pct: number_or(port, S, "long_pct", d.long_pct)?,
        short_pct: number_or(port, S, "short_pct", d.short_pct)?,
        rebalance_mode,
        calendar_symbol: text(port, S, "calendar_symbol"),
        smoothing: SmoothingConfig {
            window: number_or(port, S, "smooth_window", 0)?,
            method,
            alpha: number(port, S, "smooth_alpha")?,
        },
    })
}

fn parse_oos(port: &dyn ConfigPort) -> Result<Option<OosConfig>, FactorbenchError> {
    if port.keys("oos").is_empty() {
        return Ok(None);
    }
    Ok(Some(OosConfig {
        train_start: required_date(port, "oos", "train_start")?,
        train_end: required_date(port, "oos", "train_end")?,
        test_start: required_date(port, "oos", "test_start")?,
        test_end: required_date(port, "oos", "test_end")?,
    }))
}

fn parse_cache(port: &dyn ConfigPort) -> Result<CacheConfig, FactorbenchError> {
    Ok(CacheConfig {
        dir: path(port, "cache", "dir"),
        enabled: flag(port, "cache", "use", false)?,
        refresh: flag(port, "cache", "refresh", false)?,
    })
}

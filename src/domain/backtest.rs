//! Backtest engine and rebalance loop.
//!
//! One engine owns the point-in-time stores, the signal pipeline and an
//! optional signal cache for a single configuration. The rebalance loop is
//! strictly sequential: smoothing state carries from one date to the next.
//! Execution and return computation run once over the accumulated positions.

use crate::domain::calendar::TradingCalendar;
use crate::domain::config::{OosConfig, RunConfig, SmoothMethod, SmoothingConfig};
use crate::domain::config_validation::validate_run_config;
use crate::domain::error::FactorbenchError;
use crate::domain::execution::{ExecutedTrade, ExecutionSimulator, FilterReport, ReturnRecord};
use crate::domain::market_data::MarketData;
use crate::domain::metrics::{self, Analysis, IcStats, OutOfSampleComparison};
use crate::domain::position::{build_positions, Position};
use crate::domain::signal::{Signal, SignalPipeline};
use crate::domain::universe::{UniverseAudit, UniverseFilter};
use crate::ports::data_port::DataPort;
use crate::ports::signal_cache_port::{CacheKey, SignalCachePort};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use tracing::{debug, info, warn};

const DEFAULT_CALENDAR_SYMBOL: &str = "SPY";
/// A calendar symbol needs more bars than this in range to be used.
const MIN_CALENDAR_BARS: usize = 10;
const DEFAULT_EMA_ALPHA: f64 = 0.2;

/// Per-symbol rolling smoother applied to each new cross-section.
pub struct SignalSmoother {
    config: SmoothingConfig,
    window_history: HashMap<String, VecDeque<f64>>,
    ema_history: HashMap<String, f64>,
}

impl SignalSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            window_history: HashMap::new(),
            ema_history: HashMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.config.window > 1 || self.config.method == SmoothMethod::Ema
    }

    fn alpha(&self) -> f64 {
        match self.config.alpha {
            Some(a) if a > 0.0 && a < 1.0 => a,
            _ if self.config.window > 1 => 2.0 / (self.config.window as f64 + 1.0),
            _ => DEFAULT_EMA_ALPHA,
        }
    }

    /// Smooths `signals` against the history of earlier calls. NaN values
    /// pass through and leave the history untouched.
    pub fn smooth(&mut self, mut signals: Vec<Signal>) -> Vec<Signal> {
        if !self.is_active() {
            return signals;
        }
        let alpha = self.alpha();
        for s in signals.iter_mut().filter(|s| !s.value.is_nan()) {
            s.value = match self.config.method {
                SmoothMethod::Ema => {
                    let v = match self.ema_history.get(&s.symbol) {
                        Some(prev) => alpha * s.value + (1.0 - alpha) * prev,
                        None => s.value,
                    };
                    self.ema_history.insert(s.symbol.clone(), v);
                    v
                }
                SmoothMethod::Sma => {
                    let buf = self.window_history.entry(s.symbol.clone()).or_default();
                    buf.push_back(s.value);
                    while buf.len() > self.config.window {
                        buf.pop_front();
                    }
                    buf.iter().sum::<f64>() / buf.len() as f64
                }
            };
        }
        signals
    }
}

/// IC variants computed at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunAnalysis {
    /// Full signal cross-section against quality-filtered forward returns.
    pub forward: Analysis,
    /// Full signal cross-section against unfiltered forward returns.
    pub ic_raw: IcStats,
    /// Signals against realized position returns.
    pub positions: Analysis,
}

#[derive(Debug, Clone)]
pub struct BacktestRun {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rebalance_dates: Vec<NaiveDate>,
    pub signals: Vec<Signal>,
    pub positions: Vec<Position>,
    pub trades: Vec<ExecutedTrade>,
    pub returns: Vec<ReturnRecord>,
    pub forward_returns: Vec<ReturnRecord>,
    pub forward_returns_raw: Vec<ReturnRecord>,
    pub analysis: RunAnalysis,
    pub filter_stats: FilterReport,
    /// Per-symbol factor failures recovered during signal computation.
    pub symbol_errors: usize,
    /// Rebalance dates whose signal computation failed and was skipped.
    pub date_errors: usize,
    pub cache_hits: usize,
}

#[derive(Debug, Clone)]
pub struct OutOfSampleRun {
    pub train: BacktestRun,
    pub test: BacktestRun,
    pub comparison: OutOfSampleComparison,
}

pub struct BacktestEngine {
    data: MarketData,
    pipeline: SignalPipeline,
    cache: Option<Box<dyn SignalCachePort>>,
    config: RunConfig,
    config_hash: String,
    weights_hash: String,
    date_errors: usize,
    cache_hits: usize,
}

impl BacktestEngine {
    /// Engine with the built-in factor providers over `port`.
    pub fn new(config: RunConfig, port: Rc<dyn DataPort>) -> Result<Self, FactorbenchError> {
        let data = MarketData::new(port)?;
        let pipeline = SignalPipeline::with_builtin(
            config.signal.clone(),
            UniverseFilter::new(config.universe.clone()),
            &config.factors,
        );
        Self::from_parts(config, data, pipeline)
    }

    /// Engine over an explicit pipeline, for custom factor providers.
    /// Configuration problems surface here rather than inside the date loop.
    pub fn from_parts(
        config: RunConfig,
        data: MarketData,
        pipeline: SignalPipeline,
    ) -> Result<Self, FactorbenchError> {
        validate_run_config(&config)?;
        pipeline.validate_weights(&config.weights)?;
        let data = data.with_staleness(
            config.factors.quality.max_staleness_days,
            config.factors.value.max_staleness_days,
        );
        Ok(Self {
            data,
            pipeline,
            cache: None,
            config_hash: config.config_hash()?,
            weights_hash: config.weights_hash()?,
            config,
            date_errors: 0,
            cache_hits: 0,
        })
    }

    pub fn with_cache(mut self, cache: Box<dyn SignalCachePort>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn data(&self) -> &MarketData {
        &self.data
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    fn calendar_from(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Option<TradingCalendar> {
        match self.data.prices.get(symbol, Some(start), Some(end)) {
            Ok(window) => window.map(|w| TradingCalendar::new(w.iter().map(|b| b.date).collect())),
            Err(e) => {
                warn!(%symbol, error = %e, "calendar symbol unreadable");
                None
            }
        }
    }

    /// Trading dates in `[start, end]`: the calendar symbol, then SPY, then the
    /// first universe member at `start`, then weekdays.
    pub fn trading_calendar(&mut self, start: NaiveDate, end: NaiveDate) -> TradingCalendar {
        let candidates = self
            .config
            .backtest
            .calendar_symbol
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(DEFAULT_CALENDAR_SYMBOL));
        for symbol in candidates {
            if let Some(cal) = self.calendar_from(symbol, start, end) {
                if cal.len() > MIN_CALENDAR_BARS {
                    return cal;
                }
            }
        }

        let lookback = self.config.signal.universe_lookback;
        let universe = self
            .pipeline
            .universe_filter_mut()
            .universe(&self.data, start, lookback);
        universe
            .first()
            .and_then(|symbol| self.calendar_from(symbol, start, end))
            .filter(|cal| !cal.is_empty())
            .unwrap_or_else(|| TradingCalendar::business_days(start, end))
    }

    pub fn rebalance_dates(&mut self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let bt = &self.config.backtest;
        let (mode, freq) = (bt.rebalance_mode, bt.rebalance_freq);
        self.trading_calendar(start, end)
            .rebalance_dates(start, end, mode, freq)
    }

    /// Tradable symbols at `date` with the audit of that query.
    pub fn universe_at(&mut self, date: NaiveDate) -> (Vec<String>, Option<UniverseAudit>) {
        let lookback = self.config.signal.universe_lookback;
        let filter = self.pipeline.universe_filter_mut();
        let symbols = filter.universe(&self.data, date, lookback);
        let audit = filter.audit(date).cloned();
        (symbols, audit)
    }

    /// Signal cross-section at `date`, read through the cache when one is set.
    /// Refresh mode skips reads; failed writes are logged and ignored.
    pub fn signals_at(&mut self, date: NaiveDate) -> Result<Vec<Signal>, FactorbenchError> {
        let key = CacheKey {
            config_hash: self.config_hash.clone(),
            weights_hash: self.weights_hash.clone(),
            date,
        };

        if let Some(cache) = &self.cache {
            if !self.config.cache.refresh {
                match cache.get(&key) {
                    Ok(Some(signals)) => {
                        self.cache_hits += 1;
                        return Ok(signals);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(%date, error = %e, "unreadable cache entry, recomputing"),
                }
            }
        }

        let signals = match self.pipeline.compute(&self.data, date, &self.config.weights) {
            Ok(signals) => signals,
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => {
                warn!(%date, error = %e, "signal computation failed, skipping date");
                self.date_errors += 1;
                return Ok(Vec::new());
            }
        };

        if let Some(cache) = &mut self.cache {
            if let Err(e) = cache.put(&key, &signals) {
                warn!(%date, error = %e, "signal cache write failed");
            }
        }
        Ok(signals)
    }

    /// Backtest over the configured date range.
    pub fn run(&mut self) -> Result<BacktestRun, FactorbenchError> {
        let (start, end) = (self.config.backtest.start_date, self.config.backtest.end_date);
        self.run_range(start, end)
    }

    pub fn run_range(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BacktestRun, FactorbenchError> {
        let rebalance_dates = self.rebalance_dates(start, end);
        if rebalance_dates.is_empty() {
            return Err(FactorbenchError::NoData {
                reason: format!("no trading dates between {start} and {end}"),
            });
        }
        info!(%start, %end, rebalances = rebalance_dates.len(), "starting backtest");

        let symbol_errors_before = self.pipeline.symbol_errors();
        self.date_errors = 0;
        self.cache_hits = 0;

        let bt = self.config.backtest.clone();
        let mut smoother = SignalSmoother::new(bt.smoothing.clone());
        let mut signals: Vec<Signal> = Vec::new();
        let mut positions: Vec<Position> = Vec::new();

        for date in &rebalance_dates {
            let cross_section = self.signals_at(*date)?;
            if cross_section.is_empty() {
                debug!(%date, "empty cross-section");
                continue;
            }
            let cross_section = smoother.smooth(cross_section);
            let picks = build_positions(&cross_section, bt.long_pct, bt.short_pct);
            debug!(
                %date,
                signals = cross_section.len(),
                active = picks.iter().filter(|p| p.side.is_active()).count(),
                "rebalanced"
            );
            signals.extend(cross_section);
            positions.extend(picks);
        }

        // Exits of the last positions fall after `end`.
        let horizon = (bt.holding_period as i64 + self.config.execution.execution_delay) * 2 + 14;
        let calendar = self.trading_calendar(start, end + Duration::days(horizon));

        let mut sim = ExecutionSimulator::new(&self.data.prices, self.config.execution.clone())
            .with_calendar(calendar);
        let trades = sim.execute(&positions);
        let returns = sim.returns(&trades, bt.holding_period);
        let forward_returns = sim.forward_returns(&signals, bt.holding_period, true);
        let forward_returns_raw = sim.forward_returns(&signals, bt.holding_period, false);
        let filter_stats = sim.stats().report();

        let analysis = RunAnalysis {
            forward: metrics::analyze(&signals, &forward_returns),
            ic_raw: metrics::ic(&signals, &forward_returns_raw),
            positions: metrics::analyze(&signals, &returns),
        };

        info!(
            signals = signals.len(),
            positions = positions.iter().filter(|p| p.side.is_active()).count(),
            returns = returns.len(),
            ic = ?analysis.forward.ic.ic,
            ic_overall = ?analysis.forward.ic.ic_overall,
            "backtest complete"
        );

        Ok(BacktestRun {
            start_date: start,
            end_date: end,
            rebalance_dates,
            signals,
            positions,
            trades,
            returns,
            forward_returns,
            forward_returns_raw,
            analysis,
            filter_stats,
            symbol_errors: self.pipeline.symbol_errors() - symbol_errors_before,
            date_errors: self.date_errors,
            cache_hits: self.cache_hits,
        })
    }

    /// Train and test runs with the same weights, compared on forward IC.
    pub fn run_out_of_sample(&mut self, oos: &OosConfig) -> Result<OutOfSampleRun, FactorbenchError> {
        let train = self.run_range(oos.train_start, oos.train_end)?;
        let test = self.run_range(oos.test_start, oos.test_end)?;
        let comparison = metrics::out_of_sample(&train.analysis.forward.ic, &test.analysis.forward.ic);
        info!(
            train_ic = ?comparison.train_ic,
            test_ic = ?comparison.test_ic,
            degradation_pct = ?comparison.ic_degradation_pct,
            "out-of-sample comparison"
        );
        Ok(OutOfSampleRun {
            train,
            test,
            comparison,
        })
    }
}

//! Fill simulation, realized returns and forward returns.
//!
//! A fill is resolved in a fixed order: shift the signal date by the
//! execution delay, load a ±5-day window, run the quality filter, take the
//! first bar on or after the shifted date, check limit moves and finally
//! apply cost. Every drop is tallied in [`FilterStats`].

use crate::domain::calendar::TradingCalendar;
use crate::domain::cost_model::CostModel;
use crate::domain::delisting::{clip_return, estimate_return};
use crate::domain::error::FactorbenchError;
use crate::domain::factors::{aligned_returns, finite_std};
use crate::domain::position::{Position, Side};
use crate::domain::price_store::PriceStore;
use crate::domain::quality::validate_window;
use crate::domain::signal::Signal;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

const WINDOW_DAYS: i64 = 5;
const ENTRY_BAND: (f64, f64) = (1.0, 10_000.0);
const EXIT_BAND: (f64, f64) = (0.1, 10_000.0);
/// Return assigned when neither an exit nor a last known price exists.
const NO_DATA_RETURN: f64 = -0.5;
const DEFAULT_VOLATILITY: f64 = 0.02;
const VOLATILITY_SPAN_DAYS: i64 = 90;
const VOLATILITY_BARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionConfig {
    pub transaction_cost: f64,
    /// Periods between signal and fill.
    pub execution_delay: i64,
    /// Count delay and holding period in trading days rather than calendar days.
    pub use_trading_days: bool,
    pub quality_filter: bool,
    pub smart_delisting: bool,
    pub dynamic_cost: bool,
    pub cost_multiplier: f64,
    pub trade_size_usd: f64,
    pub limit_up_down: bool,
    pub limit_up_down_pct: f64,
    pub stamp_tax: bool,
    pub stamp_tax_rate: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            transaction_cost: 0.002,
            execution_delay: 1,
            use_trading_days: false,
            quality_filter: true,
            smart_delisting: true,
            dynamic_cost: false,
            cost_multiplier: 1.0,
            trade_size_usd: 10_000.0,
            limit_up_down: false,
            limit_up_down_pct: 0.1,
            stamp_tax: false,
            stamp_tax_rate: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn entry(side: Side) -> Self {
        match side {
            Side::Short => OrderSide::Sell,
            Side::Long | Side::Flat => OrderSide::Buy,
        }
    }

    pub fn exit(side: Side) -> Self {
        match side {
            Side::Short => OrderSide::Buy,
            Side::Long | Side::Flat => OrderSide::Sell,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTrade {
    pub symbol: String,
    pub signal_date: NaiveDate,
    pub side: Side,
    /// Entry price including cost.
    pub fill_price: Option<f64>,
    pub executed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitType {
    Normal,
    Delisted,
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub symbol: String,
    pub signal_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub side: Side,
    #[serde(rename = "return")]
    pub ret: f64,
    pub holding_period: usize,
    pub exit_type: ExitType,
}

/// Raw counters. Drop counters only count execution attempts (calls that
/// apply cost); auxiliary lookups are counted separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterStats {
    pub execution_price_calls: usize,
    pub aux_data_calls: usize,
    pub aux_volatility_calls: usize,
    pub quality_filter_dropped: usize,
    pub no_price_data: usize,
    pub no_trade_date_found: usize,
    pub limit_up_down_blocked: usize,
    pub entry_sanity_dropped: usize,
    pub exit_sanity_dropped: usize,
    pub storage_errors: usize,
    pub delisted_exits: usize,
    pub no_data_exits: usize,
    pub pct_of_volume_sum: f64,
    pub pct_of_volume_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropCounts {
    pub quality_filter: usize,
    pub no_price_data: usize,
    pub no_trade_date_found: usize,
    pub limit_up_down: usize,
    pub entry_sanity: usize,
    pub exit_sanity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropRates {
    pub quality_filter_pct: f64,
    pub no_price_data_pct: f64,
    pub no_trade_date_found_pct: f64,
    pub limit_up_down_pct: f64,
    pub entry_sanity_pct: f64,
    pub exit_sanity_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterReport {
    pub execution_attempts: usize,
    pub auxiliary_calls: usize,
    pub dropped: DropCounts,
    /// Percent of execution attempts.
    pub drop_rates: DropRates,
    pub avg_pct_of_volume: Option<f64>,
    pub delisted_exits: usize,
    pub no_data_exits: usize,
    pub storage_errors: usize,
}

impl FilterStats {
    pub fn report(&self) -> FilterReport {
        let attempts = self.execution_price_calls;
        let rate = |count: usize| {
            if attempts > 0 {
                count as f64 / attempts as f64 * 100.0
            } else {
                0.0
            }
        };
        FilterReport {
            execution_attempts: attempts,
            auxiliary_calls: self.aux_data_calls + self.aux_volatility_calls,
            dropped: DropCounts {
                quality_filter: self.quality_filter_dropped,
                no_price_data: self.no_price_data,
                no_trade_date_found: self.no_trade_date_found,
                limit_up_down: self.limit_up_down_blocked,
                entry_sanity: self.entry_sanity_dropped,
                exit_sanity: self.exit_sanity_dropped,
            },
            drop_rates: DropRates {
                quality_filter_pct: rate(self.quality_filter_dropped),
                no_price_data_pct: rate(self.no_price_data),
                no_trade_date_found_pct: rate(self.no_trade_date_found),
                limit_up_down_pct: rate(self.limit_up_down_blocked),
                entry_sanity_pct: rate(self.entry_sanity_dropped),
                exit_sanity_pct: rate(self.exit_sanity_dropped),
            },
            avg_pct_of_volume: (self.pct_of_volume_count > 0)
                .then(|| self.pct_of_volume_sum / self.pct_of_volume_count as f64),
            delisted_exits: self.delisted_exits,
            no_data_exits: self.no_data_exits,
            storage_errors: self.storage_errors,
        }
    }
}

pub struct ExecutionSimulator<'a> {
    prices: &'a PriceStore,
    config: ExecutionConfig,
    calendar: Option<TradingCalendar>,
    cost_model: Option<CostModel>,
    volatility_cache: HashMap<(String, NaiveDate), f64>,
    stats: FilterStats,
}

impl<'a> ExecutionSimulator<'a> {
    pub fn new(prices: &'a PriceStore, config: ExecutionConfig) -> Self {
        let cost_model = config
            .dynamic_cost
            .then(|| CostModel::new(config.transaction_cost * config.cost_multiplier));
        Self {
            prices,
            config,
            calendar: None,
            cost_model,
            volatility_cache: HashMap::new(),
            stats: FilterStats::default(),
        }
    }

    /// Calendar used when `use_trading_days` is set. An empty calendar is ignored.
    pub fn with_calendar(mut self, calendar: TradingCalendar) -> Self {
        self.calendar = (!calendar.is_empty()).then_some(calendar);
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    pub fn shift_date(&self, base: NaiveDate, n: i64) -> NaiveDate {
        match &self.calendar {
            Some(cal) if self.config.use_trading_days => cal.shift(base, n).unwrap_or(base),
            _ => base + Duration::days(n),
        }
    }

    /// Trailing daily volatility of simple returns, memoized per `(symbol, date)`.
    fn volatility(&mut self, symbol: &str, end: NaiveDate) -> Result<f64, FactorbenchError> {
        self.stats.aux_volatility_calls += 1;
        let key = (symbol.to_string(), end);
        if let Some(v) = self.volatility_cache.get(&key) {
            return Ok(*v);
        }

        let start = end - Duration::days(VOLATILITY_SPAN_DAYS);
        let vol = match self.prices.get(symbol, Some(start), Some(end))? {
            Some(window) if window.len() > 20 => {
                let rets = aligned_returns(&window, false);
                let tail = &rets[rets.len().saturating_sub(VOLATILITY_BARS)..];
                finite_std(tail)
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .unwrap_or(DEFAULT_VOLATILITY)
            }
            _ => DEFAULT_VOLATILITY,
        };
        self.volatility_cache.insert(key, vol);
        Ok(vol)
    }

    /// Simulated fill for an order decided at `signal_date`; `Ok(None)` when
    /// no valid fill exists.
    pub fn execution_price(
        &mut self,
        symbol: &str,
        signal_date: NaiveDate,
        side: OrderSide,
        apply_cost: bool,
        apply_quality_filter: bool,
    ) -> Result<Option<f64>, FactorbenchError> {
        if apply_cost {
            self.stats.execution_price_calls += 1;
        } else {
            self.stats.aux_data_calls += 1;
        }

        let exec_date = self.shift_date(signal_date, self.config.execution_delay);
        let window = self.prices.get(
            symbol,
            Some(exec_date - Duration::days(WINDOW_DAYS)),
            Some(exec_date + Duration::days(WINDOW_DAYS)),
        )?;
        let Some(window) = window else {
            if apply_cost {
                self.stats.no_price_data += 1;
            }
            return Ok(None);
        };

        if apply_quality_filter && self.config.quality_filter {
            if let Err(issue) = validate_window(&window) {
                debug!(%symbol, %exec_date, %issue, "quality filter rejected window");
                if apply_cost {
                    self.stats.quality_filter_dropped += 1;
                }
                return Ok(None);
            }
        }

        let first = window.partition_point(|b| b.date < exec_date);
        let Some(bar) = window.get(first) else {
            if apply_cost {
                self.stats.no_trade_date_found += 1;
            }
            return Ok(None);
        };
        let base = bar.reference_price();
        let volume = bar.volume;
        if !(base > 0.0) || !base.is_finite() {
            return Ok(None);
        }

        if self.config.limit_up_down && first > 0 {
            let prev_close = window[first - 1].close;
            if prev_close > 0.0 {
                let pct = self.config.limit_up_down_pct;
                let blocked = match side {
                    OrderSide::Buy => base >= prev_close * (1.0 + pct),
                    OrderSide::Sell => base <= prev_close * (1.0 - pct),
                };
                if blocked {
                    if apply_cost {
                        self.stats.limit_up_down_blocked += 1;
                    }
                    return Ok(None);
                }
            }
        }

        if !apply_cost {
            return Ok(Some(base));
        }

        let mut cost = match self.cost_model {
            Some(model) => {
                let vol = self.volatility(symbol, exec_date)?;
                let trade_size = self.config.trade_size_usd;
                if base * volume > 0.0 {
                    self.stats.pct_of_volume_sum += CostModel::pct_of_volume(base, volume, trade_size);
                    self.stats.pct_of_volume_count += 1;
                }
                model.cost(base, volume, vol, trade_size)
            }
            None => self.config.transaction_cost * self.config.cost_multiplier,
        };

        Ok(Some(match side {
            OrderSide::Buy => base * (1.0 + cost),
            OrderSide::Sell => {
                if self.config.stamp_tax {
                    cost += self.config.stamp_tax_rate;
                }
                base * (1.0 - cost)
            }
        }))
    }

    /// [`Self::execution_price`] with storage failures logged and tallied.
    fn resolve(
        &mut self,
        symbol: &str,
        signal_date: NaiveDate,
        side: OrderSide,
        apply_cost: bool,
        apply_quality_filter: bool,
    ) -> Option<f64> {
        match self.execution_price(symbol, signal_date, side, apply_cost, apply_quality_filter) {
            Ok(price) => price,
            Err(e) => {
                warn!(%symbol, %signal_date, error = %e, "price lookup failed");
                self.stats.storage_errors += 1;
                None
            }
        }
    }

    /// Last close on or before `exit_date` since `signal_date`.
    fn last_known_price(&mut self, symbol: &str, signal_date: NaiveDate, exit_date: NaiveDate) -> Option<f64> {
        match self.prices.get(symbol, Some(signal_date), Some(exit_date)) {
            Ok(window) => window
                .and_then(|w| w.last().map(|b| b.close))
                .filter(|p| *p > 0.0),
            Err(e) => {
                warn!(%symbol, %exit_date, error = %e, "last price lookup failed");
                self.stats.storage_errors += 1;
                None
            }
        }
    }

    fn delisting_reason(&self, symbol: &str) -> Option<String> {
        self.prices.delisting(symbol).and_then(|d| d.reason.clone())
    }

    /// Exit date of a position opened at `signal_date`, and the signal date
    /// that fills on it.
    fn exit_dates(&self, signal_date: NaiveDate, holding_period: usize) -> (NaiveDate, NaiveDate) {
        let delay = self.config.execution_delay;
        let exit_date = self.shift_date(signal_date, holding_period as i64 + delay);
        (exit_date, self.shift_date(exit_date, -delay))
    }

    /// Entry fills for every long or short position.
    pub fn execute(&mut self, positions: &[Position]) -> Vec<ExecutedTrade> {
        positions
            .iter()
            .filter(|p| p.side.is_active())
            .map(|p| {
                let fill = self.resolve(&p.symbol, p.date, OrderSide::entry(p.side), true, true);
                ExecutedTrade {
                    symbol: p.symbol.clone(),
                    signal_date: p.date,
                    side: p.side,
                    fill_price: fill,
                    executed: fill.is_some(),
                }
            })
            .collect()
    }

    /// Realized returns of executed trades after `holding_period` periods.
    pub fn returns(&mut self, trades: &[ExecutedTrade], holding_period: usize) -> Vec<ReturnRecord> {
        let mut out = Vec::with_capacity(trades.len());
        for trade in trades.iter().filter(|t| t.executed) {
            let Some(entry) = trade.fill_price else {
                continue;
            };
            if !(ENTRY_BAND.0..=ENTRY_BAND.1).contains(&entry) {
                self.stats.entry_sanity_dropped += 1;
                continue;
            }

            let (exit_date, exit_signal) = self.exit_dates(trade.signal_date, holding_period);
            let exit = self
                .resolve(&trade.symbol, exit_signal, OrderSide::exit(trade.side), true, true)
                .filter(|p| *p > 0.0);

            let record = |ret: f64, exit_price: Option<f64>, exit_type: ExitType| ReturnRecord {
                symbol: trade.symbol.clone(),
                signal_date: trade.signal_date,
                entry_price: entry,
                exit_price,
                side: trade.side,
                ret,
                holding_period,
                exit_type,
            };

            if let Some(exit) = exit {
                if !(EXIT_BAND.0..=EXIT_BAND.1).contains(&exit) {
                    self.stats.exit_sanity_dropped += 1;
                    continue;
                }
                let r = match trade.side {
                    Side::Short => (entry - exit) / entry,
                    Side::Long | Side::Flat => (exit - entry) / entry,
                };
                out.push(record(clip_return(r), Some(exit), ExitType::Normal));
                continue;
            }

            let last = if self.config.smart_delisting {
                self.last_known_price(&trade.symbol, trade.signal_date, exit_date)
            } else {
                None
            };
            match last {
                Some(last) => {
                    let reason = self.delisting_reason(&trade.symbol);
                    let r = estimate_return(entry, last, trade.side, reason.as_deref());
                    self.stats.delisted_exits += 1;
                    out.push(record(r, Some(last), ExitType::Delisted));
                }
                None => {
                    self.stats.no_data_exits += 1;
                    out.push(record(NO_DATA_RETURN, None, ExitType::NoData));
                }
            }
        }
        out
    }

    /// Cost-free long returns for every signal in the cross-section. Rows
    /// with no resolvable entry or exit are skipped.
    pub fn forward_returns(
        &mut self,
        signals: &[Signal],
        holding_period: usize,
        apply_quality_filter: bool,
    ) -> Vec<ReturnRecord> {
        let mut out = Vec::new();
        for signal in signals {
            let Some(entry) = self
                .resolve(&signal.symbol, signal.date, OrderSide::Buy, false, apply_quality_filter)
                .filter(|p| *p > 0.0)
            else {
                continue;
            };

            let (exit_date, exit_signal) = self.exit_dates(signal.date, holding_period);
            let exit = self
                .resolve(&signal.symbol, exit_signal, OrderSide::Sell, false, apply_quality_filter)
                .filter(|p| *p > 0.0);

            let (ret, exit_price, exit_type) = match exit {
                Some(exit) => (clip_return((exit - entry) / entry), exit, ExitType::Normal),
                None if self.config.smart_delisting => {
                    let Some(last) = self.last_known_price(&signal.symbol, signal.date, exit_date)
                    else {
                        continue;
                    };
                    let reason = self.delisting_reason(&signal.symbol);
                    (
                        estimate_return(entry, last, Side::Long, reason.as_deref()),
                        last,
                        ExitType::Delisted,
                    )
                }
                None => continue,
            };

            out.push(ReturnRecord {
                symbol: signal.symbol.clone(),
                signal_date: signal.date,
                entry_price: entry,
                exit_price: Some(exit_price),
                side: Side::Long,
                ret,
                holding_period,
                exit_type,
            });
        }
        out
    }
}

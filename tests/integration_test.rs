//! End-to-end tests over in-memory and on-disk data.
//!
//! Tests cover:
//! - Factor lags never expose bars after the lagged date
//! - Delisting exits: bankruptcy, merger, no data, return clipping
//! - Position buckets on small cross-sections
//! - Per-date versus pooled IC
//! - Signal cache reuse across engines
//! - Adapter parity: CSV and SQLite data give the in-memory results

mod common;

use approx::assert_relative_eq;
use common::*;
use factorbench::adapters::csv_adapter::CsvAdapter;
use factorbench::adapters::json_signal_cache::JsonSignalCache;
use factorbench::adapters::memory_signal_cache::MemorySignalCache;
use factorbench::domain::backtest::{BacktestEngine, BacktestRun};
use factorbench::domain::execution::{ExecutionConfig, ExecutionSimulator, ExitType, ReturnRecord};
use factorbench::domain::factors::{FactorParams, MomentumParams};
use factorbench::domain::market_data::MarketData;
use factorbench::domain::metrics;
use factorbench::domain::position::{build_positions, Position, Side};
use factorbench::domain::price_store::PriceStore;
use factorbench::domain::signal::{FactorWeights, Signal, SignalConfig, SignalPipeline};
use factorbench::domain::universe::{UniverseConfig, UniverseFilter};
use factorbench::ports::data_port::DataPort;
use std::rc::Rc;
use tempfile::TempDir;

fn signal_bits(run: &BacktestRun) -> Vec<(String, chrono::NaiveDate, u64)> {
    run.signals
        .iter()
        .map(|s| (s.symbol.clone(), s.date, s.value.to_bits()))
        .collect()
}

mod look_ahead {
    use super::*;

    fn pipeline(momentum_lag: Option<i64>) -> SignalPipeline {
        let mut config = SignalConfig {
            universe_lookback: 1,
            ..SignalConfig::default()
        };
        if let Some(lag) = momentum_lag {
            config.factor_lags.insert("momentum".to_string(), lag);
        }
        let universe = UniverseFilter::new(UniverseConfig {
            min_price: 0.0,
            min_dollar_volume: 0.0,
            min_market_cap: None,
            lookback: 1,
            ..UniverseConfig::default()
        });
        let params = FactorParams {
            momentum: MomentumParams {
                lookback: 1,
                skip: 0,
                ..MomentumParams::default()
            },
            ..FactorParams::default()
        };
        SignalPipeline::with_builtin(config, universe, &params)
    }

    fn data() -> MarketData {
        let port = MockDataPort::new()
            .with_bars("AAA", generate_bars("AAA", "2020-01-01", &[10.0, 10.0, 1000.0]))
            .with_bars("BBB", generate_bars("BBB", "2020-01-01", &[10.0, 11.0, 11.0]));
        MarketData::new(Rc::new(port)).unwrap()
    }

    fn scores(pipeline: &mut SignalPipeline, data: &MarketData) -> Vec<(String, f64)> {
        let weights = FactorWeights::from([("momentum".to_string(), 1.0)]);
        pipeline
            .factor_rows(data, parse("2020-01-03"), &weights)
            .unwrap()
            .into_iter()
            .map(|r| (r.symbol, r.score))
            .collect()
    }

    #[test]
    fn unlagged_factor_sees_the_jump() {
        let data = data();
        let rows = scores(&mut pipeline(None), &data);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "AAA");
        assert_relative_eq!(rows[0].1, 100.0f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(rows[1].1, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn one_day_lag_hides_the_jump() {
        let data = data();
        let rows = scores(&mut pipeline(Some(1)), &data);
        assert_eq!(rows[0], ("AAA".to_string(), 0.0));
        assert_relative_eq!(rows[1].1, 1.1f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn lag_flips_the_cross_section() {
        let data = data();
        let weights = FactorWeights::from([("momentum".to_string(), 1.0)]);
        let date = parse("2020-01-03");

        let top = |signals: Vec<Signal>| {
            build_positions(&signals, 0.5, 0.0)
                .into_iter()
                .find(|p| p.side == Side::Long)
                .map(|p| p.symbol)
        };
        let unlagged = pipeline(None).compute(&data, date, &weights).unwrap();
        let lagged = pipeline(Some(1)).compute(&data, date, &weights).unwrap();
        assert_eq!(top(unlagged).as_deref(), Some("AAA"));
        assert_eq!(top(lagged).as_deref(), Some("BBB"));
    }

    #[test]
    fn global_lag_moves_the_cache_namespace() {
        let base = open_config("2020-02-01", "2020-03-01");
        let mut lagged = base.clone();
        lagged.signal.lag_days = 1;
        assert_ne!(base.config_hash().unwrap(), lagged.config_hash().unwrap());
        assert_eq!(base.weights_hash().unwrap(), lagged.weights_hash().unwrap());
    }
}

mod delisting_exits {
    use super::*;

    const HOLD: usize = 20;

    fn store(port: MockDataPort) -> PriceStore {
        PriceStore::new(Rc::new(port)).unwrap()
    }

    fn no_cost() -> ExecutionConfig {
        ExecutionConfig {
            transaction_cost: 0.0,
            ..ExecutionConfig::default()
        }
    }

    fn collapsing(reason: Option<&str>) -> MockDataPort {
        let mut closes = vec![100.0; 10];
        closes.push(40.0);
        MockDataPort::new()
            .with_bars("GONE", generate_bars("GONE", "2020-01-01", &closes))
            .with_delisting("GONE", "2020-01-11", reason)
    }

    fn position(side: Side) -> Position {
        Position {
            symbol: "GONE".into(),
            date: parse("2020-01-02"),
            side,
        }
    }

    fn single_return(prices: &PriceStore, config: ExecutionConfig, side: Side) -> ReturnRecord {
        let mut sim = ExecutionSimulator::new(prices, config);
        let trades = sim.execute(&[position(side)]);
        assert!(trades[0].executed);
        let mut returns = sim.returns(&trades, HOLD);
        assert_eq!(returns.len(), 1);
        returns.remove(0)
    }

    #[test]
    fn bankrupt_long_loses_eighty_percent() {
        let prices = store(collapsing(None));
        let r = single_return(&prices, no_cost(), Side::Long);
        assert_eq!(r.exit_type, ExitType::Delisted);
        assert_eq!(r.exit_price, Some(40.0));
        assert_relative_eq!(r.entry_price, 100.0);
        assert_relative_eq!(r.ret, -0.80, epsilon = 1e-12);
    }

    #[test]
    fn bankrupt_short_recovers_ninety_percent() {
        let prices = store(collapsing(None));
        let r = single_return(&prices, no_cost(), Side::Short);
        assert_eq!(r.exit_type, ExitType::Delisted);
        assert_relative_eq!(r.ret, 0.90, epsilon = 1e-12);
    }

    #[test]
    fn merger_reason_uses_last_price_haircut() {
        let port = MockDataPort::new()
            .with_bars("GONE", generate_bars("GONE", "2020-01-01", &[100.0; 11]))
            .with_delisting("GONE", "2020-01-11", Some("Acquired by BIGCO"));
        let prices = store(port);
        let r = single_return(&prices, no_cost(), Side::Long);
        assert_eq!(r.exit_type, ExitType::Delisted);
        assert_relative_eq!(r.ret, -0.10, epsilon = 1e-12);
    }

    #[test]
    fn without_estimator_the_exit_is_no_data() {
        let prices = store(collapsing(None));
        let config = ExecutionConfig {
            smart_delisting: false,
            ..no_cost()
        };
        let mut sim = ExecutionSimulator::new(&prices, config);
        let trades = sim.execute(&[position(Side::Long)]);
        let returns = sim.returns(&trades, HOLD);

        assert_eq!(returns[0].exit_type, ExitType::NoData);
        assert_eq!(returns[0].exit_price, None);
        assert_relative_eq!(returns[0].ret, -0.5);
        assert_eq!(sim.stats().report().no_data_exits, 1);
    }

    #[test]
    fn large_gains_are_clipped_to_one() {
        let mut closes = vec![10.0; 5];
        closes.extend([40.0; 10]);
        let prices = store(
            MockDataPort::new().with_bars("JUMP", generate_bars("JUMP", "2020-01-01", &closes)),
        );
        let config = ExecutionConfig {
            quality_filter: false,
            ..no_cost()
        };
        let mut sim = ExecutionSimulator::new(&prices, config);
        let trades = sim.execute(&[Position {
            symbol: "JUMP".into(),
            date: parse("2020-01-02"),
            side: Side::Long,
        }]);
        let returns = sim.returns(&trades, 5);

        assert_eq!(returns[0].exit_type, ExitType::Normal);
        assert_eq!(returns[0].exit_price, Some(40.0));
        assert_eq!(returns[0].ret, 1.0);
    }

    #[test]
    fn positions_are_not_opened_after_delisting() {
        let prices = store(collapsing(None));
        let mut sim = ExecutionSimulator::new(&prices, no_cost());
        let trades = sim.execute(&[Position {
            symbol: "GONE".into(),
            date: parse("2020-01-20"),
            side: Side::Long,
        }]);
        assert!(!trades[0].executed);
        assert_eq!(sim.stats().report().dropped.no_price_data, 1);
    }
}

mod positions {
    use super::*;

    fn signals(values: &[f64]) -> Vec<Signal> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Signal {
                symbol: format!("S{}", i + 1),
                date: parse("2020-01-02"),
                value: *v,
            })
            .collect()
    }

    #[test]
    fn three_symbols_take_one_long() {
        let positions = build_positions(&signals(&[1.0, 2.0, 3.0]), 0.2, 0.0);
        let longs: Vec<&str> = positions
            .iter()
            .filter(|p| p.side == Side::Long)
            .map(|p| p.symbol.as_str())
            .collect();
        assert_eq!(longs, vec!["S3"]);
        assert_eq!(positions.iter().filter(|p| p.side == Side::Flat).count(), 2);
    }

    #[test]
    fn overlapping_buckets_resolve_to_short() {
        let positions = build_positions(&signals(&[1.0, 2.0]), 1.0, 0.5);
        let sides: Vec<(&str, Side)> = positions
            .iter()
            .map(|p| (p.symbol.as_str(), p.side))
            .collect();
        assert_eq!(sides, vec![("S2", Side::Long), ("S1", Side::Short)]);
    }
}

mod information_coefficient {
    use super::*;

    fn rows(date: &str, returns: &[f64]) -> (Vec<Signal>, Vec<ReturnRecord>) {
        let date = parse(date);
        let mut signals = Vec::new();
        let mut records = Vec::new();
        for (i, r) in returns.iter().enumerate() {
            let symbol = format!("S{i}");
            signals.push(Signal {
                symbol: symbol.clone(),
                date,
                value: i as f64,
            });
            records.push(ReturnRecord {
                symbol,
                signal_date: date,
                entry_price: 10.0,
                exit_price: Some(10.0 * (1.0 + r)),
                side: Side::Long,
                ret: *r,
                holding_period: 5,
                exit_type: ExitType::Normal,
            });
        }
        (signals, records)
    }

    #[test]
    fn per_date_ic_differs_from_pooled_ic() {
        let (mut signals, mut returns) = rows("2020-01-02", &[0.01, 0.02, 0.03, 0.04, 0.05]);
        let (s2, r2) = rows("2020-01-09", &[0.11, 0.12, 0.13, 0.14, 0.15]);
        signals.extend(s2);
        returns.extend(r2);

        let ic = metrics::ic(&signals, &returns);
        assert_eq!(ic.n, 2);
        assert_eq!(ic.n_merged, 10);
        assert_relative_eq!(ic.ic.unwrap(), 1.0, epsilon = 1e-12);
        assert!(ic.ic_overall.unwrap() < 0.5);
    }

    #[test]
    fn thin_dates_are_excluded() {
        let (signals, returns) = rows("2020-01-02", &[0.01, 0.02, 0.03, 0.04]);
        let ic = metrics::ic(&signals, &returns);
        assert_eq!(ic.n, 0);
        assert_eq!(ic.ic, None);
        assert_eq!(ic.n_merged, 4);
    }
}

mod engine {
    use super::*;

    fn run_with(port: Rc<dyn DataPort>) -> BacktestRun {
        BacktestEngine::new(open_config("2020-02-01", "2020-03-01"), port)
            .unwrap()
            .run()
            .unwrap()
    }

    #[test]
    fn json_cache_reproduces_signals_bit_for_bit() {
        let tmp = TempDir::new().unwrap();
        let config = open_config("2020-02-01", "2020-03-01");

        let mut first = BacktestEngine::new(config.clone(), Rc::new(trending_port()))
            .unwrap()
            .with_cache(Box::new(JsonSignalCache::new(tmp.path())));
        let cold = first.run().unwrap();
        assert_eq!(cold.cache_hits, 0);

        let mut second = BacktestEngine::new(config, Rc::new(trending_port()))
            .unwrap()
            .with_cache(Box::new(JsonSignalCache::new(tmp.path())));
        let warm = second.run().unwrap();

        assert_eq!(warm.cache_hits, warm.rebalance_dates.len());
        assert_eq!(signal_bits(&cold), signal_bits(&warm));
        assert_eq!(cold.returns, warm.returns);
    }

    #[test]
    fn second_run_reads_every_date_from_memory() {
        let mut engine = BacktestEngine::new(open_config("2020-02-01", "2020-03-01"), Rc::new(trending_port()))
            .unwrap()
            .with_cache(Box::new(MemorySignalCache::new()));
        let cold = engine.run().unwrap();
        let warm = engine.run().unwrap();
        assert_eq!(cold.cache_hits, 0);
        assert_eq!(warm.cache_hits, warm.rebalance_dates.len());
    }

    #[test]
    fn changed_weights_miss_the_cache() {
        let tmp = TempDir::new().unwrap();
        let mut config = open_config("2020-02-01", "2020-03-01");
        BacktestEngine::new(config.clone(), Rc::new(trending_port()))
            .unwrap()
            .with_cache(Box::new(JsonSignalCache::new(tmp.path())))
            .run()
            .unwrap();

        config.weights.insert("momentum".to_string(), 2.0);
        let rerun = BacktestEngine::new(config, Rc::new(trending_port()))
            .unwrap()
            .with_cache(Box::new(JsonSignalCache::new(tmp.path())))
            .run()
            .unwrap();
        assert_eq!(rerun.cache_hits, 0);
    }

    #[test]
    fn smoothing_reuses_cached_raw_signals() {
        let tmp = TempDir::new().unwrap();
        let mut config = open_config("2020-02-01", "2020-03-01");
        let cold = BacktestEngine::new(config.clone(), Rc::new(trending_port()))
            .unwrap()
            .with_cache(Box::new(JsonSignalCache::new(tmp.path())))
            .run()
            .unwrap();

        config.backtest.smoothing.window = 3;
        let smoothed = BacktestEngine::new(config, Rc::new(trending_port()))
            .unwrap()
            .with_cache(Box::new(JsonSignalCache::new(tmp.path())))
            .run()
            .unwrap();
        assert_eq!(smoothed.cache_hits, cold.rebalance_dates.len());
    }

    #[test]
    fn storage_errors_are_recovered_per_symbol() {
        let port = trending_port().with_error("BAD", "corrupt file");
        let run = run_with(Rc::new(port));
        assert!(!run.signals.is_empty());
        assert!(run.signals.iter().all(|s| s.symbol != "BAD"));
    }

    #[test]
    fn csv_data_matches_in_memory_data() {
        let tmp = TempDir::new().unwrap();
        let port = trending_port();
        write_price_csvs(tmp.path(), &port);

        let from_csv = run_with(Rc::new(CsvAdapter::new(tmp.path())));
        let in_memory = run_with(Rc::new(port));
        assert_eq!(signal_bits(&from_csv), signal_bits(&in_memory));
        assert_eq!(from_csv.returns, in_memory.returns);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_data_matches_in_memory_data() {
        use factorbench::adapters::sqlite_adapter::SqliteAdapter;

        let port = trending_port();
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        for bars in port.data.values() {
            adapter.insert_bars(bars).unwrap();
        }

        let from_sqlite = run_with(Rc::new(adapter));
        let in_memory = run_with(Rc::new(port));
        assert_eq!(signal_bits(&from_sqlite), signal_bits(&in_memory));
        assert_eq!(from_sqlite.returns, in_memory.returns);
    }
}

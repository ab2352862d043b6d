//! Writes run tables as CSV and the analysis summary as JSON.
//!
//! A single run lands directly in the output directory:
//! `signals.csv`, `positions.csv`, `trades.csv`, `returns.csv`,
//! `forward_returns.csv` and `summary.json`. An out-of-sample run writes one
//! such set under `train/` and `test/` plus `oos.json` at the top.

use crate::domain::backtest::{BacktestRun, OutOfSampleRun, RunAnalysis};
use crate::domain::error::FactorbenchError;
use crate::domain::execution::{ExitType, FilterReport, ReturnRecord};
use crate::ports::output_port::OutputPort;
use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
struct RunCounts {
    rebalance_dates: usize,
    signals: usize,
    positions: usize,
    active_positions: usize,
    trades: usize,
    executed_trades: usize,
    returns: usize,
    forward_returns: usize,
    forward_returns_raw: usize,
    symbol_errors: usize,
    date_errors: usize,
    cache_hits: usize,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    start_date: NaiveDate,
    end_date: NaiveDate,
    counts: RunCounts,
    analysis: &'a RunAnalysis,
    filter_stats: &'a FilterReport,
    rebalance_dates: &'a [NaiveDate],
}

fn csv_error(path: &Path, e: csv::Error) -> FactorbenchError {
    FactorbenchError::storage(format!("write {}: {e}", path.display()))
}

fn json_error(path: &Path, e: serde_json::Error) -> FactorbenchError {
    FactorbenchError::storage(format!("write {}: {e}", path.display()))
}

fn format_value(v: f64) -> String {
    if v.is_finite() {
        v.to_string()
    } else {
        String::new()
    }
}

pub struct CsvOutputAdapter {
    dir: PathBuf,
}

impl CsvOutputAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_run_to(&self, dir: &Path, run: &BacktestRun) -> Result<(), FactorbenchError> {
        fs::create_dir_all(dir)?;

        let path = dir.join("signals.csv");
        let mut wtr = csv::Writer::from_path(&path).map_err(|e| csv_error(&path, e))?;
        wtr.write_record(["symbol", "date", "signal"])
            .map_err(|e| csv_error(&path, e))?;
        for s in &run.signals {
            wtr.write_record([&s.symbol, &s.date.to_string(), &format_value(s.value)])
                .map_err(|e| csv_error(&path, e))?;
        }
        wtr.flush()?;

        let path = dir.join("positions.csv");
        let mut wtr = csv::Writer::from_path(&path).map_err(|e| csv_error(&path, e))?;
        wtr.write_record(["symbol", "date", "position"])
            .map_err(|e| csv_error(&path, e))?;
        for p in &run.positions {
            wtr.write_record([&p.symbol, &p.date.to_string(), &p.side.as_i8().to_string()])
                .map_err(|e| csv_error(&path, e))?;
        }
        wtr.flush()?;

        let path = dir.join("trades.csv");
        let mut wtr = csv::Writer::from_path(&path).map_err(|e| csv_error(&path, e))?;
        wtr.write_record(["symbol", "signal_date", "position", "fill_price", "executed"])
            .map_err(|e| csv_error(&path, e))?;
        for t in &run.trades {
            wtr.write_record([
                &t.symbol,
                &t.signal_date.to_string(),
                &t.side.as_i8().to_string(),
                &t.fill_price.map(format_value).unwrap_or_default(),
                &t.executed.to_string(),
            ])
            .map_err(|e| csv_error(&path, e))?;
        }
        wtr.flush()?;

        write_returns(&dir.join("returns.csv"), &run.returns)?;
        write_returns(&dir.join("forward_returns.csv"), &run.forward_returns)?;

        let summary = RunSummary {
            start_date: run.start_date,
            end_date: run.end_date,
            counts: RunCounts {
                rebalance_dates: run.rebalance_dates.len(),
                signals: run.signals.len(),
                positions: run.positions.len(),
                active_positions: run.positions.iter().filter(|p| p.side.is_active()).count(),
                trades: run.trades.len(),
                executed_trades: run.trades.iter().filter(|t| t.executed).count(),
                returns: run.returns.len(),
                forward_returns: run.forward_returns.len(),
                forward_returns_raw: run.forward_returns_raw.len(),
                symbol_errors: run.symbol_errors,
                date_errors: run.date_errors,
                cache_hits: run.cache_hits,
            },
            analysis: &run.analysis,
            filter_stats: &run.filter_stats,
            rebalance_dates: &run.rebalance_dates,
        };
        write_json(&dir.join("summary.json"), &summary)?;

        info!(dir = %dir.display(), "wrote run output");
        Ok(())
    }
}

fn write_returns(path: &Path, records: &[ReturnRecord]) -> Result<(), FactorbenchError> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    wtr.write_record([
        "symbol",
        "signal_date",
        "entry_price",
        "exit_price",
        "position",
        "return",
        "holding_period",
        "exit_type",
    ])
    .map_err(|e| csv_error(path, e))?;
    for r in records {
        let exit_type = match r.exit_type {
            ExitType::Normal => "normal",
            ExitType::Delisted => "delisted",
            ExitType::NoData => "no_data",
        };
        wtr.write_record([
            &r.symbol,
            &r.signal_date.to_string(),
            &format_value(r.entry_price),
            &r.exit_price.map(format_value).unwrap_or_default(),
            &r.side.as_i8().to_string(),
            &format_value(r.ret),
            &r.holding_period.to_string(),
            &exit_type.to_string(),
        ])
        .map_err(|e| csv_error(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FactorbenchError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| json_error(path, e))?;
    fs::write(path, json)?;
    Ok(())
}

impl OutputPort for CsvOutputAdapter {
    fn write_run(&self, run: &BacktestRun) -> Result<(), FactorbenchError> {
        self.write_run_to(&self.dir, run)
    }

    fn write_out_of_sample(&self, run: &OutOfSampleRun) -> Result<(), FactorbenchError> {
        self.write_run_to(&self.dir.join("train"), &run.train)?;
        self.write_run_to(&self.dir.join("test"), &run.test)?;
        write_json(&self.dir.join("oos.json"), &run.comparison)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::{ExecutedTrade, FilterStats};
    use crate::domain::metrics::{self, Analysis};
    use crate::domain::position::{Position, Side};
    use crate::domain::signal::Signal;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn empty_analysis() -> Analysis {
        metrics::analyze(&[], &[])
    }

    fn sample_run() -> BacktestRun {
        let signals = vec![
            Signal {
                symbol: "AAA".into(),
                date: day(2),
                value: 1.0,
            },
            Signal {
                symbol: "BBB".into(),
                date: day(2),
                value: f64::NAN,
            },
        ];
        let returns = vec![ReturnRecord {
            symbol: "AAA".into(),
            signal_date: day(2),
            entry_price: 10.0,
            exit_price: None,
            side: Side::Long,
            ret: -0.8,
            holding_period: 5,
            exit_type: ExitType::Delisted,
        }];
        BacktestRun {
            start_date: day(1),
            end_date: day(31),
            rebalance_dates: vec![day(2)],
            signals,
            positions: vec![Position {
                symbol: "AAA".into(),
                date: day(2),
                side: Side::Long,
            }],
            trades: vec![ExecutedTrade {
                symbol: "AAA".into(),
                signal_date: day(2),
                side: Side::Long,
                fill_price: Some(10.02),
                executed: true,
            }],
            returns: returns.clone(),
            forward_returns: returns,
            forward_returns_raw: Vec::new(),
            analysis: RunAnalysis {
                forward: empty_analysis(),
                ic_raw: empty_analysis().ic,
                positions: empty_analysis(),
            },
            filter_stats: FilterStats::default().report(),
            symbol_errors: 0,
            date_errors: 0,
            cache_hits: 0,
        }
    }

    #[test]
    fn writes_all_tables() {
        let tmp = TempDir::new().unwrap();
        let adapter = CsvOutputAdapter::new(tmp.path());
        adapter.write_run(&sample_run()).unwrap();

        for name in [
            "signals.csv",
            "positions.csv",
            "trades.csv",
            "returns.csv",
            "forward_returns.csv",
            "summary.json",
        ] {
            assert!(tmp.path().join(name).exists(), "missing {name}");
        }

        let signals = fs::read_to_string(tmp.path().join("signals.csv")).unwrap();
        assert_eq!(signals.lines().next(), Some("symbol,date,signal"));
        assert!(signals.contains("BBB,2024-01-02,\n"));

        let returns = fs::read_to_string(tmp.path().join("returns.csv")).unwrap();
        assert!(returns.contains("AAA,2024-01-02,10,,1,-0.8,5,delisted"));
    }

    #[test]
    fn summary_carries_counts_and_dates() {
        let tmp = TempDir::new().unwrap();
        CsvOutputAdapter::new(tmp.path())
            .write_run(&sample_run())
            .unwrap();

        let raw = fs::read_to_string(tmp.path().join("summary.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["counts"]["signals"], 2);
        assert_eq!(json["counts"]["executed_trades"], 1);
        assert_eq!(json["rebalance_dates"][0], "2024-01-02");
    }

    #[test]
    fn out_of_sample_writes_both_legs() {
        let tmp = TempDir::new().unwrap();
        let run = OutOfSampleRun {
            train: sample_run(),
            test: sample_run(),
            comparison: metrics::out_of_sample(&empty_analysis().ic, &empty_analysis().ic),
        };
        CsvOutputAdapter::new(tmp.path())
            .write_out_of_sample(&run)
            .unwrap();

        assert!(tmp.path().join("train").join("summary.json").exists());
        assert!(tmp.path().join("test").join("returns.csv").exists());
        assert!(tmp.path().join("oos.json").exists());
    }
}

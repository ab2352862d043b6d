//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use tracing::{info, Level};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_output_adapter::CsvOutputAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_signal_cache::JsonSignalCache;
use crate::domain::backtest::BacktestEngine;
use crate::domain::config::{parse_date, Backend, RunConfig};
use crate::domain::config_validation::{validate_oos, validate_run_config};
use crate::domain::error::FactorbenchError;
use crate::domain::signal::SignalPipeline;
use crate::domain::universe::UniverseFilter;
use crate::ports::data_port::DataPort;
use crate::ports::output_port::OutputPort;

const DEFAULT_CACHE_DIR: &str = ".factorbench_cache";

#[derive(Parser, Debug)]
#[command(name = "factorbench", about = "Point-in-time factor backtester")]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over [backtest] start_date..end_date
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },
    /// Run the train and test windows from [oos] and compare their IC
    Oos {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },
    /// Print the tradable universe and its filter audit for one date
    Universe {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        date: String,
    },
    /// Check a configuration file without loading market data
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List every symbol with price history
    ListSymbols {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_logging(cli.verbose);

    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn dispatch(command: Command) -> Result<(), FactorbenchError> {
    match command {
        Command::Backtest { config, output } => run_backtest(&config, &output),
        Command::Oos { config, output } => run_oos(&config, &output),
        Command::Universe { config, date } => run_universe(&config, &date),
        Command::Validate { config } => run_validate(&config),
        Command::ListSymbols { config } => run_list_symbols(&config),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn load_config(path: &Path) -> Result<RunConfig, FactorbenchError> {
    let adapter = FileConfigAdapter::from_file(path)?;
    RunConfig::from_port(&adapter)
}

/// Data port for the configured backend.
pub fn open_data_port(config: &RunConfig) -> Result<Rc<dyn DataPort>, FactorbenchError> {
    match config.data.backend {
        Backend::Csv => Ok(Rc::new(CsvAdapter::from_config(&config.data)?)),
        Backend::Sqlite => open_sqlite(config),
    }
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &RunConfig) -> Result<Rc<dyn DataPort>, FactorbenchError> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;

    let adapter = SqliteAdapter::from_config(&config.data)?;
    adapter.initialize_schema()?;
    Ok(Rc::new(adapter))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &RunConfig) -> Result<Rc<dyn DataPort>, FactorbenchError> {
    Err(FactorbenchError::invalid(
        "data",
        "backend",
        "sqlite support is not compiled in",
    ))
}

fn build_engine(config: RunConfig) -> Result<BacktestEngine, FactorbenchError> {
    let port = open_data_port(&config)?;
    let cache = config.cache.clone();
    let engine = BacktestEngine::new(config, port)?;
    if !cache.enabled {
        return Ok(engine);
    }

    let dir = cache.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    info!(dir = %dir.display(), refresh = cache.refresh, "signal cache enabled");
    Ok(engine.with_cache(Box::new(JsonSignalCache::new(dir))))
}

fn run_backtest(config_path: &Path, output: &Path) -> Result<(), FactorbenchError> {
    eprintln!("Loading config from {}", config_path.display());
    let config = load_config(config_path)?;
    let mut engine = build_engine(config)?;

    let run = engine.run()?;
    CsvOutputAdapter::new(output).write_run(&run)?;

    let ic = &run.analysis.forward.ic;
    eprintln!(
        "{} rebalance dates, {} signals, {} returns",
        run.rebalance_dates.len(),
        run.signals.len(),
        run.returns.len()
    );
    eprintln!("IC: {}  t-stat: {}  n: {}", fmt_opt(ic.ic), fmt_opt(ic.t_stat), ic.n);
    eprintln!("Output written to {}", output.display());
    Ok(())
}

fn run_oos(config_path: &Path, output: &Path) -> Result<(), FactorbenchError> {
    eprintln!("Loading config from {}", config_path.display());
    let config = load_config(config_path)?;
    let oos = validate_oos(&config)?;
    let mut engine = build_engine(config)?;

    let run = engine.run_out_of_sample(&oos)?;
    CsvOutputAdapter::new(output).write_out_of_sample(&run)?;

    let c = &run.comparison;
    eprintln!("Train IC: {}  n: {}", fmt_opt(c.train_ic), c.train_n);
    eprintln!("Test IC:  {}  n: {}", fmt_opt(c.test_ic), c.test_n);
    eprintln!("IC degradation: {}%", fmt_opt(c.ic_degradation_pct));
    eprintln!("Output written to {}", output.display());
    Ok(())
}

fn run_universe(config_path: &Path, date: &str) -> Result<(), FactorbenchError> {
    let date = parse_date("cli", "date", date)?;
    let config = load_config(config_path)?;
    let mut engine = build_engine(config)?;

    let (symbols, audit) = engine.universe_at(date);
    for symbol in &symbols {
        println!("{symbol}");
    }
    if let Some(audit) = audit {
        let json = serde_json::to_string_pretty(&audit)
            .map_err(|e| FactorbenchError::storage(format!("encode audit: {e}")))?;
        eprintln!("{json}");
    }
    eprintln!("{} symbols tradable on {date}", symbols.len());
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), FactorbenchError> {
    eprintln!("Validating config: {}", config_path.display());
    let config = load_config(config_path)?;
    validate_run_config(&config)?;

    let pipeline = SignalPipeline::with_builtin(
        config.signal.clone(),
        UniverseFilter::new(config.universe.clone()),
        &config.factors,
    );
    pipeline.validate_weights(&config.weights)?;
    if config.oos.is_some() {
        validate_oos(&config)?;
    }

    eprintln!("Factors: {}", pipeline.factor_names().join(", "));
    eprintln!("\nWeights:");
    for (name, weight) in &config.weights {
        eprintln!("  {name}: {weight}");
    }
    eprintln!("Config hash:  {}", config.config_hash()?);
    eprintln!("Weights hash: {}", config.weights_hash()?);
    eprintln!("\nConfiguration is valid.");
    Ok(())
}

fn run_list_symbols(config_path: &Path) -> Result<(), FactorbenchError> {
    let config = load_config(config_path)?;
    let symbols = open_data_port(&config)?.list_symbols()?;

    if symbols.is_empty() {
        eprintln!("No symbols found");
    } else {
        for symbol in &symbols {
            println!("{symbol}");
        }
        eprintln!("{} symbols found", symbols.len());
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "n/a".to_string())
}

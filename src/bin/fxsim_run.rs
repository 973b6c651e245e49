//! Simulation Runner CLI
//!
//! Entrypoint for replaying a market-data file against a strategy.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin fxsim_run -- \
//!   --data data/eurusd.20240115.csv \
//!   --strategy triangle \
//!   --param notional_usd=1000000 \
//!   --output results.json
//! ```
//!
//! # Exit Codes
//!
//! - 0: Run completed
//! - 2: Configuration or validation error (bad flags, malformed input)
//! - 3: Runtime error (I/O)

use std::env;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use fxsim::{
    available_strategies, load_quotes_csv, make_strategy, read_quotes, FeedError, QuoteRecord,
    Session, SessionSummary, SimConfig, StrategyParams, NANOS_PER_MILLI,
};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================

#[derive(Debug, Clone)]
struct CliArgs {
    data_path: String,
    strategy_name: Option<String>,
    config_path: Option<String>,
    output_path: Option<String>,
    inbound_ms: Option<i64>,
    outbound_ms: Option<i64>,
    min_gap_ms: Option<i64>,
    max_nop: Option<f64>,
    numeraire: Option<String>,
    params: Vec<(String, String)>,
    verbose: bool,
}

impl CliArgs {
    fn parse() -> Result<Self, String> {
        let args: Vec<String> = env::args().collect();
        let mut i = 1;

        let mut data_path = None;
        let mut strategy_name = None;
        let mut config_path = None;
        let mut output_path = None;
        let mut inbound_ms = None;
        let mut outbound_ms = None;
        let mut min_gap_ms = None;
        let mut max_nop = None;
        let mut numeraire = None;
        let mut params = Vec::new();
        let mut verbose = false;

        fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
            *i += 1;
            args.get(*i)
                .map(|s| s.as_str())
                .ok_or_else(|| format!("{} requires a value", flag))
        }

        while i < args.len() {
            match args[i].as_str() {
                "--data" | "-d" => {
                    data_path = Some(value(&args, &mut i, "--data")?.to_owned());
                }
                "--strategy" | "-S" => {
                    strategy_name = Some(value(&args, &mut i, "--strategy")?.to_owned());
                }
                "--config" | "-c" => {
                    config_path = Some(value(&args, &mut i, "--config")?.to_owned());
                }
                "--output" | "-o" => {
                    output_path = Some(value(&args, &mut i, "--output")?.to_owned());
                }
                "--inbound-ms" => {
                    let v = value(&args, &mut i, "--inbound-ms")?;
                    inbound_ms = Some(v.parse().map_err(|e| format!("invalid --inbound-ms: {}", e))?);
                }
                "--outbound-ms" => {
                    let v = value(&args, &mut i, "--outbound-ms")?;
                    outbound_ms =
                        Some(v.parse().map_err(|e| format!("invalid --outbound-ms: {}", e))?);
                }
                "--min-gap-ms" => {
                    let v = value(&args, &mut i, "--min-gap-ms")?;
                    min_gap_ms = Some(v.parse().map_err(|e| format!("invalid --min-gap-ms: {}", e))?);
                }
                "--max-nop" => {
                    let v = value(&args, &mut i, "--max-nop")?;
                    max_nop = Some(v.parse().map_err(|e| format!("invalid --max-nop: {}", e))?);
                }
                "--numeraire" => {
                    numeraire = Some(value(&args, &mut i, "--numeraire")?.to_owned());
                }
                "--param" | "-p" => {
                    let v = value(&args, &mut i, "--param")?;
                    let (key, val) = v
                        .split_once('=')
                        .ok_or_else(|| format!("--param expects key=value, got {:?}", v))?;
                    params.push((key.to_owned(), val.to_owned()));
                }
                "--verbose" | "-v" => {
                    verbose = true;
                }
                "--list-strategies" => {
                    print_strategies();
                    std::process::exit(0);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                arg => {
                    return Err(format!("Unknown argument: {}", arg));
                }
            }
            i += 1;
        }

        Ok(Self {
            data_path: data_path.ok_or("--data is required")?,
            strategy_name,
            config_path,
            output_path,
            inbound_ms,
            outbound_ms,
            min_gap_ms,
            max_nop,
            numeraire,
            params,
            verbose,
        })
    }
}

fn print_usage() {
    eprintln!(
        r#"
fxsim_run - deterministic FX market-making simulator

USAGE:
    fxsim_run [OPTIONS]

REQUIRED:
    --data, -d <PATH>        Market data CSV (timestamp_ns,symbol,bidSize,
                             bidPrice,askSize,askPrice); '-' reads stdin

OPTIONS:
    --strategy, -S <NAME>    Strategy to run (default: none; see
                             --list-strategies)
    --param, -p <K=V>        Strategy parameter (repeatable; numeric values
                             become params, others strings)
    --config, -c <PATH>      JSON settings file
    --inbound-ms <N>         Inbound order delay override (ms)
    --outbound-ms <N>        Outbound fill/status delay override (ms)
    --min-gap-ms <N>         Minimum order gap override (ms)
    --max-nop <X>            Net-open-position cap override
    --numeraire <CCY>        Valuation currency (default: USD)
    --output, -o <PATH>      Write a JSON results artifact
    --verbose, -v            Debug-level logging
    --list-strategies        List available strategies
    --help, -h               Show this help

EXIT CODES:
    0  Run completed
    2  Configuration or validation error
    3  Runtime error

The run prints one line to stdout:
    lastEventTime:<ns>,pnl:<value>,nop:<value>
"#
    );
}

fn print_strategies() {
    eprintln!("Available strategies:");
    for (name, desc) in available_strategies() {
        eprintln!("  {:14} - {}", name, desc);
    }
}

// =============================================================================
// RESULT OUTPUT
// =============================================================================

#[derive(Debug, Serialize)]
struct RunOutput {
    config: SimConfig,
    strategy: Option<String>,
    records_replayed: usize,
    summary: SessionSummary,
}

fn write_output_atomic(path: &str, content: &str) -> Result<()> {
    let path = PathBuf::from(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("creating output directory")?;
    }

    // Write to temp file then rename (atomic on POSIX)
    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path).context("creating temp output file")?;
    let mut writer = BufWriter::new(file);
    writer.write_all(content.as_bytes()).context("writing output")?;
    writer.flush().context("flushing output")?;
    drop(writer);
    fs::rename(&temp_path, &path).context("renaming output into place")?;
    Ok(())
}

// =============================================================================
// MAIN
// =============================================================================

fn build_config(args: &CliArgs) -> Result<SimConfig, String> {
    let mut config = match &args.config_path {
        Some(path) => SimConfig::from_json_file(std::path::Path::new(path))
            .map_err(|e| format!("{}", e))?,
        None => SimConfig::default(),
    };

    if let Some(ms) = args.inbound_ms {
        config.lp.inbound_delay = ms * NANOS_PER_MILLI;
    }
    if let Some(ms) = args.outbound_ms {
        config.lp.outbound_delay = ms * NANOS_PER_MILLI;
    }
    if let Some(ms) = args.min_gap_ms {
        config.lp.min_order_gap = ms * NANOS_PER_MILLI;
    }
    if let Some(cap) = args.max_nop {
        config.lp.max_nop = cap;
    }
    if let Some(ccy) = &args.numeraire {
        config.numeraire = ccy.clone();
    }
    Ok(config)
}

fn strategy_params(args: &CliArgs) -> StrategyParams {
    let mut params = StrategyParams::new();
    for (key, value) in &args.params {
        match value.parse::<f64>() {
            Ok(number) => params = params.with_param(key.clone(), number),
            Err(_) => params = params.with_string(key.clone(), value.clone()),
        }
    }
    params
}

fn load_data(args: &CliArgs) -> Result<Vec<QuoteRecord>, FeedError> {
    if args.data_path == "-" {
        read_quotes(std::io::stdin().lock())
    } else {
        load_quotes_csv(std::path::Path::new(&args.data_path))
    }
}

fn main() {
    let args = match CliArgs::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let records = match load_data(&args) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error loading data: {}", e);
            let code = match e {
                FeedError::Io(_) => 3,
                FeedError::Parse(_) => 2,
            };
            std::process::exit(code);
        }
    };
    let records_replayed = records.len();

    let mut session = Session::new(config.clone());
    if let Err(e) = session.add_quotes(records) {
        eprintln!("Error: {}", e);
        std::process::exit(3);
    }

    // Reach the first market-data timestamp before the strategy exists, so
    // its clock and book view start warm.
    session.warm_up();

    match args.strategy_name.as_deref() {
        None | Some("none") => {
            info!("no strategy attached; replaying market data only");
        }
        Some(name) => {
            let params = strategy_params(&args);
            match make_strategy(name, &params) {
                Ok(strategy) => session.attach_strategy(strategy),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    print_strategies();
                    std::process::exit(2);
                }
            }
        }
    }

    session.dispatch();
    let summary = session.summary();

    // The canonical result line.
    println!("{}", summary.stdout_line());

    eprintln!("{}", "=".repeat(60));
    eprintln!("SIMULATION SUMMARY");
    eprintln!("{}", "=".repeat(60));
    eprintln!("Records replayed:   {}", records_replayed);
    eprintln!("Last event time:    {} ns", summary.last_event_time);
    eprintln!("PnL ({}):          {:.2}", config.numeraire, summary.pnl);
    eprintln!("NOP ({}):          {:.2}", config.numeraire, summary.nop);
    eprintln!("{}", "=".repeat(60));

    if let Some(path) = &args.output_path {
        let output = RunOutput {
            config,
            strategy: args.strategy_name.clone(),
            records_replayed,
            summary,
        };
        let json = match serde_json::to_string_pretty(&output) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("JSON serialization error: {}", e);
                std::process::exit(3);
            }
        };
        if let Err(e) = write_output_atomic(path, &json) {
            eprintln!("Error writing output: {:#}", e);
            std::process::exit(3);
        }
        info!(path = %path, "results written");
    }
}

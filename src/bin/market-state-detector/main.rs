//! Command-line front end.
//!
//! Exit status: 0 = no Stage-1 signals, 1 = Stage-1 detected in any input,
//! 2 = error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use market_state_detector::prelude::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod csv_source;

use csv_source::{load_series, Columns, CsvDirectoryFetcher};

const RULE: &str = "======================================================================";

#[derive(Parser)]
#[command(name = "market-state-detector", version)]
#[command(
    about = "Detect high-uncertainty (Stage 1) market regimes from daily OHLC data",
    long_about = None
)]
struct Cli {
    /// CSV file(s) with daily OHLC rows, oldest first
    #[arg(long = "csv", required = true, num_args = 1..)]
    csv: Vec<PathBuf>,

    /// Configuration file (TOML, or JSON by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Apply the symbol's preset thresholds, if one exists
    #[arg(long)]
    symbol: Option<String>,

    #[arg(long, default_value = "open")]
    open_col: String,
    #[arg(long, default_value = "high")]
    high_col: String,
    #[arg(long, default_value = "low")]
    low_col: String,
    #[arg(long, default_value = "close")]
    close_col: String,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Directory of benchmark CSVs named <ID>.csv; enables market context
    #[arg(long)]
    benchmark_dir: Option<PathBuf>,

    /// Benchmark identifiers used for market context
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_BENCHMARKS.map(String::from))]
    benchmarks: Vec<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn columns(&self) -> Columns {
        Columns {
            open: self.open_col.clone(),
            high: self.high_col.clone(),
            low: self.low_col.clone(),
            close: self.close_col.clone(),
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    source: String,
    #[serde(flatten)]
    result: &'a AnalysisResult,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::from(1),
        Ok(false) => ExitCode::SUCCESS,
        Err(err) => {
            if cli.json {
                println!("{}", serde_json::json!({ "error": format!("{err:#}") }));
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // Logs go to stderr so stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Returns whether any input is Stage-1 ON
fn run(cli: &Cli) -> Result<bool> {
    let mut loader = ConfigLoader::new();
    if let Some(symbol) = &cli.symbol {
        loader = loader.symbol(symbol);
    }
    if let Some(path) = &cli.config {
        loader = loader.file(path);
    }
    let detector = RegimeDetector::new(loader.load()?)?;

    let columns = cli.columns();
    let classifier = cli.benchmark_dir.as_ref().map(|dir| {
        ContextClassifier::new(CsvDirectoryFetcher::new(dir, columns.clone()))
            .with_benchmarks(cli.benchmarks.iter().cloned())
    });

    let mut results = Vec::with_capacity(cli.csv.len());
    for path in &cli.csv {
        let series = load_series(path, &columns)?;
        let result = detector.analyze_with_context(&series, classifier.as_ref())?;
        results.push((path.display().to_string(), result));
    }

    if cli.json {
        print_json(&results)?;
    } else {
        for (source, result) in &results {
            print_human(source, result)?;
        }
    }

    Ok(results.iter().any(|(_, r)| r.stage_1_detected))
}

fn print_json(results: &[(String, AnalysisResult)]) -> Result<()> {
    let reports: Vec<Report> = results
        .iter()
        .map(|(source, result)| Report {
            source: source.clone(),
            result,
        })
        .collect();
    let out = match reports.as_slice() {
        [single] => serde_json::to_string_pretty(single)?,
        many => serde_json::to_string_pretty(many)?,
    };
    println!("{out}");
    Ok(())
}

fn print_human(source: &str, result: &AnalysisResult) -> Result<()> {
    println!("\n{RULE}");
    println!("MARKET STATE DETECTION RESULTS: {source}");
    println!("{RULE}");
    println!("\n{}\n", result.summary);

    if result.stage_1_detected {
        println!("Detected Signals:");
        for flag in &result.flags {
            println!("\n  * {}", flag.label());
            let Some(signal) = result.signal(*flag) else {
                continue;
            };
            if let serde_json::Value::Object(details) = serde_json::to_value(&signal.details)? {
                for (key, value) in details {
                    match value.as_f64() {
                        Some(v) if value.is_f64() => println!("    - {key}: {v:.4}"),
                        _ => println!("    - {key}: {value}"),
                    }
                }
            }
        }
    }

    match &result.market_context {
        Some(ContextOutcome::Classified(ctx)) => println!("\n{ctx}"),
        Some(ContextOutcome::Unavailable { reason, .. }) => {
            println!("\nMarket context unavailable: {reason}")
        }
        None => {}
    }

    println!("\n{RULE}\n");
    Ok(())
}

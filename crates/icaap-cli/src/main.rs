mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::aggregate::AggregateArgs;
use commands::calibrate::CalibrateArgs;
use commands::recommend::RecommendArgs;
use commands::report::ReportArgs;
use commands::simulate::SimulateArgs;
use commands::transform::TransformArgs;

/// ICAAP stress scenario and risk quantification
#[derive(Parser)]
#[command(
    name = "icaap",
    version,
    about = "ICAAP stress scenario and risk quantification",
    long_about = "A CLI over the ICAAP stress engine: calibrate market factors, \
                  stress PD/LGD curves and rating migrations under macro shocks, \
                  recommend severities, simulate trading-book VaR/ES and assemble \
                  per-segment stress reports. Set RUST_LOG for diagnostics."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate factor means, volatilities and correlations from history
    Calibrate(CalibrateArgs),
    /// Stress PD/LGD curves and migration matrices under macro shocks
    Transform(TransformArgs),
    /// Recommend a stress severity from a portfolio profile
    Recommend(RecommendArgs),
    /// Monte Carlo trading-book P&L with VaR and Expected Shortfall
    Simulate(SimulateArgs),
    /// Summarise stressed curves and simulation into risk metrics
    Aggregate(AggregateArgs),
    /// Full stress report for one segment
    Report(ReportArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Calibrate(args) => commands::calibrate::run_calibrate(args),
        Commands::Transform(args) => commands::transform::run_transform(args),
        Commands::Recommend(args) => commands::recommend::run_recommend(args),
        Commands::Simulate(args) => commands::simulate::run_simulate(args),
        Commands::Aggregate(args) => commands::aggregate::run_aggregate(args),
        Commands::Report(args) => commands::report::run_report(args),
        Commands::Version => {
            println!("icaap {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    let printed = result.and_then(|value| Ok(output::format_output(&cli.output, &value)?));
    if let Err(e) = printed {
        eprintln!("{}: {}", "error".red().bold(), e);
        process::exit(1);
    }
}

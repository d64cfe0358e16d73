use clap::Args;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use icaap_core::config::EngineConfig;
use icaap_core::engine::memory::{InMemoryMarketData, InMemoryPortfolio};
use icaap_core::engine::{StressEngine, StressReportRequest};
use icaap_core::{Segment, SeverityLevel};

use super::parse_enum;
use crate::input;

/// Arguments for a full segment stress report
#[derive(Args)]
pub struct ReportArgs {
    /// Engine configuration file (.json, .yaml or .yml)
    #[arg(long)]
    pub config: String,

    /// Path to JSON data file ({"portfolio", "market", "request"})
    #[arg(long)]
    pub input: Option<String>,

    /// Segment to report on (overrides the request)
    #[arg(long, value_parser = parse_enum::<Segment>)]
    pub segment: Option<Segment>,

    /// Manually chosen severity (overrides the request)
    #[arg(long, value_parser = parse_enum::<SeverityLevel>)]
    pub manual_severity: Option<SeverityLevel>,

    /// Monte Carlo trials for the trading book (overrides the request)
    #[arg(long)]
    pub trials: Option<usize>,

    /// Seed for a reproducible trading-book simulation (overrides the request)
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Snapshot of portfolio and market data plus the request to run.
#[derive(Deserialize)]
struct ReportInput {
    portfolio: InMemoryPortfolio,
    #[serde(default)]
    market: InMemoryMarketData,
    request: StressReportRequest,
}

pub fn run_report(args: ReportArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let config: EngineConfig = input::file::read_config(&args.config)?;
    let report_input: ReportInput =
        input::read_input(args.input.as_deref(), "a stress report")?;

    let mut request = report_input.request;
    if let Some(segment) = args.segment {
        request.segment = segment;
    }
    if args.manual_severity.is_some() {
        request.manual_severity = args.manual_severity;
    }
    if let Some(t) = args.trials {
        request.trials = t;
    }
    if args.seed.is_some() {
        request.seed = args.seed;
    }

    debug!(
        segment = ?request.segment,
        trials = request.trials,
        "running stress report"
    );
    let engine = StressEngine::new(
        config,
        Arc::new(report_input.portfolio),
        Arc::new(report_input.market),
    )?;
    let result = engine.run(&request)?;
    Ok(serde_json::to_value(result)?)
}

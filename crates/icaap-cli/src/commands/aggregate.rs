use clap::Args;
use serde_json::Value;

use icaap_core::aggregation::metrics::{self, AggregationInput};

use crate::input;

/// Arguments for risk-metric aggregation
#[derive(Args)]
pub struct AggregateArgs {
    /// Path to JSON input file (curves, migrations, weights, optional simulation)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_aggregate(args: AggregateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let agg_input: AggregationInput =
        input::read_input(args.input.as_deref(), "aggregation")?;
    let result = metrics::run_aggregation(&agg_input)?;
    Ok(serde_json::to_value(result)?)
}

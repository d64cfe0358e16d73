use clap::Args;
use serde_json::Value;

use icaap_core::stress_curves::transformer::{self, TransformationInput};

use crate::input;

/// Arguments for curve and migration stressing
#[derive(Args)]
pub struct TransformArgs {
    /// Path to JSON input file ({"config", "shocks", "curves", "migration"})
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_transform(args: TransformArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let tr_input: TransformationInput =
        input::read_input(args.input.as_deref(), "curve transformation")?;
    let result = transformer::run_transformation(&tr_input)?;
    Ok(serde_json::to_value(result)?)
}

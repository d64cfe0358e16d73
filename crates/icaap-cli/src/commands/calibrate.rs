use clap::Args;
use serde_json::Value;

use icaap_core::calibration::historical::{self, CalibrationInput};

use crate::input;

/// Arguments for factor calibration
#[derive(Args)]
pub struct CalibrateArgs {
    /// Path to JSON input file ({"series": [...], "config": {...}})
    #[arg(long)]
    pub input: Option<String>,

    /// Minimum observations per factor (overrides the input config)
    #[arg(long)]
    pub min_observations: Option<usize>,

    /// Largest tolerated calendar gap in days (overrides the input config)
    #[arg(long)]
    pub max_gap_days: Option<i64>,
}

pub fn run_calibrate(args: CalibrateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut cal_input: CalibrationInput =
        input::read_input(args.input.as_deref(), "calibration")?;
    if let Some(n) = args.min_observations {
        cal_input.config.min_observations = n;
    }
    if let Some(d) = args.max_gap_days {
        cal_input.config.max_gap_days = d;
    }
    let result = historical::run_calibration(&cal_input)?;
    Ok(serde_json::to_value(result)?)
}

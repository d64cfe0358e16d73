use clap::Args;
use serde_json::Value;

use icaap_core::simulation::market::{self, MarketSimulationInput};

use crate::input;

/// Arguments for trading-book Monte Carlo simulation
#[derive(Args)]
pub struct SimulateArgs {
    /// Path to JSON input file ({"statistics", "positions", "trials", "seed", "config"})
    #[arg(long)]
    pub input: Option<String>,

    /// Number of trials (overrides the input file)
    #[arg(long)]
    pub trials: Option<usize>,

    /// Seed for a reproducible run (overrides the input file)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Ignore any seed and draw from OS entropy
    #[arg(long, conflicts_with = "seed")]
    pub entropy: bool,

    /// Keep the full sorted P&L vector in the output
    #[arg(long)]
    pub keep_pnl: bool,
}

pub fn run_simulate(args: SimulateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut sim_input: MarketSimulationInput =
        input::read_input(args.input.as_deref(), "market simulation")?;
    if let Some(t) = args.trials {
        sim_input.trials = t;
    }
    if args.entropy {
        sim_input.seed = None;
    } else if args.seed.is_some() {
        sim_input.seed = args.seed;
    }

    let result = market::run_market_simulation(&sim_input)?;
    let mut value = serde_json::to_value(result)?;
    if !args.keep_pnl {
        if let Some(res) = value.get_mut("result").and_then(Value::as_object_mut) {
            res.remove("pnl");
        }
    }
    Ok(value)
}

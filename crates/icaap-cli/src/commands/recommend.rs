use clap::Args;
use serde_json::Value;

use icaap_core::recommender::severity::{self, RecommendationInput};
use icaap_core::SeverityLevel;

use super::parse_enum;
use crate::input;

/// Arguments for severity recommendation
#[derive(Args)]
pub struct RecommendArgs {
    /// Path to JSON input file ({"profile", "thresholds", "manual_severity"})
    #[arg(long)]
    pub input: Option<String>,

    /// Manually chosen severity to reconcile against the recommendation
    #[arg(long, value_parser = parse_enum::<SeverityLevel>)]
    pub manual_severity: Option<SeverityLevel>,
}

pub fn run_recommend(args: RecommendArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut rec_input: RecommendationInput =
        input::read_input(args.input.as_deref(), "severity recommendation")?;
    if args.manual_severity.is_some() {
        rec_input.manual_severity = args.manual_severity;
    }
    let result = severity::run_recommendation(&rec_input)?;
    Ok(serde_json::to_value(result)?)
}

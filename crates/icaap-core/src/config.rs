use serde::{Deserialize, Serialize};

use crate::calibration::historical::CalibrationConfig;
use crate::error::StressEngineError;
use crate::recommender::severity::RecommendationThresholds;
use crate::simulation::market::SimulationConfig;
use crate::stress_curves::transformer::TransformerConfig;
use crate::types::{DateRange, RiskFactor};
use crate::StressResult;

/// Engine-wide policy, loaded once and never mutated.
///
/// Sensitivity coefficients and recommendation thresholds have no defaults
/// and must be supplied; observation and trial floors default to 252 and
/// 1000.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub transformer: TransformerConfig,
    pub recommendation: RecommendationThresholds,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Historical window the market factors are calibrated over.
    pub calibration_window: DateRange,
    #[serde(default = "default_calibrated_factors")]
    pub calibrated_factors: Vec<RiskFactor>,
}

fn default_calibrated_factors() -> Vec<RiskFactor> {
    RiskFactor::MARKET.to_vec()
}

impl EngineConfig {
    pub fn validate(&self) -> StressResult<()> {
        self.transformer.validate()?;
        self.recommendation.validate()?;
        self.calibration.validate()?;
        self.simulation.validate()?;
        if self.calibration_window.start >= self.calibration_window.end {
            return Err(StressEngineError::InvalidInput {
                field: "calibration_window".into(),
                reason: format!(
                    "start {} must precede end {}",
                    self.calibration_window.start, self.calibration_window.end
                ),
            });
        }
        if self.calibrated_factors.is_empty() {
            return Err(StressEngineError::InvalidInput {
                field: "calibrated_factors".into(),
                reason: "at least one factor is required".into(),
            });
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> StressResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

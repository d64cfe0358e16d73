use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::StressEngineError;
use crate::types::{Rate, SeverityLevel};
use crate::StressResult;

/// Risk parameter a curve describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskParameter {
    /// PD by credit-score band
    ProbabilityOfDefault,
    /// LGD by loan-to-value band
    LossGivenDefault,
}

impl fmt::Display for RiskParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskParameter::ProbabilityOfDefault => f.write_str("pd"),
            RiskParameter::LossGivenDefault => f.write_str("lgd"),
        }
    }
}

/// One bucket of a curve, e.g. score band "700-749" or LTV band "80-90%".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveBucket {
    pub label: String,
    pub value: Rate,
}

/// Risk-parameter values per bucket at one severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressCurve {
    pub parameter: RiskParameter,
    #[serde(default)]
    pub severity: SeverityLevel,
    pub buckets: Vec<CurveBucket>,
}

impl StressCurve {
    pub fn value(&self, label: &str) -> Option<Rate> {
        self.buckets
            .iter()
            .find(|b| b.label == label)
            .map(|b| b.value)
    }
}

/// The same curve transformed under every severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressCurveSet {
    pub parameter: RiskParameter,
    pub curves: BTreeMap<SeverityLevel, StressCurve>,
}

impl StressCurveSet {
    pub fn get(&self, severity: SeverityLevel) -> Option<&StressCurve> {
        self.curves.get(&severity)
    }

    /// Check that no bucket gets milder as severity increases.
    pub fn verify_monotone(&self) -> StressResult<()> {
        let mut previous: Option<&StressCurve> = None;
        for curve in self.curves.values() {
            if let Some(prev) = previous {
                for bucket in &curve.buckets {
                    let Some(before) = prev.value(&bucket.label) else {
                        continue;
                    };
                    if bucket.value < before {
                        return Err(StressEngineError::InvalidInput {
                            field: format!("curves.{}.{}", self.parameter, bucket.label),
                            reason: format!(
                                "{} value {} is below {} value {}",
                                curve.severity, bucket.value, prev.severity, before
                            ),
                        });
                    }
                }
            }
            previous = Some(curve);
        }
        Ok(())
    }
}

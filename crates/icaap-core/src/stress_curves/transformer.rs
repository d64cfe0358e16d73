use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

use super::curve::{CurveBucket, RiskParameter, StressCurve, StressCurveSet};
use super::migration::{stress_matrix, RatingMigrationMatrix};
use crate::error::StressEngineError;
use crate::types::{
    shock_index, with_metadata, ComputationOutput, FactorCoefficients, MacroShockVector, Rate,
    SeverityLevel,
};
use crate::StressResult;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scaling applied on top of the shocked value at each severity.
/// Must be positive and strictly increasing from base to extreme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityMultipliers {
    pub base: Decimal,
    pub moderate: Decimal,
    pub severe: Decimal,
    pub extreme: Decimal,
}

impl SeverityMultipliers {
    pub fn get(&self, severity: SeverityLevel) -> Decimal {
        match severity {
            SeverityLevel::Base => self.base,
            SeverityLevel::Moderate => self.moderate,
            SeverityLevel::Severe => self.severe,
            SeverityLevel::Extreme => self.extreme,
        }
    }
}

/// Macro sensitivities for one risk parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSensitivity {
    /// Enter the `(1 + Σ coef * shock)` scaling of the baseline value.
    #[serde(default)]
    pub multiplicative: FactorCoefficients,
    /// Added to the scaled value as `Σ coef * shock` (in rate units).
    #[serde(default)]
    pub additive: FactorCoefficients,
    /// Upper bound on any stressed value.
    pub cap: Rate,
}

/// Macro sensitivities driving the downgrade shift of migration matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSensitivity {
    pub coefficients: FactorCoefficients,
    /// Largest fraction of upgrade-or-stay mass that may move down.
    pub max_shift: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerConfig {
    pub severity_multipliers: SeverityMultipliers,
    pub pd: ParameterSensitivity,
    pub lgd: ParameterSensitivity,
    pub migration: MigrationSensitivity,
}

impl TransformerConfig {
    pub fn validate(&self) -> StressResult<()> {
        let m = &self.severity_multipliers;
        if m.base <= Decimal::ZERO {
            return Err(invalid(
                "severity_multipliers.base",
                format!("must be positive, got {}", m.base),
            ));
        }
        for pair in SeverityLevel::ALL.windows(2) {
            let (lower, upper) = (pair[0], pair[1]);
            if m.get(upper) <= m.get(lower) {
                return Err(invalid(
                    &format!("severity_multipliers.{upper}"),
                    format!(
                        "{} must exceed {} multiplier {}",
                        m.get(upper),
                        lower,
                        m.get(lower)
                    ),
                ));
            }
        }
        for (name, s) in [("pd", &self.pd), ("lgd", &self.lgd)] {
            if s.cap <= Decimal::ZERO || s.cap > Decimal::ONE {
                return Err(invalid(
                    &format!("{name}.cap"),
                    format!("must lie in (0, 1], got {}", s.cap),
                ));
            }
        }
        let shift = self.migration.max_shift;
        if shift < Decimal::ZERO || shift > Decimal::ONE {
            return Err(invalid(
                "migration.max_shift",
                format!("must lie in [0, 1], got {shift}"),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> StressEngineError {
    StressEngineError::InvalidSensitivityConfig {
        field: field.to_string(),
        reason,
    }
}

// ---------------------------------------------------------------------------
// Transformer
// ---------------------------------------------------------------------------

/// Maps macro shocks and a severity onto stressed PD, LGD and migration
/// inputs. Deterministic: equal inputs give equal outputs.
#[derive(Debug, Clone)]
pub struct StressCurveTransformer {
    config: TransformerConfig,
}

impl StressCurveTransformer {
    /// Rejects configurations that could break severity monotonicity.
    pub fn new(config: TransformerConfig) -> StressResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    fn sensitivity(&self, parameter: RiskParameter) -> &ParameterSensitivity {
        match parameter {
            RiskParameter::ProbabilityOfDefault => &self.config.pd,
            RiskParameter::LossGivenDefault => &self.config.lgd,
        }
    }

    /// Stress every bucket of `baseline`:
    ///
    /// `min(cap, max(0, v * (1 + Σ m_k s_k) + Σ a_k s_k) * multiplier)`
    pub fn transform(
        &self,
        baseline: &StressCurve,
        shocks: &MacroShockVector,
        severity: SeverityLevel,
    ) -> StressCurve {
        let sens = self.sensitivity(baseline.parameter);
        let scale = Decimal::ONE + shock_index(&sens.multiplicative, shocks);
        let offset = shock_index(&sens.additive, shocks);
        let multiplier = self.config.severity_multipliers.get(severity);

        let buckets = baseline
            .buckets
            .iter()
            .map(|b| {
                let shocked = (b.value * scale + offset).max(Decimal::ZERO);
                CurveBucket {
                    label: b.label.clone(),
                    value: (shocked * multiplier).min(sens.cap),
                }
            })
            .collect();

        StressCurve {
            parameter: baseline.parameter,
            severity,
            buckets,
        }
    }

    /// Transform `baseline` under every severity level.
    pub fn transform_all(&self, baseline: &StressCurve, shocks: &MacroShockVector) -> StressCurveSet {
        let curves = SeverityLevel::ALL
            .iter()
            .map(|s| (*s, self.transform(baseline, shocks, *s)))
            .collect();
        StressCurveSet {
            parameter: baseline.parameter,
            curves,
        }
    }

    /// Fraction of upgrade-or-stay mass moved to worse grades at `severity`.
    pub fn migration_shift(&self, shocks: &MacroShockVector, severity: SeverityLevel) -> Decimal {
        let stress = shock_index(&self.config.migration.coefficients, shocks).max(Decimal::ZERO);
        (stress * self.config.severity_multipliers.get(severity))
            .min(self.config.migration.max_shift)
    }

    /// Redistribute migration mass from better to worse grades and
    /// renormalize each row.
    pub fn transform_migration(
        &self,
        baseline: &RatingMigrationMatrix,
        shocks: &MacroShockVector,
        severity: SeverityLevel,
    ) -> StressResult<RatingMigrationMatrix> {
        let shift = self.migration_shift(shocks, severity);
        debug!(%severity, %shift, grades = baseline.grades.len(), "stressing migration matrix");
        stress_matrix(baseline, shift)
    }

    pub fn transform_migrations(
        &self,
        baseline: &RatingMigrationMatrix,
        shocks: &MacroShockVector,
    ) -> StressResult<BTreeMap<SeverityLevel, RatingMigrationMatrix>> {
        SeverityLevel::ALL
            .iter()
            .map(|s| Ok((*s, self.transform_migration(baseline, shocks, *s)?)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API: envelope
// ---------------------------------------------------------------------------

/// Baseline curves and an optional migration matrix to stress under one
/// shock vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationInput {
    pub config: TransformerConfig,
    #[serde(default)]
    pub shocks: MacroShockVector,
    #[serde(default)]
    pub curves: Vec<StressCurve>,
    #[serde(default)]
    pub migration: Option<RatingMigrationMatrix>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationOutput {
    pub curve_sets: Vec<StressCurveSet>,
    pub migration_shifts: BTreeMap<SeverityLevel, Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrations: Option<BTreeMap<SeverityLevel, RatingMigrationMatrix>>,
}

/// Stress every supplied curve and matrix under all severities.
pub fn run_transformation(
    input: &TransformationInput,
) -> StressResult<ComputationOutput<TransformationOutput>> {
    let start = Instant::now();
    let transformer = StressCurveTransformer::new(input.config.clone())?;
    if input.curves.is_empty() && input.migration.is_none() {
        return Err(StressEngineError::InvalidInput {
            field: "curves".into(),
            reason: "nothing to transform: supply curves or a migration matrix".into(),
        });
    }

    let mut warnings = Vec::new();
    let mut curve_sets = Vec::with_capacity(input.curves.len());
    for curve in &input.curves {
        let set = transformer.transform_all(curve, &input.shocks);
        set.verify_monotone()?;
        let capped = set
            .curves
            .values()
            .flat_map(|c| c.buckets.iter())
            .filter(|b| b.value >= transformer.sensitivity(curve.parameter).cap)
            .count();
        if capped > 0 {
            warnings.push(format!(
                "{capped} {} bucket values reached the configured cap",
                curve.parameter
            ));
        }
        curve_sets.push(set);
    }

    let migrations = input
        .migration
        .as_ref()
        .map(|m| transformer.transform_migrations(m, &input.shocks))
        .transpose()?;
    let migration_shifts = SeverityLevel::ALL
        .iter()
        .map(|s| (*s, transformer.migration_shift(&input.shocks, *s)))
        .collect();

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Macro-shocked risk curves scaled by severity multiplier; migration mass shifted to worse grades",
        &serde_json::json!({
            "shocks": input.shocks,
            "severity_multipliers": input.config.severity_multipliers,
        }),
        warnings,
        elapsed,
        TransformationOutput {
            curve_sets,
            migration_shifts,
            migrations,
        },
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

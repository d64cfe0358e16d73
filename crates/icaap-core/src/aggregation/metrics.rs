use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::StressEngineError;
use crate::recommender::severity::{Recommendation, SeverityMismatch};
use crate::simulation::result::{PnlPercentiles, SeedMode, SimulationResult, TailMetric, UncoveredSensitivity};
use crate::stress_curves::curve::{RiskParameter, StressCurve};
use crate::stress_curves::migration::{rating_drift, RatingMigrationMatrix};
use crate::types::{with_metadata, ComputationOutput, Money, Rate, Segment, SeverityLevel};
use crate::StressResult;

/// Tolerance on exposure and grade weight sums.
const WEIGHT_SUM_TOLERANCE: Decimal = dec!(0.000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Share of segment exposure per curve bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureWeights {
    /// Score band label -> exposure share
    pub pd: BTreeMap<String, Rate>,
    /// LTV band label -> exposure share
    pub lgd: BTreeMap<String, Rate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationInput {
    pub segment: Segment,
    /// Severities to report. Base is always added.
    #[serde(default = "all_severities")]
    pub severities: Vec<SeverityLevel>,
    pub pd_curves: BTreeMap<SeverityLevel, StressCurve>,
    pub lgd_curves: BTreeMap<SeverityLevel, StressCurve>,
    pub migrations: BTreeMap<SeverityLevel, RatingMigrationMatrix>,
    pub exposure_weights: ExposureWeights,
    pub total_exposure: Money,
    /// Exposure share per performing grade; equal weights when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_weights: Option<BTreeMap<String, Rate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationResult>,
}

fn all_severities() -> Vec<SeverityLevel> {
    SeverityLevel::ALL.to_vec()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketContribution {
    pub label: String,
    pub weight: Rate,
    pub value: Rate,
    /// weight x value
    pub contribution: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeDrift {
    pub grade: String,
    /// Expected grade-index change (positive = downgrade)
    pub drift: Decimal,
    pub default_probability: Rate,
}

/// Credit metrics of one segment at one severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityMetrics {
    pub severity: SeverityLevel,
    /// Exposure-weighted PD
    pub weighted_pd: Rate,
    /// Exposure-weighted LGD
    pub weighted_lgd: Rate,
    /// Σ_i Σ_j w_i w_j PD_i LGD_j
    pub expected_loss_rate: Rate,
    pub expected_loss: Money,
    /// EL at this severity minus EL at base
    pub capital_impact: Money,
    pub pd_contributions: Vec<BucketContribution>,
    pub lgd_contributions: Vec<BucketContribution>,
    pub migration: RatingMigrationMatrix,
    /// Grade-weighted expected grade-index change
    pub rating_drift: Decimal,
    pub grade_drift: Vec<GradeDrift>,
    /// Grade-weighted probability of migrating into default
    pub stressed_default_rate: Rate,
}

/// Trading-book block derived from a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRiskSummary {
    pub trials: usize,
    pub seed_mode: SeedMode,
    pub mean_pnl: f64,
    pub pnl_std_dev: f64,
    pub percentiles: PnlPercentiles,
    pub tail_metrics: Vec<TailMetric>,
    pub uncovered_sensitivities: Vec<UncoveredSensitivity>,
}

impl From<&SimulationResult> for MarketRiskSummary {
    fn from(sim: &SimulationResult) -> Self {
        Self {
            trials: sim.trials(),
            seed_mode: sim.seed_mode(),
            mean_pnl: sim.mean(),
            pnl_std_dev: sim.std_dev(),
            percentiles: sim.percentiles(),
            tail_metrics: sim.tail_metrics().to_vec(),
            uncovered_sensitivities: sim.uncovered_sensitivities().to_vec(),
        }
    }
}

/// Per-segment stress report. Owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetricsReport {
    pub segment: Segment,
    pub total_exposure: Money,
    pub metrics: BTreeMap<SeverityLevel, SeverityMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_risk: Option<MarketRiskSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_severity: Option<SeverityLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_mismatch: Option<SeverityMismatch>,
}

impl RiskMetricsReport {
    pub fn severity(&self, severity: SeverityLevel) -> Option<&SeverityMetrics> {
        self.metrics.get(&severity)
    }

    /// Metrics at the selected severity, if one was chosen.
    pub fn selected(&self) -> Option<&SeverityMetrics> {
        self.selected_severity.and_then(|s| self.metrics.get(&s))
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Summarise stressed curves, migrations and an optional simulation into
/// a [`RiskMetricsReport`]. Pure: no randomness and no I/O.
pub fn aggregate(input: &AggregationInput) -> StressResult<RiskMetricsReport> {
    if input.total_exposure < Decimal::ZERO {
        return Err(StressEngineError::InvalidInput {
            field: "total_exposure".into(),
            reason: "exposure cannot be negative".into(),
        });
    }

    let required: BTreeSet<SeverityLevel> = input
        .severities
        .iter()
        .copied()
        .chain(std::iter::once(SeverityLevel::Base))
        .collect();
    check_complete(input, &required)?;
    for severity in &required {
        if let Some(migration) = input.migrations.get(severity) {
            migration.check_shape()?;
        }
    }
    validate_weights("exposure_weights.pd", &input.exposure_weights.pd)?;
    validate_weights("exposure_weights.lgd", &input.exposure_weights.lgd)?;

    let mut base_el = Decimal::ZERO;
    let mut metrics = BTreeMap::new();
    // Ascending order puts base first
    for severity in &required {
        let (pd_curve, lgd_curve, migration) = match (
            input.pd_curves.get(severity),
            input.lgd_curves.get(severity),
            input.migrations.get(severity),
        ) {
            (Some(p), Some(l), Some(m)) => (p, l, m),
            _ => continue,
        };
        check_parameter(pd_curve, RiskParameter::ProbabilityOfDefault, *severity)?;
        check_parameter(lgd_curve, RiskParameter::LossGivenDefault, *severity)?;

        let pd_contributions = contributions(input.segment, "pd", pd_curve, &input.exposure_weights.pd)?;
        let lgd_contributions =
            contributions(input.segment, "lgd", lgd_curve, &input.exposure_weights.lgd)?;
        let weighted_pd: Rate = pd_contributions.iter().map(|c| c.contribution).sum();
        let weighted_lgd: Rate = lgd_contributions.iter().map(|c| c.contribution).sum();

        // Score and LTV bands are independent, so the double sum factorises
        let expected_loss_rate = weighted_pd * weighted_lgd;
        let expected_loss = expected_loss_rate * input.total_exposure;
        if *severity == SeverityLevel::Base {
            base_el = expected_loss;
        }

        let grade_weights = resolve_grade_weights(migration, input.grade_weights.as_ref())?;
        let grade_drift = grade_drift(migration);
        let rating_drift: Decimal = grade_drift
            .iter()
            .zip(&grade_weights)
            .map(|(g, w)| g.drift * *w)
            .sum();
        let stressed_default_rate: Rate = grade_drift
            .iter()
            .zip(&grade_weights)
            .map(|(g, w)| g.default_probability * *w)
            .sum();

        debug!(
            segment = %input.segment,
            %severity,
            %weighted_pd,
            %weighted_lgd,
            %expected_loss,
            "aggregated severity"
        );

        metrics.insert(
            *severity,
            SeverityMetrics {
                severity: *severity,
                weighted_pd,
                weighted_lgd,
                expected_loss_rate,
                expected_loss,
                capital_impact: expected_loss - base_el,
                pd_contributions,
                lgd_contributions,
                migration: migration.clone(),
                rating_drift,
                grade_drift,
                stressed_default_rate,
            },
        );
    }

    if input.simulation.is_some() && !input.segment.is_trading_book() {
        warn!(segment = %input.segment, "simulation supplied for a non trading-book segment");
    }

    Ok(RiskMetricsReport {
        segment: input.segment,
        total_exposure: input.total_exposure,
        metrics,
        market_risk: input.simulation.as_ref().map(MarketRiskSummary::from),
        recommendation: None,
        selected_severity: None,
        severity_mismatch: None,
    })
}

/// [`aggregate`] wrapped in the standard computation envelope.
pub fn run_aggregation(input: &AggregationInput) -> StressResult<ComputationOutput<RiskMetricsReport>> {
    let start = Instant::now();
    let report = aggregate(input)?;

    let mut warnings = Vec::new();
    if let Some(market) = &report.market_risk {
        for u in &market.uncovered_sensitivities {
            warnings.push(format!(
                "position '{}' {} has no calibrated '{}' factor; treated as zero",
                u.position_id, u.sensitivity, u.factor
            ));
        }
        if !market.seed_mode.is_reproducible() {
            warnings.push("market simulation was entropy seeded and is not reproducible".into());
        }
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Exposure-weighted expected loss with migration drift and simulated tail metrics",
        &serde_json::json!({
            "segment": input.segment,
            "severities": report.metrics.keys().collect::<Vec<_>>(),
            "band_independence": "score and LTV bands treated as independent",
            "grade_weighting": if input.grade_weights.is_some() { "supplied" } else { "equal" },
        }),
        warnings,
        elapsed,
        report,
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Every required severity must be present in every input mapping.
fn check_complete(input: &AggregationInput, required: &BTreeSet<SeverityLevel>) -> StressResult<()> {
    let mut missing = Vec::new();
    for severity in required {
        if !input.pd_curves.contains_key(severity) {
            missing.push(format!("pd_curves.{severity}"));
        }
        if !input.lgd_curves.contains_key(severity) {
            missing.push(format!("lgd_curves.{severity}"));
        }
        if !input.migrations.contains_key(severity) {
            missing.push(format!("migrations.{severity}"));
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StressEngineError::IncompleteInputs {
            segment: input.segment.to_string(),
            missing,
        })
    }
}

fn check_parameter(curve: &StressCurve, expected: RiskParameter, severity: SeverityLevel) -> StressResult<()> {
    if curve.parameter != expected {
        return Err(StressEngineError::InvalidInput {
            field: format!("{expected}_curves.{severity}"),
            reason: format!("curve is for {}, expected {expected}", curve.parameter),
        });
    }
    Ok(())
}

fn validate_weights(field: &str, weights: &BTreeMap<String, Rate>) -> StressResult<()> {
    if weights.is_empty() {
        return Err(StressEngineError::InvalidInput {
            field: field.into(),
            reason: "no bucket weights supplied".into(),
        });
    }
    if let Some((label, w)) = weights.iter().find(|(_, w)| **w < Decimal::ZERO) {
        return Err(StressEngineError::InvalidInput {
            field: format!("{field}.{label}"),
            reason: format!("negative weight {w}"),
        });
    }
    let total: Decimal = weights.values().copied().sum();
    if (total - Decimal::ONE).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(StressEngineError::InvalidInput {
            field: field.into(),
            reason: format!("weights sum to {total}, expected 1"),
        });
    }
    Ok(())
}

/// Pair every curve bucket with its weight. A bucket with no weight, or a
/// weighted bucket absent from the curve, is an incomplete input.
fn contributions(
    segment: Segment,
    name: &str,
    curve: &StressCurve,
    weights: &BTreeMap<String, Rate>,
) -> StressResult<Vec<BucketContribution>> {
    let mut missing: Vec<String> = curve
        .buckets
        .iter()
        .filter(|b| !weights.contains_key(&b.label))
        .map(|b| format!("exposure_weights.{name}.{}", b.label))
        .collect();
    missing.extend(
        weights
            .iter()
            .filter(|(label, w)| !w.is_zero() && curve.value(label).is_none())
            .map(|(label, _)| format!("{name}_curves.{}.{label}", curve.severity)),
    );
    if !missing.is_empty() {
        return Err(StressEngineError::IncompleteInputs {
            segment: segment.to_string(),
            missing,
        });
    }

    Ok(curve
        .buckets
        .iter()
        .map(|b| {
            let weight = weights.get(&b.label).copied().unwrap_or_default();
            BucketContribution {
                label: b.label.clone(),
                weight,
                value: b.value,
                contribution: weight * b.value,
            }
        })
        .collect())
}

/// Drift and default probability for every performing grade.
fn grade_drift(matrix: &RatingMigrationMatrix) -> Vec<GradeDrift> {
    rating_drift(matrix)
        .into_iter()
        .zip(matrix.default_probabilities())
        .take(matrix.default_index())
        .map(|((grade, drift), (_, default_probability))| GradeDrift {
            grade,
            drift,
            default_probability,
        })
        .collect()
}

/// Normalised weights per performing grade, in grade order.
fn resolve_grade_weights(
    matrix: &RatingMigrationMatrix,
    supplied: Option<&BTreeMap<String, Rate>>,
) -> StressResult<Vec<Decimal>> {
    let performing = &matrix.grades[..matrix.default_index()];
    let Some(supplied) = supplied else {
        let equal = Decimal::ONE / Decimal::from(performing.len().max(1) as u64);
        return Ok(vec![equal; performing.len()]);
    };

    if let Some(unknown) = supplied.keys().find(|g| !performing.contains(g)) {
        return Err(StressEngineError::InvalidInput {
            field: format!("grade_weights.{unknown}"),
            reason: "not a performing grade of the migration matrix".into(),
        });
    }
    if let Some((grade, w)) = supplied.iter().find(|(_, w)| **w < Decimal::ZERO) {
        return Err(StressEngineError::InvalidInput {
            field: format!("grade_weights.{grade}"),
            reason: format!("negative weight {w}"),
        });
    }
    let total: Decimal = supplied.values().copied().sum();
    if total <= Decimal::ZERO {
        return Err(StressEngineError::InvalidInput {
            field: "grade_weights".into(),
            reason: "weights must have positive total".into(),
        });
    }
    Ok(performing
        .iter()
        .map(|g| supplied.get(g).copied().unwrap_or_default() / total)
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

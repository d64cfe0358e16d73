use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::warn;

use crate::error::StressEngineError;
use crate::types::{with_metadata, ComputationOutput, Money, Rate, Segment, SeverityLevel};
use crate::StressResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Share of a segment's exposure held by one name, sector or region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationShare {
    pub name: String,
    pub share: Rate,
}

/// Exposure and concentration summary of one portfolio segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioProfile {
    pub segment: Segment,
    pub total_exposure: Money,
    #[serde(default)]
    pub single_name_shares: Vec<ConcentrationShare>,
    #[serde(default)]
    pub sector_shares: Vec<ConcentrationShare>,
    #[serde(default)]
    pub geographic_shares: Vec<ConcentrationShare>,
}

impl PortfolioProfile {
    pub fn max_single_name(&self) -> Rate {
        max_share(&self.single_name_shares)
    }

    pub fn max_sector(&self) -> Rate {
        max_share(&self.sector_shares)
    }

    pub fn max_geographic(&self) -> Rate {
        max_share(&self.geographic_shares)
    }

    /// Every non-empty breakdown must sum to 1 within `tolerance`.
    pub fn validate(&self, tolerance: Decimal) -> StressResult<()> {
        if self.total_exposure < Decimal::ZERO {
            return Err(StressEngineError::InvalidInput {
                field: format!("profile.{}.total_exposure", self.segment),
                reason: "exposure cannot be negative".into(),
            });
        }
        for (name, shares) in [
            ("single_name_shares", &self.single_name_shares),
            ("sector_shares", &self.sector_shares),
            ("geographic_shares", &self.geographic_shares),
        ] {
            if shares.is_empty() {
                continue;
            }
            if let Some(bad) = shares
                .iter()
                .find(|s| s.share < Decimal::ZERO || s.share > Decimal::ONE)
            {
                return Err(StressEngineError::InvalidInput {
                    field: format!("profile.{}.{name}.{}", self.segment, bad.name),
                    reason: format!("share {} outside [0, 1]", bad.share),
                });
            }
            let total: Decimal = shares.iter().map(|s| s.share).sum();
            if (total - Decimal::ONE).abs() > tolerance {
                return Err(StressEngineError::InvalidInput {
                    field: format!("profile.{}.{name}", self.segment),
                    reason: format!("shares sum to {total}, expected 1"),
                });
            }
        }
        Ok(())
    }
}

fn max_share(shares: &[ConcentrationShare]) -> Rate {
    shares
        .iter()
        .map(|s| s.share)
        .max()
        .unwrap_or(Decimal::ZERO)
}

/// Profile statistic a floor rule tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcentrationMetric {
    MaxSingleName,
    MaxSector,
    MaxGeographic,
    TotalExposure,
}

impl fmt::Display for ConcentrationMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConcentrationMetric::MaxSingleName => "max_single_name",
            ConcentrationMetric::MaxSector => "max_sector",
            ConcentrationMetric::MaxGeographic => "max_geographic",
            ConcentrationMetric::TotalExposure => "total_exposure",
        };
        f.write_str(s)
    }
}

/// `metric > threshold` forces the recommendation to at least `floor`,
/// e.g. a top single name above 15% means at least "severe".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorRule {
    pub metric: ConcentrationMetric,
    pub threshold: Decimal,
    pub floor: SeverityLevel,
}

/// Documented recommendation policy. No built-in numeric defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationThresholds {
    pub single_name_weight: Decimal,
    pub sector_weight: Decimal,
    pub geographic_weight: Decimal,
    pub exposure_weight: Decimal,
    /// Exposure at which the exposure component of the score saturates.
    pub exposure_reference: Money,
    /// Score at or above which "severe" is recommended.
    pub severe_score: Decimal,
    /// Score at or above which "extreme" is recommended.
    pub extreme_score: Decimal,
    #[serde(default)]
    pub floor_rules: Vec<FloorRule>,
    /// Allowed |Σ shares - 1| per breakdown.
    #[serde(default = "default_share_tolerance")]
    pub share_tolerance: Decimal,
}

fn default_share_tolerance() -> Decimal {
    dec!(0.001)
}

impl RecommendationThresholds {
    pub fn validate(&self) -> StressResult<()> {
        for (field, w) in [
            ("single_name_weight", self.single_name_weight),
            ("sector_weight", self.sector_weight),
            ("geographic_weight", self.geographic_weight),
            ("exposure_weight", self.exposure_weight),
        ] {
            if w < Decimal::ZERO {
                return Err(StressEngineError::InvalidSensitivityConfig {
                    field: format!("recommendation.{field}"),
                    reason: format!("weight cannot be negative, got {w}"),
                });
            }
        }
        if self.exposure_reference <= Decimal::ZERO {
            return Err(StressEngineError::InvalidSensitivityConfig {
                field: "recommendation.exposure_reference".into(),
                reason: "must be positive".into(),
            });
        }
        if self.severe_score <= Decimal::ZERO || self.extreme_score < self.severe_score {
            return Err(StressEngineError::InvalidSensitivityConfig {
                field: "recommendation.extreme_score".into(),
                reason: format!(
                    "breakpoints must satisfy 0 < severe ({}) <= extreme ({})",
                    self.severe_score, self.extreme_score
                ),
            });
        }
        if self.share_tolerance < Decimal::ZERO {
            return Err(StressEngineError::InvalidSensitivityConfig {
                field: "recommendation.share_tolerance".into(),
                reason: "cannot be negative".into(),
            });
        }
        Ok(())
    }
}

/// A floor rule that fired for a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredRule {
    pub metric: ConcentrationMetric,
    pub observed: Decimal,
    pub threshold: Decimal,
    pub floor: SeverityLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub segment: Segment,
    pub recommended: SeverityLevel,
    pub composite_score: Decimal,
    /// Level from the score breakpoints alone, before floor rules.
    pub score_level: SeverityLevel,
    pub triggered_rules: Vec<TriggeredRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchDirection {
    /// The manual choice is milder than recommended.
    ManualMilder,
    /// The manual choice is harsher than recommended.
    ManualHarsher,
}

/// Advisory raised when a manual severity differs from the recommendation.
/// Informational only; never blocks computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityMismatch {
    pub recommended: SeverityLevel,
    pub manual: SeverityLevel,
    pub direction: MismatchDirection,
}

impl fmt::Display for SeverityMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let how = match self.direction {
            MismatchDirection::ManualMilder => "milder",
            MismatchDirection::ManualHarsher => "harsher",
        };
        write!(
            f,
            "manual severity '{}' is {how} than recommended '{}'",
            self.manual, self.recommended
        )
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Recommend a severity for `profile`.
///
/// Score = Σ weight × {max single-name share, max sector share, max
/// geographic share, min(1, exposure / exposure_reference)}. The score maps
/// to moderate / severe / extreme through the configured breakpoints, then
/// floor rules can only raise the level. Never recommends "base".
pub fn recommend(
    profile: &PortfolioProfile,
    thresholds: &RecommendationThresholds,
) -> StressResult<Recommendation> {
    thresholds.validate()?;
    profile.validate(thresholds.share_tolerance)?;

    let exposure_ratio = (profile.total_exposure / thresholds.exposure_reference).min(Decimal::ONE);
    let composite_score = thresholds.single_name_weight * profile.max_single_name()
        + thresholds.sector_weight * profile.max_sector()
        + thresholds.geographic_weight * profile.max_geographic()
        + thresholds.exposure_weight * exposure_ratio;

    let score_level = if composite_score >= thresholds.extreme_score {
        SeverityLevel::Extreme
    } else if composite_score >= thresholds.severe_score {
        SeverityLevel::Severe
    } else {
        SeverityLevel::Moderate
    };

    let mut recommended = score_level;
    let mut triggered_rules = Vec::new();
    for rule in &thresholds.floor_rules {
        let observed = match rule.metric {
            ConcentrationMetric::MaxSingleName => profile.max_single_name(),
            ConcentrationMetric::MaxSector => profile.max_sector(),
            ConcentrationMetric::MaxGeographic => profile.max_geographic(),
            ConcentrationMetric::TotalExposure => profile.total_exposure,
        };
        if observed > rule.threshold {
            recommended = recommended.max(rule.floor);
            triggered_rules.push(TriggeredRule {
                metric: rule.metric,
                observed,
                threshold: rule.threshold,
                floor: rule.floor,
            });
        }
    }

    Ok(Recommendation {
        segment: profile.segment,
        recommended,
        composite_score,
        score_level,
        triggered_rules,
    })
}

/// Compare a manual choice with the recommendation.
pub fn reconcile(
    recommended: SeverityLevel,
    manual: Option<SeverityLevel>,
) -> Option<SeverityMismatch> {
    let manual = manual?;
    let direction = match manual.cmp(&recommended) {
        std::cmp::Ordering::Equal => return None,
        std::cmp::Ordering::Less => MismatchDirection::ManualMilder,
        std::cmp::Ordering::Greater => MismatchDirection::ManualHarsher,
    };
    Some(SeverityMismatch {
        recommended,
        manual,
        direction,
    })
}

/// Profile, policy and optional manual choice for one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationInput {
    pub profile: PortfolioProfile,
    pub thresholds: RecommendationThresholds,
    #[serde(default)]
    pub manual_severity: Option<SeverityLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationOutput {
    pub recommendation: Recommendation,
    /// Manual choice if given, otherwise the recommendation.
    pub selected: SeverityLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<SeverityMismatch>,
}

/// [`recommend`] plus [`reconcile`], wrapped in the standard envelope.
/// A mismatch is surfaced as a warning, never as an error.
pub fn run_recommendation(
    input: &RecommendationInput,
) -> StressResult<ComputationOutput<RecommendationOutput>> {
    let start = Instant::now();
    let recommendation = recommend(&input.profile, &input.thresholds)?;
    let mismatch = reconcile(recommendation.recommended, input.manual_severity);

    let mut warnings = Vec::new();
    if let Some(m) = &mismatch {
        warn!(segment = %input.profile.segment, advisory = %m, "severity mismatch");
        warnings.push(m.to_string());
    }
    for rule in &recommendation.triggered_rules {
        warnings.push(format!(
            "{} {} exceeds {}; floor '{}' applied",
            rule.metric, rule.observed, rule.threshold, rule.floor
        ));
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Weighted concentration and exposure score mapped to severity, raised by floor rules",
        &input.thresholds,
        warnings,
        elapsed,
        RecommendationOutput {
            selected: input.manual_severity.unwrap_or(recommendation.recommended),
            recommendation,
            mismatch,
        },
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::error::StressEngineError;
use crate::StressResult;

/// How the top-level random stream of a run was seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SeedMode {
    /// Caller-supplied seed; the run is reproducible bit for bit.
    Seeded { seed: u64 },
    /// Seed drawn from OS entropy; the run cannot be reproduced.
    Entropy,
}

impl SeedMode {
    pub fn is_reproducible(&self) -> bool {
        matches!(self, SeedMode::Seeded { .. })
    }
}

/// VaR and ES at one confidence level, both as positive loss numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TailMetric {
    pub confidence: f64,
    pub var: f64,
    pub expected_shortfall: f64,
    /// Number of worst trials averaged for ES.
    pub tail_trials: usize,
}

/// A position sensitivity whose factor was not calibrated and therefore
/// contributed zero P&L.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncoveredSensitivity {
    pub position_id: String,
    pub sensitivity: String,
    pub factor: String,
}

/// Percentile summary of the simulated P&L.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnlPercentiles {
    pub p1: f64,
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Simulated portfolio P&L distribution, frozen once built.
///
/// Fields are private and every instance, deserialised ones included, is
/// built by [`SimulationResult::from_pnl`], so the P&L vector is always
/// sorted ascending and the derived metrics always match it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSimulationResult")]
pub struct SimulationResult {
    trials: usize,
    seed_mode: SeedMode,
    pnl: Vec<f64>,
    mean: f64,
    std_dev: f64,
    percentiles: PnlPercentiles,
    tail_metrics: Vec<TailMetric>,
    uncovered_sensitivities: Vec<UncoveredSensitivity>,
}

impl SimulationResult {
    /// Sort `pnl` and derive moments, percentiles and VaR/ES for every
    /// confidence level.
    ///
    /// With `m = ceil(n (1 - c))` worst trials, VaR is the loss of the
    /// m-th worst trial and ES the mean loss over those `m` trials.
    pub fn from_pnl(
        mut pnl: Vec<f64>,
        seed_mode: SeedMode,
        confidence_levels: &[f64],
        uncovered_sensitivities: Vec<UncoveredSensitivity>,
    ) -> StressResult<Self> {
        if pnl.is_empty() {
            return Err(StressEngineError::InsufficientTrials {
                requested: 0,
                minimum: 1,
            });
        }
        if let Some(bad) = pnl.iter().find(|v| !v.is_finite()) {
            return Err(StressEngineError::InvalidInput {
                field: "pnl".into(),
                reason: format!("non-finite simulated P&L {bad}"),
            });
        }
        validate_confidence_levels(confidence_levels)?;

        pnl.sort_by(f64::total_cmp);
        let n = pnl.len() as f64;
        let mean = pnl.iter().sum::<f64>() / n;
        let std_dev = if pnl.len() > 1 {
            (pnl.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        let percentiles = PnlPercentiles {
            p1: percentile_sorted(&pnl, 1.0),
            p5: percentile_sorted(&pnl, 5.0),
            p50: percentile_sorted(&pnl, 50.0),
            p95: percentile_sorted(&pnl, 95.0),
            p99: percentile_sorted(&pnl, 99.0),
        };
        let tail_metrics = confidence_levels
            .iter()
            .map(|c| tail_metric(&pnl, *c))
            .collect();

        Ok(Self {
            trials: pnl.len(),
            seed_mode,
            pnl,
            mean,
            std_dev,
            percentiles,
            tail_metrics,
            uncovered_sensitivities,
        })
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    pub fn seed_mode(&self) -> SeedMode {
        self.seed_mode
    }

    /// Simulated P&L, ascending.
    pub fn pnl(&self) -> &[f64] {
        &self.pnl
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    pub fn percentiles(&self) -> PnlPercentiles {
        self.percentiles
    }

    pub fn tail_metrics(&self) -> &[TailMetric] {
        &self.tail_metrics
    }

    pub fn tail_metric(&self, confidence: f64) -> Option<TailMetric> {
        self.tail_metrics
            .iter()
            .find(|t| (t.confidence - confidence).abs() < 1e-12)
            .copied()
    }

    pub fn uncovered_sensitivities(&self) -> &[UncoveredSensitivity] {
        &self.uncovered_sensitivities
    }
}

/// Serialised form; derived metrics are recomputed rather than trusted.
#[derive(Deserialize)]
struct RawSimulationResult {
    seed_mode: SeedMode,
    pnl: Vec<f64>,
    tail_metrics: Vec<TailMetric>,
    #[serde(default)]
    uncovered_sensitivities: Vec<UncoveredSensitivity>,
}

impl TryFrom<RawSimulationResult> for SimulationResult {
    type Error = StressEngineError;

    fn try_from(raw: RawSimulationResult) -> Result<Self, Self::Error> {
        let confidence_levels: Vec<f64> = raw.tail_metrics.iter().map(|t| t.confidence).collect();
        SimulationResult::from_pnl(
            raw.pnl,
            raw.seed_mode,
            &confidence_levels,
            raw.uncovered_sensitivities,
        )
    }
}

pub(crate) fn validate_confidence_levels(levels: &[f64]) -> StressResult<()> {
    if levels.is_empty() {
        return Err(StressEngineError::InvalidInput {
            field: "confidence_levels".into(),
            reason: "at least one confidence level is required".into(),
        });
    }
    if let Some(c) = levels.iter().find(|c| !(**c > 0.0 && **c < 1.0)) {
        return Err(StressEngineError::InvalidInput {
            field: "confidence_levels".into(),
            reason: format!("confidence {c} must lie in (0, 1)"),
        });
    }
    Ok(())
}

fn tail_metric(sorted: &[f64], confidence: f64) -> TailMetric {
    let n = sorted.len();
    // Guard against 1000 * 0.01 landing a hair above 10
    let m = ((n as f64 * (1.0 - confidence)) - 1e-9).ceil().max(1.0) as usize;
    let m = m.min(n);
    let tail = &sorted[..m];
    TailMetric {
        confidence,
        var: -sorted[m - 1],
        expected_shortfall: -(tail.iter().sum::<f64>() / m as f64),
        tail_trials: m,
    }
}

/// Percentile from a **sorted** slice using linear interpolation.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

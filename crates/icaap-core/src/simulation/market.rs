use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::time::Instant;
use tracing::{debug, warn};

use super::cancel::CancellationToken;
use super::result::{validate_confidence_levels, SeedMode, SimulationResult, UncoveredSensitivity};
use super::rng::{entropy_seed, stream_rng};
use crate::calibration::historical::FactorStatistics;
use crate::error::StressEngineError;
use crate::types::{with_metadata_f64, ComputationOutput, RiskFactor};
use crate::StressResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Fx,
    Equity,
    Rates,
    Commodity,
}

impl InstrumentType {
    /// Factor a `delta` sensitivity is measured against.
    pub fn delta_factor(&self) -> RiskFactor {
        match self {
            InstrumentType::Fx => RiskFactor::FxReturn,
            InstrumentType::Equity => RiskFactor::EquityReturn,
            InstrumentType::Rates => RiskFactor::RateChange,
            InstrumentType::Commodity => RiskFactor::CommodityReturn,
        }
    }
}

/// Trading-book instrument with first-order sensitivities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub instrument_type: InstrumentType,
    pub market_value: f64,
    /// Equity beta
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta: Option<f64>,
    /// Modified duration (years)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Delta to the instrument's own factor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

impl Position {
    /// `(sensitivity name, factor, coefficient per unit factor move)`.
    ///
    /// `ΔV = value · (beta·equity − duration·rate + delta·own_factor)`.
    fn loadings(&self) -> Vec<(&'static str, RiskFactor, f64)> {
        let mut out = Vec::with_capacity(3);
        if let Some(beta) = self.beta {
            out.push(("beta", RiskFactor::EquityReturn, self.market_value * beta));
        }
        if let Some(duration) = self.duration {
            out.push(("duration", RiskFactor::RateChange, -self.market_value * duration));
        }
        if let Some(delta) = self.delta {
            out.push((
                "delta",
                self.instrument_type.delta_factor(),
                self.market_value * delta,
            ));
        }
        out
    }
}

/// Simulation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fewer trials give unstable tail estimates and are rejected.
    #[serde(default = "default_min_trials")]
    pub min_trials: usize,
    /// Trials per independently seeded batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_confidence_levels")]
    pub confidence_levels: Vec<f64>,
    /// Diagonal jitter tried once when Cholesky fails.
    #[serde(default = "default_regularization")]
    pub regularization: f64,
}

fn default_min_trials() -> usize {
    1000
}

fn default_batch_size() -> usize {
    1024
}

fn default_confidence_levels() -> Vec<f64> {
    vec![0.95, 0.99]
}

fn default_regularization() -> f64 {
    1e-10
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_trials: default_min_trials(),
            batch_size: default_batch_size(),
            confidence_levels: default_confidence_levels(),
            regularization: default_regularization(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> StressResult<()> {
        if self.min_trials == 0 {
            return Err(StressEngineError::InvalidInput {
                field: "simulation.min_trials".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(StressEngineError::InvalidInput {
                field: "simulation.batch_size".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(self.regularization.is_finite() && self.regularization > 0.0) {
            return Err(StressEngineError::InvalidInput {
                field: "simulation.regularization".into(),
                reason: format!("must be positive, got {}", self.regularization),
            });
        }
        validate_confidence_levels(&self.confidence_levels)
    }
}

/// Calibrated statistics, book and run parameters for one simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSimulationInput {
    pub statistics: FactorStatistics,
    pub positions: Vec<Position>,
    pub trials: usize,
    pub seed: Option<u64>,
    #[serde(default)]
    pub config: SimulationConfig,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Correlated multivariate-normal Monte Carlo over calibrated factors.
#[derive(Debug, Clone)]
pub struct MarketSimulator {
    config: SimulationConfig,
}

/// Pre-computed, read-only state shared by every batch.
struct TrialPlan {
    means: Vec<f64>,
    std_devs: Vec<f64>,
    cholesky: Vec<Vec<f64>>,
    /// Per position: (factor index, coefficient)
    loadings: Vec<Vec<(usize, f64)>>,
}

impl MarketSimulator {
    pub fn new(config: SimulationConfig) -> StressResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run `trials` correlated draws and revalue `positions` under each.
    ///
    /// `seed = Some(s)` reproduces a bit-identical result for equal inputs,
    /// independent of the rayon thread count. `seed = None` seeds from OS
    /// entropy and is not reproducible; the result records which applied.
    pub fn simulate(
        &self,
        stats: &FactorStatistics,
        positions: &[Position],
        trials: usize,
        seed: Option<u64>,
    ) -> StressResult<SimulationResult> {
        self.simulate_with_cancel(stats, positions, trials, seed, &CancellationToken::new())
    }

    /// As [`simulate`](Self::simulate), checking `token` before each batch.
    /// A cancelled run yields `Cancelled`, never a truncated result.
    pub fn simulate_with_cancel(
        &self,
        stats: &FactorStatistics,
        positions: &[Position],
        trials: usize,
        seed: Option<u64>,
        token: &CancellationToken,
    ) -> StressResult<SimulationResult> {
        if trials < self.config.min_trials {
            return Err(StressEngineError::InsufficientTrials {
                requested: trials,
                minimum: self.config.min_trials,
            });
        }
        validate_statistics(stats)?;
        validate_positions(positions)?;

        let standard = Normal::new(0.0, 1.0).map_err(|e| StressEngineError::InvalidInput {
            field: "normal".into(),
            reason: e.to_string(),
        })?;
        let cholesky = decompose(stats, self.config.regularization)?;
        let (loadings, uncovered) = map_loadings(stats, positions);
        let plan = TrialPlan {
            means: stats.means.clone(),
            std_devs: stats.std_devs.clone(),
            cholesky,
            loadings,
        };

        let (top_seed, seed_mode) = match seed {
            Some(s) => (s, SeedMode::Seeded { seed: s }),
            None => (entropy_seed(), SeedMode::Entropy),
        };

        let batch_size = self.config.batch_size;
        let total_batches = trials.div_ceil(batch_size);
        debug!(
            trials,
            total_batches,
            positions = positions.len(),
            factors = stats.factors.len(),
            reproducible = seed_mode.is_reproducible(),
            "starting market simulation"
        );

        let batches: Vec<Option<Vec<f64>>> = (0..total_batches)
            .into_par_iter()
            .map(|b| {
                if token.is_cancelled() {
                    return None;
                }
                let n = batch_size.min(trials - b * batch_size);
                Some(run_batch(&plan, standard, top_seed, b as u64, n))
            })
            .collect();

        let completed_batches = batches.iter().filter(|b| b.is_some()).count();
        if completed_batches < total_batches {
            warn!(completed_batches, total_batches, "market simulation cancelled");
            return Err(StressEngineError::Cancelled {
                completed_batches,
                total_batches,
            });
        }

        let mut pnl = Vec::with_capacity(trials);
        for batch in batches.into_iter().flatten() {
            pnl.extend(batch);
        }
        SimulationResult::from_pnl(pnl, seed_mode, &self.config.confidence_levels, uncovered)
    }
}

fn run_batch(plan: &TrialPlan, standard: Normal, seed: u64, stream: u64, n: usize) -> Vec<f64> {
    let mut rng = stream_rng(seed, stream);
    let k = plan.means.len();
    let mut z = vec![0.0; k];
    let mut x = vec![0.0; k];
    let mut out = Vec::with_capacity(n);

    for _ in 0..n {
        for zi in z.iter_mut() {
            *zi = rng.sample(standard);
        }
        for i in 0..k {
            let correlated: f64 = plan.cholesky[i][..=i]
                .iter()
                .zip(&z[..=i])
                .map(|(l, zj)| l * zj)
                .sum();
            x[i] = plan.means[i] + plan.std_devs[i] * correlated;
        }
        let pnl: f64 = plan
            .loadings
            .iter()
            .map(|pos| pos.iter().map(|(idx, coef)| coef * x[*idx]).sum::<f64>())
            .sum();
        out.push(pnl);
    }
    out
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_statistics(stats: &FactorStatistics) -> StressResult<()> {
    let k = stats.factors.len();
    if k == 0 {
        return Err(StressEngineError::InsufficientData {
            factors: vec![],
            reason: "factor statistics contain no factors".into(),
        });
    }
    if stats.means.len() != k
        || stats.std_devs.len() != k
        || stats.correlation.len() != k
        || stats.correlation.iter().any(|row| row.len() != k)
    {
        return Err(StressEngineError::InvalidInput {
            field: "statistics".into(),
            reason: format!("dimensions do not match {k} factors"),
        });
    }
    for (i, f) in stats.factors.iter().enumerate() {
        if !stats.means[i].is_finite() || !(stats.std_devs[i] >= 0.0) || !stats.std_devs[i].is_finite() {
            return Err(StressEngineError::InvalidInput {
                field: format!("statistics.{f}"),
                reason: "mean must be finite and std dev finite and non-negative".into(),
            });
        }
    }
    for i in 0..k {
        if (stats.correlation[i][i] - 1.0).abs() > CORRELATION_TOLERANCE {
            return Err(invalid_correlation(format!(
                "diagonal entry for '{}' is {}, expected 1",
                stats.factors[i], stats.correlation[i][i]
            )));
        }
        for j in 0..i {
            let (lower, upper) = (stats.correlation[i][j], stats.correlation[j][i]);
            if !(lower.is_finite() && lower.abs() <= 1.0) {
                return Err(invalid_correlation(format!(
                    "entry ({}, {}) is {lower}, outside [-1, 1]",
                    stats.factors[i], stats.factors[j]
                )));
            }
            if (lower - upper).abs() > CORRELATION_TOLERANCE {
                return Err(invalid_correlation(format!(
                    "not symmetric at ({}, {}): {lower} vs {upper}",
                    stats.factors[i], stats.factors[j]
                )));
            }
        }
    }
    Ok(())
}

/// Allowed deviation from a unit diagonal and from symmetry.
const CORRELATION_TOLERANCE: f64 = 1e-12;

fn invalid_correlation(reason: String) -> StressEngineError {
    StressEngineError::InvalidInput {
        field: "statistics.correlation".into(),
        reason,
    }
}

fn validate_positions(positions: &[Position]) -> StressResult<()> {
    for p in positions {
        let finite = p.market_value.is_finite()
            && [p.beta, p.duration, p.delta]
                .iter()
                .flatten()
                .all(|v| v.is_finite());
        if !finite {
            return Err(StressEngineError::InvalidInput {
                field: format!("positions.{}", p.id),
                reason: "market value and sensitivities must be finite".into(),
            });
        }
    }
    Ok(())
}

/// Resolve each position's sensitivities to factor indices. Sensitivities
/// on factors absent from `stats` contribute zero and are reported.
fn map_loadings(
    stats: &FactorStatistics,
    positions: &[Position],
) -> (Vec<Vec<(usize, f64)>>, Vec<UncoveredSensitivity>) {
    let mut uncovered = Vec::new();
    let loadings = positions
        .iter()
        .map(|p| {
            p.loadings()
                .into_iter()
                .filter_map(|(name, factor, coef)| match stats.index_of(factor) {
                    Some(idx) => Some((idx, coef)),
                    None => {
                        uncovered.push(UncoveredSensitivity {
                            position_id: p.id.clone(),
                            sensitivity: name.to_string(),
                            factor: factor.to_string(),
                        });
                        None
                    }
                })
                .collect()
        })
        .collect();
    (loadings, uncovered)
}

/// Lower-triangular `L` with `L Lᵀ = ρ`, retrying once with a regularized
/// matrix `(ρ + εI) / (1 + ε)`.
fn decompose(stats: &FactorStatistics, regularization: f64) -> StressResult<Vec<Vec<f64>>> {
    match cholesky(&stats.correlation) {
        Ok(l) => Ok(l),
        Err(_) => {
            warn!(regularization, "correlation not positive definite, regularizing");
            let eps = regularization;
            let jittered: Vec<Vec<f64>> = stats
                .correlation
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    row.iter()
                        .enumerate()
                        .map(|(j, v)| if i == j { 1.0 } else { v / (1.0 + eps) })
                        .collect()
                })
                .collect();
            cholesky(&jittered).map_err(|(idx, pivot)| {
                StressEngineError::NonPositiveSemiDefiniteCorrelation {
                    factor: stats.factors[idx].to_string(),
                    pivot,
                }
            })
        }
    }
}

/// Cholesky–Banachiewicz. On failure returns the offending row and pivot.
fn cholesky(a: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, (usize, f64)> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let s: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let pivot = a[i][i] - s;
                if !(pivot > 0.0) {
                    return Err((i, pivot));
                }
                l[i][j] = pivot.sqrt();
            } else {
                l[i][j] = (a[i][j] - s) / l[j][j];
            }
        }
    }
    Ok(l)
}

// ---------------------------------------------------------------------------
// Public API: envelope
// ---------------------------------------------------------------------------

/// Run a market simulation from a serialisable input and wrap the result
/// in the standard envelope.
pub fn run_market_simulation(
    input: &MarketSimulationInput,
) -> StressResult<ComputationOutput<SimulationResult>> {
    let start = Instant::now();
    let simulator = MarketSimulator::new(input.config.clone())?;
    let result = simulator.simulate(&input.statistics, &input.positions, input.trials, input.seed)?;

    let warnings = result
        .uncovered_sensitivities()
        .iter()
        .map(|u| {
            format!(
                "position '{}' {} has no calibrated '{}' factor; treated as zero",
                u.position_id, u.sensitivity, u.factor
            )
        })
        .collect();

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata_f64(
        "Correlated multivariate-normal Monte Carlo with linear sensitivity revaluation",
        &serde_json::json!({
            "trials": input.trials,
            "seed_mode": result.seed_mode(),
            "factors": input.statistics.factors,
            "batch_size": input.config.batch_size,
            "confidence_levels": input.config.confidence_levels,
        }),
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

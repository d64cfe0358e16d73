use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::providers::{MarketDataProvider, PortfolioDataProvider};
use crate::aggregation::metrics::{aggregate, AggregationInput, RiskMetricsReport};
use crate::calibration::historical::calibrate_with;
use crate::config::EngineConfig;
use crate::error::StressEngineError;
use crate::recommender::severity::{recommend, reconcile};
use crate::simulation::cancel::CancellationToken;
use crate::simulation::market::MarketSimulator;
use crate::simulation::result::SimulationResult;
use crate::stress_curves::transformer::StressCurveTransformer;
use crate::types::{with_metadata, ComputationOutput, MacroShockVector, Segment, SeverityLevel};
use crate::StressResult;

pub type StressReportOutput = ComputationOutput<RiskMetricsReport>;

/// One stress-report request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressReportRequest {
    pub segment: Segment,
    #[serde(default)]
    pub shocks: MacroShockVector,
    #[serde(default)]
    pub manual_severity: Option<SeverityLevel>,
    #[serde(default = "default_trials")]
    pub trials: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_trials() -> usize {
    10_000
}

/// Orchestrates recommendation, curve transformation, calibration,
/// simulation and aggregation for one segment at a time.
///
/// Holds only immutable configuration and provider handles, so a single
/// engine can serve concurrent requests.
pub struct StressEngine {
    config: EngineConfig,
    transformer: StressCurveTransformer,
    simulator: MarketSimulator,
    portfolio: Arc<dyn PortfolioDataProvider>,
    market: Arc<dyn MarketDataProvider>,
}

impl StressEngine {
    pub fn new(
        config: EngineConfig,
        portfolio: Arc<dyn PortfolioDataProvider>,
        market: Arc<dyn MarketDataProvider>,
    ) -> StressResult<Self> {
        config.validate()?;
        let transformer = StressCurveTransformer::new(config.transformer.clone())?;
        let simulator = MarketSimulator::new(config.simulation.clone())?;
        Ok(Self {
            config,
            transformer,
            simulator,
            portfolio,
            market,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn compute_stress_report(
        &self,
        segment: Segment,
        shocks: &MacroShockVector,
        manual_severity: Option<SeverityLevel>,
        trials: usize,
        seed: Option<u64>,
    ) -> StressResult<StressReportOutput> {
        self.compute_stress_report_with_cancel(
            segment,
            shocks,
            manual_severity,
            trials,
            seed,
            &CancellationToken::new(),
        )
    }

    pub fn run(&self, request: &StressReportRequest) -> StressResult<StressReportOutput> {
        self.compute_stress_report(
            request.segment,
            &request.shocks,
            request.manual_severity,
            request.trials,
            request.seed,
        )
    }

    /// Build the full report for `segment`. `trials` and `seed` only apply
    /// to the trading book; `token` is honoured between simulation batches.
    pub fn compute_stress_report_with_cancel(
        &self,
        segment: Segment,
        shocks: &MacroShockVector,
        manual_severity: Option<SeverityLevel>,
        trials: usize,
        seed: Option<u64>,
        token: &CancellationToken,
    ) -> StressResult<StressReportOutput> {
        let start = Instant::now();
        let mut warnings: Vec<String> = Vec::new();

        if segment.is_trading_book() && trials < self.config.simulation.min_trials {
            return Err(StressEngineError::InsufficientTrials {
                requested: trials,
                minimum: self.config.simulation.min_trials,
            });
        }

        // Recommendation
        let profile = self.portfolio.fetch_profile(segment)?;
        if profile.segment != segment {
            return Err(StressEngineError::DataSource {
                segment: segment.to_string(),
                reason: format!("provider returned profile for '{}'", profile.segment),
            });
        }
        let recommendation = recommend(&profile, &self.config.recommendation)?;
        let selected = manual_severity.unwrap_or(recommendation.recommended);
        let mismatch = reconcile(recommendation.recommended, manual_severity);
        if let Some(m) = &mismatch {
            warn!(%segment, advisory = %m, "manual severity differs from recommendation");
            warnings.push(m.to_string());
        }
        debug!(%segment, recommended = %recommendation.recommended, %selected, "severity selected");

        // Credit curves
        let baseline = self.portfolio.fetch_baseline(segment)?;
        let pd_set = self.transformer.transform_all(&baseline.pd_curve, shocks);
        pd_set.verify_monotone()?;
        let lgd_set = self.transformer.transform_all(&baseline.lgd_curve, shocks);
        lgd_set.verify_monotone()?;
        let migrations = self.transformer.transform_migrations(&baseline.migration, shocks)?;

        // Market risk
        let simulation = if segment.is_trading_book() {
            let sim = self.simulate_trading_book(segment, trials, seed, token)?;
            for u in sim.uncovered_sensitivities() {
                warnings.push(format!(
                    "position '{}' {} has no calibrated '{}' factor; treated as zero",
                    u.position_id, u.sensitivity, u.factor
                ));
            }
            if !sim.seed_mode().is_reproducible() {
                warnings.push("market simulation was entropy seeded and is not reproducible".into());
            }
            Some(sim)
        } else {
            None
        };

        let mut report = aggregate(&AggregationInput {
            segment,
            severities: SeverityLevel::ALL.to_vec(),
            pd_curves: pd_set.curves,
            lgd_curves: lgd_set.curves,
            migrations,
            exposure_weights: baseline.exposure_weights,
            total_exposure: profile.total_exposure,
            grade_weights: baseline.grade_weights,
            simulation,
        })?;
        report.selected_severity = Some(selected);
        report.severity_mismatch = mismatch;

        let assumptions = serde_json::json!({
            "segment": segment,
            "shocks": shocks,
            "manual_severity": manual_severity,
            "recommended_severity": recommendation.recommended,
            "selected_severity": selected,
            "severity_multipliers": self.config.transformer.severity_multipliers,
            "calibration_window": self.config.calibration_window,
            "trials": if segment.is_trading_book() { Some(trials) } else { None },
            "seed": seed,
        });
        report.recommendation = Some(recommendation);

        let elapsed = start.elapsed().as_micros() as u64;
        info!(%segment, %selected, elapsed_us = elapsed, "stress report computed");

        Ok(with_metadata(
            "ICAAP stress report: macro-shocked PD/LGD curves, stressed rating migration, \
             exposure-weighted expected loss and Monte Carlo market VaR/ES",
            &assumptions,
            warnings,
            elapsed,
            report,
        ))
    }

    fn simulate_trading_book(
        &self,
        segment: Segment,
        trials: usize,
        seed: Option<u64>,
        token: &CancellationToken,
    ) -> StressResult<SimulationResult> {
        let positions = self.portfolio.fetch_positions(segment)?;
        let series = self
            .market
            .fetch_factor_series(&self.config.calibrated_factors, self.config.calibration_window)?;
        let stats = calibrate_with(&series, &self.config.calibration)?;
        debug!(
            positions = positions.len(),
            observations = stats.observations,
            "calibrated trading-book factors"
        );
        self.simulator
            .simulate_with_cancel(&stats, &positions, trials, seed, token)
    }
}

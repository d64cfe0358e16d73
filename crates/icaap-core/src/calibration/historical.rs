use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

use crate::error::StressEngineError;
use crate::types::{with_metadata_f64, ComputationOutput, RiskFactor};
use crate::StressResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One dated observation of a factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Ordered history of one market or macro factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSeries {
    pub factor: RiskFactor,
    pub points: Vec<FactorPoint>,
}

impl FactorSeries {
    pub fn new(factor: RiskFactor, points: Vec<FactorPoint>) -> Self {
        Self { factor, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|p| p.date)
    }
}

/// Calibration policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Minimum observations per factor (one trading year by default).
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    /// Largest tolerated calendar gap between consecutive observations.
    #[serde(default = "default_max_gap_days")]
    pub max_gap_days: i64,
}

fn default_min_observations() -> usize {
    252
}

fn default_max_gap_days() -> i64 {
    5
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_observations: default_min_observations(),
            max_gap_days: default_max_gap_days(),
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> StressResult<()> {
        if self.min_observations < 2 {
            return Err(StressEngineError::InvalidInput {
                field: "calibration.min_observations".into(),
                reason: "at least 2 observations are needed for a sample standard deviation"
                    .into(),
            });
        }
        if self.max_gap_days < 1 {
            return Err(StressEngineError::InvalidInput {
                field: "calibration.max_gap_days".into(),
                reason: "must be at least 1 day".into(),
            });
        }
        Ok(())
    }
}

/// Calibrated per-factor moments and cross-factor correlation.
///
/// Vectors are indexed in the order of `factors`, which is the key order of
/// the series map handed to [`calibrate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorStatistics {
    pub factors: Vec<RiskFactor>,
    pub means: Vec<f64>,
    pub std_devs: Vec<f64>,
    /// Symmetric, unit diagonal.
    pub correlation: Vec<Vec<f64>>,
    pub observations: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl FactorStatistics {
    pub fn index_of(&self, factor: RiskFactor) -> Option<usize> {
        self.factors.iter().position(|f| *f == factor)
    }

    pub fn mean(&self, factor: RiskFactor) -> Option<f64> {
        self.index_of(factor).map(|i| self.means[i])
    }

    pub fn std_dev(&self, factor: RiskFactor) -> Option<f64> {
        self.index_of(factor).map(|i| self.std_devs[i])
    }

    pub fn correlation_between(&self, a: RiskFactor, b: RiskFactor) -> Option<f64> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        Some(self.correlation[i][j])
    }

    /// Covariance matrix `Σ_ij = ρ_ij σ_i σ_j`.
    pub fn covariance(&self) -> Vec<Vec<f64>> {
        let n = self.factors.len();
        let mut cov = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                cov[i][j] = self.correlation[i][j] * self.std_devs[i] * self.std_devs[j];
            }
        }
        cov
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Calibrate factor statistics with the default gap tolerance.
pub fn calibrate(
    series: &BTreeMap<RiskFactor, FactorSeries>,
    min_observations: usize,
) -> StressResult<FactorStatistics> {
    calibrate_with(
        series,
        &CalibrationConfig {
            min_observations,
            ..CalibrationConfig::default()
        },
    )
}

/// Derive mean, unbiased standard deviation and Pearson correlation for
/// every factor in `series`.
///
/// All series must be date-aligned, strictly increasing, free of gaps wider
/// than `config.max_gap_days` and at least `config.min_observations` long.
/// Every deficient factor is named in the returned error.
pub fn calibrate_with(
    series: &BTreeMap<RiskFactor, FactorSeries>,
    config: &CalibrationConfig,
) -> StressResult<FactorStatistics> {
    config.validate()?;
    let Some(reference) = series.values().next() else {
        return Err(StressEngineError::InsufficientData {
            factors: vec![],
            reason: "no factor series supplied".into(),
        });
    };

    for (factor, s) in series {
        if s.factor != *factor {
            return Err(StressEngineError::InvalidInput {
                field: format!("series.{factor}"),
                reason: format!("series is keyed as '{factor}' but labelled '{}'", s.factor),
            });
        }
        validate_dates(s, config.max_gap_days)?;
    }

    let short: Vec<String> = series
        .values()
        .filter(|s| s.len() < config.min_observations)
        .map(|s| s.factor.to_string())
        .collect();
    if !short.is_empty() {
        return Err(StressEngineError::InsufficientData {
            factors: short,
            reason: format!(
                "each factor needs at least {} observations",
                config.min_observations
            ),
        });
    }

    // Every series must share the first series' date vector
    let misaligned: Vec<String> = series
        .values()
        .skip(1)
        .filter(|s| !s.dates().eq(reference.dates()))
        .map(|s| s.factor.to_string())
        .collect();
    if !misaligned.is_empty() {
        return Err(StressEngineError::InsufficientData {
            factors: misaligned,
            reason: format!(
                "series do not cover the same dates as '{}'",
                reference.factor
            ),
        });
    }

    let factors: Vec<RiskFactor> = series.keys().copied().collect();
    let columns: Vec<Vec<f64>> = series
        .values()
        .map(|s| s.points.iter().map(|p| p.value).collect())
        .collect();

    for (factor, col) in factors.iter().zip(&columns) {
        if col.iter().any(|v| !v.is_finite()) {
            return Err(StressEngineError::InvalidInput {
                field: format!("series.{factor}"),
                reason: "contains a non-finite value".into(),
            });
        }
    }

    let means: Vec<f64> = columns.iter().map(|c| mean(c)).collect();
    let std_devs: Vec<f64> = columns
        .iter()
        .zip(&means)
        .map(|(c, m)| sample_std_dev(c, *m))
        .collect();

    let n = factors.len();
    let mut correlation = vec![vec![0.0; n]; n];
    for i in 0..n {
        correlation[i][i] = 1.0;
        for j in (i + 1)..n {
            let rho = pearson(&columns[i], means[i], &columns[j], means[j]);
            correlation[i][j] = rho;
            correlation[j][i] = rho;
        }
    }

    let start_date = reference.points[0].date;
    let end_date = reference.points[reference.len() - 1].date;
    debug!(
        factors = n,
        observations = reference.len(),
        %start_date,
        %end_date,
        "calibrated factor statistics"
    );

    Ok(FactorStatistics {
        factors,
        means,
        std_devs,
        correlation,
        observations: reference.len(),
        start_date,
        end_date,
    })
}

/// Serialisable calibration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationInput {
    pub series: Vec<FactorSeries>,
    #[serde(default)]
    pub config: CalibrationConfig,
}

/// [`calibrate_with`] over a list of series, wrapped in the standard envelope.
pub fn run_calibration(input: &CalibrationInput) -> StressResult<ComputationOutput<FactorStatistics>> {
    let start = Instant::now();
    let mut series = BTreeMap::new();
    for s in &input.series {
        if series.insert(s.factor, s.clone()).is_some() {
            return Err(StressEngineError::InvalidInput {
                field: format!("series.{}", s.factor),
                reason: "factor supplied more than once".into(),
            });
        }
    }
    let stats = calibrate_with(&series, &input.config)?;

    let mut warnings = Vec::new();
    for (i, f) in stats.factors.iter().enumerate() {
        if stats.std_devs[i] <= f64::EPSILON {
            warnings.push(format!("factor '{f}' has zero variance; treated as uncorrelated"));
        }
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata_f64(
        "Sample mean, unbiased standard deviation and Pearson correlation",
        &serde_json::json!({
            "min_observations": input.config.min_observations,
            "max_gap_days": input.config.max_gap_days,
            "factors": stats.factors,
        }),
        warnings,
        elapsed,
        stats,
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_dates(series: &FactorSeries, max_gap_days: i64) -> StressResult<()> {
    for pair in series.points.windows(2) {
        let (prev, next) = (pair[0].date, pair[1].date);
        if next <= prev {
            return Err(StressEngineError::DateError {
                factor: series.factor.to_string(),
                reason: format!("dates not strictly increasing at {prev} -> {next}"),
            });
        }
        let gap = (next - prev).num_days();
        if gap > max_gap_days {
            return Err(StressEngineError::DateError {
                factor: series.factor.to_string(),
                reason: format!(
                    "gap of {gap} days between {prev} and {next} exceeds {max_gap_days}"
                ),
            });
        }
    }
    Ok(())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased (n-1) standard deviation.
fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Pearson correlation; a constant series is uncorrelated with everything.
fn pearson(x: &[f64], mean_x: f64, y: &[f64], mean_y: f64) -> f64 {
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= f64::EPSILON || syy <= f64::EPSILON {
        return 0.0;
    }
    (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        (0..n).map(|i| start + Duration::days(i as i64)).collect()
    }

    fn series_from(factor: RiskFactor, values: &[f64]) -> FactorSeries {
        FactorSeries::new(
            factor,
            dates(values.len())
                .into_iter()
                .zip(values)
                .map(|(date, &value)| FactorPoint { date, value })
                .collect(),
        )
    }

    /// Deterministic pseudo-normal values with exact sample mean `mu` and
    /// sample std `sigma` after standardisation.
    fn standardised(n: usize, mu: f64, sigma: f64, phase: f64) -> Vec<f64> {
        let raw: Vec<f64> = (0..n).map(|i| (i as f64 * 0.37 + phase).sin()).collect();
        let m = mean(&raw);
        let s = sample_std_dev(&raw, m);
        raw.iter().map(|v| mu + sigma * (v - m) / s).collect()
    }

    fn map_of(series: Vec<FactorSeries>) -> BTreeMap<RiskFactor, FactorSeries> {
        series.into_iter().map(|s| (s.factor, s)).collect()
    }

    #[test]
    fn test_recovers_known_mean_and_std() {
        let eq = series_from(
            RiskFactor::EquityReturn,
            &standardised(300, 0.0004, 0.012, 0.0),
        );
        let stats = calibrate(&map_of(vec![eq]), 252).unwrap();
        assert!((stats.means[0] - 0.0004).abs() < 1e-12);
        assert!((stats.std_devs[0] - 0.012).abs() < 1e-12);
        assert_eq!(stats.observations, 300);
        assert_eq!(stats.correlation, vec![vec![1.0]]);
    }

    #[test]
    fn test_perfectly_correlated_pair() {
        let base = standardised(260, 0.0, 0.01, 1.0);
        let scaled: Vec<f64> = base.iter().map(|v| 3.0 * v + 0.002).collect();
        let stats = calibrate(
            &map_of(vec![
                series_from(RiskFactor::EquityReturn, &base),
                series_from(RiskFactor::FxReturn, &scaled),
            ]),
            252,
        )
        .unwrap();
        let rho = stats
            .correlation_between(RiskFactor::EquityReturn, RiskFactor::FxReturn)
            .unwrap();
        assert!((rho - 1.0).abs() < 1e-6, "rho = {rho}");
    }

    #[test]
    fn test_anti_correlated_pair_is_symmetric() {
        let base = standardised(260, 0.0, 0.01, 2.0);
        let neg: Vec<f64> = base.iter().map(|v| -v).collect();
        let stats = calibrate(
            &map_of(vec![
                series_from(RiskFactor::EquityReturn, &base),
                series_from(RiskFactor::RateChange, &neg),
            ]),
            252,
        )
        .unwrap();
        assert!((stats.correlation[0][1] + 1.0).abs() < 1e-9);
        assert_eq!(stats.correlation[0][1], stats.correlation[1][0]);
    }

    #[test]
    fn test_insufficient_data_names_factor() {
        let short = series_from(RiskFactor::FxReturn, &standardised(100, 0.0, 0.01, 0.0));
        let err = calibrate(&map_of(vec![short]), 252).unwrap_err();
        match err {
            StressEngineError::InsufficientData { factors, .. } => {
                assert_eq!(factors, vec!["fx_return".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_insufficient_data_names_every_short_factor() {
        let err = calibrate(
            &map_of(vec![
                series_from(RiskFactor::EquityReturn, &standardised(300, 0.0, 0.01, 0.0)),
                series_from(RiskFactor::FxReturn, &standardised(100, 0.0, 0.01, 0.0)),
                series_from(RiskFactor::RateChange, &standardised(50, 0.0, 0.01, 0.0)),
            ]),
            252,
        )
        .unwrap_err();
        match err {
            StressEngineError::InsufficientData { factors, .. } => {
                assert_eq!(factors, vec!["rate_change".to_string(), "fx_return".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_misaligned_dates_rejected() {
        let a = series_from(RiskFactor::EquityReturn, &standardised(260, 0.0, 0.01, 0.0));
        let mut b = series_from(RiskFactor::FxReturn, &standardised(260, 0.0, 0.01, 0.5));
        for p in &mut b.points {
            p.date += Duration::days(1);
        }
        let err = calibrate(&map_of(vec![a, b]), 252).unwrap_err();
        assert!(matches!(
            err,
            StressEngineError::InsufficientData { ref factors, .. } if factors == &vec!["fx_return".to_string()]
        ));
    }

    #[test]
    fn test_non_increasing_dates_rejected() {
        let mut s = series_from(RiskFactor::EquityReturn, &standardised(260, 0.0, 0.01, 0.0));
        s.points.swap(10, 11);
        let err = calibrate(&map_of(vec![s]), 252).unwrap_err();
        assert!(matches!(err, StressEngineError::DateError { .. }));
    }

    #[test]
    fn test_gap_beyond_tolerance_rejected() {
        let mut s = series_from(RiskFactor::EquityReturn, &standardised(260, 0.0, 0.01, 0.0));
        for p in s.points.iter_mut().skip(100) {
            p.date += Duration::days(10);
        }
        let err = calibrate(&map_of(vec![s]), 252).unwrap_err();
        match err {
            StressEngineError::DateError { factor, reason } => {
                assert_eq!(factor, "equity_return");
                assert!(reason.contains("gap of 11 days"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_constant_series_has_zero_correlation() {
        let stats = calibrate(
            &map_of(vec![
                series_from(RiskFactor::EquityReturn, &standardised(260, 0.0, 0.01, 0.0)),
                series_from(RiskFactor::CommodityReturn, &vec![0.5; 260]),
            ]),
            252,
        )
        .unwrap();
        assert_eq!(stats.std_devs[1], 0.0);
        assert_eq!(stats.correlation[0][1], 0.0);
        assert_eq!(stats.correlation[1][1], 1.0);
    }

    #[test]
    fn test_covariance_diagonal_is_variance() {
        let stats = calibrate(
            &map_of(vec![series_from(
                RiskFactor::EquityReturn,
                &standardised(260, 0.0, 0.02, 0.0),
            )]),
            252,
        )
        .unwrap();
        assert!((stats.covariance()[0][0] - 0.0004).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(calibrate(&BTreeMap::new(), 252).is_err());
    }

    #[test]
    fn test_envelope_rejects_duplicate_factor() {
        let eq = series_from(RiskFactor::EquityReturn, &standardised(260, 0.0, 0.01, 0.0));
        let input = CalibrationInput {
            series: vec![eq.clone(), eq],
            config: CalibrationConfig::default(),
        };
        assert!(matches!(
            run_calibration(&input),
            Err(StressEngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_envelope_warns_on_constant_factor() {
        let input = CalibrationInput {
            series: vec![
                series_from(RiskFactor::EquityReturn, &standardised(260, 0.0, 0.01, 0.0)),
                series_from(RiskFactor::RateChange, &[0.25; 260]),
            ],
            config: CalibrationConfig {
                max_gap_days: 1,
                ..CalibrationConfig::default()
            },
        };
        let out = run_calibration(&input).unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.metadata.precision, "ieee754_f64");
        assert_eq!(out.result.correlation[0][1], 0.0);
    }
}

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use icaap_core::calibration::historical::{calibrate, FactorPoint, FactorSeries, FactorStatistics};
use icaap_core::simulation::cancel::CancellationToken;
use icaap_core::simulation::market::{InstrumentType, MarketSimulator, Position, SimulationConfig};
use icaap_core::simulation::result::SeedMode;
use icaap_core::simulation::rng::stream_rng;
use icaap_core::{RiskFactor, StressEngineError};
use pretty_assertions::assert_eq;
use rand::Rng;
use statrs::distribution::Normal;
use std::collections::BTreeMap;

// ===========================================================================
// Fixtures
// ===========================================================================

/// `n` consecutive weekdays from 2 Jan 2023.
fn business_days(n: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(n);
    let mut d = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    while out.len() < n {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(d);
        }
        d += Duration::days(1);
    }
    out
}

fn series(factor: RiskFactor, values: &[f64]) -> FactorSeries {
    FactorSeries::new(
        factor,
        business_days(values.len())
            .into_iter()
            .zip(values)
            .map(|(date, value)| FactorPoint {
                date,
                value: *value,
            })
            .collect(),
    )
}

fn normal_draws(seed: u64, n: usize, mean: f64, std_dev: f64) -> Vec<f64> {
    let mut rng = stream_rng(seed, 0);
    let dist = Normal::new(mean, std_dev).unwrap();
    (0..n).map(|_| rng.sample(dist)).collect()
}

/// Four calibrated market factors from synthetic history.
fn market_stats() -> FactorStatistics {
    let n = 1_000;
    let equity = normal_draws(1, n, 0.0003, 0.012);
    let noise = normal_draws(2, n, 0.0, 0.004);
    // FX partly driven by equity
    let fx: Vec<f64> = equity.iter().zip(&noise).map(|(e, z)| 0.4 * e + z).collect();
    let rates = normal_draws(3, n, 0.0, 0.0006);
    let commodity = normal_draws(4, n, 0.0001, 0.015);
    let map: BTreeMap<RiskFactor, FactorSeries> = [
        series(RiskFactor::EquityReturn, &equity),
        series(RiskFactor::FxReturn, &fx),
        series(RiskFactor::RateChange, &rates),
        series(RiskFactor::CommodityReturn, &commodity),
    ]
    .into_iter()
    .map(|s| (s.factor, s))
    .collect();
    calibrate(&map, 252).unwrap()
}

fn book() -> Vec<Position> {
    vec![
        Position {
            id: "EQ-INDEX".into(),
            instrument_type: InstrumentType::Equity,
            market_value: 5_000_000.0,
            beta: Some(1.1),
            duration: None,
            delta: None,
        },
        Position {
            id: "UST-10Y".into(),
            instrument_type: InstrumentType::Rates,
            market_value: 8_000_000.0,
            beta: None,
            duration: Some(8.5),
            delta: None,
        },
        Position {
            id: "EURUSD-FWD".into(),
            instrument_type: InstrumentType::Fx,
            market_value: 3_000_000.0,
            beta: None,
            duration: None,
            delta: Some(1.0),
        },
        Position {
            id: "BRENT".into(),
            instrument_type: InstrumentType::Commodity,
            market_value: 1_000_000.0,
            beta: None,
            duration: None,
            delta: Some(0.9),
        },
    ]
}

// ===========================================================================
// Calibration
// ===========================================================================

#[test]
fn test_calibration_recovers_moments() {
    let values = normal_draws(11, 5_000, 0.002, 0.015);
    let map = BTreeMap::from([(
        RiskFactor::EquityReturn,
        series(RiskFactor::EquityReturn, &values),
    )]);
    let stats = calibrate(&map, 252).unwrap();
    // Standard error of the mean ~ 0.015 / sqrt(5000) = 0.0002
    assert!((stats.mean(RiskFactor::EquityReturn).unwrap() - 0.002).abs() < 0.001);
    assert!((stats.std_dev(RiskFactor::EquityReturn).unwrap() - 0.015).abs() < 0.001);
    assert_eq!(stats.observations, 5_000);
}

#[test]
fn test_perfectly_correlated_pair() {
    let x = normal_draws(5, 300, 0.0, 0.01);
    let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 0.001).collect();
    let map = BTreeMap::from([
        (RiskFactor::EquityReturn, series(RiskFactor::EquityReturn, &x)),
        (RiskFactor::FxReturn, series(RiskFactor::FxReturn, &y)),
    ]);
    let stats = calibrate(&map, 252).unwrap();
    let rho = stats
        .correlation_between(RiskFactor::EquityReturn, RiskFactor::FxReturn)
        .unwrap();
    assert!((rho - 1.0).abs() < 1e-6, "rho = {rho}");
}

#[test]
fn test_short_history_rejected() {
    let map = BTreeMap::from([
        (
            RiskFactor::EquityReturn,
            series(RiskFactor::EquityReturn, &normal_draws(1, 300, 0.0, 0.01)),
        ),
        (
            RiskFactor::CommodityReturn,
            series(RiskFactor::CommodityReturn, &normal_draws(2, 100, 0.0, 0.01)),
        ),
    ]);
    match calibrate(&map, 252).unwrap_err() {
        StressEngineError::InsufficientData { factors, .. } => {
            assert_eq!(factors, vec!["commodity_return".to_string()])
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ===========================================================================
// Simulation
// ===========================================================================

#[test]
fn test_seeded_runs_bit_identical() {
    let stats = market_stats();
    let sim = MarketSimulator::new(SimulationConfig::default()).unwrap();
    let a = sim.simulate(&stats, &book(), 10_000, Some(42)).unwrap();
    let b = sim.simulate(&stats, &book(), 10_000, Some(42)).unwrap();
    assert_eq!(a.seed_mode(), SeedMode::Seeded { seed: 42 });
    assert!(a.pnl().iter().zip(b.pnl()).all(|(x, y)| x.to_bits() == y.to_bits()));
    assert_eq!(a, b);
}

#[test]
fn test_entropy_runs_differ() {
    let stats = market_stats();
    let sim = MarketSimulator::new(SimulationConfig::default()).unwrap();
    let a = sim.simulate(&stats, &book(), 2_000, None).unwrap();
    let b = sim.simulate(&stats, &book(), 2_000, None).unwrap();
    assert_eq!(a.seed_mode(), SeedMode::Entropy);
    assert!(!a.seed_mode().is_reproducible());
    assert_ne!(a.pnl(), b.pnl());
}

#[test]
fn test_result_independent_of_thread_count() {
    let stats = market_stats();
    let sim = MarketSimulator::new(SimulationConfig::default()).unwrap();
    let run = |threads: usize| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
            .install(|| sim.simulate(&stats, &book(), 6_000, Some(7)).unwrap())
    };
    assert_eq!(run(1), run(4));
}

#[test]
fn test_var_ordering_and_es() {
    let stats = market_stats();
    let sim = MarketSimulator::new(SimulationConfig::default()).unwrap();
    let r = sim.simulate(&stats, &book(), 20_000, Some(2024)).unwrap();
    let v95 = r.tail_metric(0.95).unwrap();
    let v99 = r.tail_metric(0.99).unwrap();
    assert!(v99.var >= v95.var);
    assert!(v95.expected_shortfall >= v95.var);
    assert!(v99.expected_shortfall >= v99.var);
    assert!(r.pnl().windows(2).all(|w| w[0] <= w[1]));
    assert!(r.uncovered_sensitivities().is_empty());
}

#[test]
fn test_trial_floor() {
    let stats = market_stats();
    let sim = MarketSimulator::new(SimulationConfig::default()).unwrap();
    match sim.simulate(&stats, &book(), 100, Some(1)).unwrap_err() {
        StressEngineError::InsufficientTrials { requested, minimum } => {
            assert_eq!(requested, 100);
            assert_eq!(minimum, 1_000);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_factor_reported_not_dropped() {
    let equity_only = BTreeMap::from([(
        RiskFactor::EquityReturn,
        series(RiskFactor::EquityReturn, &normal_draws(9, 300, 0.0, 0.01)),
    )]);
    let stats = calibrate(&equity_only, 252).unwrap();
    let sim = MarketSimulator::new(SimulationConfig::default()).unwrap();
    let r = sim.simulate(&stats, &book(), 1_000, Some(3)).unwrap();
    let mut uncovered: Vec<(&str, &str)> = r
        .uncovered_sensitivities()
        .iter()
        .map(|u| (u.position_id.as_str(), u.factor.as_str()))
        .collect();
    uncovered.sort();
    assert_eq!(
        uncovered,
        vec![
            ("BRENT", "commodity_return"),
            ("EURUSD-FWD", "fx_return"),
            ("UST-10Y", "rate_change"),
        ]
    );
}

#[test]
fn test_cancelled_run_returns_no_result() {
    let stats = market_stats();
    let sim = MarketSimulator::new(SimulationConfig {
        batch_size: 500,
        ..SimulationConfig::default()
    })
    .unwrap();
    let token = CancellationToken::new();
    token.cancel();
    match sim
        .simulate_with_cancel(&stats, &book(), 5_000, Some(1), &token)
        .unwrap_err()
    {
        StressEngineError::Cancelled {
            completed_batches,
            total_batches,
        } => {
            assert_eq!(completed_batches, 0);
            assert_eq!(total_batches, 10);
        }
        other => panic!("unexpected error: {other}"),
    }
}

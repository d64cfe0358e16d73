use icaap_core::recommender::severity::{
    recommend, reconcile, ConcentrationMetric, ConcentrationShare, FloorRule, MismatchDirection,
    PortfolioProfile, RecommendationThresholds,
};
use icaap_core::stress_curves::curve::{CurveBucket, RiskParameter, StressCurve};
use icaap_core::stress_curves::migration::{RatingMigrationMatrix, ROW_SUM_TOLERANCE};
use icaap_core::stress_curves::transformer::{
    MigrationSensitivity, ParameterSensitivity, SeverityMultipliers, StressCurveTransformer,
    TransformerConfig,
};
use icaap_core::{FactorCoefficients, MacroFactor, MacroShockVector, Segment, SeverityLevel};
use icaap_core::StressEngineError;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ===========================================================================
// Fixtures
// ===========================================================================

fn transformer_config() -> TransformerConfig {
    TransformerConfig {
        severity_multipliers: SeverityMultipliers {
            base: dec!(1.0),
            moderate: dec!(1.2),
            severe: dec!(1.5),
            extreme: dec!(2.0),
        },
        pd: ParameterSensitivity {
            multiplicative: [
                (MacroFactor::GdpChange, dec!(-0.05)),
                (MacroFactor::UnemploymentChange, dec!(0.10)),
            ]
            .into_iter()
            .collect(),
            additive: FactorCoefficients::new(),
            cap: dec!(1),
        },
        lgd: ParameterSensitivity {
            multiplicative: [(MacroFactor::HousePriceChange, dec!(-0.02))]
                .into_iter()
                .collect(),
            additive: [(MacroFactor::InterestRateChange, dec!(0.005))]
                .into_iter()
                .collect(),
            cap: dec!(1),
        },
        migration: MigrationSensitivity {
            coefficients: [
                (MacroFactor::GdpChange, dec!(-0.02)),
                (MacroFactor::UnemploymentChange, dec!(0.03)),
            ]
            .into_iter()
            .collect(),
            max_shift: dec!(0.6),
        },
    }
}

fn retail_pd_curve() -> StressCurve {
    StressCurve {
        parameter: RiskParameter::ProbabilityOfDefault,
        severity: SeverityLevel::Base,
        buckets: [
            ("<580", dec!(0.12)),
            ("580-669", dec!(0.045)),
            ("670-699", dec!(0.018)),
            ("700-749", dec!(0.008)),
            ("750+", dec!(0.002)),
        ]
        .iter()
        .map(|(l, v)| CurveBucket {
            label: l.to_string(),
            value: *v,
        })
        .collect(),
    }
}

fn agency_matrix() -> RatingMigrationMatrix {
    let grades = ["AAA", "AA", "A", "BBB", "BB", "B", "CCC", "D"];
    RatingMigrationMatrix {
        grades: grades.iter().map(|g| g.to_string()).collect(),
        probabilities: vec![
            vec![dec!(0.9081), dec!(0.0833), dec!(0.0068), dec!(0.0006), dec!(0.0012), dec!(0), dec!(0), dec!(0)],
            vec![dec!(0.0070), dec!(0.9065), dec!(0.0779), dec!(0.0064), dec!(0.0006), dec!(0.0014), dec!(0.0002), dec!(0)],
            vec![dec!(0.0009), dec!(0.0227), dec!(0.9105), dec!(0.0552), dec!(0.0074), dec!(0.0026), dec!(0.0001), dec!(0.0006)],
            vec![dec!(0.0002), dec!(0.0033), dec!(0.0595), dec!(0.8693), dec!(0.0530), dec!(0.0117), dec!(0.0012), dec!(0.0018)],
            vec![dec!(0.0003), dec!(0.0014), dec!(0.0067), dec!(0.0773), dec!(0.8053), dec!(0.0884), dec!(0.0100), dec!(0.0106)],
            vec![dec!(0), dec!(0.0011), dec!(0.0024), dec!(0.0043), dec!(0.0648), dec!(0.8346), dec!(0.0407), dec!(0.0521)],
            vec![dec!(0.0022), dec!(0), dec!(0.0022), dec!(0.0130), dec!(0.0238), dec!(0.1124), dec!(0.6486), dec!(0.1978)],
            vec![dec!(0), dec!(0), dec!(0), dec!(0), dec!(0), dec!(0), dec!(0), dec!(1)],
        ],
    }
}

fn shocks(gdp: Decimal, unemployment: Decimal) -> MacroShockVector {
    [
        (MacroFactor::GdpChange, gdp),
        (MacroFactor::UnemploymentChange, unemployment),
        (MacroFactor::HousePriceChange, dec!(-8)),
        (MacroFactor::InterestRateChange, dec!(1.5)),
    ]
    .into_iter()
    .collect()
}

// ===========================================================================
// Transformer
// ===========================================================================

#[test]
fn test_severe_end_to_end_scenario() {
    let t = StressCurveTransformer::new(transformer_config()).unwrap();
    let shocks: MacroShockVector = [
        (MacroFactor::GdpChange, dec!(-3.0)),
        (MacroFactor::UnemploymentChange, dec!(2.0)),
    ]
    .into_iter()
    .collect();
    let out = t.transform(&retail_pd_curve(), &shocks, SeverityLevel::Severe);
    // 0.8% * (1 + 0.15 + 0.20) * 1.5
    assert_eq!(out.value("700-749"), Some(dec!(0.0162)));
}

#[test]
fn test_camel_case_shock_keys_accepted() {
    let shocks: MacroShockVector =
        serde_json::from_str(r#"{"gdpChange": "-3.0", "unemploymentChange": "2.0"}"#).unwrap();
    assert_eq!(shocks[&MacroFactor::GdpChange], dec!(-3.0));
    assert_eq!(shocks[&MacroFactor::UnemploymentChange], dec!(2.0));
}

#[test]
fn test_monotone_across_shock_grid() {
    let t = StressCurveTransformer::new(transformer_config()).unwrap();
    let lgd = StressCurve {
        parameter: RiskParameter::LossGivenDefault,
        severity: SeverityLevel::Base,
        buckets: vec![
            CurveBucket {
                label: "<60%".into(),
                value: dec!(0.10),
            },
            CurveBucket {
                label: ">=90%".into(),
                value: dec!(0.55),
            },
        ],
    };
    for gdp in [dec!(-8), dec!(-3), dec!(0), dec!(2), dec!(40)] {
        for unemp in [dec!(-2), dec!(0), dec!(2), dec!(6)] {
            let s = shocks(gdp, unemp);
            for baseline in [retail_pd_curve(), lgd.clone()] {
                let set = t.transform_all(&baseline, &s);
                set.verify_monotone().unwrap();
                for pair in SeverityLevel::ALL.windows(2) {
                    let lower = set.get(pair[0]).unwrap();
                    let upper = set.get(pair[1]).unwrap();
                    for (a, b) in lower.buckets.iter().zip(&upper.buckets) {
                        assert!(b.value >= a.value, "{} at {gdp}/{unemp}", a.label);
                    }
                }
            }
        }
    }
}

#[test]
fn test_input_shocks_not_mutated() {
    let t = StressCurveTransformer::new(transformer_config()).unwrap();
    let s = shocks(dec!(-3), dec!(2));
    let before = s.clone();
    let _ = t.transform_all(&retail_pd_curve(), &s);
    let _ = t.transform_migrations(&agency_matrix(), &s).unwrap();
    assert_eq!(s, before);
}

// ===========================================================================
// Migration
// ===========================================================================

#[test]
fn test_stressed_migration_rows_valid() {
    let t = StressCurveTransformer::new(transformer_config()).unwrap();
    for gdp in [dec!(-6), dec!(-3), dec!(1)] {
        let by_severity = t
            .transform_migrations(&agency_matrix(), &shocks(gdp, dec!(3)))
            .unwrap();
        assert_eq!(by_severity.len(), 4);
        for (severity, m) in &by_severity {
            for (grade, row) in m.grades.iter().zip(&m.probabilities) {
                let sum: Decimal = row.iter().copied().sum();
                assert!(
                    (sum - Decimal::ONE).abs() <= ROW_SUM_TOLERANCE,
                    "{severity} {grade} sums to {sum}"
                );
                assert!(row.iter().all(|p| *p >= Decimal::ZERO));
            }
            m.validate().unwrap();
        }
    }
}

#[test]
fn test_harsher_severity_raises_default_column() {
    let t = StressCurveTransformer::new(transformer_config()).unwrap();
    let by_severity = t
        .transform_migrations(&agency_matrix(), &shocks(dec!(-4), dec!(3)))
        .unwrap();
    let defaults: Vec<Vec<(String, Decimal)>> = by_severity
        .values()
        .map(|m| m.default_probabilities())
        .collect();
    for pair in defaults.windows(2) {
        for (milder, harsher) in pair[0].iter().zip(&pair[1]) {
            assert!(harsher.1 >= milder.1, "grade {}", milder.0);
        }
    }
}

#[test]
fn test_unabsorbable_row_names_grade() {
    let t = StressCurveTransformer::new(transformer_config()).unwrap();
    let mut m = agency_matrix();
    m.probabilities[3] = vec![
        dec!(-0.9),
        dec!(0.1),
        dec!(0.1),
        dec!(0.1),
        dec!(0.1),
        dec!(0.1),
        dec!(0.1),
        dec!(0.1),
    ];
    match t
        .transform_migration(&m, &shocks(dec!(-3), dec!(2)), SeverityLevel::Severe)
        .unwrap_err()
    {
        StressEngineError::MigrationRenormalizationError { grade, .. } => assert_eq!(grade, "BBB"),
        other => panic!("unexpected error: {other}"),
    }
}

// ===========================================================================
// Recommender
// ===========================================================================

fn thresholds() -> RecommendationThresholds {
    RecommendationThresholds {
        single_name_weight: dec!(0.4),
        sector_weight: dec!(0.3),
        geographic_weight: dec!(0.2),
        exposure_weight: dec!(0.1),
        exposure_reference: dec!(1_000_000_000),
        severe_score: dec!(0.35),
        extreme_score: dec!(0.60),
        floor_rules: vec![FloorRule {
            metric: ConcentrationMetric::MaxSingleName,
            threshold: dec!(0.15),
            floor: SeverityLevel::Severe,
        }],
        share_tolerance: dec!(0.001),
    }
}

fn breakdown(n: usize) -> Vec<ConcentrationShare> {
    let share = Decimal::ONE / Decimal::from(n as u64);
    (0..n)
        .map(|i| ConcentrationShare {
            name: format!("n{i}"),
            share,
        })
        .collect()
}

#[test]
fn test_granular_book_gets_moderate() {
    let profile = PortfolioProfile {
        segment: Segment::Retail,
        total_exposure: dec!(100_000_000),
        single_name_shares: breakdown(100),
        sector_shares: breakdown(10),
        geographic_shares: breakdown(10),
    };
    let rec = recommend(&profile, &thresholds()).unwrap();
    // 0.4*0.01 + 0.3*0.1 + 0.2*0.1 + 0.1*0.1 = 0.064
    assert_eq!(rec.composite_score, dec!(0.064));
    assert_eq!(rec.recommended, SeverityLevel::Moderate);
    assert!(rec.triggered_rules.is_empty());
    assert!(reconcile(rec.recommended, Some(SeverityLevel::Moderate)).is_none());
}

#[test]
fn test_single_name_floor_forces_severe() {
    let mut names = breakdown(5);
    names[0].share = dec!(0.40);
    names[1].share = dec!(0.15);
    names[2].share = dec!(0.15);
    names[3].share = dec!(0.15);
    names[4].share = dec!(0.15);
    let profile = PortfolioProfile {
        segment: Segment::CommercialRealEstate,
        total_exposure: dec!(10_000_000),
        single_name_shares: names,
        sector_shares: breakdown(20),
        geographic_shares: breakdown(20),
    };
    let rec = recommend(&profile, &thresholds()).unwrap();
    // 0.16 + 0.015 + 0.01 + 0.001 = 0.186 -> moderate by score
    assert_eq!(rec.score_level, SeverityLevel::Moderate);
    assert_eq!(rec.recommended, SeverityLevel::Severe);
    assert_eq!(rec.triggered_rules.len(), 1);

    let mismatch = reconcile(rec.recommended, Some(SeverityLevel::Base)).unwrap();
    assert_eq!(mismatch.direction, MismatchDirection::ManualMilder);
    assert_eq!(
        mismatch.to_string(),
        "manual severity 'base' is milder than recommended 'severe'"
    );
}

#[test]
fn test_unbalanced_breakdown_named() {
    let mut sectors = breakdown(4);
    sectors[0].share = dec!(0.5);
    let profile = PortfolioProfile {
        segment: Segment::Business,
        total_exposure: dec!(1_000),
        single_name_shares: breakdown(10),
        sector_shares: sectors,
        geographic_shares: vec![],
    };
    match recommend(&profile, &thresholds()).unwrap_err() {
        StressEngineError::InvalidInput { field, .. } => assert!(field.contains("sector_shares")),
        other => panic!("unexpected error: {other}"),
    }
}

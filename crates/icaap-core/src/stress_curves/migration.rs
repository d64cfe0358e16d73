use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::StressEngineError;
use crate::StressResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Row-stochastic rating transition matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingMigrationMatrix {
    /// Grades ordered best to worst, e.g. ["AAA", ..., "CCC", "D"].
    /// The last grade is the absorbing default state.
    pub grades: Vec<String>,
    /// Row i = from grades[i], column j = to grades[j]
    pub probabilities: Vec<Vec<Decimal>>,
}

/// Largest tolerated |row sum - 1| for a valid matrix.
pub const ROW_SUM_TOLERANCE: Decimal = dec!(0.000000001);

impl RatingMigrationMatrix {
    pub fn default_index(&self) -> usize {
        self.grades.len().saturating_sub(1)
    }

    /// Probability of migrating into the default grade, per starting grade.
    pub fn default_probabilities(&self) -> Vec<(String, Decimal)> {
        let d = self.default_index();
        self.grades
            .iter()
            .zip(&self.probabilities)
            .map(|(g, row)| (g.clone(), row[d]))
            .collect()
    }

    /// Square shape with one row and column per grade.
    pub fn check_shape(&self) -> StressResult<()> {
        let n = self.grades.len();
        if n < 2 {
            return Err(StressEngineError::InvalidInput {
                field: "migration.grades".into(),
                reason: "at least one performing grade and a default grade are required".into(),
            });
        }
        if self.probabilities.len() != n {
            return Err(StressEngineError::InvalidInput {
                field: "migration.probabilities".into(),
                reason: format!(
                    "matrix has {} rows but {} grades",
                    self.probabilities.len(),
                    n
                ),
            });
        }
        for (grade, row) in self.grades.iter().zip(&self.probabilities) {
            if row.len() != n {
                return Err(StressEngineError::InvalidInput {
                    field: format!("migration.probabilities.{grade}"),
                    reason: format!("row has {} columns but {} grades", row.len(), n),
                });
            }
        }
        Ok(())
    }

    /// Validate shape, non-negativity and row sums. Returns the maximum
    /// row deviation from 1.
    pub fn validate(&self) -> StressResult<Decimal> {
        self.check_shape()?;
        let mut max_dev = Decimal::ZERO;
        for (grade, row) in self.grades.iter().zip(&self.probabilities) {
            if let Some(p) = row.iter().find(|p| **p < Decimal::ZERO) {
                return Err(StressEngineError::InvalidInput {
                    field: format!("migration.probabilities.{grade}"),
                    reason: format!("negative probability {p}"),
                });
            }
            let dev = (row.iter().copied().sum::<Decimal>() - Decimal::ONE).abs();
            if dev > ROW_SUM_TOLERANCE {
                return Err(StressEngineError::InvalidInput {
                    field: format!("migration.probabilities.{grade}"),
                    reason: format!("row deviates from 1 by {dev}"),
                });
            }
            max_dev = max_dev.max(dev);
        }
        Ok(max_dev)
    }
}

// ---------------------------------------------------------------------------
// Stressing
// ---------------------------------------------------------------------------

/// Move a fraction `shift` of each performing row's upgrade-or-stay mass to
/// worse grades, then renormalize every row to 1.
///
/// Negative entries in `baseline` are absorbed first: they are zeroed and the
/// same mass is taken proportionally from the row's positive entries. A row
/// that cannot absorb its negative mass, or has no positive mass at all,
/// fails with `MigrationRenormalizationError`.
pub fn stress_matrix(
    baseline: &RatingMigrationMatrix,
    shift: Decimal,
) -> StressResult<RatingMigrationMatrix> {
    baseline.check_shape()?;
    let shift = shift.max(Decimal::ZERO).min(Decimal::ONE);
    let n = baseline.grades.len();
    let default_idx = n - 1;

    let mut probabilities = Vec::with_capacity(n);
    for (i, (grade, row)) in baseline
        .grades
        .iter()
        .zip(&baseline.probabilities)
        .enumerate()
    {
        let mut row = absorb_negative_mass(grade, row)?;

        if i != default_idx && shift > Decimal::ZERO {
            let better: Decimal = row[..=i].iter().copied().sum();
            let moved = better * shift;
            for p in &mut row[..=i] {
                *p *= Decimal::ONE - shift;
            }
            let worse: Decimal = row[i + 1..].iter().copied().sum();
            if worse > Decimal::ZERO {
                for p in &mut row[i + 1..] {
                    *p += moved * *p / worse;
                }
            } else {
                row[i + 1] += moved;
            }
        }

        let total: Decimal = row.iter().copied().sum();
        if total <= Decimal::ZERO {
            return Err(StressEngineError::MigrationRenormalizationError {
                grade: grade.clone(),
                reason: "row has no probability mass to renormalize".into(),
            });
        }
        for p in &mut row {
            *p /= total;
        }
        probabilities.push(row);
    }

    Ok(RatingMigrationMatrix {
        grades: baseline.grades.clone(),
        probabilities,
    })
}

fn absorb_negative_mass(grade: &str, row: &[Decimal]) -> StressResult<Vec<Decimal>> {
    let negative: Decimal = row.iter().filter(|p| **p < Decimal::ZERO).map(|p| -*p).sum();
    if negative.is_zero() {
        return Ok(row.to_vec());
    }
    let positive: Decimal = row.iter().filter(|p| **p > Decimal::ZERO).copied().sum();
    if positive < negative || positive.is_zero() {
        return Err(StressEngineError::MigrationRenormalizationError {
            grade: grade.to_string(),
            reason: format!(
                "negative mass {negative} cannot be absorbed by positive mass {positive}"
            ),
        });
    }
    let keep = Decimal::ONE - negative / positive;
    Ok(row
        .iter()
        .map(|p| {
            if *p > Decimal::ZERO {
                *p * keep
            } else {
                Decimal::ZERO
            }
        })
        .collect())
}

/// Expected grade-index change per starting grade (positive = downgrade).
pub fn rating_drift(matrix: &RatingMigrationMatrix) -> Vec<(String, Decimal)> {
    matrix
        .grades
        .iter()
        .zip(&matrix.probabilities)
        .enumerate()
        .map(|(i, (grade, row))| {
            let drift: Decimal = row
                .iter()
                .enumerate()
                .map(|(j, p)| *p * Decimal::from(j as i64 - i as i64))
                .sum();
            (grade.clone(), drift)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Four-grade matrix: A, BBB, BB, D.
    fn small_matrix() -> RatingMigrationMatrix {
        RatingMigrationMatrix {
            grades: vec!["A".into(), "BBB".into(), "BB".into(), "D".into()],
            probabilities: vec![
                vec![dec!(0.90), dec!(0.08), dec!(0.015), dec!(0.005)],
                vec![dec!(0.05), dec!(0.85), dec!(0.08), dec!(0.02)],
                vec![dec!(0.01), dec!(0.09), dec!(0.80), dec!(0.10)],
                vec![dec!(0), dec!(0), dec!(0), dec!(1)],
            ],
        }
    }

    fn assert_stochastic(m: &RatingMigrationMatrix) {
        for (g, row) in m.grades.iter().zip(&m.probabilities) {
            let sum: Decimal = row.iter().copied().sum();
            assert!(
                (sum - Decimal::ONE).abs() <= ROW_SUM_TOLERANCE,
                "row {g} sums to {sum}"
            );
            assert!(row.iter().all(|p| *p >= Decimal::ZERO), "row {g} negative");
        }
    }

    #[test]
    fn test_zero_shift_is_identity() {
        let m = small_matrix();
        let stressed = stress_matrix(&m, Decimal::ZERO).unwrap();
        assert_eq!(stressed, m);
    }

    #[test]
    fn test_shift_moves_mass_to_worse_grades() {
        let m = small_matrix();
        let stressed = stress_matrix(&m, dec!(0.2)).unwrap();
        assert_stochastic(&stressed);
        // BBB: better mass 0.90 -> 0.72, moved 0.18 across BB and D (0.08:0.02)
        assert_eq!(stressed.probabilities[1][0], dec!(0.04));
        assert_eq!(stressed.probabilities[1][1], dec!(0.68));
        assert_eq!(stressed.probabilities[1][2], dec!(0.224));
        assert_eq!(stressed.probabilities[1][3], dec!(0.056));
        // Default row untouched
        assert_eq!(stressed.probabilities[3], m.probabilities[3]);
    }

    #[test]
    fn test_larger_shift_raises_default_column() {
        let m = small_matrix();
        let mild = stress_matrix(&m, dec!(0.05)).unwrap();
        let harsh = stress_matrix(&m, dec!(0.30)).unwrap();
        for i in 0..3 {
            assert!(harsh.probabilities[i][3] >= mild.probabilities[i][3]);
        }
    }

    #[test]
    fn test_all_worse_mass_zero_goes_to_next_grade() {
        let mut m = small_matrix();
        m.probabilities[0] = vec![dec!(1), dec!(0), dec!(0), dec!(0)];
        let stressed = stress_matrix(&m, dec!(0.1)).unwrap();
        assert_eq!(stressed.probabilities[0][0], dec!(0.9));
        assert_eq!(stressed.probabilities[0][1], dec!(0.1));
    }

    #[test]
    fn test_unnormalized_row_is_renormalized() {
        let mut m = small_matrix();
        m.probabilities[2] = vec![dec!(0.01), dec!(0.09), dec!(0.70), dec!(0.10)];
        let stressed = stress_matrix(&m, dec!(0.1)).unwrap();
        assert_stochastic(&stressed);
    }

    #[test]
    fn test_small_negative_mass_absorbed() {
        let mut m = small_matrix();
        m.probabilities[1] = vec![dec!(-0.01), dec!(0.86), dec!(0.13), dec!(0.02)];
        let stressed = stress_matrix(&m, dec!(0.1)).unwrap();
        assert_stochastic(&stressed);
        assert_eq!(stressed.probabilities[1][0], Decimal::ZERO);
    }

    #[test]
    fn test_unabsorbable_negative_mass_fails() {
        let mut m = small_matrix();
        m.probabilities[2] = vec![dec!(-0.8), dec!(0.1), dec!(0.1), dec!(0.1)];
        match stress_matrix(&m, dec!(0.1)).unwrap_err() {
            StressEngineError::MigrationRenormalizationError { grade, .. } => {
                assert_eq!(grade, "BB")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_row_fails() {
        let mut m = small_matrix();
        m.probabilities[0] = vec![Decimal::ZERO; 4];
        assert!(matches!(
            stress_matrix(&m, dec!(0.1)),
            Err(StressEngineError::MigrationRenormalizationError { .. })
        ));
    }

    #[test]
    fn test_non_square_rejected() {
        let mut m = small_matrix();
        m.probabilities[1].pop();
        assert!(matches!(
            stress_matrix(&m, dec!(0.1)),
            Err(StressEngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_validate_reports_deviation() {
        assert_eq!(small_matrix().validate().unwrap(), Decimal::ZERO);
        let mut bad = small_matrix();
        bad.probabilities[0][0] = dec!(0.5);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_rating_drift_signs() {
        let drift = rating_drift(&small_matrix());
        // A can only go down
        assert!(drift[0].1 > Decimal::ZERO);
        // Default row stays put
        assert_eq!(drift[3].1, Decimal::ZERO);
        // BBB: -0.05 + 0.08 + 2*0.02 = 0.07
        assert_eq!(drift[1].1, dec!(0.07));
    }

    #[test]
    fn test_default_probabilities_column() {
        let pd = small_matrix().default_probabilities();
        assert_eq!(pd[1], ("BBB".to_string(), dec!(0.02)));
    }
}

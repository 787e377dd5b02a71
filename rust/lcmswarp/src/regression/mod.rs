//! Mass error regressions used for calibration.
//!
//! All regressions map an x coordinate (m/z or NET) onto a ppm mass error.

pub mod central;
pub mod combined;
pub mod lsq_spline;
pub mod natural_cubic;

pub use central::CentralRegression;
pub use combined::CombinedRegression;
pub use lsq_spline::LsqSplineRegression;
pub use natural_cubic::NaturalCubicSplineRegression;

use crate::errors::RegressionError;
use crate::finite_range;
use crate::EPSILON;
use nalgebra::{
    DMatrix,
    DVector,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Diagonal pivots smaller than this fraction of the largest one mean the
/// system is numerically singular.
const MIN_PIVOT_RATIO: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionPoint {
    pub x: f64,
    /// ppm
    pub mass_error: f64,
}

impl RegressionPoint {
    pub fn new(x: f64, mass_error: f64) -> Self {
        Self { x, mass_error }
    }
}

pub trait CalibrationFunction {
    /// Predicted ppm error at `x`.
    fn predict(&self, x: f64) -> f64;

    fn residuals(&self, points: &[RegressionPoint]) -> Vec<f64> {
        points.iter().map(|p| p.mass_error - self.predict(p.x)).collect()
    }
}

/// Linear map of the point range onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct UnitScale {
    pub(crate) min: f64,
    pub(crate) span: f64,
}

impl UnitScale {
    pub(crate) fn from_points(points: &[RegressionPoint]) -> Result<Self, RegressionError> {
        let (min, max) =
            finite_range(points.iter().map(|p| p.x)).ok_or(RegressionError::NoPoints)?;
        Ok(Self {
            min,
            span: max - min,
        })
    }

    pub(crate) fn apply(&self, x: f64) -> f64 {
        if self.span <= EPSILON {
            0.0
        } else {
            (x - self.min) / self.span
        }
    }
}

/// Least squares fit of `y ≈ basis(x) · c` through the normal equations.
///
/// `basis` fills one design row. The system counts as singular when its
/// determinant is zero or not finite, or when the LU pivots span more than
/// twelve orders of magnitude.
pub(crate) fn solve_normal_equations(
    points: &[RegressionPoint],
    num_coefficients: usize,
    basis: impl Fn(f64, &mut [f64]),
) -> Result<Vec<f64>, RegressionError> {
    let points: Vec<&RegressionPoint> = points
        .iter()
        .filter(|p| p.x.is_finite() && p.mass_error.is_finite())
        .collect();
    if points.is_empty() {
        return Err(RegressionError::NoPoints);
    }

    let mut design = DMatrix::<f64>::zeros(points.len(), num_coefficients);
    let mut row = vec![0.0; num_coefficients];
    for (i, point) in points.iter().enumerate() {
        basis(point.x, &mut row);
        for (j, value) in row.iter().enumerate() {
            design[(i, j)] = *value;
        }
    }
    let targets = DVector::from_iterator(points.len(), points.iter().map(|p| p.mass_error));

    let normal = design.transpose() * &design;
    let rhs = design.transpose() * targets;
    let lu = normal.lu();
    let determinant = lu.determinant();
    if !determinant.is_finite() || determinant == 0.0 {
        return Err(RegressionError::SingularMatrix { determinant });
    }
    let pivots = lu.u().diagonal().map(f64::abs);
    if pivots.min() < MIN_PIVOT_RATIO * pivots.max() {
        return Err(RegressionError::SingularMatrix { determinant });
    }
    let solution = lu
        .solve(&rhs)
        .ok_or(RegressionError::SingularMatrix { determinant })?;
    Ok(solution.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_equations_fit_a_line() {
        let points: Vec<RegressionPoint> = (0..10)
            .map(|i| RegressionPoint::new(i as f64, 2.0 + 0.5 * i as f64))
            .collect();
        let coefficients = solve_normal_equations(&points, 2, |x, row| {
            row[0] = 1.0;
            row[1] = x;
        })
        .unwrap();
        assert!((coefficients[0] - 2.0).abs() < 1e-9);
        assert!((coefficients[1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_columns_are_singular() {
        let points: Vec<RegressionPoint> = (0..10)
            .map(|i| RegressionPoint::new(i as f64, i as f64))
            .collect();
        let res = solve_normal_equations(&points, 2, |x, row| {
            row[0] = x;
            row[1] = 2.0 * x;
        });
        assert!(matches!(res, Err(RegressionError::SingularMatrix { .. })));
    }

    #[test]
    fn test_no_points() {
        let res = solve_normal_equations(&[], 1, |_, row| row[0] = 1.0);
        assert_eq!(res, Err(RegressionError::NoPoints));
    }
}

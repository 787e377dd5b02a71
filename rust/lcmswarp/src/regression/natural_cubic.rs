use super::{
    solve_normal_equations,
    CalibrationFunction,
    RegressionPoint,
    UnitScale,
};
use crate::errors::RegressionError;
use serde::{
    Deserialize,
    Serialize,
};

const MIN_KNOTS: usize = 2;

/// Natural cubic regression spline.
///
/// Uses the basis `1, t, d_k(t) - d_{K-1}(t)` with
/// `d_k(t) = ((t - ξ_k)₊³ - (t - ξ_K)₊³) / (ξ_K - ξ_k)` and `K` knots
/// spread evenly over `[0, 1]`. The fit is linear beyond the boundary knots,
/// so predictions outside the fitted range extrapolate along a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaturalCubicSplineRegression {
    scale: UnitScale,
    knots: Vec<f64>,
    coefficients: Vec<f64>,
}

fn cube_plus(v: f64) -> f64 {
    if v <= 0.0 {
        0.0
    } else {
        v * v * v
    }
}

fn fill_basis(t: f64, knots: &[f64], row: &mut [f64]) {
    let k = knots.len();
    let last = knots[k - 1];
    let d = |i: usize| (cube_plus(t - knots[i]) - cube_plus(t - last)) / (last - knots[i]);
    row[0] = 1.0;
    row[1] = t;
    let d_penultimate = d(k - 2);
    for (i, slot) in row[2..].iter_mut().enumerate() {
        *slot = d(i) - d_penultimate;
    }
}

impl NaturalCubicSplineRegression {
    pub fn fit(points: &[RegressionPoint], num_knots: usize) -> Result<Self, RegressionError> {
        if num_knots < MIN_KNOTS {
            return Err(RegressionError::TooFewKnots {
                knots: num_knots,
                required: MIN_KNOTS,
            });
        }
        let scale = UnitScale::from_points(points)?;
        let knots: Vec<f64> = (0..num_knots)
            .map(|i| i as f64 / (num_knots - 1) as f64)
            .collect();
        let coefficients = solve_normal_equations(points, num_knots, |x, row| {
            fill_basis(scale.apply(x), &knots, row)
        })?;
        Ok(Self {
            scale,
            knots,
            coefficients,
        })
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

impl CalibrationFunction for NaturalCubicSplineRegression {
    fn predict(&self, x: f64) -> f64 {
        let mut row = vec![0.0; self.coefficients.len()];
        fill_basis(self.scale.apply(x), &self.knots, &mut row);
        row.iter().zip(&self.coefficients).map(|(b, c)| b * c).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_line_and_extrapolates() {
        let points: Vec<RegressionPoint> = (0..40)
            .map(|i| RegressionPoint::new(0.2 + 0.01 * i as f64, 1.0 + 20.0 * (0.01 * i as f64)))
            .collect();
        let fit = NaturalCubicSplineRegression::fit(&points, 5).unwrap();
        for p in points.iter() {
            assert!((fit.predict(p.x) - p.mass_error).abs() < 1e-6);
        }
        // Linear beyond the last knot at x = 0.59.
        assert!((fit.predict(0.79) - 12.8).abs() < 1e-6, "{}", fit.predict(0.79));
        assert!((fit.predict(0.0) - (-3.0)).abs() < 1e-6, "{}", fit.predict(0.0));
    }

    #[test]
    fn test_smooths_curved_error() {
        let points: Vec<RegressionPoint> = (0..100)
            .map(|i| {
                let x = i as f64;
                RegressionPoint::new(x, 3.0 * (x / 30.0).sin())
            })
            .collect();
        let fit = NaturalCubicSplineRegression::fit(&points, 8).unwrap();
        let worst = points
            .iter()
            .map(|p| (fit.predict(p.x) - p.mass_error).abs())
            .fold(0.0, f64::max);
        assert!(worst < 0.2, "{worst}");
    }

    #[test]
    fn test_knot_and_point_requirements() {
        let points = vec![RegressionPoint::new(0.0, 0.0), RegressionPoint::new(1.0, 1.0)];
        assert_eq!(
            NaturalCubicSplineRegression::fit(&points, 1),
            Err(RegressionError::TooFewKnots {
                knots: 1,
                required: 2
            })
        );
        assert_eq!(
            NaturalCubicSplineRegression::fit(&[], 4),
            Err(RegressionError::NoPoints)
        );
    }
}

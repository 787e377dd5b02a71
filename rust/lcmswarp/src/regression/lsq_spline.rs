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

/// Highest polynomial order accepted by [`LsqSplineRegression::fit`].
pub const MAX_ORDER: usize = 16;

/// Least squares regression spline in the truncated power basis.
///
/// The basis is `1, t, .., t^order` followed by `(t - k)₊^order` for each
/// interior knot `k`, with `t` the x coordinate scaled onto `[0, 1]` and
/// knots spaced evenly inside it. Predictions clamp `t` to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsqSplineRegression {
    scale: UnitScale,
    order: usize,
    knots: Vec<f64>,
    coefficients: Vec<f64>,
}

fn truncated_power(t: f64, knot: f64, order: usize) -> f64 {
    let d = t - knot;
    if d <= 0.0 {
        0.0
    } else {
        d.powi(order as i32)
    }
}

fn fill_basis(t: f64, order: usize, knots: &[f64], row: &mut [f64]) {
    let mut power = 1.0;
    for slot in row.iter_mut().take(order + 1) {
        *slot = power;
        power *= t;
    }
    for (slot, knot) in row[order + 1..].iter_mut().zip(knots) {
        *slot = truncated_power(t, *knot, order);
    }
}

impl LsqSplineRegression {
    pub fn fit(
        points: &[RegressionPoint],
        num_knots: usize,
        order: usize,
    ) -> Result<Self, RegressionError> {
        if order > MAX_ORDER {
            return Err(RegressionError::OrderTooHigh {
                order,
                max: MAX_ORDER,
            });
        }
        let scale = UnitScale::from_points(points)?;
        let knots: Vec<f64> = (1..=num_knots)
            .map(|j| j as f64 / (num_knots + 1) as f64)
            .collect();
        let coefficients = solve_normal_equations(points, order + 1 + num_knots, |x, row| {
            fill_basis(scale.apply(x), order, &knots, row)
        })?;
        Ok(Self {
            scale,
            order,
            knots,
            coefficients,
        })
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

impl CalibrationFunction for LsqSplineRegression {
    fn predict(&self, x: f64) -> f64 {
        let t = self.scale.apply(x).clamp(0.0, 1.0);
        let mut row = vec![0.0; self.coefficients.len()];
        fill_basis(t, self.order, &self.knots, &mut row);
        row.iter().zip(&self.coefficients).map(|(b, c)| b * c).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_quadratic() {
        let points: Vec<RegressionPoint> = (0..50)
            .map(|i| {
                let x = 300.0 + 10.0 * i as f64;
                let t = (x - 300.0) / 490.0;
                RegressionPoint::new(x, 2.0 - 3.0 * t + 4.0 * t * t)
            })
            .collect();
        let fit = LsqSplineRegression::fit(&points, 3, 2).unwrap();
        for p in points.iter() {
            assert!((fit.predict(p.x) - p.mass_error).abs() < 1e-6, "{:?}", p);
        }
        // Clamped beyond the fitted range.
        assert!((fit.predict(10_000.0) - fit.predict(790.0)).abs() < 1e-12);
    }

    #[test]
    fn test_order_limit() {
        let points = vec![RegressionPoint::new(0.0, 0.0), RegressionPoint::new(1.0, 1.0)];
        assert_eq!(
            LsqSplineRegression::fit(&points, 1, 17),
            Err(RegressionError::OrderTooHigh { order: 17, max: 16 })
        );
    }

    #[test]
    fn test_too_few_distinct_points_are_singular() {
        // Two distinct x values cannot pin down four coefficients.
        let points: Vec<RegressionPoint> = (0..10)
            .map(|i| RegressionPoint::new((i % 2) as f64, i as f64))
            .collect();
        let res = LsqSplineRegression::fit(&points, 1, 2);
        assert!(matches!(res, Err(RegressionError::SingularMatrix { .. })), "{res:?}");
    }
}

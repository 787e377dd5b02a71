use super::{
    CalibrationFunction,
    CentralRegression,
    LsqSplineRegression,
    NaturalCubicSplineRegression,
    RegressionPoint,
};
use crate::errors::RegressionError;
use crate::options::{
    RegressionKind,
    RegressionOptions,
    SplineKind,
};
use crate::EPSILON;
use serde::Serialize;
use tracing::{
    debug,
    warn,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SplineRegression {
    Lsq(LsqSplineRegression),
    NaturalCubic(NaturalCubicSplineRegression),
}

impl CalibrationFunction for SplineRegression {
    fn predict(&self, x: f64) -> f64 {
        match self {
            Self::Lsq(spline) => spline.predict(x),
            Self::NaturalCubic(spline) => spline.predict(x),
        }
    }
}

/// Central regression, optionally refined by a spline.
///
/// In hybrid mode the central fit is used to throw out outliers and a spline
/// is fit to what remains. When the spline cannot be fit the central curve
/// is used instead, so a fitted `CombinedRegression` always predicts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedRegression {
    kind: RegressionKind,
    central: CentralRegression,
    spline: Option<SplineRegression>,
    num_outliers: usize,
    #[serde(skip)]
    spline_failure: Option<RegressionError>,
}

impl CombinedRegression {
    /// Only fails when there is nothing to fit at all.
    pub fn fit(
        points: &[RegressionPoint],
        options: &RegressionOptions,
        tolerance: f64,
    ) -> Result<Self, RegressionError> {
        let central = CentralRegression::fit(points, &options.central, tolerance)?;
        let mut regression = Self {
            kind: options.kind,
            central,
            spline: None,
            num_outliers: 0,
            spline_failure: None,
        };
        let RegressionKind::Hybrid(spline_kind) = options.kind else {
            return Ok(regression);
        };

        let residuals = regression.central.residuals(points);
        let cutoff = options.lsq_outlier_z * residual_std(&residuals);
        let inliers: Vec<RegressionPoint> = if cutoff > EPSILON {
            points
                .iter()
                .zip(&residuals)
                .filter(|(_, r)| r.abs() <= cutoff)
                .map(|(p, _)| *p)
                .collect()
        } else {
            points.to_vec()
        };
        regression.num_outliers = points.len() - inliers.len();
        debug!(
            "Removed {} of {} points beyond {:.3} ppm of the central fit",
            regression.num_outliers,
            points.len(),
            cutoff
        );

        let spline = match spline_kind {
            SplineKind::LsqSpline => {
                LsqSplineRegression::fit(&inliers, options.lsq_num_knots, options.lsq_order)
                    .map(SplineRegression::Lsq)
            }
            SplineKind::NaturalCubic => {
                NaturalCubicSplineRegression::fit(&inliers, options.lsq_num_knots)
                    .map(SplineRegression::NaturalCubic)
            }
        };
        match spline {
            Ok(spline) => regression.spline = Some(spline),
            Err(e) => {
                warn!("Spline regression failed, using the central fit: {}", e);
                regression.spline_failure = Some(e);
            }
        }
        Ok(regression)
    }

    pub fn kind(&self) -> RegressionKind {
        self.kind
    }

    pub fn central(&self) -> &CentralRegression {
        &self.central
    }

    pub fn spline(&self) -> Option<&SplineRegression> {
        self.spline.as_ref()
    }

    pub fn num_outliers(&self) -> usize {
        self.num_outliers
    }

    /// Why the spline stage fell back to the central fit, if it did.
    pub fn spline_failure(&self) -> Option<&RegressionError> {
        self.spline_failure.as_ref()
    }
}

impl CalibrationFunction for CombinedRegression {
    fn predict(&self, x: f64) -> f64 {
        match &self.spline {
            Some(spline) => spline.predict(x),
            None => self.central.predict(x),
        }
    }
}

fn residual_std(residuals: &[f64]) -> f64 {
    let finite: Vec<f64> = residuals.iter().copied().filter(|r| r.is_finite()).collect();
    if finite.len() < 2 {
        return 0.0;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    (finite.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

//! ppm mass correction fit on confirmed matches.

use crate::errors::RegressionError;
use crate::features::FeatureRecord;
use crate::matching::CandidateMatch;
use crate::options::{
    CalibrationType,
    RegressionOptions,
};
use crate::regression::{
    CalibrationFunction,
    CombinedRegression,
    RegressionPoint,
};
use serde::Serialize;
use tracing::{
    debug,
    warn,
};

/// Fitted mass correction. The predicted ppm error is the sum of the m/z
/// and NET parts that were fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MassCalibration {
    pub calibration_type: CalibrationType,
    pub mz: Option<CombinedRegression>,
    pub net: Option<CombinedRegression>,
}

impl MassCalibration {
    /// Fits the correction from matched pairs.
    ///
    /// The m/z part uses the alignee m/z, the NET part the aligned alignee
    /// NET. In hybrid mode the NET part is fit on what the m/z part leaves
    /// over; if that second fit fails the m/z part is kept alone.
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "trace")
    )]
    pub fn fit(
        matches: &[CandidateMatch],
        alignee: &[FeatureRecord],
        calibration_type: CalibrationType,
        options: &RegressionOptions,
        tolerance_ppm: f64,
    ) -> Result<Self, RegressionError> {
        let mz_points: Vec<RegressionPoint> = matches
            .iter()
            .map(|m| RegressionPoint::new(alignee[m.alignee_index].mz, m.ppm_mass_error))
            .collect();
        let net_points = |ppm: &dyn Fn(usize) -> f64| -> Vec<RegressionPoint> {
            matches
                .iter()
                .enumerate()
                .map(|(i, m)| RegressionPoint::new(alignee[m.alignee_index].net_aligned, ppm(i)))
                .collect()
        };

        let calibration = match calibration_type {
            CalibrationType::MzRegression => Self {
                calibration_type,
                mz: Some(CombinedRegression::fit(&mz_points, options, tolerance_ppm)?),
                net: None,
            },
            CalibrationType::NetRegression => {
                let points = net_points(&|i| matches[i].ppm_mass_error);
                Self {
                    calibration_type,
                    mz: None,
                    net: Some(CombinedRegression::fit(&points, options, tolerance_ppm)?),
                }
            }
            CalibrationType::Hybrid => {
                let mz = CombinedRegression::fit(&mz_points, options, tolerance_ppm)?;
                let residuals = mz.residuals(&mz_points);
                let points = net_points(&|i| residuals[i]);
                let net = match CombinedRegression::fit(&points, options, tolerance_ppm) {
                    Ok(net) => Some(net),
                    Err(e) => {
                        warn!("NET mass regression failed, keeping the m/z part only: {}", e);
                        None
                    }
                };
                Self {
                    calibration_type,
                    mz: Some(mz),
                    net,
                }
            }
        };
        debug!(
            "Fitted {:?} mass calibration on {} matches",
            calibration_type,
            matches.len()
        );
        Ok(calibration)
    }

    /// Predicted ppm error of a feature at the given m/z and aligned NET.
    pub fn ppm_shift(&self, mz: f64, net: f64) -> f64 {
        let mz_part = self.mz.as_ref().map_or(0.0, |r| r.predict(mz));
        let net_part = self.net.as_ref().map_or(0.0, |r| r.predict(net));
        mz_part + net_part
    }

    /// Sets `mass_calibrated` from `mass`, removing the predicted error.
    pub fn apply(&self, features: &mut [FeatureRecord]) {
        for feature in features.iter_mut() {
            let shift = self.ppm_shift(feature.mz, feature.net_aligned);
            feature.mass_calibrated = feature.mass - feature.mass * shift / 1e6;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn biased_pairs(ppm: f64) -> (Vec<FeatureRecord>, Vec<CandidateMatch>) {
        let baseline: Vec<FeatureRecord> = (0..60)
            .map(|i| {
                let mass = 800.0 + 25.0 * i as f64;
                FeatureRecord::new(i, mass, mass / 2.0 + 1.007, i as f64 / 59.0)
            })
            .collect();
        let alignee: Vec<FeatureRecord> = baseline
            .iter()
            .map(|f| {
                let mass = f.mass / (1.0 - ppm / 1e6);
                FeatureRecord::new(f.id, mass, mass / 2.0 + 1.007, f.net)
            })
            .collect();
        let matches = alignee
            .iter()
            .zip(&baseline)
            .enumerate()
            .map(|(i, (a, b))| CandidateMatch::new(i, a, i, b))
            .collect();
        (alignee, matches)
    }

    #[test]
    fn test_constant_bias_is_removed() {
        let (mut alignee, matches) = biased_pairs(5.0);
        assert!((matches[0].ppm_mass_error - 5.0).abs() < 1e-6);

        for calibration_type in [
            CalibrationType::MzRegression,
            CalibrationType::NetRegression,
            CalibrationType::Hybrid,
        ] {
            let calibration = MassCalibration::fit(
                &matches,
                &alignee,
                calibration_type,
                &RegressionOptions::default(),
                20.0,
            )
            .unwrap();
            assert!(
                (calibration.ppm_shift(1000.0, 0.5) - 5.0).abs() < 1e-3,
                "{calibration_type:?}"
            );
            calibration.apply(&mut alignee);
            let expected = 800.0;
            assert!((alignee[0].mass_calibrated - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_hybrid_has_both_parts() {
        let (alignee, matches) = biased_pairs(-3.0);
        let calibration = MassCalibration::fit(
            &matches,
            &alignee,
            CalibrationType::Hybrid,
            &RegressionOptions::default(),
            20.0,
        )
        .unwrap();
        assert!(calibration.mz.is_some());
        let net = calibration.net.as_ref().unwrap();
        assert!(net.predict(0.5).abs() < 1e-3);
    }

    #[test]
    fn test_no_matches() {
        let res = MassCalibration::fit(
            &[],
            &[],
            CalibrationType::Hybrid,
            &RegressionOptions::default(),
            20.0,
        );
        assert_eq!(res, Err(RegressionError::NoPoints));
    }
}

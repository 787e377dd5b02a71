use crate::errors::{
    AlignmentError,
    Result,
};
use crate::features::BaselineSource;
use crate::regression::lsq_spline::MAX_ORDER;
use serde::{
    Deserialize,
    Serialize,
};

/// Whether the second, mass-aware pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignmentType {
    /// NET warp only, masses are left untouched.
    #[serde(rename = "net_warp")]
    NetWarp,
    /// NET warp, mass calibration, then a second mass-aware NET warp.
    #[default]
    #[serde(rename = "net_mass_warp")]
    NetMassWarp,
}

/// Which coordinate the ppm correction is a function of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CalibrationType {
    #[serde(rename = "mz")]
    MzRegression,
    #[serde(rename = "net")]
    NetRegression,
    /// m/z first, then NET on what the m/z correction left over.
    #[default]
    #[serde(rename = "hybrid")]
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplineKind {
    #[serde(rename = "lsq")]
    LsqSpline,
    #[default]
    #[serde(rename = "natural_cubic")]
    NaturalCubic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegressionKind {
    #[serde(rename = "central")]
    Central,
    /// Central regression, outlier removal, then a spline on the survivors.
    #[serde(rename = "hybrid")]
    Hybrid(SplineKind),
}

impl Default for RegressionKind {
    fn default() -> Self {
        RegressionKind::Hybrid(SplineKind::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CentralRegressionOptions {
    pub num_x_bins: usize,
    pub num_y_bins: usize,
    /// Largest change in y-bin allowed between neighbouring x-bins.
    pub num_jumps: usize,
    /// Bins with fewer points use a nominal deviation and are not scored.
    pub min_points_per_bin: usize,
    pub outlier_z: f64,
}

impl Default for CentralRegressionOptions {
    fn default() -> Self {
        Self {
            num_x_bins: 12,
            num_y_bins: 100,
            num_jumps: 20,
            min_points_per_bin: 3,
            outlier_z: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegressionOptions {
    pub kind: RegressionKind,
    pub central: CentralRegressionOptions,
    pub lsq_num_knots: usize,
    pub lsq_order: usize,
    /// Residual z-score beyond which points are dropped before the spline fit.
    pub lsq_outlier_z: f64,
}

impl Default for RegressionOptions {
    fn default() -> Self {
        Self {
            kind: RegressionKind::default(),
            central: CentralRegressionOptions::default(),
            lsq_num_knots: 12,
            lsq_order: 2,
            lsq_outlier_z: 2.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistogramOptions {
    pub mass_bin_size: f64,
    pub net_bin_size: f64,
    pub drift_bin_size: f64,
}

impl Default for HistogramOptions {
    fn default() -> Self {
        Self {
            mass_bin_size: 0.2,
            net_bin_size: 0.001,
            drift_bin_size: 0.03,
        }
    }
}

/// Every knob of an alignment.
///
/// Example:
/// ```
/// use lcmswarp::AlignmentOptions;
///
/// let options: AlignmentOptions =
///     serde_json::from_str(r#"{"num_sections": 50, "mass_tolerance_ppm": 15.0}"#).unwrap();
/// assert_eq!(options.num_sections, 50);
/// assert_eq!(options.contraction_factor, 3);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlignmentOptions {
    /// Candidate window of the mass-aware (second) pass.
    pub mass_tolerance_ppm: f64,
    /// Candidate window of the first pass, also the y-range of the central
    /// mass regression.
    pub mass_calibration_window_ppm: f64,
    pub net_tolerance: f64,
    pub num_sections: usize,
    /// Baseline sections per alignee section. Widths up to the square of
    /// this are considered for each section.
    pub contraction_factor: usize,
    /// Largest gap, in baseline sections, between consecutive sections.
    pub max_jump: usize,
    pub max_promiscuous_matches: usize,
    pub keep_promiscuous_matches: bool,
    /// The warp ends in the last section with at least this many features.
    pub min_section_features: usize,
    pub alignment_type: AlignmentType,
    pub calibration_type: CalibrationType,
    pub regression: RegressionOptions,
    /// Only the most abundant alignee features, by percent, fit the warp.
    pub abundance_percentile: f64,
    pub baseline_source: BaselineSource,
    pub histograms: HistogramOptions,
}

impl Default for AlignmentOptions {
    fn default() -> Self {
        Self {
            mass_tolerance_ppm: 10.0,
            mass_calibration_window_ppm: 20.0,
            net_tolerance: 0.02,
            num_sections: 100,
            contraction_factor: 3,
            max_jump: 10,
            max_promiscuous_matches: 3,
            keep_promiscuous_matches: false,
            min_section_features: 1,
            alignment_type: AlignmentType::default(),
            calibration_type: CalibrationType::default(),
            regression: RegressionOptions::default(),
            abundance_percentile: 100.0,
            baseline_source: BaselineSource::default(),
            histograms: HistogramOptions::default(),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> AlignmentError {
    AlignmentError::InvalidOptions {
        field,
        reason: reason.into(),
    }
}

impl AlignmentOptions {
    pub fn num_baseline_sections(&self) -> usize {
        self.num_sections * self.contraction_factor
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_sections == 0 {
            return Err(invalid("num_sections", "must be at least 1"));
        }
        if self.contraction_factor == 0 {
            return Err(invalid("contraction_factor", "must be at least 1"));
        }
        if !(self.mass_tolerance_ppm > 0.0) {
            return Err(invalid("mass_tolerance_ppm", "must be positive"));
        }
        if !(self.mass_calibration_window_ppm > 0.0) {
            return Err(invalid("mass_calibration_window_ppm", "must be positive"));
        }
        if !(self.net_tolerance > 0.0) {
            return Err(invalid("net_tolerance", "must be positive"));
        }
        if self.max_promiscuous_matches == 0 {
            return Err(invalid("max_promiscuous_matches", "must be at least 1"));
        }
        if !(self.abundance_percentile > 0.0) {
            return Err(invalid("abundance_percentile", "must be positive"));
        }
        if self.regression.lsq_order > MAX_ORDER {
            return Err(invalid(
                "regression.lsq_order",
                format!("must be at most {}", MAX_ORDER),
            ));
        }
        if self.regression.central.num_x_bins == 0 || self.regression.central.num_y_bins == 0 {
            return Err(invalid("regression.central", "bin counts must be at least 1"));
        }
        let hist = &self.histograms;
        if !(hist.mass_bin_size > 0.0 && hist.net_bin_size > 0.0 && hist.drift_bin_size > 0.0) {
            return Err(invalid("histograms", "bin sizes must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let options = AlignmentOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.num_baseline_sections(), 300);
    }

    #[test]
    fn test_zero_sections_rejected() {
        let options = AlignmentOptions {
            num_sections: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(AlignmentError::InvalidOptions {
                field: "num_sections",
                ..
            })
        ));
    }

    #[test]
    fn test_regression_kind_from_json() {
        let options: RegressionOptions =
            serde_json::from_str(r#"{"kind": {"hybrid": "lsq"}, "lsq_order": 3}"#).unwrap();
        assert_eq!(options.kind, RegressionKind::Hybrid(SplineKind::LsqSpline));
        assert_eq!(options.lsq_order, 3);
        let central: RegressionOptions = serde_json::from_str(r#"{"kind": "central"}"#).unwrap();
        assert_eq!(central.kind, RegressionKind::Central);
    }
}

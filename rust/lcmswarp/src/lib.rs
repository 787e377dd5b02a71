//! Alignment and mass calibration of LC-MS feature sets.
//!
//! Given a baseline (another run or a mass-tag database) and an alignee run,
//! this crate fits a piecewise-linear NET warp with a banded dynamic program
//! over time sections and a ppm mass correction, then applies both to the
//! alignee features.
//!
//! ```
//! use lcmswarp::{
//!     AlignmentOptions,
//!     FeatureRecord,
//!     LcmsWarp,
//!     NoProgress,
//! };
//!
//! let baseline: Vec<FeatureRecord> = (0..50)
//!     .map(|i| FeatureRecord::new(i, 500.0 + 13.7 * i as f64, 0.0, i as f64 / 49.0))
//!     .collect();
//! let alignee = baseline.clone();
//!
//! let options = AlignmentOptions {
//!     num_sections: 10,
//!     ..Default::default()
//! };
//! let aligner = LcmsWarp::new(options).unwrap();
//! let result = aligner.align(&baseline, &alignee, &mut NoProgress).unwrap();
//! assert!((result.function.transform(0.5) - 0.5).abs() < 0.05);
//! ```

pub mod aligner;
pub mod calibration;
pub mod errors;
pub mod features;
pub mod lattice;
pub mod matching;
pub mod mixture;
pub mod options;
pub mod progress;
pub mod regression;
pub mod sections;
pub mod statistics;
pub mod warp;

pub use aligner::{
    AlignmentResult,
    LcmsWarp,
};
pub use errors::{
    AlignmentError,
    RegressionError,
};
pub use features::{
    BaselineSource,
    FeatureRecord,
};
pub use matching::CandidateMatch;
pub use options::AlignmentOptions;
pub use progress::{
    AlignmentProgress,
    AlignmentStage,
    NoProgress,
};
pub use warp::{
    AlignmentFunction,
    AlignmentSegment,
};

/// Widths and standard deviations at or below this are treated as zero.
pub(crate) const EPSILON: f64 = 1e-9;

/// Returns `(min, max)` over the finite values, `None` if there are none.
pub(crate) fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for val in values {
        if val.is_finite() {
            min = min.min(val);
            max = max.max(val);
        }
    }
    if min.is_finite() && max.is_finite() {
        Some((min, max))
    } else {
        None
    }
}

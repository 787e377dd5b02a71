use crate::progress::AlignmentStage;
use std::fmt::Display;

/// Fatal outcomes of an alignment run.
///
/// Everything recoverable (sparse bins, degenerate variance, singular
/// spline systems) is handled locally and never surfaces here.
#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentError {
    /// The baseline feature set is empty, nothing can be aligned against it.
    NoReferenceData,
    /// The alignee feature set is empty.
    NoAligneeData,
    /// Too few candidate matches survived filtering; the two feature sets
    /// are most likely not comparable.
    InsufficientMatches { found: usize, required: usize },
    /// No time section held enough features to anchor the warp.
    EmptyAlignment { num_sections: usize },
    /// The progress callback asked to stop.
    Cancelled { stage: AlignmentStage },
    InvalidOptions { field: &'static str, reason: String },
}

impl Display for AlignmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoReferenceData => write!(f, "No baseline features to align against"),
            Self::NoAligneeData => write!(f, "No alignee features to align"),
            Self::InsufficientMatches { found, required } => write!(
                f,
                "Insufficient candidate matches: found {}, at least {} are required",
                found, required
            ),
            Self::EmptyAlignment { num_sections } => write!(
                f,
                "None of the {} time sections has enough features to build an alignment",
                num_sections
            ),
            Self::Cancelled { stage } => write!(f, "Alignment cancelled during {}", stage),
            Self::InvalidOptions { field, reason } => {
                write!(f, "Invalid alignment option `{}`: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for AlignmentError {}

/// Local failure of a single regression fit.
#[derive(Debug, Clone, PartialEq)]
pub enum RegressionError {
    NoPoints,
    TooFewKnots { knots: usize, required: usize },
    OrderTooHigh { order: usize, max: usize },
    /// The normal equations have no unique solution.
    SingularMatrix { determinant: f64 },
}

impl Display for RegressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPoints => write!(f, "No points to fit"),
            Self::TooFewKnots { knots, required } => {
                write!(f, "Got {} knots, need at least {}", knots, required)
            }
            Self::OrderTooHigh { order, max } => {
                write!(f, "Polynomial order {} exceeds the maximum of {}", order, max)
            }
            Self::SingularMatrix { determinant } => write!(
                f,
                "Normal equations are singular (determinant {:e})",
                determinant
            ),
        }
    }
}

impl std::error::Error for RegressionError {}

pub type Result<T> = std::result::Result<T, AlignmentError>;

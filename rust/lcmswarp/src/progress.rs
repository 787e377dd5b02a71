use crate::errors::{
    AlignmentError,
    Result,
};
use std::fmt::Display;
use std::ops::ControlFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentStage {
    CandidateMatching,
    SectionScoring,
    AlignmentMatrix,
    MassCalibration,
}

impl Display for AlignmentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CandidateMatching => "candidate matching",
            Self::SectionScoring => "section scoring",
            Self::AlignmentMatrix => "alignment matrix",
            Self::MassCalibration => "mass calibration",
        };
        f.write_str(name)
    }
}

/// Receives progress from the long loops of an alignment.
///
/// `fraction` is in `[0, 1]` within the given stage. Returning
/// [`ControlFlow::Break`] stops the alignment at that checkpoint with
/// [`AlignmentError::Cancelled`].
///
/// Any `FnMut(AlignmentStage, f32) -> ControlFlow<()>` closure works:
///
/// ```
/// use lcmswarp::{AlignmentProgress, AlignmentStage};
/// use std::ops::ControlFlow;
///
/// let mut seen = Vec::new();
/// let mut progress = |stage: AlignmentStage, fraction: f32| -> ControlFlow<()> {
///     seen.push((stage, fraction));
///     ControlFlow::Continue(())
/// };
/// let _ = progress.update(AlignmentStage::AlignmentMatrix, 0.5);
/// assert_eq!(seen.len(), 1);
/// ```
pub trait AlignmentProgress {
    fn update(&mut self, stage: AlignmentStage, fraction: f32) -> ControlFlow<()>;
}

impl<F> AlignmentProgress for F
where
    F: FnMut(AlignmentStage, f32) -> ControlFlow<()>,
{
    fn update(&mut self, stage: AlignmentStage, fraction: f32) -> ControlFlow<()> {
        self(stage, fraction)
    }
}

/// Ignores all progress and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl AlignmentProgress for NoProgress {
    fn update(&mut self, _stage: AlignmentStage, _fraction: f32) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

pub(crate) fn checkpoint(
    progress: &mut dyn AlignmentProgress,
    stage: AlignmentStage,
    fraction: f32,
) -> Result<()> {
    match progress.update(stage, fraction.clamp(0.0, 1.0)) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(()) => Err(AlignmentError::Cancelled { stage }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_cancels_with_stage() {
        let mut progress =
            |_: AlignmentStage, _: f32| -> ControlFlow<()> { ControlFlow::Break(()) };
        let res = checkpoint(&mut progress, AlignmentStage::SectionScoring, 0.3);
        assert_eq!(
            res,
            Err(AlignmentError::Cancelled {
                stage: AlignmentStage::SectionScoring
            })
        );
    }

    #[test]
    fn test_fraction_is_clamped() {
        let mut last = -1.0;
        let mut progress = |_: AlignmentStage, f: f32| -> ControlFlow<()> {
            last = f;
            ControlFlow::Continue(())
        };
        checkpoint(&mut progress, AlignmentStage::AlignmentMatrix, 1.7).unwrap();
        assert_eq!(last, 1.0);
    }
}

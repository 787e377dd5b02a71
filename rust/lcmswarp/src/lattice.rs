// --------------------------------------------------------------------------------
// Banded best-path search over (section, baseline start, width) cells
// --------------------------------------------------------------------------------

use crate::errors::Result;
use crate::progress::{
    checkpoint,
    AlignmentProgress,
    AlignmentStage,
};
use crate::sections::{
    SectionGeometry,
    SectionScores,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellIndex {
    pub section: usize,
    pub baseline_start: usize,
    pub width: usize,
}

impl CellIndex {
    /// Last baseline section covered by this cell.
    pub fn baseline_end(&self) -> usize {
        self.baseline_start + self.width
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatticeCell {
    /// Best cumulative score of any path ending in this cell.
    pub score: f64,
    /// `None` for cells where a path starts.
    pub previous: Option<CellIndex>,
}

/// Filled alignment matrix.
#[derive(Debug, Clone)]
pub struct AlignmentLattice {
    geometry: SectionGeometry,
    cells: Vec<Option<LatticeCell>>,
}

impl AlignmentLattice {
    pub fn geometry(&self) -> &SectionGeometry {
        &self.geometry
    }

    pub fn cell(&self, index: CellIndex) -> Option<&LatticeCell> {
        self.cells[self
            .geometry
            .cell_index(index.section, index.baseline_start, index.width)]
        .as_ref()
    }

    /// Highest scoring cell of a section, the first one on ties.
    pub fn best_cell_in_section(&self, section: usize) -> Option<(CellIndex, f64)> {
        let mut best: Option<(CellIndex, f64)> = None;
        for baseline_start in 0..self.geometry.num_baseline_sections {
            for width in 0..self.geometry.num_widths {
                let index = CellIndex {
                    section,
                    baseline_start,
                    width,
                };
                if let Some(cell) = self.cell(index) {
                    if best.is_none_or(|(_, score)| cell.score > score) {
                        best = Some((index, cell.score));
                    }
                }
            }
        }
        best
    }
}

/// Fills the alignment matrix.
///
/// A cell of section `s` extends the best cell of section `s - 1` whose
/// baseline range ends before the cell's start, at most `max_jump` baseline
/// sections earlier. Cells without any such predecessor start a new path;
/// they are charged the unmatched penalty of every earlier section so that
/// skipping sections is never free.
#[cfg_attr(
    feature = "instrumentation",
    tracing::instrument(skip_all, level = "trace")
)]
pub fn build_alignment_lattice(
    scores: &SectionScores,
    max_jump: usize,
    progress: &mut dyn AlignmentProgress,
) -> Result<AlignmentLattice> {
    let geometry = *scores.geometry();
    let mut cells: Vec<Option<LatticeCell>> = vec![None; geometry.num_cells()];
    let mut skipped_penalty = 0.0;
    let mut num_origins = 0;

    for section in 0..geometry.num_sections {
        checkpoint(
            progress,
            AlignmentStage::AlignmentMatrix,
            section as f32 / geometry.num_sections as f32,
        )?;
        for baseline_start in 0..geometry.num_baseline_sections {
            for width in 0..geometry.num_widths {
                let Some(own_score) = scores.score(section, baseline_start, width) else {
                    continue;
                };
                let predecessor = if section == 0 {
                    None
                } else {
                    best_predecessor(&cells, &geometry, section - 1, baseline_start, max_jump)
                };
                let cell = match predecessor {
                    Some((previous, previous_score)) => LatticeCell {
                        score: previous_score + own_score,
                        previous: Some(previous),
                    },
                    None => {
                        num_origins += 1;
                        LatticeCell {
                            score: skipped_penalty + own_score,
                            previous: None,
                        }
                    }
                };
                cells[geometry.cell_index(section, baseline_start, width)] = Some(cell);
            }
        }
        skipped_penalty += scores.section_penalty(section);
    }
    checkpoint(progress, AlignmentStage::AlignmentMatrix, 1.0)?;
    debug!(
        "Alignment matrix filled: {} cells, {} path origins",
        geometry.num_cells(),
        num_origins
    );

    Ok(AlignmentLattice { geometry, cells })
}

/// Best cell of `section` whose baseline range ends in
/// `[baseline_start - 1 - max_jump, baseline_start - 1]`.
///
/// Candidates are visited from the closest end backwards and from the
/// narrowest width up; ties keep the first one seen.
fn best_predecessor(
    cells: &[Option<LatticeCell>],
    geometry: &SectionGeometry,
    section: usize,
    baseline_start: usize,
    max_jump: usize,
) -> Option<(CellIndex, f64)> {
    if baseline_start == 0 {
        return None;
    }
    let last_end = baseline_start - 1;
    let first_end = last_end.saturating_sub(max_jump);

    let mut best: Option<(CellIndex, f64)> = None;
    for end in (first_end..=last_end).rev() {
        for width in 0..geometry.num_widths.min(end + 1) {
            let start = end - width;
            let Some(cell) = &cells[geometry.cell_index(section, start, width)] else {
                continue;
            };
            if best.is_none_or(|(_, score)| cell.score > score) {
                best = Some((
                    CellIndex {
                        section,
                        baseline_start: start,
                        width,
                    },
                    cell.score,
                ));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::CandidateMatch;
    use crate::progress::NoProgress;
    use crate::sections::{
        score_sections,
        ScoringModel,
    };

    fn diagonal_scores(num_sections: usize) -> SectionScores {
        let geometry = SectionGeometry::new(num_sections, 2, (0.0, 1.0), (0.0, 1.0));
        let matches: Vec<CandidateMatch> = (0..num_sections * 4)
            .map(|i| {
                let net = (i as f64 + 0.5) / (num_sections * 4) as f64;
                CandidateMatch {
                    alignee_index: i,
                    baseline_index: i,
                    alignee_net: net,
                    baseline_net: net,
                    net_error: 0.0,
                    ppm_mass_error: 0.0,
                    drift_error: 0.0,
                }
            })
            .collect();
        score_sections(&matches, &geometry, &ScoringModel::net_only(0.01, 0.02))
    }

    #[test]
    fn test_best_path_follows_diagonal() {
        let scores = diagonal_scores(5);
        let lattice = build_alignment_lattice(&scores, 3, &mut NoProgress).unwrap();

        let (mut index, _) = lattice.best_cell_in_section(4).unwrap();
        let mut visited = vec![index];
        while let Some(previous) = lattice.cell(index).unwrap().previous {
            index = previous;
            visited.push(index);
        }
        visited.reverse();
        assert_eq!(visited.len(), 5);
        for (s, cell) in visited.iter().enumerate() {
            assert_eq!(cell.section, s);
            assert_eq!(cell.baseline_start, 2 * s, "{visited:?}");
            assert_eq!(cell.width, 1, "{visited:?}");
        }
    }

    #[test]
    fn test_predecessors_respect_jump_band() {
        let scores = diagonal_scores(4);
        let lattice = build_alignment_lattice(&scores, 1, &mut NoProgress).unwrap();
        let geometry = *lattice.geometry();
        for s in 1..geometry.num_sections {
            for b in 0..geometry.num_baseline_sections {
                for w in 0..geometry.num_widths {
                    let index = CellIndex {
                        section: s,
                        baseline_start: b,
                        width: w,
                    };
                    let Some(cell) = lattice.cell(index) else {
                        continue;
                    };
                    match cell.previous {
                        Some(p) => {
                            assert_eq!(p.section, s - 1);
                            assert!(p.baseline_end() < b);
                            assert!(b - 1 - p.baseline_end() <= 1);
                        }
                        None => assert_eq!(b, 0),
                    }
                }
            }
        }
    }

    #[test]
    fn test_cancellation_stops_fill() {
        let scores = diagonal_scores(3);
        let mut calls = 0;
        let mut progress = |_: AlignmentStage, _: f32| -> std::ops::ControlFlow<()> {
            calls += 1;
            if calls > 1 {
                std::ops::ControlFlow::Break(())
            } else {
                std::ops::ControlFlow::Continue(())
            }
        };
        let res = build_alignment_lattice(&scores, 3, &mut progress);
        assert!(res.is_err());
    }
}

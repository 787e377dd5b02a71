use crate::errors::{
    AlignmentError,
    Result,
};
use crate::features::{
    FeatureRecord,
    ScanMapping,
};
use crate::lattice::{
    AlignmentLattice,
    CellIndex,
};
use crate::sections::{
    SectionGeometry,
    SectionScores,
};
use crate::EPSILON;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    warn,
};

/// One linear piece of the NET warp, mapping an alignee interval onto a
/// baseline interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentSegment {
    pub net_start: f64,
    pub net_end: f64,
    pub baseline_net_start: f64,
    pub baseline_net_end: f64,
    pub section_index: usize,
    /// Match score of the section under this mapping; `None` for sections
    /// the best path did not reach, which are extrapolated.
    pub score: Option<f64>,
}

impl AlignmentSegment {
    /// Maps `net` through this segment's line. Works outside the segment
    /// too, which is how the warp extrapolates.
    pub fn map(&self, net: f64) -> f64 {
        let width = self.net_end - self.net_start;
        if width.abs() <= EPSILON {
            return self.baseline_net_start;
        }
        self.baseline_net_start
            + (net - self.net_start) / width * (self.baseline_net_end - self.baseline_net_start)
    }
}

/// Piecewise-linear NET warp.
///
/// Segments are sorted by `net_start`, contiguous on the alignee side and
/// cover the alignee NET range the warp was built on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentFunction {
    segments: Vec<AlignmentSegment>,
}

impl AlignmentFunction {
    /// Walks back from the best cell of the last usable section.
    ///
    /// The last usable section is the last one with at least
    /// `min_section_features` features. Sections outside the recovered path
    /// reuse the line of the nearest path segment.
    pub fn from_lattice(
        lattice: &AlignmentLattice,
        scores: &SectionScores,
        min_section_features: usize,
    ) -> Result<Self> {
        let geometry = *lattice.geometry();
        let empty = AlignmentError::EmptyAlignment {
            num_sections: geometry.num_sections,
        };
        let final_section = (0..geometry.num_sections)
            .rev()
            .find(|&s| scores.feature_count(s) >= min_section_features.max(1))
            .ok_or(empty.clone())?;
        let (mut index, best_score) = lattice.best_cell_in_section(final_section).ok_or(empty)?;
        debug!(
            "Best alignment ends in section {} with score {}",
            final_section, best_score
        );

        let mut path = Vec::new();
        loop {
            path.push(path_segment(&geometry, scores, index));
            match lattice.cell(index).and_then(|cell| cell.previous) {
                Some(previous) => index = previous,
                None => break,
            }
        }
        path.sort_by(|a, b| a.net_start.total_cmp(&b.net_start));

        let segments = extend_to_all_sections(&geometry, path);
        Ok(Self { segments })
    }

    /// Builds a warp from already ordered segments.
    ///
    /// Returns `None` if the list is empty or the segments are not
    /// contiguous and ascending.
    pub fn from_segments(segments: Vec<AlignmentSegment>) -> Option<Self> {
        if segments.is_empty() {
            return None;
        }
        let ordered = segments
            .windows(2)
            .all(|w| w[0].net_start <= w[0].net_end && w[0].net_end == w[1].net_start);
        ordered.then_some(Self { segments })
    }

    pub fn segments(&self) -> &[AlignmentSegment] {
        &self.segments
    }

    /// Alignee NET range covered by the segments.
    pub fn net_range(&self) -> (f64, f64) {
        match (self.segments.first(), self.segments.last()) {
            (Some(first), Some(last)) => (first.net_start, last.net_end),
            _ => (0.0, 0.0),
        }
    }

    /// Maps an alignee NET onto the baseline NET scale.
    ///
    /// Values beyond either end are extrapolated along the first or last
    /// segment rather than clamped.
    ///
    /// ```
    /// use lcmswarp::{AlignmentFunction, AlignmentSegment};
    ///
    /// let segment = |i: usize| AlignmentSegment {
    ///     net_start: 0.5 * i as f64,
    ///     net_end: 0.5 * (i + 1) as f64,
    ///     baseline_net_start: 0.5 * i as f64 + 0.1,
    ///     baseline_net_end: 0.5 * (i + 1) as f64 + 0.1,
    ///     section_index: i,
    ///     score: None,
    /// };
    /// let warp = AlignmentFunction::from_segments(vec![segment(0), segment(1)]).unwrap();
    /// assert!((warp.transform(0.25) - 0.35).abs() < 1e-12);
    /// assert!((warp.transform(1.5) - 1.6).abs() < 1e-12);
    /// ```
    pub fn transform(&self, net: f64) -> f64 {
        let (Some(first), Some(last)) = (self.segments.first(), self.segments.last()) else {
            return net;
        };
        if net < first.net_start {
            return first.map(net);
        }
        if net > last.net_end {
            return last.map(net);
        }
        let i = self.segments.partition_point(|s| s.net_end < net);
        self.segments[i.min(self.segments.len() - 1)].map(net)
    }

    /// Sets `net_aligned` on every feature, and `scan_aligned` when the
    /// baseline has a scan axis.
    pub fn transform_features(&self, features: &mut [FeatureRecord], scans: Option<&ScanMapping>) {
        for feature in features.iter_mut() {
            feature.net_aligned = self.transform(feature.net);
            if let Some(mapping) = scans {
                feature.scan_aligned = mapping.scan_for(feature.net_aligned);
            }
        }
    }
}

fn path_segment(
    geometry: &SectionGeometry,
    scores: &SectionScores,
    index: CellIndex,
) -> AlignmentSegment {
    let (net_start, net_end) = geometry.section_bounds(index.section);
    // Cells only exist for widths that fit, so the bounds are always there.
    let (baseline_net_start, baseline_net_end) = geometry
        .baseline_bounds(index.baseline_start, index.width)
        .unwrap_or(geometry.baseline_net_range);
    AlignmentSegment {
        net_start,
        net_end,
        baseline_net_start,
        baseline_net_end,
        section_index: index.section,
        score: scores.score(index.section, index.baseline_start, index.width),
    }
}

fn extrapolated_segment(
    geometry: &SectionGeometry,
    section: usize,
    along: &AlignmentSegment,
) -> AlignmentSegment {
    let (net_start, net_end) = geometry.section_bounds(section);
    AlignmentSegment {
        net_start,
        net_end,
        baseline_net_start: along.map(net_start),
        baseline_net_end: along.map(net_end),
        section_index: section,
        score: None,
    }
}

fn extend_to_all_sections(
    geometry: &SectionGeometry,
    path: Vec<AlignmentSegment>,
) -> Vec<AlignmentSegment> {
    let (Some(first), Some(last)) = (path.first().copied(), path.last().copied()) else {
        return path;
    };
    let leading = first.section_index;
    let trailing = geometry.num_sections - 1 - last.section_index;
    if leading + trailing > 0 {
        warn!(
            "Alignment path skips {} leading and {} trailing sections, extrapolating them",
            leading, trailing
        );
    }

    let mut segments = Vec::with_capacity(geometry.num_sections);
    segments.extend((0..leading).map(|s| extrapolated_segment(geometry, s, &first)));
    segments.extend(path);
    segments.extend(
        (last.section_index + 1..geometry.num_sections)
            .map(|s| extrapolated_segment(geometry, s, &last)),
    );
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::build_alignment_lattice;
    use crate::matching::CandidateMatch;
    use crate::progress::NoProgress;
    use crate::sections::{
        score_sections,
        ScoringModel,
    };

    fn candidate(i: usize, alignee_net: f64, baseline_net: f64) -> CandidateMatch {
        CandidateMatch {
            alignee_index: i,
            baseline_index: i,
            alignee_net,
            baseline_net,
            net_error: baseline_net - alignee_net,
            ppm_mass_error: 0.0,
            drift_error: 0.0,
        }
    }

    fn warp_for(matches: &[CandidateMatch], geometry: SectionGeometry) -> AlignmentFunction {
        let scores = score_sections(matches, &geometry, &ScoringModel::net_only(0.01, 0.02));
        let lattice = build_alignment_lattice(&scores, 10, &mut NoProgress).unwrap();
        AlignmentFunction::from_lattice(&lattice, &scores, 1).unwrap()
    }

    #[test]
    fn test_segments_cover_alignee_range() {
        let matches: Vec<CandidateMatch> = (0..40)
            .map(|i| {
                let net = 0.1 + 0.8 * i as f64 / 39.0;
                candidate(i, net, net * 0.9 + 0.05)
            })
            .collect();
        let geometry = SectionGeometry::new(8, 3, (0.1, 0.9), (0.14, 0.86));
        let warp = warp_for(&matches, geometry);

        let segments = warp.segments();
        assert_eq!(segments.len(), 8);
        assert_eq!(segments[0].net_start, 0.1);
        assert_eq!(segments[7].net_end, 0.9);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].net_end, pair[1].net_start);
            assert!(pair[0].baseline_net_end <= pair[1].baseline_net_start + 1e-12);
        }
    }

    #[test]
    fn test_trailing_sections_are_extrapolated() {
        // Nothing beyond NET 0.5, so the last section is off the path.
        let matches: Vec<CandidateMatch> = (0..20)
            .map(|i| {
                let net = 0.5 * i as f64 / 19.0;
                candidate(i, net, net)
            })
            .collect();
        let geometry = SectionGeometry::new(4, 2, (0.0, 1.0), (0.0, 1.0));
        let warp = warp_for(&matches, geometry);

        let segments = warp.segments();
        assert_eq!(segments.len(), 4);
        // NET 0.5 sits on the boundary and lands in section 2.
        assert!(segments[2].score.is_some());
        assert!(segments[3].score.is_none());
        assert_eq!(warp.net_range(), (0.0, 1.0));
        let mid = warp.transform(0.9);
        assert!(mid.is_finite());
        assert!(mid >= warp.transform(0.4));
    }

    #[test]
    fn test_transform_extrapolates_beyond_ends() {
        let warp = AlignmentFunction::from_segments(vec![
            AlignmentSegment {
                net_start: 0.2,
                net_end: 0.4,
                baseline_net_start: 0.1,
                baseline_net_end: 0.5,
                section_index: 0,
                score: Some(1.0),
            },
            AlignmentSegment {
                net_start: 0.4,
                net_end: 0.6,
                baseline_net_start: 0.5,
                baseline_net_end: 0.6,
                section_index: 1,
                score: Some(1.0),
            },
        ])
        .unwrap();
        assert!((warp.transform(0.0) - (-0.3)).abs() < 1e-12);
        assert!((warp.transform(0.8) - 0.7).abs() < 1e-12);
        assert!((warp.transform(0.4) - 0.5).abs() < 1e-12);
        assert!((warp.transform(0.3) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_zero_width_segment_maps_to_start() {
        let segment = AlignmentSegment {
            net_start: 0.3,
            net_end: 0.3,
            baseline_net_start: 0.25,
            baseline_net_end: 0.35,
            section_index: 0,
            score: None,
        };
        assert_eq!(segment.map(0.3), 0.25);
        assert_eq!(segment.map(0.9), 0.25);
    }

    #[test]
    fn test_from_segments_rejects_gaps() {
        let a = AlignmentSegment {
            net_start: 0.0,
            net_end: 0.4,
            baseline_net_start: 0.0,
            baseline_net_end: 0.4,
            section_index: 0,
            score: None,
        };
        let b = AlignmentSegment {
            net_start: 0.5,
            net_end: 1.0,
            section_index: 1,
            ..a
        };
        assert!(AlignmentFunction::from_segments(vec![a, b]).is_none());
        assert!(AlignmentFunction::from_segments(vec![]).is_none());
    }
}

//! Time sections and their match scores.
//!
//! The alignee NET range is cut into equal sections and the baseline range
//! into `contraction_factor` times as many baseline sections. Every section
//! is scored against every baseline sub-range it could plausibly map onto:
//! a start baseline section and a width of up to `contraction_factor²`
//! baseline sections.

use crate::matching::CandidateMatch;
use crate::mixture::MixtureFit;
use crate::EPSILON;
use rayon::prelude::*;
use statrs::distribution::{
    Continuous,
    Normal,
};
use tracing::debug;

/// Floor of a mixture likelihood before taking its log.
const MIN_LIKELIHOOD: f64 = 1e-4;
/// Stand-in for a NET deviation that is not usable.
pub const NOMINAL_NET_STD: f64 = 0.007;

/// Section layout shared by the scorer, the lattice and the warp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionGeometry {
    pub num_sections: usize,
    pub num_baseline_sections: usize,
    /// Number of widths considered for each baseline start.
    pub num_widths: usize,
    pub net_range: (f64, f64),
    pub baseline_net_range: (f64, f64),
}

impl SectionGeometry {
    /// `num_sections` and `contraction_factor` must both be at least 1.
    pub fn new(
        num_sections: usize,
        contraction_factor: usize,
        net_range: (f64, f64),
        baseline_net_range: (f64, f64),
    ) -> Self {
        Self {
            num_sections,
            num_baseline_sections: num_sections * contraction_factor,
            num_widths: contraction_factor * contraction_factor,
            net_range,
            baseline_net_range,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.num_sections * self.cells_per_section()
    }

    pub fn cells_per_section(&self) -> usize {
        self.num_baseline_sections * self.num_widths
    }

    pub fn cell_index(&self, section: usize, baseline_start: usize, width: usize) -> usize {
        section * self.cells_per_section() + baseline_start * self.num_widths + width
    }

    pub fn section_width(&self) -> f64 {
        (self.net_range.1 - self.net_range.0) / self.num_sections as f64
    }

    pub fn baseline_section_width(&self) -> f64 {
        (self.baseline_net_range.1 - self.baseline_net_range.0) / self.num_baseline_sections as f64
    }

    /// Alignee NET interval of a section. The last one ends exactly at the
    /// top of the range, so consecutive sections share their boundary.
    pub fn section_bounds(&self, section: usize) -> (f64, f64) {
        let start = self.net_range.0 + section as f64 * self.section_width();
        let end = if section + 1 >= self.num_sections {
            self.net_range.1
        } else {
            self.net_range.0 + (section + 1) as f64 * self.section_width()
        };
        (start, end)
    }

    /// Baseline NET interval covered by `width + 1` baseline sections from
    /// `baseline_start`, or `None` when that runs past the last one.
    pub fn baseline_bounds(&self, baseline_start: usize, width: usize) -> Option<(f64, f64)> {
        let end_section = baseline_start + width + 1;
        if end_section > self.num_baseline_sections {
            return None;
        }
        let step = self.baseline_section_width();
        let start = self.baseline_net_range.0 + baseline_start as f64 * step;
        let end = if end_section == self.num_baseline_sections {
            self.baseline_net_range.1
        } else {
            self.baseline_net_range.0 + end_section as f64 * step
        };
        Some((start, end))
    }

    /// Section holding `net`; values outside the range land in the first or
    /// last section.
    pub fn section_of(&self, net: f64) -> usize {
        let width = self.section_width();
        if width <= EPSILON || !net.is_finite() {
            return 0;
        }
        let section = ((net - self.net_range.0) / width).floor();
        if section <= 0.0 {
            0
        } else {
            (section as usize).min(self.num_sections - 1)
        }
    }
}

/// Per-point log-likelihood used while scoring sections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoringModel {
    /// Gaussian in NET error only. Points outside the tolerance get the
    /// density at the tolerance edge.
    NetOnly { net_std: f64, net_tolerance: f64 },
    /// Normal/uniform mixture over (ppm error, NET error).
    MassNet { fit: MixtureFit },
}

/// Log density of a zero-mean normal, falling back to the nominal NET
/// deviation when `std` is not usable.
fn ln_normal(delta: f64, std: f64) -> f64 {
    Normal::new(0.0, std)
        .or_else(|_| Normal::new(0.0, NOMINAL_NET_STD))
        .map_or(f64::NEG_INFINITY, |normal| normal.ln_pdf(delta))
}

impl ScoringModel {
    pub fn net_only(net_std: f64, net_tolerance: f64) -> Self {
        let net_std = if net_std > EPSILON {
            net_std
        } else {
            NOMINAL_NET_STD
        };
        Self::NetOnly {
            net_std,
            net_tolerance,
        }
    }

    /// Deviations too small to use are replaced, the rest of the fit is kept.
    pub fn mass_net(mut fit: MixtureFit, nominal_mass_std: f64) -> Self {
        if !(fit.std_net > EPSILON) {
            fit.std_net = NOMINAL_NET_STD;
        }
        if !(fit.std_mass > EPSILON) {
            fit.std_mass = nominal_mass_std;
        }
        if !fit.uniform_density.is_finite() {
            fit.uniform_density = 0.0;
        }
        Self::MassNet { fit }
    }

    pub fn point_score(&self, net_delta: f64, ppm_error: f64) -> f64 {
        match self {
            Self::NetOnly {
                net_std,
                net_tolerance,
            } => {
                if net_delta.abs() <= *net_tolerance {
                    ln_normal(net_delta, *net_std)
                } else {
                    ln_normal(*net_tolerance, *net_std)
                }
            }
            Self::MassNet { fit } => fit.likelihood(ppm_error, net_delta).max(MIN_LIKELIHOOD).ln(),
        }
    }

    /// Score of a feature that finds no match at all.
    pub fn unmatched_penalty(&self) -> f64 {
        match self {
            Self::NetOnly {
                net_std,
                net_tolerance,
            } => ln_normal(*net_tolerance, *net_std),
            Self::MassNet { fit } => ((1.0 - fit.normal_probability) * fit.uniform_density)
                .max(MIN_LIKELIHOOD)
                .ln(),
        }
    }
}

/// Match scores of every (section, baseline start, width) triple.
#[derive(Debug, Clone)]
pub struct SectionScores {
    geometry: SectionGeometry,
    scores: Vec<Option<f64>>,
    feature_counts: Vec<usize>,
    unmatched_penalty: f64,
}

impl SectionScores {
    pub fn geometry(&self) -> &SectionGeometry {
        &self.geometry
    }

    /// `None` when the width runs past the last baseline section.
    pub fn score(&self, section: usize, baseline_start: usize, width: usize) -> Option<f64> {
        self.scores[self.geometry.cell_index(section, baseline_start, width)]
    }

    /// Distinct alignee features with at least one candidate in the section.
    pub fn feature_count(&self, section: usize) -> usize {
        self.feature_counts[section]
    }

    /// Score of the section if none of its features matched.
    pub fn section_penalty(&self, section: usize) -> f64 {
        self.feature_counts[section] as f64 * self.unmatched_penalty
    }

    pub fn best_over_widths(&self, section: usize, baseline_start: usize) -> Option<f64> {
        (0..self.geometry.num_widths)
            .filter_map(|w| self.score(section, baseline_start, w))
            .max_by(f64::total_cmp)
    }
}

/// Scores every section against every baseline sub-range.
///
/// Inside a hypothesis each alignee feature only counts its closest
/// baseline candidate, so a feature with several candidates is scored once.
/// Sections are independent and scored in parallel.
#[cfg_attr(
    feature = "instrumentation",
    tracing::instrument(skip_all, level = "trace")
)]
pub fn score_sections(
    matches: &[CandidateMatch],
    geometry: &SectionGeometry,
    model: &ScoringModel,
) -> SectionScores {
    let mut buckets: Vec<Vec<&CandidateMatch>> = vec![Vec::new(); geometry.num_sections];
    for m in matches {
        buckets[geometry.section_of(m.alignee_net)].push(m);
    }
    for bucket in buckets.iter_mut() {
        bucket.sort_by_key(|m| (m.alignee_index, m.baseline_index));
    }

    let per_section: Vec<(usize, Vec<Option<f64>>)> = buckets
        .par_iter()
        .enumerate()
        .map(|(section, bucket)| score_section(section, bucket, geometry, model))
        .collect();

    let mut scores = Vec::with_capacity(geometry.num_cells());
    let mut feature_counts = Vec::with_capacity(geometry.num_sections);
    for (count, section_scores) in per_section {
        feature_counts.push(count);
        scores.extend(section_scores);
    }
    debug!(
        "Scored {} sections x {} baseline sections x {} widths",
        geometry.num_sections, geometry.num_baseline_sections, geometry.num_widths
    );

    SectionScores {
        geometry: *geometry,
        scores,
        feature_counts,
        unmatched_penalty: model.unmatched_penalty(),
    }
}

fn score_section(
    section: usize,
    bucket: &[&CandidateMatch],
    geometry: &SectionGeometry,
    model: &ScoringModel,
) -> (usize, Vec<Option<f64>>) {
    let (section_start, section_end) = geometry.section_bounds(section);
    let section_width = section_end - section_start;
    let features: Vec<&[&CandidateMatch]> = bucket
        .chunk_by(|a, b| a.alignee_index == b.alignee_index)
        .collect();

    let mut scores = vec![None; geometry.cells_per_section()];
    for baseline_start in 0..geometry.num_baseline_sections {
        for width in 0..geometry.num_widths {
            let Some((baseline_low, baseline_high)) =
                geometry.baseline_bounds(baseline_start, width)
            else {
                continue;
            };
            let scale = if section_width > EPSILON {
                (baseline_high - baseline_low) / section_width
            } else {
                0.0
            };

            let score = features
                .iter()
                .filter_map(|candidates| {
                    candidates
                        .iter()
                        .map(|m| {
                            let projected = baseline_low + (m.alignee_net - section_start) * scale;
                            (m.baseline_net - projected, m.ppm_mass_error)
                        })
                        .min_by(|a, b| a.0.abs().total_cmp(&b.0.abs()))
                })
                .map(|(delta, ppm)| model.point_score(delta, ppm))
                .sum();
            scores[baseline_start * geometry.num_widths + width] = Some(score);
        }
    }
    (features.len(), scores)
}

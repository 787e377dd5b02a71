//! Summaries reported next to a finished alignment.

use crate::matching::CandidateMatch;
use crate::sections::SectionScores;
use crate::{
    finite_range,
    EPSILON,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBin {
    /// Lower edge of the bin.
    pub value: f64,
    pub frequency: usize,
}

/// Fixed-width histogram starting at the smallest value.
///
/// Non-finite values are skipped; every finite value lands in exactly one
/// bin.
///
/// ```
/// use lcmswarp::statistics::histogram;
///
/// let bins = histogram(&[0.05, 0.1, 0.12, 0.31], 0.1);
/// assert_eq!(bins.iter().map(|b| b.frequency).sum::<usize>(), 4);
/// assert_eq!(bins.len(), 3);
/// ```
pub fn histogram(values: &[f64], bin_size: f64) -> Vec<HistogramBin> {
    let Some((min, max)) = finite_range(values.iter().copied()) else {
        return Vec::new();
    };
    if !(bin_size > EPSILON) {
        return vec![HistogramBin {
            value: min,
            frequency: values.iter().filter(|v| v.is_finite()).count(),
        }];
    }
    let num_bins = ((max - min) / bin_size).floor() as usize + 1;
    let mut counts = vec![0usize; num_bins];
    for v in values.iter().filter(|v| v.is_finite()) {
        let bin = (((v - min) / bin_size).floor() as usize).min(num_bins - 1);
        counts[bin] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, frequency)| HistogramBin {
            value: min + i as f64 * bin_size,
            frequency,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearRegression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearRegression {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Ordinary least squares of `ys` on `xs`.
///
/// `None` with fewer than two finite pairs or when `xs` is constant.
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<LinearRegression> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = pairs.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = pairs.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    if sxx <= EPSILON {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let ss_tot: f64 = pairs.iter().map(|p| (p.1 - mean_y).powi(2)).sum();
    let ss_res: f64 = pairs
        .iter()
        .map(|p| (p.1 - intercept - slope * p.0).powi(2))
        .sum();
    let r_squared = if ss_tot > EPSILON {
        1.0 - ss_res / ss_tot
    } else {
        1.0
    };
    Some(LinearRegression {
        slope,
        intercept,
        r_squared,
    })
}

fn mean_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let n = values.clone().count();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    (mean, variance.sqrt())
}

/// Mean and standard deviation of the match errors.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ErrorSummary {
    pub num_matches: usize,
    pub mass_mean: f64,
    pub mass_std: f64,
    pub net_mean: f64,
    pub net_std: f64,
}

impl ErrorSummary {
    pub fn from_matches(matches: &[CandidateMatch]) -> Self {
        let (mass_mean, mass_std) = mean_std(matches.iter().map(|m| m.ppm_mass_error));
        let (net_mean, net_std) = mean_std(matches.iter().map(|m| m.net_error));
        Self {
            num_matches: matches.len(),
            mass_mean,
            mass_std,
            net_mean,
            net_std,
        }
    }
}

/// Best score over widths of every (baseline section, alignee section)
/// pair, with the start NET of each section along the axes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatMap {
    /// Indexed `[baseline_section][section]`.
    pub scores: Vec<Vec<Option<f64>>>,
    pub alignee_axis: Vec<f64>,
    pub baseline_axis: Vec<f64>,
}

impl HeatMap {
    pub fn from_scores(scores: &SectionScores) -> Self {
        let geometry = scores.geometry();
        let grid = (0..geometry.num_baseline_sections)
            .map(|b| {
                (0..geometry.num_sections)
                    .map(|s| scores.best_over_widths(s, b))
                    .collect()
            })
            .collect();
        let alignee_axis = (0..geometry.num_sections)
            .map(|s| geometry.section_bounds(s).0)
            .collect();
        let baseline_axis = (0..geometry.num_baseline_sections)
            .map(|b| {
                geometry.baseline_net_range.0 + b as f64 * geometry.baseline_section_width()
            })
            .collect();
        Self {
            scores: grid,
            alignee_axis,
            baseline_axis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::{
        score_sections,
        ScoringModel,
        SectionGeometry,
    };

    #[test]
    fn test_histogram_conserves_counts() {
        let values: Vec<f64> = (0..1000).map(|i| ((i * 37) % 101) as f64 * 0.13 - 6.0).collect();
        let bins = histogram(&values, 0.2);
        assert_eq!(bins.iter().map(|b| b.frequency).sum::<usize>(), 1000);
        for pair in bins.windows(2) {
            assert!((pair[1].value - pair[0].value - 0.2).abs() < 1e-9);
        }
    }

    #[test]
    fn test_histogram_skips_non_finite() {
        let bins = histogram(&[1.0, f64::NAN, 1.0, f64::INFINITY], 0.5);
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].frequency, 2);
        assert!(histogram(&[], 0.5).is_empty());
    }

    #[test]
    fn test_linear_regression() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 / 19.0).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 0.9 * x + 0.05).collect();
        let fit = linear_regression(&xs, &ys).unwrap();
        assert!((fit.slope - 0.9).abs() < 1e-12);
        assert!((fit.intercept - 0.05).abs() < 1e-12);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
        assert!(linear_regression(&[1.0, 1.0], &[0.0, 1.0]).is_none());
    }

    #[test]
    fn test_heat_map_shape() {
        let geometry = SectionGeometry::new(3, 2, (0.0, 1.0), (0.0, 1.0));
        let scores = score_sections(&[], &geometry, &ScoringModel::net_only(0.01, 0.02));
        let map = HeatMap::from_scores(&scores);
        assert_eq!(map.scores.len(), 6);
        assert!(map.scores.iter().all(|row| row.len() == 3));
        assert_eq!(map.alignee_axis.len(), 3);
        assert_eq!(map.baseline_axis.len(), 6);
        assert_eq!(map.scores[0][0], Some(0.0));
    }
}

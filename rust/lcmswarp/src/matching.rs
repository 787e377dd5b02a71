use crate::errors::Result;
use crate::features::FeatureRecord;
use crate::progress::{
    checkpoint,
    AlignmentProgress,
    AlignmentStage,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

/// How many alignee features are matched between progress checkpoints.
const PROGRESS_INTERVAL: usize = 1024;

/// A baseline/alignee pair whose masses agree within tolerance.
///
/// Indices refer to positions in the slices handed to
/// [`generate_candidate_matches`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub alignee_index: usize,
    pub baseline_index: usize,
    /// Raw (unaligned) NET of the alignee feature.
    pub alignee_net: f64,
    pub baseline_net: f64,
    /// `baseline_net - aligned alignee NET`.
    pub net_error: f64,
    /// `(alignee - baseline) / alignee`, in ppm.
    pub ppm_mass_error: f64,
    pub drift_error: f64,
}

impl CandidateMatch {
    pub fn new(
        alignee_index: usize,
        alignee: &FeatureRecord,
        baseline_index: usize,
        baseline: &FeatureRecord,
    ) -> Self {
        let ppm_mass_error = if alignee.mass_calibrated != 0.0 {
            (alignee.mass_calibrated - baseline.mass) / alignee.mass_calibrated * 1e6
        } else {
            0.0
        };
        Self {
            alignee_index,
            baseline_index,
            alignee_net: alignee.net,
            baseline_net: baseline.net,
            net_error: baseline.net - alignee.net_aligned,
            ppm_mass_error,
            drift_error: alignee.drift_time - baseline.drift_time,
        }
    }

    pub fn set_aligned_net(&mut self, aligned_net: f64) {
        self.net_error = self.baseline_net - aligned_net;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchParameters {
    pub mass_tolerance_ppm: f64,
    pub max_promiscuous_matches: usize,
    pub keep_promiscuous_matches: bool,
}

fn mass_order(features: &[FeatureRecord], mass: impl Fn(&FeatureRecord) -> f64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..features.len()).collect();
    order.sort_by(|&a, &b| mass(&features[a]).total_cmp(&mass(&features[b])));
    order
}

/// Pairs every alignee feature with all baseline features inside its ppm
/// window, then applies the promiscuity filter.
///
/// The alignee side uses `mass_calibrated`, the baseline side `mass`. Both
/// sets are walked in ascending mass order, so the lower edge of the
/// baseline window only ever moves forward. The result is sorted by
/// `(alignee_index, baseline_index)`.
///
/// Empty inputs give an empty result; deciding whether that is fatal is up
/// to the caller.
#[cfg_attr(
    feature = "instrumentation",
    tracing::instrument(skip_all, level = "trace")
)]
pub fn generate_candidate_matches(
    baseline: &[FeatureRecord],
    alignee: &[FeatureRecord],
    params: &MatchParameters,
    progress: &mut dyn AlignmentProgress,
) -> Result<Vec<CandidateMatch>> {
    if baseline.is_empty() || alignee.is_empty() {
        return Ok(Vec::new());
    }

    let baseline_order = mass_order(baseline, |f| f.mass);
    let baseline_masses: Vec<f64> = baseline_order.iter().map(|&i| baseline[i].mass).collect();
    let alignee_order = mass_order(alignee, |f| f.mass_calibrated);

    let mut matches = Vec::new();
    let mut window_start = 0;
    for (n, &alignee_index) in alignee_order.iter().enumerate() {
        if n % PROGRESS_INTERVAL == 0 {
            checkpoint(
                progress,
                AlignmentStage::CandidateMatching,
                n as f32 / alignee_order.len() as f32,
            )?;
        }
        let feature = &alignee[alignee_index];
        let mass = feature.mass_calibrated;
        let half_window = (mass * params.mass_tolerance_ppm / 1e6).abs();
        let (low, high) = (mass - half_window, mass + half_window);

        window_start += baseline_masses[window_start..].partition_point(|m| *m < low);
        for (offset, baseline_mass) in baseline_masses[window_start..].iter().enumerate() {
            if *baseline_mass > high {
                break;
            }
            let baseline_index = baseline_order[window_start + offset];
            matches.push(CandidateMatch::new(
                alignee_index,
                feature,
                baseline_index,
                &baseline[baseline_index],
            ));
        }
    }
    checkpoint(progress, AlignmentStage::CandidateMatching, 1.0)?;

    let num_raw = matches.len();
    let mut matches = filter_promiscuous_matches(matches, params);
    matches.sort_by_key(|m| (m.alignee_index, m.baseline_index));
    debug!(
        "Generated {} candidate matches, {} left after the promiscuity filter",
        num_raw,
        matches.len()
    );
    Ok(matches)
}

/// Handles baseline features claimed by more than
/// `max_promiscuous_matches` alignee features.
///
/// By default the whole group is dropped, since such a baseline feature
/// cannot be mapped unambiguously. With `keep_promiscuous_matches` the
/// group is cut down to the matches with the lowest alignee NET, ties going
/// to the lowest alignee index.
pub fn filter_promiscuous_matches(
    mut matches: Vec<CandidateMatch>,
    params: &MatchParameters,
) -> Vec<CandidateMatch> {
    matches.sort_by(|a, b| {
        a.baseline_index
            .cmp(&b.baseline_index)
            .then(a.alignee_net.total_cmp(&b.alignee_net))
            .then(a.alignee_index.cmp(&b.alignee_index))
    });

    let mut kept = Vec::with_capacity(matches.len());
    let mut num_promiscuous = 0;
    for group in matches.chunk_by(|a, b| a.baseline_index == b.baseline_index) {
        if group.len() <= params.max_promiscuous_matches {
            kept.extend_from_slice(group);
            continue;
        }
        num_promiscuous += 1;
        if params.keep_promiscuous_matches {
            kept.extend_from_slice(&group[..params.max_promiscuous_matches]);
        }
    }
    if num_promiscuous > 0 {
        debug!(
            "{} baseline features exceeded {} matches (kept truncated: {})",
            num_promiscuous, params.max_promiscuous_matches, params.keep_promiscuous_matches
        );
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    fn params(max: usize, keep: bool) -> MatchParameters {
        MatchParameters {
            mass_tolerance_ppm: 20.0,
            max_promiscuous_matches: max,
            keep_promiscuous_matches: keep,
        }
    }

    #[test]
    fn test_one_to_one_matches() {
        let baseline: Vec<FeatureRecord> = [0.1, 0.3, 0.5, 0.7, 0.9]
            .iter()
            .enumerate()
            .map(|(i, net)| FeatureRecord::new(i as u64, 1000.0 + 10.0 * i as f64, 0.0, *net))
            .collect();
        // Reversed so alignee and baseline order differ.
        let alignee: Vec<FeatureRecord> = baseline
            .iter()
            .rev()
            .map(|f| FeatureRecord::new(f.id, f.mass, 0.0, f.net + 0.05))
            .collect();

        let matches =
            generate_candidate_matches(&baseline, &alignee, &params(3, false), &mut NoProgress)
                .unwrap();
        assert_eq!(matches.len(), 5);
        for m in &matches {
            assert_eq!(m.baseline_index, 4 - m.alignee_index);
            assert!((m.net_error + 0.05).abs() < 1e-12);
            assert!(m.ppm_mass_error.abs() < 1e-9);
        }
    }

    #[test]
    fn test_window_is_relative() {
        let baseline = vec![FeatureRecord::new(0, 1000.0, 0.0, 0.5)];
        // 1000.019 is 19 ppm away, 1000.021 is 21 ppm away.
        let alignee = vec![
            FeatureRecord::new(0, 1000.019, 0.0, 0.5),
            FeatureRecord::new(1, 1000.021, 0.0, 0.5),
        ];
        let matches =
            generate_candidate_matches(&baseline, &alignee, &params(3, false), &mut NoProgress)
                .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].alignee_index, 0);
        assert!((matches[0].ppm_mass_error - 19.0).abs() < 0.01);
    }

    #[test]
    fn test_promiscuous_group_is_dropped_entirely() {
        let baseline = vec![
            FeatureRecord::new(0, 1000.0, 0.0, 0.5),
            FeatureRecord::new(1, 1500.0, 0.0, 0.5),
        ];
        let mut alignee: Vec<FeatureRecord> = (0..6)
            .map(|i| FeatureRecord::new(i, 1000.0 + 0.001 * i as f64, 0.0, 0.1 * i as f64))
            .collect();
        alignee.push(FeatureRecord::new(6, 1500.0, 0.0, 0.5));

        let matches =
            generate_candidate_matches(&baseline, &alignee, &params(5, false), &mut NoProgress)
                .unwrap();
        assert!(matches.iter().all(|m| m.baseline_index != 0));
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_promiscuous_group_keeps_lowest_nets() {
        let baseline = vec![FeatureRecord::new(0, 1000.0, 0.0, 0.5)];
        let alignee: Vec<FeatureRecord> = [0.4, 0.2, 0.9, 0.2, 0.1]
            .iter()
            .enumerate()
            .map(|(i, net)| FeatureRecord::new(i as u64, 1000.0, 0.0, *net))
            .collect();
        let matches =
            generate_candidate_matches(&baseline, &alignee, &params(3, true), &mut NoProgress)
                .unwrap();
        let kept: Vec<usize> = matches.iter().map(|m| m.alignee_index).collect();
        // NET 0.1 (idx 4), then the 0.2 tie resolved by index (1 before 3).
        assert_eq!(kept, vec![1, 3, 4]);
    }

    #[test]
    fn test_empty_inputs_give_no_matches() {
        let features = vec![FeatureRecord::new(0, 1000.0, 0.0, 0.5)];
        let none = generate_candidate_matches(&[], &features, &params(3, false), &mut NoProgress)
            .unwrap();
        assert!(none.is_empty());
        let none = generate_candidate_matches(&features, &[], &params(3, false), &mut NoProgress)
            .unwrap();
        assert!(none.is_empty());
    }
}

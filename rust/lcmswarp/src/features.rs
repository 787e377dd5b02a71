use crate::{
    finite_range,
    EPSILON,
};
use serde::{
    Deserialize,
    Serialize,
};

/// A single LC-MS feature, either from a run or from a mass-tag database.
///
/// `mass` is the monoisotopic mass as measured and is never modified.
/// `mass_calibrated` and `net_aligned` start out equal to `mass` and `net`
/// and are the only fields an alignment writes to (together with
/// `scan_aligned`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub id: u64,
    pub mass: f64,
    pub mass_calibrated: f64,
    pub mz: f64,
    pub net: f64,
    pub net_aligned: f64,
    /// Apex scan for run features, 0 for mass tags.
    pub scan: u32,
    pub scan_aligned: f64,
    pub drift_time: f64,
    pub abundance: f64,
}

impl FeatureRecord {
    pub fn new(id: u64, mass: f64, mz: f64, net: f64) -> Self {
        Self {
            id,
            mass,
            mass_calibrated: mass,
            mz,
            net,
            net_aligned: net,
            scan: 0,
            scan_aligned: 0.0,
            drift_time: 0.0,
            abundance: 0.0,
        }
    }

    pub fn with_scan(mut self, scan: u32) -> Self {
        self.scan = scan;
        self.scan_aligned = scan as f64;
        self
    }

    pub fn with_drift_time(mut self, drift_time: f64) -> Self {
        self.drift_time = drift_time;
        self
    }

    pub fn with_abundance(mut self, abundance: f64) -> Self {
        self.abundance = abundance;
        self
    }

    /// Drops any earlier calibration or alignment.
    pub fn reset_alignment(&mut self) {
        self.mass_calibrated = self.mass;
        self.net_aligned = self.net;
        self.scan_aligned = self.scan as f64;
    }
}

/// Where the baseline features came from.
///
/// Run baselines get aligned scans in the output, mass tags carry their own
/// NET and have no scan axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BaselineSource {
    #[default]
    #[serde(rename = "features")]
    Features,
    #[serde(rename = "mass_tags")]
    MassTags,
}

pub fn net_range(features: &[FeatureRecord]) -> Option<(f64, f64)> {
    finite_range(features.iter().map(|f| f.net))
}

/// Derives NET values of a run from scan numbers, mapping the scan range
/// linearly onto `[0, 1]`.
///
/// A run whose features all share one scan gets NET 0 everywhere.
pub fn normalize_nets_from_scans(features: &mut [FeatureRecord]) {
    let Some((min_scan, max_scan)) = finite_range(features.iter().map(|f| f.scan as f64)) else {
        return;
    };
    let span = max_scan - min_scan;
    for feature in features.iter_mut() {
        feature.net = if span > EPSILON {
            (feature.scan as f64 - min_scan) / span
        } else {
            0.0
        };
        feature.net_aligned = feature.net;
    }
}

/// Indices of the features whose abundance is within the top `percentile`
/// percent of the set, in their original order.
///
/// A percentile of 100 or more keeps everything.
pub fn filter_by_abundance_percentile(features: &[FeatureRecord], percentile: f64) -> Vec<usize> {
    if percentile >= 100.0 || features.is_empty() {
        return (0..features.len()).collect();
    }
    let keep = ((features.len() as f64) * percentile.max(0.0) / 100.0).ceil() as usize;
    let mut order: Vec<usize> = (0..features.len()).collect();
    order.sort_by(|&a, &b| {
        features[b]
            .abundance
            .total_cmp(&features[a].abundance)
            .then(a.cmp(&b))
    });
    order.truncate(keep);
    order.sort_unstable();
    order
}

/// Linear NET to scan mapping of a baseline run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanMapping {
    net_range: (f64, f64),
    scan_range: (f64, f64),
}

impl ScanMapping {
    pub fn from_features(features: &[FeatureRecord]) -> Option<Self> {
        let net_range = net_range(features)?;
        let scan_range = finite_range(features.iter().map(|f| f.scan as f64))?;
        Some(Self {
            net_range,
            scan_range,
        })
    }

    pub fn scan_for(&self, net: f64) -> f64 {
        let net_span = self.net_range.1 - self.net_range.0;
        if net_span <= EPSILON {
            return self.scan_range.0;
        }
        let scan_span = self.scan_range.1 - self.scan_range.0;
        self.scan_range.0 + (net - self.net_range.0) / net_span * scan_span
    }
}

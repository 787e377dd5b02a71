use crate::calibration::MassCalibration;
use crate::errors::{
    AlignmentError,
    Result,
};
use crate::features::{
    filter_by_abundance_percentile,
    net_range,
    BaselineSource,
    FeatureRecord,
    ScanMapping,
};
use crate::lattice::build_alignment_lattice;
use crate::matching::{
    generate_candidate_matches,
    CandidateMatch,
    MatchParameters,
};
use crate::mixture::{
    fit_mass_net,
    MixtureFit,
};
use crate::options::{
    AlignmentOptions,
    AlignmentType,
};
use crate::progress::{
    checkpoint,
    AlignmentProgress,
    AlignmentStage,
};
use crate::sections::{
    score_sections,
    ScoringModel,
    SectionGeometry,
    SectionScores,
    NOMINAL_NET_STD,
};
use crate::statistics::{
    histogram,
    linear_regression,
    ErrorSummary,
    HeatMap,
    HistogramBin,
    LinearRegression,
};
use crate::warp::{
    AlignmentFunction,
    AlignmentSegment,
};
use serde::Serialize;
use tracing::{
    debug,
    info,
    warn,
};

/// Fewer candidate matches than this and the runs are not comparable.
pub const MIN_REQUIRED_MATCHES: usize = 10;

/// Settings that vary between the two passes. Each pass reads only its own
/// snapshot plus the immutable options.
#[derive(Debug, Clone, Copy)]
struct PassConfig {
    mass_tolerance_ppm: f64,
    model: ScoringModel,
}

struct PassOutput {
    matches: Vec<CandidateMatch>,
    scores: SectionScores,
    function: AlignmentFunction,
}

/// Everything an alignment produces.
#[derive(Debug, Clone, Serialize)]
pub struct AlignmentResult {
    pub function: AlignmentFunction,
    /// Alignee features with `net_aligned`, `scan_aligned` and
    /// `mass_calibrated` filled in.
    pub alignee: Vec<FeatureRecord>,
    /// Final pass matches, indexed into `alignee` and the baseline.
    pub matches: Vec<CandidateMatch>,
    pub mixture: MixtureFit,
    pub calibration: Option<MassCalibration>,
    pub mass_histogram: Vec<HistogramBin>,
    pub net_histogram: Vec<HistogramBin>,
    pub drift_histogram: Vec<HistogramBin>,
    pub heat_map: HeatMap,
    /// Baseline NET against aligned alignee NET over the matches.
    pub net_regression: Option<LinearRegression>,
    pub error_summary: ErrorSummary,
}

impl AlignmentResult {
    pub fn segments(&self) -> &[AlignmentSegment] {
        self.function.segments()
    }
}

/// Scores the sections, fills the alignment matrix and extracts the warp for
/// an existing set of candidate matches.
///
/// Unlike [`LcmsWarp::align`] this does not require a minimum number of
/// matches.
pub fn warp_from_matches(
    matches: &[CandidateMatch],
    geometry: &SectionGeometry,
    model: &ScoringModel,
    max_jump: usize,
    min_section_features: usize,
    progress: &mut dyn AlignmentProgress,
) -> Result<(SectionScores, AlignmentFunction)> {
    checkpoint(progress, AlignmentStage::SectionScoring, 0.0)?;
    let scores = score_sections(matches, geometry, model);
    checkpoint(progress, AlignmentStage::SectionScoring, 1.0)?;
    let lattice = build_alignment_lattice(&scores, max_jump, progress)?;
    let function = AlignmentFunction::from_lattice(&lattice, &scores, min_section_features)?;
    Ok((scores, function))
}

/// LC-MS run aligner.
///
/// Holds only its options; every call to [`LcmsWarp::align`] works on its
/// own copies, so one value can serve any number of alignments.
#[derive(Debug, Clone)]
pub struct LcmsWarp {
    options: AlignmentOptions,
}

impl LcmsWarp {
    pub fn new(options: AlignmentOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &AlignmentOptions {
        &self.options
    }

    /// Aligns `alignee` onto `baseline`.
    ///
    /// A NET-only pass with the wide calibration window comes first. With
    /// [`AlignmentType::NetMassWarp`] its matches calibrate the alignee
    /// masses and a second, mass-aware pass at `mass_tolerance_ppm`
    /// produces the final warp.
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "trace")
    )]
    pub fn align(
        &self,
        baseline: &[FeatureRecord],
        alignee: &[FeatureRecord],
        progress: &mut dyn AlignmentProgress,
    ) -> Result<AlignmentResult> {
        if baseline.is_empty() {
            return Err(AlignmentError::NoReferenceData);
        }
        if alignee.is_empty() {
            return Err(AlignmentError::NoAligneeData);
        }
        let options = &self.options;
        info!(
            "Aligning {} features onto {} baseline features",
            alignee.len(),
            baseline.len()
        );

        let mut alignee = alignee.to_vec();
        alignee.iter_mut().for_each(FeatureRecord::reset_alignment);
        let fit_indices = filter_by_abundance_percentile(&alignee, options.abundance_percentile);
        let mut fit_features: Vec<FeatureRecord> =
            fit_indices.iter().map(|&i| alignee[i].clone()).collect();
        if fit_features.len() < alignee.len() {
            info!(
                "Fitting on the {} most abundant of {} features",
                fit_features.len(),
                alignee.len()
            );
        }

        let first_pass = PassConfig {
            mass_tolerance_ppm: options.mass_calibration_window_ppm,
            model: ScoringModel::net_only(NOMINAL_NET_STD, options.net_tolerance),
        };
        let mut pass = self.run_pass(first_pass, baseline, &mut fit_features, progress)?;
        let mut mixture = self.fit_mixture(&pass.matches, first_pass.mass_tolerance_ppm);
        info!(
            "First pass: {} matches, NET std {:.4}, mass std {:.2} ppm",
            pass.matches.len(),
            mixture.std_net,
            mixture.std_mass
        );

        let mut calibration = None;
        if options.alignment_type == AlignmentType::NetMassWarp {
            pass.function.transform_features(&mut alignee, None);
            checkpoint(progress, AlignmentStage::MassCalibration, 0.0)?;
            calibration = self.calibrate_masses(&pass.matches, &mut alignee, &mut fit_features);
            checkpoint(progress, AlignmentStage::MassCalibration, 1.0)?;

            // The first pass fit describes uncalibrated errors; refit on the
            // same pairs after calibration.
            let recalibrated: Vec<CandidateMatch> = pass
                .matches
                .iter()
                .map(|m| {
                    CandidateMatch::new(
                        m.alignee_index,
                        &fit_features[m.alignee_index],
                        m.baseline_index,
                        &baseline[m.baseline_index],
                    )
                })
                .collect();
            let calibrated_fit = self.fit_mixture(&recalibrated, first_pass.mass_tolerance_ppm);

            let second_pass = PassConfig {
                mass_tolerance_ppm: options.mass_tolerance_ppm,
                model: ScoringModel::mass_net(calibrated_fit, options.mass_tolerance_ppm / 3.0),
            };
            pass = self.run_pass(second_pass, baseline, &mut fit_features, progress)?;
            mixture = self.fit_mixture(&pass.matches, second_pass.mass_tolerance_ppm);
            info!(
                "Second pass: {} matches, NET std {:.4}, mass std {:.2} ppm",
                pass.matches.len(),
                mixture.std_net,
                mixture.std_mass
            );
        }

        let scans = match options.baseline_source {
            BaselineSource::Features => ScanMapping::from_features(baseline),
            BaselineSource::MassTags => None,
        };
        pass.function.transform_features(&mut alignee, scans.as_ref());

        let mut matches = pass.matches;
        for m in matches.iter_mut() {
            m.alignee_index = fit_indices[m.alignee_index];
        }
        Ok(self.build_result(pass.function, pass.scores, alignee, matches, mixture, calibration))
    }

    fn run_pass(
        &self,
        config: PassConfig,
        baseline: &[FeatureRecord],
        features: &mut [FeatureRecord],
        progress: &mut dyn AlignmentProgress,
    ) -> Result<PassOutput> {
        let options = &self.options;
        let params = MatchParameters {
            mass_tolerance_ppm: config.mass_tolerance_ppm,
            max_promiscuous_matches: options.max_promiscuous_matches,
            keep_promiscuous_matches: options.keep_promiscuous_matches,
        };
        let mut matches = generate_candidate_matches(baseline, features, &params, progress)?;
        if matches.len() < MIN_REQUIRED_MATCHES {
            return Err(AlignmentError::InsufficientMatches {
                found: matches.len(),
                required: MIN_REQUIRED_MATCHES,
            });
        }

        let alignee_range = net_range(features).ok_or(AlignmentError::NoAligneeData)?;
        let baseline_range = net_range(baseline).ok_or(AlignmentError::NoReferenceData)?;
        let geometry = SectionGeometry::new(
            options.num_sections,
            options.contraction_factor,
            alignee_range,
            baseline_range,
        );
        let (scores, function) = warp_from_matches(
            &matches,
            &geometry,
            &config.model,
            options.max_jump,
            options.min_section_features,
            progress,
        )?;

        function.transform_features(features, None);
        for m in matches.iter_mut() {
            m.set_aligned_net(features[m.alignee_index].net_aligned);
        }
        Ok(PassOutput {
            matches,
            scores,
            function,
        })
    }

    /// Matches whose aligned NET agrees with the baseline within tolerance.
    fn confirmed_matches(&self, matches: &[CandidateMatch]) -> Vec<CandidateMatch> {
        let confirmed: Vec<CandidateMatch> = matches
            .iter()
            .filter(|m| m.net_error.abs() <= self.options.net_tolerance)
            .copied()
            .collect();
        if confirmed.len() < MIN_REQUIRED_MATCHES {
            warn!(
                "Only {} of {} matches fall within the NET tolerance of {}",
                confirmed.len(),
                matches.len(),
                self.options.net_tolerance
            );
        }
        confirmed
    }

    fn fit_mixture(&self, matches: &[CandidateMatch], mass_tolerance_ppm: f64) -> MixtureFit {
        let confirmed = self.confirmed_matches(matches);
        let mass_errors: Vec<f64> = confirmed.iter().map(|m| m.ppm_mass_error).collect();
        let net_errors: Vec<f64> = confirmed.iter().map(|m| m.net_error).collect();
        fit_mass_net(
            &mass_errors,
            &net_errors,
            (mass_tolerance_ppm / 3.0, self.options.net_tolerance),
        )
    }

    /// Fits the mass correction on the confirmed first pass matches and
    /// applies it to both feature sets. Returns `None` when nothing could be
    /// fit; masses are then left as they are.
    fn calibrate_masses(
        &self,
        matches: &[CandidateMatch],
        alignee: &mut [FeatureRecord],
        fit_features: &mut [FeatureRecord],
    ) -> Option<MassCalibration> {
        let confirmed = self.confirmed_matches(matches);
        let options = &self.options;
        match MassCalibration::fit(
            &confirmed,
            fit_features,
            options.calibration_type,
            &options.regression,
            options.mass_calibration_window_ppm,
        ) {
            Ok(calibration) => {
                calibration.apply(alignee);
                calibration.apply(fit_features);
                Some(calibration)
            }
            Err(e) => {
                warn!("Mass calibration skipped: {}", e);
                None
            }
        }
    }

    fn build_result(
        &self,
        function: AlignmentFunction,
        scores: SectionScores,
        alignee: Vec<FeatureRecord>,
        matches: Vec<CandidateMatch>,
        mixture: MixtureFit,
        calibration: Option<MassCalibration>,
    ) -> AlignmentResult {
        let bins = &self.options.histograms;
        let mass_errors: Vec<f64> = matches.iter().map(|m| m.ppm_mass_error).collect();
        let net_errors: Vec<f64> = matches.iter().map(|m| m.net_error).collect();
        let drift_errors: Vec<f64> = matches.iter().map(|m| m.drift_error).collect();
        let aligned: Vec<f64> = matches
            .iter()
            .map(|m| alignee[m.alignee_index].net_aligned)
            .collect();
        let baseline_nets: Vec<f64> = matches.iter().map(|m| m.baseline_net).collect();

        let net_regression = linear_regression(&aligned, &baseline_nets);
        if let Some(fit) = &net_regression {
            debug!(
                "Baseline on aligned NET: slope {:.4}, intercept {:.4}, R² {:.4}",
                fit.slope, fit.intercept, fit.r_squared
            );
        }

        AlignmentResult {
            mass_histogram: histogram(&mass_errors, bins.mass_bin_size),
            net_histogram: histogram(&net_errors, bins.net_bin_size),
            drift_histogram: histogram(&drift_errors, bins.drift_bin_size),
            heat_map: HeatMap::from_scores(&scores),
            net_regression,
            error_summary: ErrorSummary::from_matches(&matches),
            function,
            alignee,
            matches,
            mixture,
            calibration,
        }
    }
}

//! Study orchestration: fans the diagnostics out over features and pT
//! ranges and collects their series into serialisable reports.

use std::path::Path;

use anyhow::Context;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::data::filter::{KinematicRange, Selection, range_label};
use crate::data::history::{HistoryKind, lambda_tag, load_histories};
use crate::data::model::Sample;
use crate::error::{DiagnosticsError, Result};
use crate::loss::{AggregatedCurve, ClassifierCurves, LossReferences, aggregate_adversarial, aggregate_classifier};
use crate::runner::{BoundedTaskRunner, Job, JobFailure};
use crate::stats::density::{Binning, estimate};
use crate::stats::divergence::{
    CutDirection, DivergenceCurve, DivergenceScanner, ScanSettings, weighted_percentile,
};
use crate::stats::entropy::{EntropyEstimate, robust_entropy};
use crate::stats::limit::{LimitCurve, LimitSettings, limit_curve, logistic_points};

/// Per-job seed, so a report does not depend on scheduling order.
pub fn job_seed(seed: u64, job: usize) -> u64 {
    seed ^ (job as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

// ---------------------------------------------------------------------------
// JSD study
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RangeReport {
    pub label: String,
    /// In configuration units (GeV).
    pub range: Option<KinematicRange>,
    pub background_events: usize,
    pub curves: Vec<DivergenceCurve>,
    pub limit: Option<LimitCurve>,
}

impl RangeReport {
    pub fn curve(&self, feature: &str) -> Option<&DivergenceCurve> {
        self.curves.iter().find(|c| c.feature == feature)
    }

    /// Operating points where `feature` sculpts more than `n_sigma` above
    /// the noise floor.
    pub fn significant_points(&self, feature: &str, n_sigma: f64) -> Vec<f64> {
        let (Some(curve), Some(limit)) = (self.curve(feature), &self.limit) else {
            return Vec::new();
        };
        curve
            .points
            .iter()
            .filter(|p| limit.is_significant(p.operating_point, p.jsd, n_sigma) == Some(true))
            .map(|p| p.operating_point)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyReport {
    pub seed: u64,
    pub ranges: Vec<RangeReport>,
    pub failures: Vec<JobFailure>,
}

enum StudyOutput {
    Scan(usize, DivergenceCurve),
    Limit(usize, LimitCurve),
}

/// Scan every feature in every configured pT range and estimate the noise
/// floor per range. Failed jobs are listed in the report; the rest of the
/// study still completes.
pub fn run_jsd_study(
    sample: &Sample,
    features: &[String],
    cfg: &AnalysisConfig,
) -> anyhow::Result<StudyReport> {
    cfg.validate()?;
    if let Some(missing) = features.iter().find(|f| !sample.has_column(f)) {
        anyhow::bail!("feature '{missing}' is not a column of the sample");
    }

    let scan = ScanSettings::from_config(cfg);
    let limit = LimitSettings::from_config(cfg);
    let points = logistic_points(cfg.limit_points, cfg.limit_logit_span);

    let mut ranges = Vec::with_capacity(cfg.pt_ranges.len());
    let mut backgrounds = Vec::with_capacity(cfg.pt_ranges.len());
    for (range, scaled) in cfg.pt_ranges.iter().zip(cfg.scaled_pt_ranges()) {
        let background = Selection::background()
            .with_optional_range(&cfg.pt_column, scaled)
            .apply(sample)?;
        let label = range_label(range.as_ref());
        log::info!("{label}: {} background events", background.len());
        ranges.push(RangeReport {
            label,
            range: *range,
            background_events: background.len(),
            curves: Vec::new(),
            limit: None,
        });
        backgrounds.push(background);
    }

    let mut jobs = Vec::new();
    for (r, background) in backgrounds.iter().enumerate() {
        let label = ranges[r].label.as_str();
        for feature in features {
            let scan = &scan;
            jobs.push(Job::new(format!("{feature} @ {label}"), move || {
                let curve = DivergenceScanner::new(background, scan)?.scan(
                    feature,
                    &cfg.operating_points,
                    cfg.cut_direction(feature),
                )?;
                log::info!("{feature} @ {label}: {} operating points", curve.points.len());
                Ok(StudyOutput::Scan(r, curve))
            }));
        }

        let seed = job_seed(cfg.seed, jobs.len());
        let (scan, limit, points) = (&scan, &limit, &points);
        jobs.push(Job::new(format!("limit @ {label}"), move || {
            let mut rng = StdRng::seed_from_u64(seed);
            let curve = limit_curve(background, points, limit, scan, &mut rng)?;
            log::info!("limit @ {label}: {} trials", curve.trials);
            Ok(StudyOutput::Limit(r, curve))
        }));
    }

    let run = BoundedTaskRunner::new(cfg.max_parallel).run(jobs);
    for (_, output) in run.outputs {
        match output {
            StudyOutput::Scan(r, curve) => ranges[r].curves.push(curve),
            StudyOutput::Limit(r, curve) => ranges[r].limit = Some(curve),
        }
    }
    if !run.failures.is_empty() {
        log::warn!("{} study jobs failed", run.failures.len());
    }

    Ok(StudyReport {
        seed: cfg.seed,
        ranges,
        failures: run.failures,
    })
}

// ---------------------------------------------------------------------------
// Jet-mass comparison at fixed signal efficiency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CutSummary {
    pub feature: String,
    pub direction: CutDirection,
    pub target_efficiency: f64,
    pub cut: f64,
    pub signal_efficiency: f64,
    pub background_rejection: f64,
    /// Mass density of background passing the cut, `(bin centre, density)`.
    pub background_pass_mass: Vec<(f64, f64)>,
}

/// Cut `feature` so that a fraction `eff_sig` of the (weighted) signal
/// passes, and report what it does to the background.
pub fn signal_efficiency_cut(
    sample: &Sample,
    feature: &str,
    eff_sig: f64,
    direction: CutDirection,
    scan: &ScanSettings,
) -> Result<CutSummary> {
    if !(0.0..=1.0).contains(&eff_sig) {
        return Err(DiagnosticsError::InvalidArgument(format!(
            "signal efficiency {eff_sig} is outside [0, 1]"
        )));
    }
    let scores = sample.column(feature)?;
    let mass = sample.column(&scan.mass_column)?;
    let signal = sample.signal();

    let sig_rows: Vec<usize> = (0..sample.len()).filter(|&i| signal[i]).collect();
    if sig_rows.is_empty() || sig_rows.len() == sample.len() {
        return Err(DiagnosticsError::EmptySample);
    }
    let sig_scores: Vec<f64> = sig_rows.iter().map(|&i| scores[i]).collect();
    let sig_weights: Option<Vec<f64>> = sample
        .weights()
        .map(|w| sig_rows.iter().map(|&i| w[i]).collect());
    let cut = weighted_percentile(
        &sig_scores,
        sig_weights.as_deref(),
        direction.percentile(eff_sig),
    )?;

    let (mut sig_pass, mut sig_all, mut bkg_pass, mut bkg_all) = (0.0, 0.0, 0.0, 0.0);
    let mut pass_mass = Vec::new();
    let mut pass_weights = Vec::new();
    for i in 0..sample.len() {
        let w = sample.weight(i);
        let pass = direction.passes(scores[i], cut);
        if signal[i] {
            sig_all += w;
            if pass {
                sig_pass += w;
            }
        } else {
            bkg_all += w;
            if pass {
                bkg_pass += w;
                pass_mass.push(mass[i]);
                pass_weights.push(w);
            }
        }
    }

    let background_pass_mass = if pass_mass.is_empty() {
        Vec::new()
    } else {
        estimate(
            &[pass_mass.as_slice()],
            Some(pass_weights.as_slice()),
            &Binning::Edges(vec![scan.mass_bin_edges.clone()]),
        )?
        .series()
    };

    let summary = CutSummary {
        feature: feature.to_string(),
        direction,
        target_efficiency: eff_sig,
        cut,
        signal_efficiency: sig_pass / sig_all,
        background_rejection: 1.0 - bkg_pass / bkg_all,
        background_pass_mass,
    };
    log::info!(
        "{feature} {} {cut:.4}: ε_sig = {:.1}%, background rejection = {:.4}%",
        direction.symbol(),
        100.0 * summary.signal_efficiency,
        100.0 * summary.background_rejection
    );
    Ok(summary)
}

/// [`signal_efficiency_cut`] for each feature at one signal efficiency.
pub fn run_mass_comparison(
    sample: &Sample,
    features: &[String],
    eff_sig: f64,
    cfg: &AnalysisConfig,
) -> Result<Vec<CutSummary>> {
    let scan = ScanSettings::from_config(cfg);
    features
        .iter()
        .map(|f| signal_efficiency_cut(sample, f, eff_sig, cfg.cut_direction(f), &scan))
        .collect()
}

// ---------------------------------------------------------------------------
// Prior entropy and loss studies
// ---------------------------------------------------------------------------

/// Robust entropy of the decorrelation prior: the joint density of
/// `columns` over background training events.
pub fn prior_entropy<R: Rng>(
    sample: &Sample,
    columns: &[&str],
    cfg: &AnalysisConfig,
    rng: &mut R,
) -> Result<EntropyEstimate> {
    let background = Selection::background().with_train(true).apply(sample)?;
    if background.is_empty() {
        return Err(DiagnosticsError::EmptySample);
    }
    let values = columns
        .iter()
        .map(|c| background.column(c))
        .collect::<Result<Vec<_>>>()?;
    let estimate = robust_entropy(
        &values,
        background.weights(),
        cfg.num_bins,
        cfg.bootstrap_trials,
        cfg.epsilon,
        rng,
    )?;
    log::info!("Entropy of prior: {estimate}");
    Ok(estimate)
}

#[derive(Debug, Clone, Serialize)]
pub struct LossReport {
    pub lambda: f64,
    pub lambda_tag: String,
    /// `None` for a single full-data run.
    pub num_folds: Option<usize>,
    pub curve: AggregatedCurve,
    pub references: LossReferences,
}

/// Aggregate the adversarial histories for one λ found in `dir`.
pub fn run_loss_study(
    dir: &Path,
    lambda: f64,
    num_folds: Option<usize>,
    prior_entropy: Option<f64>,
    pretrain_epochs: Option<usize>,
) -> anyhow::Result<LossReport> {
    let tag = lambda_tag(lambda);
    let kind = HistoryKind::Adversarial {
        lambda_tag: tag.clone(),
    };
    let records = load_histories(dir, &kind, num_folds)?;
    let curve = aggregate_adversarial(&records, lambda)
        .with_context(|| format!("aggregating λ = {lambda} histories in {}", dir.display()))?;
    let references = LossReferences::from_curve(&curve, prior_entropy, pretrain_epochs)?;
    Ok(LossReport {
        lambda,
        lambda_tag: tag,
        num_folds,
        curve,
        references,
    })
}

/// Aggregate the standalone classifier histories of `experiment`.
pub fn run_classifier_loss_study(
    dir: &Path,
    experiment: &str,
    num_folds: Option<usize>,
) -> anyhow::Result<ClassifierCurves> {
    let kind = HistoryKind::Classifier {
        experiment: experiment.to_string(),
    };
    let records = load_histories(dir, &kind, num_folds)?;
    Ok(aggregate_classifier(&records)
        .with_context(|| format!("aggregating '{experiment}' histories in {}", dir.display()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CutPolicy;
    use approx::assert_abs_diff_eq;

    /// Background with mass uniform in 50–300 GeV and two taggers: `NN`
    /// rises with mass, `ANN` is independent of it. Signal sits at high
    /// tagger values.
    fn toy_sample(n: usize, seed: u64) -> Sample {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut signal = Vec::with_capacity(n);
        let (mut m, mut pt, mut nn, mut ann) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        for i in 0..n {
            let is_sig = i % 4 == 0;
            let mass = rng.random_range(50.0..300.0);
            let noise: f64 = rng.random();
            signal.push(is_sig);
            m.push(mass);
            pt.push(rng.random_range(200.0..1000.0));
            if is_sig {
                nn.push(0.7 + 0.3 * noise);
                ann.push(0.7 + 0.3 * noise);
            } else {
                nn.push(0.7 * (mass - 50.0) / 250.0 * 0.8 + 0.2 * 0.7 * noise);
                ann.push(0.7 * rng.random::<f64>());
            }
        }
        Sample::builder(signal)
            .column("m", m)
            .column("pt", pt)
            .column("NN", nn)
            .column("ANN", ann)
            .build()
            .unwrap()
    }

    fn test_config() -> AnalysisConfig {
        AnalysisConfig {
            pt_ranges: vec![None, Some(KinematicRange::new(200.0, 500.0))],
            operating_points: vec![0.1, 0.3, 0.5],
            limit_points: 5,
            limit_trials: 3,
            max_parallel: 2,
            cut_policy: CutPolicy::Resample,
            ..Default::default()
        }
    }

    #[test]
    fn jsd_study_covers_every_range_and_feature() {
        let sample = toy_sample(8000, 51);
        let features = vec!["NN".to_string(), "ANN".to_string()];
        let report = run_jsd_study(&sample, &features, &test_config()).unwrap();

        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.ranges.len(), 2);
        assert_eq!(report.ranges[0].label, "inclusive");
        assert_eq!(report.ranges[0].background_events, 6000);
        for range in &report.ranges {
            let names: Vec<&str> = range.curves.iter().map(|c| c.feature.as_str()).collect();
            assert_eq!(names, vec!["NN", "ANN"]);
            assert_eq!(range.limit.as_ref().unwrap().points.len(), 5);
        }

        let inclusive = &report.ranges[0];
        let nn = inclusive.curve("NN").unwrap();
        let ann = inclusive.curve("ANN").unwrap();
        for (a, b) in nn.points.iter().zip(&ann.points) {
            assert!(a.jsd > 10.0 * b.jsd, "NN {} vs ANN {}", a.jsd, b.jsd);
        }
        assert_eq!(inclusive.significant_points("NN", 3.0).len(), 3);
    }

    #[test]
    fn jsd_study_is_reproducible() {
        let sample = toy_sample(3000, 52);
        let features = vec!["ANN".to_string()];
        let a = run_jsd_study(&sample, &features, &test_config()).unwrap();
        let b = run_jsd_study(&sample, &features, &test_config()).unwrap();
        assert_eq!(a.ranges[1].limit, b.ranges[1].limit);
    }

    #[test]
    fn unknown_feature_is_rejected_up_front() {
        let sample = toy_sample(100, 53);
        assert!(run_jsd_study(&sample, &["D2".to_string()], &test_config()).is_err());
    }

    #[test]
    fn empty_range_is_reported_not_fatal() {
        let sample = toy_sample(2000, 54);
        let cfg = AnalysisConfig {
            pt_ranges: vec![None, Some(KinematicRange::new(5000.0, 6000.0))],
            ..test_config()
        };
        let report = run_jsd_study(&sample, &["ANN".to_string()], &cfg).unwrap();
        assert_eq!(report.ranges[0].curves.len(), 1);
        assert!(report.ranges[1].curves.is_empty());
        assert!(report.ranges[1].limit.is_none());
        assert_eq!(report.failures.len(), 2);
    }

    #[test]
    fn signal_efficiency_cut_hits_its_target() {
        let sample = toy_sample(8000, 55);
        let scan = ScanSettings::from_config(&AnalysisConfig::default());
        let summary =
            signal_efficiency_cut(&sample, "ANN", 0.5, CutDirection::PassAbove, &scan).unwrap();
        assert_abs_diff_eq!(summary.signal_efficiency, 0.5, epsilon = 0.01);
        // Background ANN stays below 0.7, signal sits above it.
        assert_abs_diff_eq!(summary.background_rejection, 1.0);
        assert!(summary.background_pass_mass.is_empty());

        // Signal and background share the mass spectrum.
        let by_mass = signal_efficiency_cut(&sample, "m", 0.5, CutDirection::PassAbove, &scan).unwrap();
        assert_abs_diff_eq!(by_mass.background_rejection, 0.5, epsilon = 0.05);
        assert_eq!(by_mass.background_pass_mass.len(), 50);
    }

    #[test]
    fn mass_comparison_flips_signal_low_features() {
        let sample = toy_sample(4000, 56);
        let cfg = AnalysisConfig {
            signal_low_features: vec!["ANN".into()],
            ..Default::default()
        };
        let out = run_mass_comparison(&sample, &["NN".into(), "ANN".into()], 0.5, &cfg).unwrap();
        assert_eq!(out[0].direction, CutDirection::PassAbove);
        assert_eq!(out[1].direction, CutDirection::PassBelow);
        assert_abs_diff_eq!(out[1].signal_efficiency, 0.5, epsilon = 0.01);
    }

    #[test]
    fn prior_entropy_of_uniform_mass() {
        let sample = toy_sample(20_000, 57);
        let mut rng = StdRng::seed_from_u64(58);
        let est = prior_entropy(&sample, &["m"], &AnalysisConfig::default(), &mut rng).unwrap();
        assert_abs_diff_eq!(est.mean, 250.0f64.ln(), epsilon = 0.05);
        assert_eq!(est.num_bins, 30);
    }

    #[test]
    fn job_seeds_differ() {
        assert_ne!(job_seed(42, 0), job_seed(42, 1));
        assert_ne!(job_seed(42, 0), 42);
    }
}

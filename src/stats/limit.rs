//! Bootstrap noise floor for JSD scans.
//!
//! The background sample is resampled with replacement and split by a score
//! at each operating point; the spread of the resulting JSD values is the
//! level a measured curve must clear before it signals real sculpting.

use rand::Rng;
use serde::Serialize;

use super::bootstrap::{BootstrapDraw, mean_std};
use super::divergence::{CutDirection, ScanSettings, pass_fail_jsd, weighted_percentile};
use crate::config::{AnalysisConfig, CutPolicy, LimitProxy};
use crate::data::model::Sample;
use crate::error::{DiagnosticsError, Result};

/// Efficiencies spread on a logit axis: `σ(t)` for `n` values of `t`
/// evenly spaced in `[-span, span]`. Dense near 0 and 1.
pub fn logistic_points(n: usize, span: f64) -> Vec<f64> {
    let sigmoid = |t: f64| 1.0 / (1.0 + (-t).exp());
    match n {
        0 => Vec::new(),
        1 => vec![0.5],
        _ => (0..n)
            .map(|i| sigmoid(-span + 2.0 * span * i as f64 / (n - 1) as f64))
            .collect(),
    }
}

/// Repeated moving average. Each pass replaces every value by the mean of
/// its `±half_window` neighbours; the window shrinks at the ends.
pub fn smooth(values: &[f64], passes: usize, half_window: usize) -> Vec<f64> {
    let mut current = values.to_vec();
    for _ in 0..passes {
        current = (0..current.len())
            .map(|i| {
                let lo = i.saturating_sub(half_window);
                let hi = (i + half_window + 1).min(current.len());
                current[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
            })
            .collect();
    }
    current
}

// ---------------------------------------------------------------------------
// Settings and result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LimitSettings {
    pub trials: usize,
    pub smoothing_passes: usize,
    pub smoothing_half_window: usize,
    pub cut_policy: CutPolicy,
    pub proxy: LimitProxy,
    pub direction: CutDirection,
}

impl LimitSettings {
    pub fn from_config(cfg: &AnalysisConfig) -> Self {
        let direction = match &cfg.limit_proxy {
            LimitProxy::Feature(name) => cfg.cut_direction(name),
            LimitProxy::Uniform => CutDirection::PassAbove,
        };
        Self {
            trials: cfg.limit_trials,
            smoothing_passes: cfg.smoothing_passes,
            smoothing_half_window: cfg.smoothing_half_window,
            cut_policy: cfg.cut_policy,
            proxy: cfg.limit_proxy.clone(),
            direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LimitPoint {
    pub x: f64,
    pub mean: f64,
    pub std: f64,
}

/// Smoothed `(x, mean JSD, std JSD)` band, ordered by `x`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitCurve {
    pub points: Vec<LimitPoint>,
    pub trials: usize,
    pub cut_policy: CutPolicy,
}

impl LimitCurve {
    /// Band `(mean, std)` at `x`, linearly interpolated. `None` outside the
    /// scanned range.
    pub fn band_at(&self, x: f64) -> Option<(f64, f64)> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if x < first.x || x > last.x {
            return None;
        }
        if self.points.len() == 1 {
            return Some((first.mean, first.std));
        }
        let upper = self
            .points
            .partition_point(|p| p.x < x)
            .clamp(1, self.points.len() - 1);
        let (a, b) = (&self.points[upper - 1], &self.points[upper]);
        if b.x <= a.x {
            return Some((b.mean, b.std));
        }
        let t = (x - a.x) / (b.x - a.x);
        Some((
            a.mean + t * (b.mean - a.mean),
            a.std + t * (b.std - a.std),
        ))
    }

    /// Whether `jsd` at `x` sits more than `n_sigma` standard deviations
    /// above the band mean. `None` outside the scanned range.
    pub fn is_significant(&self, x: f64, jsd: f64, n_sigma: f64) -> Option<bool> {
        self.band_at(x)
            .map(|(mean, std)| jsd > mean + n_sigma * std)
    }
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Bootstrap the pass/fail JSD of `background` at each point in `points`.
///
/// Proxy scores are fixed once per call (a uniform draw per row, or the
/// named feature) and travel with their rows through every resample, so
/// [`CutPolicy::Fixed`] and [`CutPolicy::Resample`] differ only in where
/// the cut value is derived.
pub fn limit_curve<R: Rng>(
    background: &Sample,
    points: &[f64],
    limit: &LimitSettings,
    scan: &ScanSettings,
    rng: &mut R,
) -> Result<LimitCurve> {
    if background.is_empty() {
        return Err(DiagnosticsError::EmptySample);
    }
    if limit.trials == 0 {
        return Err(DiagnosticsError::InvalidArgument(
            "limit curve needs at least one bootstrap trial".into(),
        ));
    }

    let n = background.len();
    let mass = background.column(&scan.mass_column)?;
    let weights = background.weights();
    let (label, scores): (&str, Vec<f64>) = match &limit.proxy {
        LimitProxy::Uniform => ("uniform proxy", (0..n).map(|_| rng.random::<f64>()).collect()),
        LimitProxy::Feature(name) => (name.as_str(), background.column(name)?.to_vec()),
    };

    let mut means = Vec::with_capacity(points.len());
    let mut stds = Vec::with_capacity(points.len());
    for &x in points {
        let percentile = limit.direction.percentile(x);
        let nominal_cut = match limit.cut_policy {
            CutPolicy::Fixed => Some(weighted_percentile(&scores, weights, percentile)?),
            CutPolicy::Resample => None,
        };

        let mut values = Vec::with_capacity(limit.trials);
        for _ in 0..limit.trials {
            let draw = BootstrapDraw::draw(n, rng);
            let m = draw.apply(mass);
            let s = draw.apply(&scores);
            let w = weights.map(|w| draw.apply(w));
            let cut = match nominal_cut {
                Some(cut) => cut,
                None => weighted_percentile(&s, w.as_deref(), percentile)?,
            };
            values.push(pass_fail_jsd(
                &m,
                w.as_deref(),
                &s,
                cut,
                limit.direction,
                scan,
                (label, x),
            )?);
        }
        let (mean, std) = mean_std(&values);
        log::debug!("limit at ε = {x:.4}: JSD = {mean:.3e} ± {std:.3e}");
        means.push(mean);
        stds.push(std);
    }

    let means = smooth(&means, limit.smoothing_passes, limit.smoothing_half_window);
    let stds = smooth(&stds, limit.smoothing_passes, limit.smoothing_half_window);

    Ok(LimitCurve {
        points: points
            .iter()
            .zip(means.into_iter().zip(stds))
            .map(|(&x, (mean, std))| LimitPoint { x, mean, std })
            .collect(),
        trials: limit.trials,
        cut_policy: limit.cut_policy,
    })
}

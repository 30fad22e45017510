//! Jensen–Shannon mass-sculpting scans.
//!
//! For each background efficiency the tagger cut is placed at the matching
//! weighted percentile of the background score distribution, background is
//! split into pass and fail, and the base-2 JSD between the two mass
//! densities is recorded. A tagger that leaves the mass spectrum alone gives
//! JSD ≈ 0 at every operating point.

use serde::{Deserialize, Serialize};

use super::density::{Binning, Density, estimate};
use crate::config::AnalysisConfig;
use crate::data::model::Sample;
use crate::error::{DiagnosticsError, Result};

// ---------------------------------------------------------------------------
// Information measures
// ---------------------------------------------------------------------------

/// `KL₂(A‖B) = Σ A·log₂((A+ε)/(B+ε))·V` over a shared binning.
pub fn kl_divergence(a: &Density, b: &Density, epsilon: f64) -> Result<f64> {
    if !a.same_binning(b) {
        return Err(DiagnosticsError::InvalidBinning(
            "KL divergence needs densities on the same edges".into(),
        ));
    }
    Ok(a.content()
        .iter()
        .zip(b.content())
        .zip(a.volumes())
        .map(|((&pa, &pb), &v)| pa * ((pa + epsilon) / (pb + epsilon)).log2() * v)
        .sum())
}

/// `JSD₂(P,Q) = ½·KL₂(P‖M) + ½·KL₂(Q‖M)` with `M = (P+Q)/2`.
pub fn jensen_shannon(p: &Density, q: &Density, epsilon: f64) -> Result<f64> {
    let m = p.mixture(q)?;
    Ok(0.5 * kl_divergence(p, &m, epsilon)? + 0.5 * kl_divergence(q, &m, epsilon)?)
}

// ---------------------------------------------------------------------------
// Cuts
// ---------------------------------------------------------------------------

/// Which tail of a tagger score is signal-like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CutDirection {
    /// Rows with `score > cut` pass.
    #[default]
    PassAbove,
    /// Rows with `score <= cut` pass.
    PassBelow,
}

impl CutDirection {
    /// Percentile (0–100) of the background score distribution that lets a
    /// fraction `efficiency` of background pass.
    pub fn percentile(self, efficiency: f64) -> f64 {
        match self {
            CutDirection::PassAbove => 100.0 * (1.0 - efficiency),
            CutDirection::PassBelow => 100.0 * efficiency,
        }
    }

    /// NaN scores never pass.
    pub fn passes(self, score: f64, cut: f64) -> bool {
        match self {
            CutDirection::PassAbove => score > cut,
            CutDirection::PassBelow => score <= cut,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CutDirection::PassAbove => ">",
            CutDirection::PassBelow => "<",
        }
    }
}

/// Weighted `q`-th percentile (0–100) with linear interpolation.
///
/// NaN values and non-positive weights are skipped. Each value sits at the
/// midpoint of its cumulative weight, rescaled so the smallest value is
/// percentile 0 and the largest 100; with equal weights this is the usual
/// linear-interpolation percentile.
pub fn weighted_percentile(values: &[f64], weights: Option<&[f64]>, q: f64) -> Result<f64> {
    if let Some(w) = weights {
        if w.len() != values.len() {
            return Err(DiagnosticsError::WeightLength {
                weights: w.len(),
                rows: values.len(),
            });
        }
    }
    let mut pairs: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (v, weights.map_or(1.0, |w| w[i])))
        .filter(|&(v, w)| !v.is_nan() && w > 0.0)
        .collect();
    match pairs.len() {
        0 => return Err(DiagnosticsError::EmptySample),
        1 => return Ok(pairs[0].0),
        _ => {}
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let first = pairs[0].1;
    let last = pairs[pairs.len() - 1].1;
    let total: f64 = pairs.iter().map(|p| p.1).sum();
    let span = total - 0.5 * (first + last);

    let mut cumulative = 0.0;
    let positions: Vec<f64> = pairs
        .iter()
        .map(|&(_, w)| {
            cumulative += w;
            (cumulative - 0.5 * w - 0.5 * first) / span
        })
        .collect();

    let target = (q / 100.0).clamp(0.0, 1.0);
    let upper = positions
        .partition_point(|&p| p < target)
        .clamp(1, pairs.len() - 1);
    let (p0, p1) = (positions[upper - 1], positions[upper]);
    let (v0, v1) = (pairs[upper - 1].0, pairs[upper].0);
    if p1 <= p0 {
        return Ok(v1);
    }
    Ok(v0 + (v1 - v0) * (target - p0) / (p1 - p0))
}

// ---------------------------------------------------------------------------
// Curves
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DivergencePoint {
    /// Background efficiency in (0, 1).
    pub operating_point: f64,
    pub cut: f64,
    pub jsd: f64,
}

/// One JSD value per scanned efficiency, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivergenceCurve {
    pub feature: String,
    pub direction: CutDirection,
    pub points: Vec<DivergencePoint>,
}

impl DivergenceCurve {
    /// `(operating_point, jsd)` pairs for the renderer.
    pub fn series(&self) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (p.operating_point, p.jsd))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Mass axis and log guard shared by every scan of a study.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    pub mass_column: String,
    /// Fixed physical binning, in sample units.
    pub mass_bin_edges: Vec<f64>,
    pub epsilon: f64,
}

impl ScanSettings {
    pub fn from_config(cfg: &AnalysisConfig) -> Self {
        Self {
            mass_column: cfg.mass_column.clone(),
            mass_bin_edges: cfg.mass_edges(),
            epsilon: cfg.epsilon,
        }
    }
}

/// Split rows by `cut` and compare the pass/fail mass densities.
///
/// Only rows inside the mass window count. `label` names the feature and
/// operating point for the error raised when either side has no rows there.
pub(crate) fn pass_fail_jsd(
    mass: &[f64],
    weights: Option<&[f64]>,
    scores: &[f64],
    cut: f64,
    direction: CutDirection,
    settings: &ScanSettings,
    label: (&str, f64),
) -> Result<f64> {
    let edges = &settings.mass_bin_edges;
    let (Some(&lo), Some(&hi)) = (edges.first(), edges.last()) else {
        return Err(DiagnosticsError::InvalidBinning(
            "mass window needs at least two edges".into(),
        ));
    };

    let mut pass = (Vec::new(), Vec::new());
    let mut fail = (Vec::new(), Vec::new());
    for (i, (&m, &s)) in mass.iter().zip(scores).enumerate() {
        if !(lo..=hi).contains(&m) {
            continue;
        }
        let side = if direction.passes(s, cut) {
            &mut pass
        } else {
            &mut fail
        };
        side.0.push(m);
        side.1.push(weights.map_or(1.0, |w| w[i]));
    }

    if pass.0.is_empty() || fail.0.is_empty() {
        return Err(DiagnosticsError::DegenerateCut {
            feature: label.0.to_string(),
            operating_point: label.1,
            pass: pass.0.len(),
            fail: fail.0.len(),
        });
    }

    let binning = Binning::Edges(vec![edges.clone()]);
    let p = estimate(&[pass.0.as_slice()], Some(pass.1.as_slice()), &binning)?;
    let f = estimate(&[fail.0.as_slice()], Some(fail.1.as_slice()), &binning)?;
    jensen_shannon(&p, &f, settings.epsilon)
}

/// Scans one background sample. The sample must already be restricted to
/// background rows (and any kinematic range).
#[derive(Debug, Clone, Copy)]
pub struct DivergenceScanner<'a> {
    background: &'a Sample,
    settings: &'a ScanSettings,
}

impl<'a> DivergenceScanner<'a> {
    pub fn new(background: &'a Sample, settings: &'a ScanSettings) -> Result<Self> {
        if background.is_empty() {
            return Err(DiagnosticsError::EmptySample);
        }
        background.column(&settings.mass_column)?;
        Ok(Self {
            background,
            settings,
        })
    }

    /// JSD between pass and fail mass densities at each operating point.
    pub fn scan(
        &self,
        feature: &str,
        operating_points: &[f64],
        direction: CutDirection,
    ) -> Result<DivergenceCurve> {
        let scores = self.background.column(feature)?;
        let mass = self.background.column(&self.settings.mass_column)?;
        let weights = self.background.weights();

        let points = operating_points
            .iter()
            .map(|&eff| {
                if !(0.0..=1.0).contains(&eff) {
                    return Err(DiagnosticsError::InvalidArgument(format!(
                        "operating point {eff} is outside [0, 1]"
                    )));
                }
                let cut = weighted_percentile(scores, weights, direction.percentile(eff))?;
                let jsd = pass_fail_jsd(
                    mass,
                    weights,
                    scores,
                    cut,
                    direction,
                    self.settings,
                    (feature, eff),
                )?;
                log::debug!(
                    "{feature} {} {cut:.4} at ε_bkg = {eff:.2}: JSD = {jsd:.3e}",
                    direction.symbol()
                );
                Ok(DivergencePoint {
                    operating_point: eff,
                    cut,
                    jsd,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DivergenceCurve {
            feature: feature.to_string(),
            direction,
            points,
        })
    }
}

use std::fmt;

use rand::Rng;
use serde::Serialize;

use super::bootstrap::{BootstrapDraw, mean_std};
use super::density::{Binning, Density, default_bins, estimate};
use crate::error::{DiagnosticsError, Result};

/// Plug-in differential entropy of a histogram density (natural log):
/// `H = −Σ p·ln(p + ε)·V`.
pub fn differential_entropy(density: &Density, epsilon: f64) -> f64 {
    -density
        .content()
        .iter()
        .zip(density.volumes())
        .map(|(&p, &v)| p * (p + epsilon).ln() * v)
        .sum::<f64>()
}

/// Entropy of the density estimated from `columns` with `num_bins` per
/// dimension over the observed range.
pub fn entropy(
    columns: &[&[f64]],
    weights: Option<&[f64]>,
    num_bins: usize,
    epsilon: f64,
) -> Result<f64> {
    let density = estimate(columns, weights, &Binning::Count(num_bins))?;
    Ok(differential_entropy(&density, epsilon))
}

// ---------------------------------------------------------------------------
// Robust estimate
// ---------------------------------------------------------------------------

/// Entropy with its two error components kept apart.
///
/// `stat_err` is the bootstrap spread at the nominal binning; `syst_err` is
/// the largest shift seen when halving or doubling the bin count. No bias
/// correction is applied to the plug-in estimate; its discretisation offset
/// shows up in `syst_err`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EntropyEstimate {
    pub mean: f64,
    pub stat_err: f64,
    pub syst_err: f64,
    pub num_bins: usize,
}

impl fmt::Display for EntropyEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:7.4} ± {:6.4} (stat.) ± {:6.4} (syst.)",
            self.mean, self.stat_err, self.syst_err
        )
    }
}

/// Entropy with bin-count sensitivity and bootstrap spread.
///
/// `num_bins = None` uses `round(30/√D)`. Each of the `bootstrap_trials`
/// draws resamples rows (values and weights together) with replacement.
pub fn robust_entropy<R: Rng>(
    columns: &[&[f64]],
    weights: Option<&[f64]>,
    num_bins: Option<usize>,
    bootstrap_trials: usize,
    epsilon: f64,
    rng: &mut R,
) -> Result<EntropyEstimate> {
    if bootstrap_trials == 0 {
        return Err(DiagnosticsError::InvalidArgument(
            "robust entropy needs at least one bootstrap trial".into(),
        ));
    }
    let num_bins = num_bins.unwrap_or_else(|| default_bins(columns.len()));

    let mean = entropy(columns, weights, num_bins, epsilon)?;
    let coarse = entropy(columns, weights, (num_bins / 2).max(1), epsilon)?;
    let fine = entropy(columns, weights, num_bins * 2, epsilon)?;
    let syst_err = (mean - coarse).abs().max((mean - fine).abs());

    let n = columns.first().map_or(0, |c| c.len());
    let mut trials = Vec::with_capacity(bootstrap_trials);
    for _ in 0..bootstrap_trials {
        let draw = BootstrapDraw::draw(n, rng);
        let resampled: Vec<Vec<f64>> = columns.iter().map(|c| draw.apply(c)).collect();
        let refs: Vec<&[f64]> = resampled.iter().map(Vec::as_slice).collect();
        let w = weights.map(|w| draw.apply(w));
        trials.push(entropy(&refs, w.as_deref(), num_bins, epsilon)?);
    }
    let (_, stat_err) = mean_std(&trials);

    log::debug!("entropy {mean:.4} ± {stat_err:.4} (stat.) ± {syst_err:.4} (syst.), {num_bins} bins");
    Ok(EntropyEstimate {
        mean,
        stat_err,
        syst_err,
        num_bins,
    })
}

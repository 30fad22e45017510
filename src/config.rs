use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::filter::KinematicRange;
use crate::stats::divergence::CutDirection;
use crate::stats::LOG_GUARD;

// ---------------------------------------------------------------------------
// Bootstrap-limit policies
// ---------------------------------------------------------------------------

/// Where the cut value comes from when the limit estimator resamples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CutPolicy {
    /// Re-derive the percentile cut on every bootstrap draw. The band then
    /// includes the cut-location variance.
    #[default]
    Resample,
    /// Derive the cut once on the nominal sample and apply it to every draw.
    /// The band then only reflects histogram-sampling variance.
    Fixed,
}

/// Score used to split the resampled background into pass/fail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LimitProxy {
    /// A uniform random score drawn per row, independent of mass.
    #[default]
    Uniform,
    /// An existing feature column of the sample.
    Feature(String),
}

// ---------------------------------------------------------------------------
// AnalysisConfig
// ---------------------------------------------------------------------------

/// Immutable settings shared by every diagnostic of one study invocation.
///
/// Energies (`mass_bin_edges`, `pt_ranges`) are written in GeV and scaled by
/// `energy_scale` to the unit of the sample columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Bins per dimension for entropy densities. `None` picks `round(30/√D)`.
    #[serde(default)]
    pub num_bins: Option<usize>,
    #[serde(default = "AnalysisConfig::default_bootstrap_trials")]
    pub bootstrap_trials: usize,
    #[serde(default = "AnalysisConfig::default_limit_trials")]
    pub limit_trials: usize,
    #[serde(default = "AnalysisConfig::default_smoothing_passes")]
    pub smoothing_passes: usize,
    #[serde(default = "AnalysisConfig::default_smoothing_half_window")]
    pub smoothing_half_window: usize,
    #[serde(default = "AnalysisConfig::default_mass_bin_edges")]
    pub mass_bin_edges: Vec<f64>,
    #[serde(default = "AnalysisConfig::default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "AnalysisConfig::default_lambda_reg")]
    pub lambda_reg: f64,
    /// Background efficiencies scanned by the divergence scanner, in (0, 1).
    #[serde(default = "AnalysisConfig::default_operating_points")]
    pub operating_points: Vec<f64>,
    #[serde(default = "AnalysisConfig::default_limit_points")]
    pub limit_points: usize,
    /// Half-width of the logit axis the limit points are spread over.
    #[serde(default = "AnalysisConfig::default_limit_logit_span")]
    pub limit_logit_span: f64,
    #[serde(default)]
    pub cut_policy: CutPolicy,
    #[serde(default)]
    pub limit_proxy: LimitProxy,
    #[serde(default = "AnalysisConfig::default_seed")]
    pub seed: u64,
    #[serde(default = "AnalysisConfig::default_max_parallel")]
    pub max_parallel: usize,
    /// `None` entries mean "no pT restriction".
    #[serde(default = "AnalysisConfig::default_pt_ranges")]
    pub pt_ranges: Vec<Option<KinematicRange>>,
    #[serde(default = "AnalysisConfig::default_energy_scale")]
    pub energy_scale: f64,
    #[serde(default = "AnalysisConfig::default_mass_column")]
    pub mass_column: String,
    #[serde(default = "AnalysisConfig::default_pt_column")]
    pub pt_column: String,
    #[serde(default = "AnalysisConfig::default_weight_column")]
    pub weight_column: Option<String>,
    /// Features whose signal-like region is the low-value tail.
    #[serde(default)]
    pub signal_low_features: Vec<String>,
    /// Adversary pre-training epochs, marked on loss plots.
    #[serde(default)]
    pub pretrain_epochs: Option<usize>,
    /// Entropy of the decorrelation prior, when known.
    #[serde(default)]
    pub prior_entropy: Option<f64>,
}

impl AnalysisConfig {
    fn default_bootstrap_trials() -> usize {
        10
    }
    fn default_limit_trials() -> usize {
        5
    }
    fn default_smoothing_passes() -> usize {
        2
    }
    fn default_smoothing_half_window() -> usize {
        1
    }
    fn default_mass_bin_edges() -> Vec<f64> {
        (0..=50).map(|i| 50.0 + 5.0 * i as f64).collect()
    }
    fn default_epsilon() -> f64 {
        LOG_GUARD
    }
    fn default_lambda_reg() -> f64 {
        10.0
    }
    fn default_operating_points() -> Vec<f64> {
        (1..20).map(|i| i as f64 * 0.05).collect()
    }
    fn default_limit_points() -> usize {
        21
    }
    fn default_limit_logit_span() -> f64 {
        5.0
    }
    fn default_seed() -> u64 {
        42
    }
    fn default_max_parallel() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
    fn default_pt_ranges() -> Vec<Option<KinematicRange>> {
        vec![
            None,
            Some(KinematicRange::new(200.0, 500.0)),
            Some(KinematicRange::new(500.0, 1000.0)),
            Some(KinematicRange::new(1000.0, 2000.0)),
        ]
    }
    fn default_energy_scale() -> f64 {
        1.0
    }
    fn default_mass_column() -> String {
        "m".to_string()
    }
    fn default_pt_column() -> String {
        "pt".to_string()
    }
    fn default_weight_column() -> Option<String> {
        Some("weight".to_string())
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: AnalysisConfig = serde_json::from_str(&text).context("parsing config JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the estimators cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.mass_bin_edges.len() < 2 {
            anyhow::bail!("mass_bin_edges needs at least two values");
        }
        if self.mass_bin_edges.windows(2).any(|w| w[1] <= w[0]) {
            anyhow::bail!("mass_bin_edges must be strictly increasing");
        }
        if let Some(&p) = self
            .operating_points
            .iter()
            .find(|&&p| !(p > 0.0 && p < 1.0))
        {
            anyhow::bail!("operating point {p} is outside (0, 1)");
        }
        if self.max_parallel == 0 {
            anyhow::bail!("max_parallel must be at least 1");
        }
        if self.num_bins == Some(0) {
            anyhow::bail!("num_bins must be positive");
        }
        if !(self.epsilon > 0.0) {
            anyhow::bail!("epsilon must be positive");
        }
        if !(self.energy_scale > 0.0) {
            anyhow::bail!("energy_scale must be positive");
        }
        Ok(())
    }

    /// Mass bin edges in sample units.
    pub fn mass_edges(&self) -> Vec<f64> {
        self.mass_bin_edges
            .iter()
            .map(|e| e * self.energy_scale)
            .collect()
    }

    /// pT ranges in sample units.
    pub fn scaled_pt_ranges(&self) -> Vec<Option<KinematicRange>> {
        self.pt_ranges
            .iter()
            .map(|r| r.map(|r| r.scaled(self.energy_scale)))
            .collect()
    }

    pub fn cut_direction(&self, feature: &str) -> CutDirection {
        if self.signal_low_features.iter().any(|f| f == feature) {
            CutDirection::PassBelow
        } else {
            CutDirection::PassAbove
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            num_bins: None,
            bootstrap_trials: Self::default_bootstrap_trials(),
            limit_trials: Self::default_limit_trials(),
            smoothing_passes: Self::default_smoothing_passes(),
            smoothing_half_window: Self::default_smoothing_half_window(),
            mass_bin_edges: Self::default_mass_bin_edges(),
            epsilon: Self::default_epsilon(),
            lambda_reg: Self::default_lambda_reg(),
            operating_points: Self::default_operating_points(),
            limit_points: Self::default_limit_points(),
            limit_logit_span: Self::default_limit_logit_span(),
            cut_policy: CutPolicy::default(),
            limit_proxy: LimitProxy::default(),
            seed: Self::default_seed(),
            max_parallel: Self::default_max_parallel(),
            pt_ranges: Self::default_pt_ranges(),
            energy_scale: Self::default_energy_scale(),
            mass_column: Self::default_mass_column(),
            pt_column: Self::default_pt_column(),
            weight_column: Self::default_weight_column(),
            signal_low_features: Vec::new(),
            pretrain_epochs: None,
            prior_entropy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = AnalysisConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.operating_points.len(), 19);
        assert_eq!(cfg.mass_bin_edges.first().copied(), Some(50.0));
        assert_eq!(cfg.mass_bin_edges.last().copied(), Some(300.0));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: AnalysisConfig = serde_json::from_str(
            r#"{ "lambda_reg": 0.1, "limit_proxy": { "feature": "NN" }, "cut_policy": "fixed" }"#,
        )
        .unwrap();
        assert_eq!(cfg.lambda_reg, 0.1);
        assert_eq!(cfg.limit_proxy, LimitProxy::Feature("NN".into()));
        assert_eq!(cfg.cut_policy, CutPolicy::Fixed);
        assert_eq!(cfg.limit_trials, 5);
    }

    #[test]
    fn rejects_unsorted_edges() {
        let cfg = AnalysisConfig {
            mass_bin_edges: vec![0.0, 2.0, 1.0],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn energy_scale_applies_to_edges_and_ranges() {
        let cfg = AnalysisConfig {
            energy_scale: 1000.0,
            ..Default::default()
        };
        assert_eq!(cfg.mass_edges()[0], 50_000.0);
        let r = cfg.scaled_pt_ranges()[1].unwrap();
        assert_eq!((r.lo, r.hi), (200_000.0, 500_000.0));
    }

    #[test]
    fn signal_low_features_flip_direction() {
        let cfg = AnalysisConfig {
            signal_low_features: vec!["Tau21".into()],
            ..Default::default()
        };
        assert_eq!(cfg.cut_direction("Tau21"), CutDirection::PassBelow);
        assert_eq!(cfg.cut_direction("NN"), CutDirection::PassAbove);
    }
}

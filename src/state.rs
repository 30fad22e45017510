use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use mass_sculpt::AnalysisConfig;
use mass_sculpt::data::loader::load_sample;
use mass_sculpt::data::model::Sample;
use mass_sculpt::study::{LossReport, StudyReport, run_jsd_study, run_loss_study};

use crate::color::ColorMap;

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// Which result the central panel shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Sculpting,
    Losses,
}

/// The full UI state, independent of rendering.
pub struct AppState {
    /// Loaded sample (None until user loads a file).
    pub sample: Option<Sample>,
    pub sample_path: Option<PathBuf>,

    pub config: AnalysisConfig,

    /// Features ticked for the JSD study.
    pub selected_features: BTreeSet<String>,

    /// Index into `config.pt_ranges` shown in the plot.
    pub range_index: usize,

    pub report: Option<StudyReport>,

    /// Directory holding `history__*.json` files.
    pub history_dir: Option<PathBuf>,
    pub lambda: f64,
    /// `0` means the single full-data run.
    pub num_folds: usize,
    pub loss: Option<LossReport>,

    /// Active colour map, keyed by feature name.
    pub color_map: ColorMap,

    pub view: View,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        let config = AnalysisConfig::default();
        Self {
            sample: None,
            sample_path: None,
            lambda: config.lambda_reg,
            config,
            selected_features: BTreeSet::new(),
            range_index: 0,
            report: None,
            history_dir: None,
            num_folds: 3,
            loss: None,
            color_map: ColorMap::new(&[]),
            view: View::default(),
            status_message: None,
        }
    }
}

impl AppState {
    /// Ingest a newly loaded sample and reset the study selection.
    pub fn set_sample(&mut self, path: PathBuf, sample: Sample) {
        let features: Vec<String> = self
            .candidate_features(&sample)
            .into_iter()
            .map(str::to_string)
            .collect();
        self.color_map = ColorMap::new(&features);
        self.selected_features = features.into_iter().collect();
        self.sample = Some(sample);
        self.sample_path = Some(path);
        self.report = None;
        self.status_message = None;
    }

    /// Columns that can act as tagger scores: everything except the mass,
    /// pT and weight columns.
    pub fn candidate_features<'a>(&self, sample: &'a Sample) -> Vec<&'a str> {
        sample
            .feature_names()
            .into_iter()
            .filter(|f| {
                *f != self.config.mass_column
                    && *f != self.config.pt_column
                    && Some(*f) != self.config.weight_column.as_deref()
            })
            .collect()
    }

    pub fn load_sample(&mut self, path: &Path) {
        match load_sample(path, self.config.weight_column.as_deref()) {
            Ok(sample) => {
                log::info!("Loaded {} events from {}", sample.len(), path.display());
                self.set_sample(path.to_path_buf(), sample);
            }
            Err(e) => self.fail("load sample", e),
        }
    }

    pub fn load_config(&mut self, path: &Path) {
        match AnalysisConfig::load(path) {
            Ok(config) => {
                self.lambda = config.lambda_reg;
                self.config = config;
                self.range_index = 0;
                self.report = None;
                self.status_message = None;
            }
            Err(e) => self.fail("load config", e),
        }
    }

    pub fn toggle_feature(&mut self, feature: &str) {
        if !self.selected_features.remove(feature) {
            self.selected_features.insert(feature.to_string());
        }
    }

    /// Run the JSD study over the ticked features.
    pub fn run_study(&mut self) {
        let Some(sample) = &self.sample else {
            return;
        };
        let features: Vec<String> = self.selected_features.iter().cloned().collect();
        match run_jsd_study(sample, &features, &self.config) {
            Ok(report) => {
                self.status_message = (!report.failures.is_empty())
                    .then(|| format!("{} jobs failed, see log", report.failures.len()));
                self.report = Some(report);
                self.view = View::Sculpting;
            }
            Err(e) => self.fail("run study", e),
        }
    }

    /// Aggregate the adversarial histories for the current λ.
    pub fn run_losses(&mut self) {
        let Some(dir) = &self.history_dir else {
            return;
        };
        let folds = (self.num_folds > 0).then_some(self.num_folds);
        match run_loss_study(
            dir,
            self.lambda,
            folds,
            self.config.prior_entropy,
            self.config.pretrain_epochs,
        ) {
            Ok(report) => {
                self.loss = Some(report);
                self.view = View::Losses;
                self.status_message = None;
            }
            Err(e) => self.fail("aggregate losses", e),
        }
    }

    fn fail(&mut self, what: &str, e: anyhow::Error) {
        log::error!("Failed to {what}: {e:#}");
        self.status_message = Some(format!("Error: {e:#}"));
    }
}

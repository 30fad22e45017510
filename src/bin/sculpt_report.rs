use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use mass_sculpt::AnalysisConfig;
use mass_sculpt::data::loader::load_sample;
use mass_sculpt::loss::ClassifierCurves;
use mass_sculpt::stats::entropy::EntropyEstimate;
use mass_sculpt::study::{
    CutSummary, LossReport, StudyReport, prior_entropy, run_classifier_loss_study,
    run_jsd_study, run_loss_study, run_mass_comparison,
};

/// Run the mass-sculpting diagnostics headless and write a JSON report.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Jet sample (.parquet, .csv or .json).
    #[arg(long)]
    sample: PathBuf,

    /// Analysis configuration (JSON). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tagger features to scan, comma separated. All non-kinematic columns
    /// when omitted.
    #[arg(long, value_delimiter = ',')]
    features: Vec<String>,

    /// Signal efficiencies for the jet-mass comparison.
    #[arg(long, value_delimiter = ',', default_value = "0.5")]
    eff_sig: Vec<f64>,

    /// Directory with `history__*.json` files.
    #[arg(long)]
    histories: Option<PathBuf>,

    /// Also aggregate the standalone classifier runs of this experiment
    /// (`history__crossval_{name}__*.json`).
    #[arg(long, requires = "histories")]
    classifier_experiment: Option<String>,

    /// Cross-validation folds of the histories; 0 for the full-data run.
    #[arg(long, default_value_t = 3)]
    folds: usize,

    #[arg(long, default_value = "report.json")]
    out: PathBuf,
}

#[derive(Serialize)]
struct Report {
    sample: PathBuf,
    config: AnalysisConfig,
    prior_entropy: Option<EntropyEstimate>,
    jsd: StudyReport,
    mass_comparison: Vec<CutSummary>,
    classifier_loss: Option<ClassifierCurves>,
    loss: Option<LossReport>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    let sample = load_sample(&args.sample, config.weight_column.as_deref())?;

    let features = if args.features.is_empty() {
        sample
            .feature_names()
            .into_iter()
            .filter(|f| {
                *f != config.mass_column
                    && *f != config.pt_column
                    && Some(*f) != config.weight_column.as_deref()
            })
            .map(str::to_string)
            .collect()
    } else {
        args.features.clone()
    };
    log::info!("Scanning features {features:?}");

    let jsd = run_jsd_study(&sample, &features, &config)?;
    let mut mass_comparison = Vec::new();
    for &eff in &args.eff_sig {
        mass_comparison.extend(run_mass_comparison(&sample, &features, eff, &config)?);
    }

    // Entropy of the background mass spectrum serves as the prior unless
    // the configuration fixes one.
    let mut rng = StdRng::seed_from_u64(config.seed);
    let prior = match config.prior_entropy {
        Some(_) => None,
        None => Some(prior_entropy(
            &sample,
            &[config.mass_column.as_str()],
            &config,
            &mut rng,
        )?),
    };
    let h_prior = config.prior_entropy.or(prior.map(|p| p.mean));

    let folds = (args.folds > 0).then_some(args.folds);
    let classifier_loss = match (&args.histories, &args.classifier_experiment) {
        (Some(dir), Some(experiment)) => {
            Some(run_classifier_loss_study(dir, experiment, folds)?)
        }
        _ => None,
    };
    let loss = match &args.histories {
        Some(dir) => Some(run_loss_study(
            dir,
            config.lambda_reg,
            folds,
            h_prior,
            config.pretrain_epochs,
        )?),
        None => None,
    };

    let report = Report {
        sample: args.sample.clone(),
        config,
        prior_entropy: prior,
        jsd,
        mass_comparison,
        classifier_loss,
        loss,
    };
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&args.out, json)
        .with_context(|| format!("writing {}", args.out.display()))?;

    if !report.jsd.failures.is_empty() {
        log::warn!("{} jobs failed", report.jsd.failures.len());
    }
    println!("Wrote report to {}", args.out.display());
    Ok(())
}

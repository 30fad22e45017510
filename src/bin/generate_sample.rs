use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal};

use mass_sculpt::data::history::{HistoryId, HistoryKind, lambda_tag};

/// Write a synthetic jet sample and matching training histories.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Number of jets to generate.
    #[arg(long, default_value_t = 50_000)]
    events: usize,

    /// Output parquet file.
    #[arg(long, default_value = "sample_data.parquet")]
    out: PathBuf,

    /// Directory for `history__*.json` files; skipped when not given.
    #[arg(long)]
    histories: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    folds: usize,

    #[arg(long, default_value_t = 10.0)]
    lambda: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Columns of the synthetic sample, one entry per jet.
#[derive(Default)]
struct Jets {
    m: Vec<f64>,
    pt: Vec<f64>,
    nn: Vec<f64>,
    ann: Vec<f64>,
    tau21: Vec<f64>,
    weight: Vec<f64>,
    signal: Vec<bool>,
    train: Vec<bool>,
    fold: Vec<i32>,
}

/// W-boson jets on top of a falling QCD background. `NN` learns the W mass
/// peak and sculpts the background; `ANN` carries the same separation
/// without looking at mass; `Tau21` is low for signal.
fn generate(n: usize, folds: usize, rng: &mut StdRng) -> Result<Jets> {
    let gauss = Normal::new(0.0, 1.0)?;
    let w_mass = Normal::<f64>::new(80.0, 10.0)?;
    let qcd_mass = Exp::new(1.0 / 60.0)?;
    let pt_tail = Exp::<f64>::new(1.0 / 300.0)?;

    let mut jets = Jets::default();
    for i in 0..n {
        let is_signal = rng.random_bool(0.3);
        let m = if is_signal {
            w_mass.sample(rng).clamp(50.0, 299.0)
        } else {
            loop {
                let m = 50.0 + qcd_mass.sample(rng);
                if m < 300.0 {
                    break m;
                }
            }
        };
        let pt = (200.0 + pt_tail.sample(rng)).min(1999.0);

        let (nn, ann, tau21) = if is_signal {
            (
                sigmoid(1.5 + gauss.sample(rng)),
                sigmoid(1.0 + gauss.sample(rng)),
                0.35 + 0.10 * gauss.sample(rng),
            )
        } else {
            let near_w = -((m - 80.0) / 30.0).powi(2);
            (
                sigmoid(-1.0 + near_w + gauss.sample(rng)),
                sigmoid(-1.0 + gauss.sample(rng)),
                0.60 - 0.001 * (m - 80.0) + 0.12 * gauss.sample(rng),
            )
        };

        jets.m.push(m);
        jets.pt.push(pt);
        jets.nn.push(nn);
        jets.ann.push(ann);
        jets.tau21.push(tau21.clamp(0.0, 1.0));
        jets.weight.push(if is_signal { 1.0 } else { (pt / 500.0).powf(0.5) });
        jets.signal.push(is_signal);
        jets.train.push(rng.random_bool(0.5));
        jets.fold.push((i % folds.max(1)) as i32);
    }
    Ok(jets)
}

fn write_parquet(jets: Jets, path: &Path) -> Result<usize> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("m", DataType::Float64, false),
        Field::new("pt", DataType::Float64, false),
        Field::new("NN", DataType::Float64, false),
        Field::new("ANN", DataType::Float64, false),
        Field::new("Tau21", DataType::Float64, false),
        Field::new("weight", DataType::Float64, false),
        Field::new("signal", DataType::Boolean, false),
        Field::new("train", DataType::Boolean, false),
        Field::new("fold", DataType::Int32, false),
    ]));
    let rows = jets.m.len();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from(jets.m)),
        Arc::new(Float64Array::from(jets.pt)),
        Arc::new(Float64Array::from(jets.nn)),
        Arc::new(Float64Array::from(jets.ann)),
        Arc::new(Float64Array::from(jets.tau21)),
        Arc::new(Float64Array::from(jets.weight)),
        Arc::new(BooleanArray::from(jets.signal)),
        Arc::new(BooleanArray::from(jets.train)),
        Arc::new(Int32Array::from(jets.fold)),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(rows)
}

/// Loss curve decaying from `start` towards `end` with a little noise.
fn decay(epochs: usize, start: f64, end: f64, noise: f64, rng: &mut StdRng) -> Vec<f64> {
    (0..epochs)
        .map(|e| {
            let t = (-(e as f64) / 8.0).exp();
            end + (start - end) * t + noise * (rng.random::<f64>() - 0.5)
        })
        .collect()
}

fn write_histories(dir: &Path, folds: usize, lambda: f64, rng: &mut StdRng) -> Result<usize> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let epochs = 40;
    let mut written = 0;
    for k in 1..=folds {
        let classifier = HistoryId {
            kind: HistoryKind::Classifier {
                experiment: "classifier".to_string(),
            },
            fold: Some((k, folds)),
        };
        let history = serde_json::json!({
            "loss": decay(epochs, 0.6, 0.38, 0.01, rng),
            "val_loss": decay(epochs, 0.6, 0.40, 0.02, rng),
        });
        std::fs::write(dir.join(classifier.file_name()), history.to_string())?;

        let adversarial = HistoryId {
            kind: HistoryKind::Adversarial {
                lambda_tag: lambda_tag(lambda),
            },
            fold: Some((k, folds)),
        };
        let clf = decay(epochs, 0.40, 0.45, 0.01, rng);
        let adv = decay(epochs, 1.2, 1.6, 0.02, rng);
        let val_clf = decay(epochs, 0.41, 0.46, 0.015, rng);
        let val_adv = decay(epochs, 1.2, 1.6, 0.03, rng);
        let history = serde_json::json!({
            "classifier_loss": clf,
            "adversary_loss": adv,
            "val_classifier_loss": val_clf,
            "val_adversary_loss": val_adv,
        });
        std::fs::write(dir.join(adversarial.file_name()), history.to_string())?;
        written += 2;
    }
    Ok(written)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let jets = generate(args.events, args.folds, &mut rng)?;
    let rows = write_parquet(jets, &args.out)?;
    println!("Wrote {rows} jets to {}", args.out.display());

    if let Some(dir) = &args.histories {
        let files = write_histories(dir, args.folds, args.lambda, &mut rng)?;
        println!("Wrote {files} history files to {}", dir.display());
    }
    Ok(())
}

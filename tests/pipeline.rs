use std::fmt::Write as _;
use std::path::PathBuf;

use approx::assert_abs_diff_eq;
use mass_sculpt::AnalysisConfig;
use mass_sculpt::data::filter::KinematicRange;
use mass_sculpt::data::loader::load_sample;
use mass_sculpt::loss::{COMBINED_LOSS, VAL_COMBINED_LOSS};
use mass_sculpt::stats::density::{Binning, estimate};
use mass_sculpt::study::{run_classifier_loss_study, run_jsd_study, run_loss_study};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mass_sculpt_{name}_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// CSV jets: `sculpt` follows the mass, `flat` ignores it.
fn write_sample(path: &std::path::Path, n: usize) {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut text = String::from("m,pt,sculpt,flat,weight,signal,train,label\n");
    for i in 0..n {
        let signal = i % 5 == 0;
        let m: f64 = rng.random_range(50.0..300.0);
        let pt: f64 = rng.random_range(200.0..1000.0);
        let (sculpt, flat) = if signal {
            (0.9 + 0.1 * rng.random::<f64>(), 0.9 + 0.1 * rng.random::<f64>())
        } else {
            (
                0.6 * (m - 50.0) / 250.0 + 0.2 * rng.random::<f64>(),
                0.8 * rng.random::<f64>(),
            )
        };
        writeln!(
            text,
            "{m},{pt},{sculpt},{flat},1.0,{},{},jet{i}",
            u8::from(signal),
            u8::from(i % 2 == 0)
        )
        .unwrap();
    }
    std::fs::write(path, text).unwrap();
}

#[test]
fn csv_sample_to_serialised_report() {
    let dir = scratch_dir("report");
    let path = dir.join("jets.csv");
    write_sample(&path, 6000);

    let sample = load_sample(&path, Some("weight")).unwrap();
    assert_eq!(sample.len(), 6000);
    // Text columns are dropped at ingestion.
    assert!(!sample.has_column("label"));

    let cfg = AnalysisConfig {
        pt_ranges: vec![None, Some(KinematicRange::new(200.0, 500.0))],
        operating_points: vec![0.2, 0.5, 0.8],
        limit_points: 7,
        max_parallel: 3,
        ..Default::default()
    };
    let features = vec!["sculpt".to_string(), "flat".to_string()];
    let report = run_jsd_study(&sample, &features, &cfg).unwrap();
    assert!(report.failures.is_empty());

    for range in &report.ranges {
        let sculpt = range.curve("sculpt").unwrap();
        let flat = range.curve("flat").unwrap();
        assert_eq!(sculpt.series().len(), 3);
        for (s, f) in sculpt.points.iter().zip(&flat.points) {
            assert!(s.jsd > f.jsd);
            assert!((0.0..=1.0).contains(&s.jsd));
        }
        assert_eq!(range.significant_points("sculpt", 2.0).len(), 3);
    }

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["ranges"][1]["label"], "pT 200–500");
    assert_eq!(json["ranges"][0]["curves"][0]["direction"], "pass-above");
    assert_eq!(
        json["ranges"][0]["limit"]["points"].as_array().unwrap().len(),
        7
    );

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn weighted_density_integrates_to_one() {
    let mut rng = StdRng::seed_from_u64(3);
    let x: Vec<f64> = (0..5000).map(|_| rng.random_range(-2.0..5.0)).collect();
    let y: Vec<f64> = (0..5000).map(|_| rng.random::<f64>().powi(2)).collect();
    let w: Vec<f64> = (0..5000).map(|_| rng.random_range(0.1..3.0)).collect();
    let density = estimate(&[x.as_slice(), y.as_slice()], Some(w.as_slice()), &Binning::Auto).unwrap();
    assert_abs_diff_eq!(density.integral(), 1.0, epsilon = 1e-6);
    assert!(density.content().iter().all(|&c| c >= 0.0));
}

#[test]
fn loss_study_reads_fold_histories() {
    let dir = scratch_dir("losses");
    let folds = [
        ([1.0, 0.9], [0.2, 0.25]),
        ([1.2, 1.0], [0.3, 0.2]),
    ];
    for (k, (clf, adv)) in folds.iter().enumerate() {
        let history = serde_json::json!({
            "classifier_loss": clf,
            "adversary_loss": adv,
            "val_classifier_loss": clf,
            "val_adversary_loss": adv,
            "lr": "not a series",
        });
        let name = format!("history__combined_lambda10_{}of2.json", k + 1);
        std::fs::write(dir.join(name), history.to_string()).unwrap();
    }
    // Another λ and a full-data run must be ignored.
    std::fs::write(
        dir.join("history__combined_lambda0p1_1of2.json"),
        r#"{"classifier_loss": [9.0]}"#,
    )
    .unwrap();
    std::fs::write(dir.join("history__combined_lambda10.json"), "{}").unwrap();

    let report = run_loss_study(&dir, 10.0, Some(2), Some(0.05), Some(1)).unwrap();
    assert_eq!(report.lambda_tag, "10");
    assert_eq!(report.curve.folds, 2);
    for name in [COMBINED_LOSS, VAL_COMBINED_LOSS] {
        let band = report.curve.channel(name).unwrap();
        assert_abs_diff_eq!(band.mean[0], -1.4, epsilon = 1e-12);
        assert_abs_diff_eq!(band.mean[1], -1.3, epsilon = 1e-12);
        assert_abs_diff_eq!(band.std[0], 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(band.std[1], 0.3, epsilon = 1e-12);
    }
    assert_abs_diff_eq!(report.references.classifier_optimum, 1.1, epsilon = 1e-12);
    assert_abs_diff_eq!(report.references.ideal_combined.unwrap(), 0.6, epsilon = 1e-12);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn classifier_study_reads_crossval_histories() {
    let dir = scratch_dir("classifier");
    let train = [[1.0, 2.0], [2.0, 3.0], [3.0, 4.0]];
    for (k, loss) in train.iter().enumerate() {
        let val: Vec<f64> = loss.iter().map(|l| l + 0.5).collect();
        let history = serde_json::json!({ "loss": loss, "val_loss": val });
        std::fs::write(
            dir.join(format!("history__crossval_baseline__{}of3.json", k + 1)),
            history.to_string(),
        )
        .unwrap();
    }
    // Another experiment in the same folder must be ignored.
    std::fs::write(
        dir.join("history__crossval_other__1of3.json"),
        r#"{"loss": [50.0, 50.0], "val_loss": [50.0, 50.0]}"#,
    )
    .unwrap();

    let curves = run_classifier_loss_study(&dir, "baseline", Some(3)).unwrap();
    assert_eq!(curves.train.epochs(), 2);
    let population_std = (2.0f64 / 3.0).sqrt();
    for (band, offset) in [(&curves.train, 0.0), (&curves.val, 0.5)] {
        assert_abs_diff_eq!(band.mean[0], 2.0 + offset, epsilon = 1e-12);
        assert_abs_diff_eq!(band.mean[1], 3.0 + offset, epsilon = 1e-12);
        for &s in &band.std {
            assert_abs_diff_eq!(s, population_std, epsilon = 1e-12);
        }
    }

    assert!(run_classifier_loss_study(&dir, "missing", Some(3)).is_err());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn loss_study_rejects_ragged_folds() {
    let dir = scratch_dir("ragged");
    for (k, epochs) in [(1, 3), (2, 2)] {
        let series = vec![1.0; epochs];
        let history = serde_json::json!({
            "classifier_loss": series,
            "adversary_loss": series,
            "val_classifier_loss": series,
            "val_adversary_loss": series,
        });
        std::fs::write(
            dir.join(format!("history__combined_lambda3_{k}of2.json")),
            history.to_string(),
        )
        .unwrap();
    }
    assert!(run_loss_study(&dir, 3.0, Some(2), None, None).is_err());
    std::fs::remove_dir_all(&dir).ok();
}

//! Cross-validation loss aggregation.
//!
//! Per-fold histories are combined epoch by epoch into mean and population
//! standard deviation bands. The adversarial combined loss is formed inside
//! each fold first and only then averaged.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::data::history::LossRecord;
use crate::error::{DiagnosticsError, Result};
use crate::stats::bootstrap::mean_std;

pub const TRAIN_LOSS: &str = "loss";
pub const VAL_LOSS: &str = "val_loss";
pub const CLASSIFIER_LOSS: &str = "classifier_loss";
pub const ADVERSARY_LOSS: &str = "adversary_loss";
pub const VAL_CLASSIFIER_LOSS: &str = "val_classifier_loss";
pub const VAL_ADVERSARY_LOSS: &str = "val_adversary_loss";
pub const COMBINED_LOSS: &str = "combined_loss";
pub const VAL_COMBINED_LOSS: &str = "val_combined_loss";

/// Mean ± std per epoch of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Band {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Band {
    pub fn epochs(&self) -> usize {
        self.mean.len()
    }

    /// `(epoch, mean, std)` rows, epochs counted from 1.
    pub fn series(&self) -> Vec<(f64, f64, f64)> {
        self.mean
            .iter()
            .zip(&self.std)
            .enumerate()
            .map(|(i, (&m, &s))| ((i + 1) as f64, m, s))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierCurves {
    pub train: Band,
    pub val: Band,
}

/// Aggregated adversarial training curves, including the derived
/// `combined_loss` and `val_combined_loss` channels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedCurve {
    pub lambda: f64,
    pub folds: usize,
    pub epochs: usize,
    pub channels: BTreeMap<String, Band>,
}

impl AggregatedCurve {
    pub fn channel(&self, name: &str) -> Option<&Band> {
        self.channels.get(name)
    }
}

/// Common epoch count of all folds. Unequal counts are an error.
fn common_epochs(records: &[LossRecord]) -> Result<usize> {
    let first = records.first().ok_or(DiagnosticsError::NoFolds)?;
    let expected = first.epochs();
    if let Some(bad) = records.iter().find(|r| r.epochs() != expected) {
        return Err(DiagnosticsError::EpochMismatch {
            channel: bad.channel_names().next().unwrap_or_default().to_string(),
            fold: bad.fold(),
            expected,
            found: bad.epochs(),
        });
    }
    Ok(expected)
}

/// Mean and population std across folds, per epoch.
fn band(per_fold: &[Vec<f64>], epochs: usize) -> Band {
    let (mean, std) = (0..epochs)
        .map(|e| {
            let column: Vec<f64> = per_fold.iter().map(|f| f[e]).collect();
            mean_std(&column)
        })
        .unzip();
    Band { mean, std }
}

fn collect_channel(records: &[LossRecord], name: &str) -> Result<Vec<Vec<f64>>> {
    records
        .iter()
        .map(|r| r.channel(name).map(<[f64]>::to_vec))
        .collect()
}

/// Train/validation bands of a standalone classifier (`loss`, `val_loss`).
pub fn aggregate_classifier(records: &[LossRecord]) -> Result<ClassifierCurves> {
    let epochs = common_epochs(records)?;
    Ok(ClassifierCurves {
        train: band(&collect_channel(records, TRAIN_LOSS)?, epochs),
        val: band(&collect_channel(records, VAL_LOSS)?, epochs),
    })
}

/// Bands of every adversarial channel plus `combined = classifier − λ·adversary`
/// for both training and validation.
pub fn aggregate_adversarial(records: &[LossRecord], lambda: f64) -> Result<AggregatedCurve> {
    let epochs = common_epochs(records)?;

    let mut per_channel = BTreeMap::new();
    for name in [
        CLASSIFIER_LOSS,
        ADVERSARY_LOSS,
        VAL_CLASSIFIER_LOSS,
        VAL_ADVERSARY_LOSS,
    ] {
        per_channel.insert(name, collect_channel(records, name)?);
    }

    for (combined, clf, adv) in [
        (COMBINED_LOSS, CLASSIFIER_LOSS, ADVERSARY_LOSS),
        (VAL_COMBINED_LOSS, VAL_CLASSIFIER_LOSS, VAL_ADVERSARY_LOSS),
    ] {
        let folds: Vec<Vec<f64>> = per_channel[clf]
            .iter()
            .zip(&per_channel[adv])
            .map(|(c, a)| c.iter().zip(a).map(|(c, a)| c - lambda * a).collect())
            .collect();
        per_channel.insert(combined, folds);
    }

    log::debug!(
        "aggregated {} folds × {epochs} epochs at λ = {lambda}",
        records.len()
    );
    Ok(AggregatedCurve {
        lambda,
        folds: records.len(),
        epochs,
        channels: per_channel
            .into_iter()
            .map(|(name, folds)| (name.to_string(), band(&folds, epochs)))
            .collect(),
    })
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Lowest combined loss reachable when the classifier keeps its standalone
/// performance and the adversary is left with the prior's entropy.
pub fn theoretical_floor(best_classifier_loss: f64, lambda: f64, prior_entropy: f64) -> f64 {
    best_classifier_loss - lambda * prior_entropy
}

/// Horizontal reference lines for the loss panels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossReferences {
    /// First-epoch validation classifier loss, before the adversary acts.
    pub classifier_optimum: f64,
    pub prior_entropy: Option<f64>,
    pub ideal_combined: Option<f64>,
    pub pretrain_epochs: Option<usize>,
}

impl LossReferences {
    pub fn from_curve(
        curve: &AggregatedCurve,
        prior_entropy: Option<f64>,
        pretrain_epochs: Option<usize>,
    ) -> Result<Self> {
        let classifier_optimum = curve
            .channel(VAL_CLASSIFIER_LOSS)
            .and_then(|b| b.mean.first().copied())
            .ok_or_else(|| DiagnosticsError::MissingChannel {
                fold: 0,
                channel: VAL_CLASSIFIER_LOSS.to_string(),
            })?;
        Ok(Self {
            classifier_optimum,
            prior_entropy,
            ideal_combined: prior_entropy
                .map(|h| theoretical_floor(classifier_optimum, curve.lambda, h)),
            pretrain_epochs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn adversarial_folds() -> Vec<LossRecord> {
        let clf = [[1.0, 0.9], [1.2, 1.0]];
        let adv = [[0.2, 0.25], [0.3, 0.2]];
        (0..2)
            .map(|k| {
                LossRecord::from_pairs(
                    k,
                    [
                        (CLASSIFIER_LOSS, clf[k].to_vec()),
                        (ADVERSARY_LOSS, adv[k].to_vec()),
                        (VAL_CLASSIFIER_LOSS, clf[k].to_vec()),
                        (VAL_ADVERSARY_LOSS, adv[k].to_vec()),
                    ],
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn combined_loss_is_formed_per_fold() {
        let curve = aggregate_adversarial(&adversarial_folds(), 10.0).unwrap();
        assert_eq!(curve.folds, 2);
        assert_eq!(curve.epochs, 2);
        for name in [COMBINED_LOSS, VAL_COMBINED_LOSS] {
            let band = curve.channel(name).unwrap();
            assert_abs_diff_eq!(band.mean[0], -1.4, epsilon = 1e-12);
            assert_abs_diff_eq!(band.mean[1], -1.3, epsilon = 1e-12);
            assert_abs_diff_eq!(band.std[0], 0.4, epsilon = 1e-12);
            assert_abs_diff_eq!(band.std[1], 0.3, epsilon = 1e-12);
        }
        let clf = curve.channel(CLASSIFIER_LOSS).unwrap();
        assert_abs_diff_eq!(clf.mean[0], 1.1, epsilon = 1e-12);
        assert_eq!(curve.channels.len(), 6);
    }

    #[test]
    fn classifier_bands_use_population_std() {
        let records: Vec<LossRecord> = [[1.0, 2.0], [2.0, 3.0], [3.0, 4.0]]
            .iter()
            .enumerate()
            .map(|(k, l)| {
                LossRecord::from_pairs(k, [(TRAIN_LOSS, l.to_vec()), (VAL_LOSS, l.to_vec())]).unwrap()
            })
            .collect();
        let curves = aggregate_classifier(&records).unwrap();
        assert_eq!(curves.train.mean, vec![2.0, 3.0]);
        for s in curves.train.std.iter().chain(&curves.val.std) {
            assert_abs_diff_eq!(*s, 0.816, epsilon = 1e-3);
        }
        assert_eq!(curves.val.series()[1], (2.0, 3.0, curves.val.std[1]));
    }

    #[test]
    fn mismatched_epochs_are_an_error() {
        let records = vec![
            LossRecord::from_pairs(1, [(TRAIN_LOSS, vec![1.0, 2.0]), (VAL_LOSS, vec![1.0, 2.0])])
                .unwrap(),
            LossRecord::from_pairs(2, [(TRAIN_LOSS, vec![1.0]), (VAL_LOSS, vec![1.0])]).unwrap(),
        ];
        assert!(matches!(
            aggregate_classifier(&records),
            Err(DiagnosticsError::EpochMismatch {
                fold: 2,
                expected: 2,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn missing_channel_and_no_folds() {
        let records =
            vec![LossRecord::from_pairs(0, [(TRAIN_LOSS, vec![1.0])]).unwrap()];
        assert!(matches!(
            aggregate_classifier(&records),
            Err(DiagnosticsError::MissingChannel { .. })
        ));
        assert_eq!(aggregate_adversarial(&[], 1.0).unwrap_err(), DiagnosticsError::NoFolds);
    }

    #[test]
    fn references_from_first_validation_epoch() {
        let curve = aggregate_adversarial(&adversarial_folds(), 10.0).unwrap();
        let refs = LossReferences::from_curve(&curve, Some(0.05), Some(10)).unwrap();
        assert_abs_diff_eq!(refs.classifier_optimum, 1.1, epsilon = 1e-12);
        assert_abs_diff_eq!(refs.ideal_combined.unwrap(), 0.6, epsilon = 1e-12);
        assert_eq!(refs.pretrain_epochs, Some(10));

        let bare = LossReferences::from_curve(&curve, None, None).unwrap();
        assert_eq!(bare.ideal_combined, None);
        assert_abs_diff_eq!(theoretical_floor(0.5, 2.0, 0.1), 0.3);
    }
}

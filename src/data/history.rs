use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;

use crate::error::DiagnosticsError;

// ---------------------------------------------------------------------------
// LossRecord – one fold's training history
// ---------------------------------------------------------------------------

/// Per-epoch losses of one cross-validation fold, keyed by channel name
/// (`loss`, `val_loss`, `classifier_loss`, …). Every channel has the same
/// number of epochs.
#[derive(Debug, Clone, PartialEq)]
pub struct LossRecord {
    fold: usize,
    epochs: usize,
    channels: BTreeMap<String, Vec<f64>>,
}

impl LossRecord {
    pub fn new(
        fold: usize,
        channels: BTreeMap<String, Vec<f64>>,
    ) -> std::result::Result<Self, DiagnosticsError> {
        let epochs = channels.values().next().map_or(0, Vec::len);
        for (name, values) in &channels {
            if values.len() != epochs {
                return Err(DiagnosticsError::EpochMismatch {
                    channel: name.clone(),
                    fold,
                    expected: epochs,
                    found: values.len(),
                });
            }
        }
        Ok(Self {
            fold,
            epochs,
            channels,
        })
    }

    /// Convenience constructor from `(name, values)` pairs.
    pub fn from_pairs<'a>(
        fold: usize,
        pairs: impl IntoIterator<Item = (&'a str, Vec<f64>)>,
    ) -> std::result::Result<Self, DiagnosticsError> {
        Self::new(
            fold,
            pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        )
    }

    pub fn fold(&self) -> usize {
        self.fold
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn channel(&self, name: &str) -> std::result::Result<&[f64], DiagnosticsError> {
        self.channels
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| DiagnosticsError::MissingChannel {
                fold: self.fold,
                channel: name.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// History file names
// ---------------------------------------------------------------------------

/// Encode a regularisation strength the way history files name it:
/// as many decimals as the leading fractional zeros need, `.` → `p`.
/// `0.1 → "0p1"`, `0.03 → "0p03"`, `10 → "10"`.
pub fn lambda_tag(lambda: f64) -> String {
    let digits = if lambda > 0.0 {
        (-lambda.log10()).max(0.0).ceil() as usize
    } else {
        0
    };
    format!("{lambda:.digits$}").replace('.', "p")
}

/// Inverse of [`lambda_tag`].
pub fn parse_lambda_tag(tag: &str) -> Option<f64> {
    tag.replace('p', ".").parse().ok()
}

/// What kind of training produced a history file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryKind {
    /// Standalone classifier, `history__crossval_{experiment}__{k}of{n}.json`.
    Classifier { experiment: String },
    /// Adversarial training, `history__combined_lambda{tag}[_{k}of{n}].json`.
    Adversarial { lambda_tag: String },
}

/// Identity decoded from a history file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryId {
    pub kind: HistoryKind,
    /// `(fold, total_folds)`; `None` for a single full-data run.
    pub fold: Option<(usize, usize)>,
}

impl HistoryId {
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".json")?;

        if let Some(rest) = stem.strip_prefix("history__crossval_") {
            let (experiment, fold) = rest.rsplit_once("__")?;
            return Some(Self {
                kind: HistoryKind::Classifier {
                    experiment: experiment.to_string(),
                },
                fold: Some(parse_fold(fold)?),
            });
        }

        let rest = stem.strip_prefix("history__combined_lambda")?;
        let (tag, fold) = match rest.rsplit_once('_') {
            Some((tag, fold)) => (tag, Some(parse_fold(fold)?)),
            None => (rest, None),
        };
        parse_lambda_tag(tag)?;
        Some(Self {
            kind: HistoryKind::Adversarial {
                lambda_tag: tag.to_string(),
            },
            fold,
        })
    }

    pub fn file_name(&self) -> String {
        self.to_string()
    }

    /// Regularisation strength for adversarial histories.
    pub fn lambda(&self) -> Option<f64> {
        match &self.kind {
            HistoryKind::Adversarial { lambda_tag } => parse_lambda_tag(lambda_tag),
            HistoryKind::Classifier { .. } => None,
        }
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, self.fold) {
            (HistoryKind::Classifier { experiment }, Some((k, n))) => {
                write!(f, "history__crossval_{experiment}__{k}of{n}.json")
            }
            (HistoryKind::Classifier { experiment }, None) => {
                write!(f, "history__crossval_{experiment}.json")
            }
            (HistoryKind::Adversarial { lambda_tag }, Some((k, n))) => {
                write!(f, "history__combined_lambda{lambda_tag}_{k}of{n}.json")
            }
            (HistoryKind::Adversarial { lambda_tag }, None) => {
                write!(f, "history__combined_lambda{lambda_tag}.json")
            }
        }
    }
}

fn parse_fold(s: &str) -> Option<(usize, usize)> {
    let (k, n) = s.split_once("of")?;
    Some((k.parse().ok()?, n.parse().ok()?))
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read a Keras-style history: `{ "loss": [...], "val_loss": [...], ... }`.
/// Entries that are not numeric arrays are skipped.
pub fn load_history(path: &Path, fold: usize) -> Result<LossRecord> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading history {}", path.display()))?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing history JSON")?;
    let obj = root
        .as_object()
        .context("Expected a JSON object of loss channels")?;

    let mut channels = BTreeMap::new();
    for (name, val) in obj {
        let Some(arr) = val.as_array() else {
            log::debug!("{}: skipping non-array entry '{name}'", path.display());
            continue;
        };
        let values = arr
            .iter()
            .enumerate()
            .map(|(j, v)| {
                v.as_f64()
                    .with_context(|| format!("{name}[{j}]: not a number"))
            })
            .collect::<Result<Vec<f64>>>()?;
        channels.insert(name.clone(), values);
    }

    Ok(LossRecord::new(fold, channels)?)
}

/// History files in `dir` whose decoded kind matches `kind`, sorted by fold.
///
/// With `num_folds` set only cross-validation files of that many folds are
/// returned; with `None` only the single full-data file.
pub fn discover_histories(
    dir: &Path,
    kind: &HistoryKind,
    num_folds: Option<usize>,
) -> Result<Vec<(HistoryId, PathBuf)>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        let Some(id) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(HistoryId::parse)
        else {
            continue;
        };
        if &id.kind != kind {
            continue;
        }
        let keep = match (num_folds, id.fold) {
            (Some(n), Some((_, total))) => n == total,
            (None, None) => true,
            _ => false,
        };
        if keep {
            found.push((id, path));
        }
    }
    found.sort_by_key(|(id, _)| id.fold.map_or(0, |(k, _)| k));
    Ok(found)
}

/// Discover and load every fold of one experiment.
pub fn load_histories(
    dir: &Path,
    kind: &HistoryKind,
    num_folds: Option<usize>,
) -> Result<Vec<LossRecord>> {
    let found = discover_histories(dir, kind, num_folds)?;
    log::info!("Found {} history files in {}", found.len(), dir.display());
    found
        .iter()
        .map(|(id, path)| load_history(path, id.fold.map_or(0, |(k, _)| k)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lambda_tags_match_file_convention() {
        assert_eq!(lambda_tag(0.1), "0p1");
        assert_eq!(lambda_tag(0.03), "0p03");
        assert_eq!(lambda_tag(10.0), "10");
        assert_eq!(lambda_tag(3.0), "3");
        assert_eq!(parse_lambda_tag("0p1"), Some(0.1));
    }

    #[test]
    fn parses_crossval_classifier_names() {
        let id = HistoryId::parse("history__crossval_classifier__2of3.json").unwrap();
        assert_eq!(
            id.kind,
            HistoryKind::Classifier {
                experiment: "classifier".into()
            }
        );
        assert_eq!(id.fold, Some((2, 3)));
        assert_eq!(id.file_name(), "history__crossval_classifier__2of3.json");
    }

    #[test]
    fn parses_adversarial_names() {
        let id = HistoryId::parse("history__combined_lambda0p1_1of5.json").unwrap();
        assert_eq!(id.fold, Some((1, 5)));
        assert_eq!(id.lambda(), Some(0.1));

        let full = HistoryId::parse("history__combined_lambda10.json").unwrap();
        assert_eq!(full.fold, None);
        assert_eq!(full.lambda(), Some(10.0));
    }

    #[test]
    fn rejects_unrelated_names() {
        assert!(HistoryId::parse("classifier.h5").is_none());
        assert!(HistoryId::parse("history__combined_lambdaX_1of3.json").is_none());
    }

    #[test]
    fn record_rejects_ragged_channels() {
        let err = LossRecord::from_pairs(0, [("loss", vec![1.0, 2.0]), ("val_loss", vec![1.0])])
            .unwrap_err();
        assert!(matches!(err, DiagnosticsError::EpochMismatch { .. }));
    }

    #[test]
    fn loads_and_discovers_files() {
        let dir = std::env::temp_dir().join(format!("mass_sculpt_hist_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for k in [2, 1] {
            let id = HistoryId {
                kind: HistoryKind::Classifier {
                    experiment: "classifier".into(),
                },
                fold: Some((k, 2)),
            };
            std::fs::write(
                dir.join(id.file_name()),
                format!(r#"{{"loss": [1.0, {k}.0], "val_loss": [1.5, 1.2], "note": "x"}}"#),
            )
            .unwrap();
        }
        std::fs::write(dir.join("unrelated.json"), "{}").unwrap();

        let kind = HistoryKind::Classifier {
            experiment: "classifier".into(),
        };
        let records = load_histories(&dir, &kind, Some(2)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fold(), 1);
        assert_eq!(records[1].channel("loss").unwrap(), &[1.0, 2.0]);
        assert!(records[0].channel("note").is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}

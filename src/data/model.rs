use std::collections::BTreeMap;

use crate::error::{DiagnosticsError, Result};

// ---------------------------------------------------------------------------
// Reserved column names
// ---------------------------------------------------------------------------

pub const SIGNAL_COLUMN: &str = "signal";
pub const TRAIN_COLUMN: &str = "train";
pub const FOLD_COLUMN: &str = "fold";

// ---------------------------------------------------------------------------
// Sample – the event table
// ---------------------------------------------------------------------------

/// An event table: named `f64` feature columns plus the typed bookkeeping
/// columns every study needs. All columns share one row count, checked when
/// the sample is built.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    columns: BTreeMap<String, Vec<f64>>,
    weights: Option<Vec<f64>>,
    signal: Vec<bool>,
    train: Vec<bool>,
    fold: Vec<u32>,
}

impl Sample {
    /// Start a sample from its label column.
    pub fn builder(signal: Vec<bool>) -> SampleBuilder {
        SampleBuilder {
            signal,
            columns: BTreeMap::new(),
            weights: None,
            train: None,
            fold: None,
        }
    }

    /// Build from a bag of numeric columns as produced by the loaders.
    ///
    /// `signal` is required; `train`, `fold` and the weight column are
    /// picked up when present. Everything else becomes a feature column.
    pub fn from_columns(
        mut columns: BTreeMap<String, Vec<f64>>,
        weight_column: Option<&str>,
    ) -> Result<Self> {
        let signal = columns
            .remove(SIGNAL_COLUMN)
            .ok_or_else(|| DiagnosticsError::MissingColumn(SIGNAL_COLUMN.to_string()))?
            .into_iter()
            .map(|v| v > 0.5)
            .collect();

        let mut builder = Sample::builder(signal);
        if let Some(train) = columns.remove(TRAIN_COLUMN) {
            builder = builder.train(train.into_iter().map(|v| v > 0.5).collect());
        }
        if let Some(fold) = columns.remove(FOLD_COLUMN) {
            builder = builder.fold(fold.into_iter().map(|v| v.max(0.0) as u32).collect());
        }
        if let Some(name) = weight_column {
            match columns.remove(name) {
                Some(w) => builder = builder.weights(w),
                None => log::debug!("no '{name}' column, using unit weights"),
            }
        }
        for (name, values) in columns {
            builder = builder.column(name, values);
        }
        builder.build()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    /// Names of the feature columns, sorted.
    pub fn feature_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| DiagnosticsError::MissingColumn(name.to_string()))
    }

    /// Per-row weights, `None` meaning unit weights.
    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    pub fn weight(&self, row: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[row])
    }

    pub fn signal(&self) -> &[bool] {
        &self.signal
    }

    pub fn train(&self) -> &[bool] {
        &self.train
    }

    pub fn fold(&self) -> &[u32] {
        &self.fold
    }

    /// Copy of the selected rows, in the given order. Indices may repeat.
    pub fn subset(&self, rows: &[usize]) -> Sample {
        let pick_f = |v: &Vec<f64>| rows.iter().map(|&i| v[i]).collect::<Vec<_>>();
        Sample {
            columns: self
                .columns
                .iter()
                .map(|(k, v)| (k.clone(), pick_f(v)))
                .collect(),
            weights: self.weights.as_ref().map(pick_f),
            signal: rows.iter().map(|&i| self.signal[i]).collect(),
            train: rows.iter().map(|&i| self.train[i]).collect(),
            fold: rows.iter().map(|&i| self.fold[i]).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// SampleBuilder
// ---------------------------------------------------------------------------

/// Collects columns and checks the row-count invariant in [`build`].
///
/// [`build`]: SampleBuilder::build
#[derive(Debug, Clone)]
pub struct SampleBuilder {
    signal: Vec<bool>,
    columns: BTreeMap<String, Vec<f64>>,
    weights: Option<Vec<f64>>,
    train: Option<Vec<bool>>,
    fold: Option<Vec<u32>>,
}

impl SampleBuilder {
    pub fn column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.columns.insert(name.into(), values);
        self
    }

    pub fn weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn train(mut self, train: Vec<bool>) -> Self {
        self.train = Some(train);
        self
    }

    pub fn fold(mut self, fold: Vec<u32>) -> Self {
        self.fold = Some(fold);
        self
    }

    pub fn build(self) -> Result<Sample> {
        let rows = self.signal.len();
        for (name, values) in &self.columns {
            if values.len() != rows {
                return Err(DiagnosticsError::ColumnLength {
                    column: name.clone(),
                    len: values.len(),
                    rows,
                });
            }
        }
        if let Some(w) = &self.weights {
            if w.len() != rows {
                return Err(DiagnosticsError::WeightLength {
                    weights: w.len(),
                    rows,
                });
            }
        }
        let check = |name: &str, len: usize| {
            if len == rows {
                Ok(())
            } else {
                Err(DiagnosticsError::ColumnLength {
                    column: name.to_string(),
                    len,
                    rows,
                })
            }
        };
        if let Some(t) = &self.train {
            check(TRAIN_COLUMN, t.len())?;
        }
        if let Some(f) = &self.fold {
            check(FOLD_COLUMN, f.len())?;
        }

        Ok(Sample {
            columns: self.columns,
            weights: self.weights,
            train: self.train.unwrap_or_else(|| vec![true; rows]),
            fold: self.fold.unwrap_or_else(|| vec![0; rows]),
            signal: self.signal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Sample {
        Sample::builder(vec![true, false, false])
            .column("m", vec![80.0, 120.0, 60.0])
            .column("NN", vec![0.9, 0.2, 0.4])
            .weights(vec![1.0, 2.0, 0.5])
            .build()
            .unwrap()
    }

    #[test]
    fn builder_rejects_short_column() {
        let err = Sample::builder(vec![true, false])
            .column("m", vec![1.0])
            .build()
            .unwrap_err();
        assert!(matches!(err, DiagnosticsError::ColumnLength { len: 1, rows: 2, .. }));
    }

    #[test]
    fn builder_rejects_weight_mismatch() {
        let err = Sample::builder(vec![true, false])
            .weights(vec![1.0, 1.0, 1.0])
            .build()
            .unwrap_err();
        assert_eq!(err, DiagnosticsError::WeightLength { weights: 3, rows: 2 });
    }

    #[test]
    fn from_columns_splits_reserved_columns() {
        let mut cols = BTreeMap::new();
        cols.insert("signal".to_string(), vec![1.0, 0.0]);
        cols.insert("train".to_string(), vec![0.0, 1.0]);
        cols.insert("weight".to_string(), vec![0.5, 2.0]);
        cols.insert("m".to_string(), vec![100.0, 90.0]);
        let s = Sample::from_columns(cols, Some("weight")).unwrap();
        assert_eq!(s.feature_names(), vec!["m"]);
        assert_eq!(s.signal(), &[true, false]);
        assert_eq!(s.train(), &[false, true]);
        assert_eq!(s.fold(), &[0, 0]);
        assert_eq!(s.weight(1), 2.0);
    }

    #[test]
    fn from_columns_requires_signal() {
        let mut cols = BTreeMap::new();
        cols.insert("m".to_string(), vec![100.0]);
        assert_eq!(
            Sample::from_columns(cols, None).unwrap_err(),
            DiagnosticsError::MissingColumn("signal".into())
        );
    }

    #[test]
    fn subset_allows_repeats() {
        let s = toy().subset(&[2, 2, 0]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.column("m").unwrap(), &[60.0, 60.0, 80.0]);
        assert_eq!(s.weights().unwrap(), &[0.5, 0.5, 1.0]);
        assert_eq!(s.signal(), &[false, false, true]);
    }

    #[test]
    fn unit_weights_by_default() {
        let s = Sample::builder(vec![false; 4]).build().unwrap();
        assert_eq!(s.weight(3), 1.0);
        assert!(s.weights().is_none());
    }
}

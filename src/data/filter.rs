use std::fmt;

use serde::{Deserialize, Serialize};

use super::model::Sample;
use crate::error::Result;

// ---------------------------------------------------------------------------
// KinematicRange – an open interval on one column
// ---------------------------------------------------------------------------

/// Open interval `lo < x < hi` on a kinematic column (pT, mass, …).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicRange {
    pub lo: f64,
    pub hi: f64,
}

impl KinematicRange {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, x: f64) -> bool {
        x > self.lo && x < self.hi
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.lo * factor, self.hi * factor)
    }
}

impl fmt::Display for KinematicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}–{:.0}", self.lo, self.hi)
    }
}

/// Label used to key per-range results: `"inclusive"` or `"pT 200–500"`.
pub fn range_label(range: Option<&KinematicRange>) -> String {
    match range {
        Some(r) => format!("pT {r}"),
        None => "inclusive".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Selection – row predicates
// ---------------------------------------------------------------------------

/// Which label class a selection keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassFilter {
    #[default]
    All,
    Signal,
    Background,
}

/// A conjunction of row predicates. The default selection keeps every row.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub class: ClassFilter,
    /// `Some(true)` keeps training rows, `Some(false)` held-out rows.
    pub train: Option<bool>,
    pub ranges: Vec<(String, KinematicRange)>,
}

impl Selection {
    pub fn background() -> Self {
        Self {
            class: ClassFilter::Background,
            ..Default::default()
        }
    }

    pub fn signal() -> Self {
        Self {
            class: ClassFilter::Signal,
            ..Default::default()
        }
    }

    pub fn with_train(mut self, train: bool) -> Self {
        self.train = Some(train);
        self
    }

    pub fn with_range(mut self, column: impl Into<String>, range: KinematicRange) -> Self {
        self.ranges.push((column.into(), range));
        self
    }

    /// Add a range only when one is given; `None` means unrestricted.
    pub fn with_optional_range(self, column: &str, range: Option<KinematicRange>) -> Self {
        match range {
            Some(r) => self.with_range(column, r),
            None => self,
        }
    }

    /// Indices of rows passing every predicate, in row order.
    pub fn indices(&self, sample: &Sample) -> Result<Vec<usize>> {
        let ranged = self
            .ranges
            .iter()
            .map(|(col, r)| Ok((sample.column(col)?, *r)))
            .collect::<Result<Vec<_>>>()?;

        let signal = sample.signal();
        let train = sample.train();

        Ok((0..sample.len())
            .filter(|&i| match self.class {
                ClassFilter::All => true,
                ClassFilter::Signal => signal[i],
                ClassFilter::Background => !signal[i],
            })
            .filter(|&i| self.train.map_or(true, |t| train[i] == t))
            .filter(|&i| ranged.iter().all(|(values, r)| r.contains(values[i])))
            .collect())
    }

    /// The selected rows as a new sample.
    pub fn apply(&self, sample: &Sample) -> Result<Sample> {
        Ok(sample.subset(&self.indices(sample)?))
    }
}

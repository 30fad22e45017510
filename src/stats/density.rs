//! Weighted histogram densities over 1..D dimensions.
//!
//! A [`Density`] is a D-dimensional grid of non-negative cell contents
//! normalised so that `Σ content · volume = 1`, where a cell's volume is the
//! product of its per-dimension bin widths.

use crate::error::{DiagnosticsError, Result};

/// Upper bound on the number of grid cells a density may allocate.
const MAX_CELLS: usize = 1 << 24;

/// How bin edges are chosen for each dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Binning {
    /// `round(30 / √D)` bins per dimension, spanning the observed range.
    Auto,
    /// A fixed bin count per dimension, spanning the observed range.
    Count(usize),
    /// Caller-supplied edges per dimension. Values outside are dropped.
    Edges(Vec<Vec<f64>>),
}

/// Default bins per dimension: `round(30 / √D)`, at least one.
pub fn default_bins(dims: usize) -> usize {
    ((30.0 / (dims.max(1) as f64).sqrt()).round() as usize).max(1)
}

/// `num_bins + 1` evenly spaced edges from `lo` to `hi`, last edge exact.
pub fn linear_edges(lo: f64, hi: f64, num_bins: usize) -> Vec<f64> {
    let step = (hi - lo) / num_bins as f64;
    let mut edges: Vec<f64> = (0..=num_bins).map(|i| lo + step * i as f64).collect();
    edges[num_bins] = hi;
    edges
}

// ---------------------------------------------------------------------------
// Density
// ---------------------------------------------------------------------------

/// A normalised histogram density. Cells are stored row-major, last
/// dimension fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct Density {
    edges: Vec<Vec<f64>>,
    shape: Vec<usize>,
    content: Vec<f64>,
    volume: Vec<f64>,
}

impl Density {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn edges(&self) -> &[Vec<f64>] {
        &self.edges
    }

    /// Density value per cell.
    pub fn content(&self) -> &[f64] {
        &self.content
    }

    /// Volume per cell.
    pub fn volumes(&self) -> &[f64] {
        &self.volume
    }

    /// `Σ content · volume`; 1 for any density with positive mass, 0 when
    /// nothing fell inside the edges.
    pub fn integral(&self) -> f64 {
        self.content
            .iter()
            .zip(&self.volume)
            .map(|(c, v)| c * v)
            .sum()
    }

    pub fn same_binning(&self, other: &Density) -> bool {
        self.edges == other.edges
    }

    /// Bin centres along one dimension.
    pub fn bin_centres(&self, dim: usize) -> Vec<f64> {
        self.edges[dim]
            .windows(2)
            .map(|w| 0.5 * (w[0] + w[1]))
            .collect()
    }

    /// `(centre, density)` pairs of a 1-D density, for plotting.
    pub fn series(&self) -> Vec<(f64, f64)> {
        self.bin_centres(0)
            .into_iter()
            .zip(self.content.iter().copied())
            .collect()
    }

    /// Cellwise average `(self + other) / 2`.
    pub fn mixture(&self, other: &Density) -> Result<Density> {
        if !self.same_binning(other) {
            return Err(DiagnosticsError::InvalidBinning(
                "cannot mix densities with different edges".into(),
            ));
        }
        Ok(Density {
            edges: self.edges.clone(),
            shape: self.shape.clone(),
            content: self
                .content
                .iter()
                .zip(&other.content)
                .map(|(a, b)| 0.5 * (a + b))
                .collect(),
            volume: self.volume.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Build a density from column-major samples: `columns[d][i]` is the value
/// of row `i` in dimension `d`.
///
/// Weighted counts are accumulated per cell, negative net cells are clamped
/// to zero, then the grid is divided by its total mass and by cell volume.
/// With fixed edges, rows outside the edges are dropped; if nothing is left
/// the density is all zeros.
pub fn estimate(columns: &[&[f64]], weights: Option<&[f64]>, binning: &Binning) -> Result<Density> {
    let dims = columns.len();
    if dims == 0 {
        return Err(DiagnosticsError::InvalidArgument(
            "density needs at least one dimension".into(),
        ));
    }
    let n = columns[0].len();
    if let Some(col) = columns.iter().find(|c| c.len() != n) {
        return Err(DiagnosticsError::InvalidArgument(format!(
            "dimensions disagree on row count ({} vs {n})",
            col.len()
        )));
    }
    if n == 0 {
        return Err(DiagnosticsError::EmptySample);
    }
    if let Some(w) = weights {
        if w.len() != n {
            return Err(DiagnosticsError::WeightLength {
                weights: w.len(),
                rows: n,
            });
        }
    }
    for (d, col) in columns.iter().enumerate() {
        if let Some(bad) = col.iter().find(|v| !v.is_finite()) {
            return Err(DiagnosticsError::InvalidArgument(format!(
                "dimension {d} contains non-finite value {bad}"
            )));
        }
    }

    let edges = resolve_edges(columns, binning)?;
    let shape: Vec<usize> = edges.iter().map(|e| e.len() - 1).collect();
    let cells = shape
        .iter()
        .try_fold(1usize, |acc, &k| acc.checked_mul(k))
        .filter(|&c| c <= MAX_CELLS)
        .ok_or_else(|| {
            DiagnosticsError::InvalidBinning(format!("grid {shape:?} exceeds {MAX_CELLS} cells"))
        })?;

    // Row-major strides, last dimension fastest.
    let mut strides = vec![1usize; dims];
    for d in (0..dims.saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }

    let mut content = vec![0.0; cells];
    'rows: for i in 0..n {
        let mut flat = 0;
        for d in 0..dims {
            match bin_index(&edges[d], columns[d][i]) {
                Some(b) => flat += b * strides[d],
                None => continue 'rows,
            }
        }
        content[flat] += weights.map_or(1.0, |w| w[i]);
    }

    let widths: Vec<Vec<f64>> = edges
        .iter()
        .map(|e| e.windows(2).map(|w| w[1] - w[0]).collect())
        .collect();
    let volume: Vec<f64> = (0..cells)
        .map(|flat| {
            (0..dims)
                .map(|d| widths[d][(flat / strides[d]) % shape[d]])
                .product()
        })
        .collect();

    for c in content.iter_mut() {
        if *c < 0.0 {
            *c = 0.0;
        }
    }
    let total: f64 = content.iter().sum();
    if total > 0.0 {
        for (c, v) in content.iter_mut().zip(&volume) {
            *c /= total * v;
        }
    } else {
        log::warn!("density has no mass inside its edges; returning an all-zero grid");
    }

    Ok(Density {
        edges,
        shape,
        content,
        volume,
    })
}

fn resolve_edges(columns: &[&[f64]], binning: &Binning) -> Result<Vec<Vec<f64>>> {
    let num_bins = match binning {
        Binning::Edges(edges) => {
            if edges.len() != columns.len() {
                return Err(DiagnosticsError::DimensionMismatch {
                    expected: columns.len(),
                    found: edges.len(),
                });
            }
            for (d, e) in edges.iter().enumerate() {
                if e.len() < 2 {
                    return Err(DiagnosticsError::InvalidBinning(format!(
                        "dimension {d} needs at least two edges"
                    )));
                }
                if e.windows(2).any(|w| !(w[1] > w[0])) {
                    return Err(DiagnosticsError::InvalidBinning(format!(
                        "dimension {d} edges are not strictly increasing"
                    )));
                }
            }
            return Ok(edges.clone());
        }
        Binning::Auto => default_bins(columns.len()),
        Binning::Count(0) => {
            return Err(DiagnosticsError::InvalidBinning(
                "bin count must be positive".into(),
            ))
        }
        Binning::Count(k) => *k,
    };

    columns
        .iter()
        .enumerate()
        .map(|(d, col)| {
            let (lo, hi) = col
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            if lo == hi {
                return Err(DiagnosticsError::ZeroRange {
                    dimension: d,
                    value: lo,
                });
            }
            Ok(linear_edges(lo, hi, num_bins))
        })
        .collect()
}

/// Bin of `x` in `edges`; the last bin includes its upper edge.
fn bin_index(edges: &[f64], x: f64) -> Option<usize> {
    let last = edges.len() - 1;
    if x < edges[0] || x > edges[last] {
        return None;
    }
    let upper = edges.partition_point(|&e| e <= x);
    Some(upper.saturating_sub(1).min(last - 1))
}

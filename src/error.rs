use thiserror::Error;

/// Errors raised by the numeric core (density, entropy, divergence,
/// aggregation). I/O layers wrap these in `anyhow::Error`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiagnosticsError {
    #[error("sample is empty")]
    EmptySample,

    #[error("dimension {dimension} has zero range (all values equal {value})")]
    ZeroRange { dimension: usize, value: f64 },

    #[error("got {weights} weights for {rows} rows")]
    WeightLength { weights: usize, rows: usize },

    #[error("column '{column}' has {len} values but the sample has {rows} rows")]
    ColumnLength {
        column: String,
        len: usize,
        rows: usize,
    },

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("expected {expected} dimensions, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid binning: {0}")]
    InvalidBinning(String),

    #[error(
        "degenerate cut for '{feature}' at operating point {operating_point:.3}: \
         {pass} rows pass, {fail} rows fail inside the mass window"
    )]
    DegenerateCut {
        feature: String,
        operating_point: f64,
        pass: usize,
        fail: usize,
    },

    #[error("fold {fold}: channel '{channel}' has {found} epochs, expected {expected}")]
    EpochMismatch {
        channel: String,
        fold: usize,
        expected: usize,
        found: usize,
    },

    #[error("fold {fold} has no '{channel}' channel")]
    MissingChannel { fold: usize, channel: String },

    #[error("no fold records to aggregate")]
    NoFolds,

    #[error("{0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, DiagnosticsError>;

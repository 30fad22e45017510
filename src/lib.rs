//! Mass-sculpting diagnostics for jet taggers.
//!
//! Histogram densities and their entropy, pass/fail Jensen–Shannon scans of
//! the jet-mass spectrum with a bootstrap noise floor, cross-validation loss
//! aggregation, and a bounded worker pool that runs the scans in parallel.

pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod runner;
pub mod stats;
pub mod study;

pub use config::AnalysisConfig;
pub use data::model::Sample;
pub use error::{DiagnosticsError, Result};

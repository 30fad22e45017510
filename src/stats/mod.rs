//! Statistical diagnostics: histogram densities, differential entropy,
//! Jensen–Shannon mass-sculpting scans and their bootstrap noise floor.
//!
//! Everything here is synchronous and single-threaded; callers that want
//! parallelism hand independent jobs to [`crate::runner`].

pub mod bootstrap;
pub mod density;
pub mod divergence;
pub mod entropy;
pub mod limit;

/// Guard added inside every `log` of a density value so empty cells do not
/// produce `log(0)`.
///
/// It is a deliberate bias for near-empty cells and is accepted as such:
/// for any cell with content well above this value the shift is far below
/// double precision. [`crate::config::AnalysisConfig::epsilon`] overrides it.
pub const LOG_GUARD: f64 = f64::MIN_POSITIVE;

/// Data layer: event samples, selections and training histories.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv            history__*.json
///        │                                  │
///        ▼                                  ▼
///   ┌──────────┐                      ┌──────────┐
///   │  loader   │  parse → Sample      │ history  │  parse → LossRecord
///   └──────────┘                      └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  model    │  typed columns, row-count invariant
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  class / train / kinematic predicates → row indices
///   └──────────┘
/// ```

pub mod filter;
pub mod history;
pub mod loader;
pub mod model;

/// Data layer: tables, loading, filtering and output.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader  │  parse file → Table / Spectra
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  model   │  named typed columns + metadata
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter  │  COLUMN=op:value predicates → filtered Table
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  writer  │  JSON / CSV / ASCII
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod writer;

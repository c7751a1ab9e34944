//! Core of a spectra inspector: find the targets of a production by sky
//! position, id list or tile/fiber, narrow them with column filters, read
//! their exposures and coadd them per target.

pub mod catalog;
pub mod config;
pub mod data;
pub mod error;
pub mod query;
pub mod spectra;

pub use config::InspectorConfig;
pub use data::model::{Column, ColumnData, MetadataValue, Table};
pub use error::{InspectorError, Result};
pub use query::orchestrator::{QueryOrchestrator, Selection, SpecGroup};
pub use spectra::model::{Spectra, SpectralBand};

//! Request parsing and the query pipeline: range and location grammars, and
//! the orchestrator that drives catalog lookup, redshift augmentation,
//! filtering and spectrum reads.

pub mod location;
pub mod orchestrator;
pub mod range;

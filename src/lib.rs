//! DataPack Validator - declarative validation tests for DataPack records
//!
//! This library loads YAML test definitions, runs their actions against a
//! record store, and aggregates the results into a per-record report.

pub mod cli;
pub mod commands;
pub mod common;
pub mod store;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use store::{QueryResult, RecordStore};

//! Validation test runner
//!
//! Reads YAML test definitions, binds them to DataPack records, and runs
//! their actions against a [`RecordStore`](crate::store::RecordStore).
//! Results are collected into a report keyed by record and test.

pub mod assertions;
pub mod catalog;
pub mod config;
pub mod context;
pub mod executor;
pub mod functions;
pub mod grouper;
pub mod handlers;
pub mod report;
pub mod runner;

#[cfg(test)]
mod fake;

pub use assertions::AssertionEngine;
pub use catalog::{Catalog, CatalogSource, DirectoryCatalog};
pub use config::{load_records, Action, CandidateRecord, ObjectTemplates, RunConfig};
pub use context::{ExecutionState, RunContext};
pub use executor::{TestOutcome, TestState};
pub use grouper::{InitializerRegistry, TestInstance};
pub use handlers::{ActionHandler, HandlerRegistry};
pub use report::ValidationReport;
pub use runner::{requested_catalog, validate, RunEnvironment};

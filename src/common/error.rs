//! Error types for the validation runner
//!
//! Only run-level problems are errors here. A failing action or assertion is
//! recorded on the test instance instead, see `testing::context`.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Message the record store returns when deleting a record that is already gone
const ENTITY_IS_DELETED: &str = "entity is deleted";

/// Main error type for the validation runner
#[derive(Error, Debug)]
pub enum Error {
    // === Catalog Errors ===
    #[error("Configuration Error: test file '{file_name}' for '{subject_type}' exists in both the built-in and the project catalog. Please rename the test file")]
    CatalogConflict {
        subject_type: String,
        file_name: String,
    },

    #[error("Invalid test definition '{name}': {message}")]
    InvalidTest { name: String, message: String },

    // === Setup Errors ===
    #[error("Setup failed: {0}")]
    Setup(String),

    // === Record Store Errors ===
    #[error("Record store {operation} failed: {message}")]
    RecordStore { operation: String, message: String },

    #[error("Record store is not configured: {0}")]
    NotConnected(String),

    #[error("Validation finished with errors")]
    ValidationFailed,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a catalog conflict error
    pub fn catalog_conflict(subject_type: &str, file_name: &str) -> Self {
        Self::CatalogConflict {
            subject_type: subject_type.to_string(),
            file_name: file_name.to_string(),
        }
    }

    /// Create a record store error for the named operation
    pub fn record_store(operation: &str, message: impl Into<String>) -> Self {
        Self::RecordStore {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Create an invalid test definition error
    pub fn invalid_test(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidTest {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Message carried by a remote failure, without the operation prefix
    pub fn remote_message(&self) -> String {
        match self {
            Self::RecordStore { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this is the store telling us the record was already deleted
    pub fn is_already_deleted(&self) -> bool {
        match self {
            Self::RecordStore { message, .. } => message.contains(ENTITY_IS_DELETED),
            _ => false,
        }
    }
}

//! Common utilities shared by the CLI and the test runner

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Test name for a catalog file: the file name up to its first `.`
pub fn test_name_from_file(file_name: &str) -> &str {
    match file_name.find('.') {
        Some(idx) => &file_name[..idx],
        None => file_name,
    }
}

//! Configuration, catalog and report locations
//!
//! The report snapshot is written relative to the working directory so that
//! it lands next to the project being validated.

use std::path::{Path, PathBuf};

/// Name used for the platform configuration directory
const APP_NAME: &str = "datapack-validator";

/// Directory, relative to the working directory, that holds report snapshots
pub const REPORT_DIR: &str = "vlocity-temp/validationTest";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/datapack-validator/`
/// - macOS: `~/Library/Application Support/datapack-validator/`
/// - Windows: `%APPDATA%\datapack-validator\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Location of the catalog shipped with the crate
pub fn builtin_catalog_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("catalog")
}

/// Location of the project-supplied test catalog
///
/// Project tests live in `test/vlocitytests` next to the project directory.
pub fn project_catalog_dir(project_path: &Path) -> PathBuf {
    project_path.join("..").join("test").join("vlocitytests")
}

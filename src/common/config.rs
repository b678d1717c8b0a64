//! Configuration file handling

use serde::Deserialize;
use std::path::PathBuf;

use super::paths::{builtin_catalog_dir, config_path};
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Record store connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Test runner settings
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Connection to the org holding the records under test
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// Base URL of the org, e.g. `https://example.my.salesforce.com`
    pub instance_url: Option<String>,

    /// OAuth access token
    pub access_token: Option<String>,

    /// REST API version without the leading `v`
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Managed package namespace used for `%vlocity_namespace%`
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            instance_url: None,
            access_token: None,
            api_version: default_api_version(),
            namespace: default_namespace(),
        }
    }
}

fn default_api_version() -> String {
    "58.0".to_string()
}

fn default_namespace() -> String {
    "vlocity_cmt".to_string()
}

/// Test runner settings
#[derive(Debug, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of test instances in flight at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Directory of the built-in test catalog
    #[serde(default = "builtin_catalog_dir")]
    pub builtin_catalog: PathBuf,

    /// Object template file overriding the shipped one
    #[serde(default)]
    pub settings: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            builtin_catalog: builtin_catalog_dir(),
            settings: None,
        }
    }
}

fn default_max_parallel() -> usize {
    20
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                return Self::parse(&content);
            }
        }
        Ok(Self::default())
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        if config.runner.max_parallel == 0 {
            return Err(super::Error::Config(
                "runner.max_parallel must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

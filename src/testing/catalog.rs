//! Test catalog discovery, merging and filtering
//!
//! A catalog maps a subject type (a DataPack type, or `All` for tests that
//! apply to every type) to its test files, keyed by file name, holding the
//! raw YAML text.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::config::parse_actions;
use crate::common::{Error, Result};

/// Subject type whose tests apply to every record
pub const ALL_SUBJECT_TYPES: &str = "All";

/// subject type -> file name -> YAML text
pub type Catalog = BTreeMap<String, BTreeMap<String, String>>;

/// Source of test files
pub trait CatalogSource: Send + Sync {
    /// Load every test file below `path`, grouped by subject type directory
    ///
    /// A missing directory yields an empty catalog.
    fn load_directory(&self, path: &Path, category: &str) -> Result<Catalog>;
}

/// Loads `<path>/<subject type>/<file>.yaml`
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryCatalog;

impl CatalogSource for DirectoryCatalog {
    fn load_directory(&self, path: &Path, category: &str) -> Result<Catalog> {
        let mut catalog = Catalog::new();
        if !path.is_dir() {
            tracing::debug!("No {} tests at {}", category, path.display());
            return Ok(catalog);
        }

        for entry in std::fs::read_dir(path)? {
            let type_dir = entry?.path();
            if !type_dir.is_dir() {
                continue;
            }
            let Some(subject_type) = type_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let mut files = BTreeMap::new();
            for file in std::fs::read_dir(&type_dir)? {
                let file = file?.path();
                let is_yaml = file
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e == "yaml" || e == "yml")
                    .unwrap_or(false);
                if !file.is_file() || !is_yaml {
                    continue;
                }
                let Some(file_name) = file.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let text = std::fs::read_to_string(&file).map_err(|e| Error::FileRead {
                    path: file.display().to_string(),
                    error: e.to_string(),
                })?;
                files.insert(file_name.to_string(), text);
            }

            if !files.is_empty() {
                catalog.insert(subject_type.to_string(), files);
            }
        }

        tracing::debug!(
            "Loaded {} {} test files from {}",
            catalog.values().map(BTreeMap::len).sum::<usize>(),
            category,
            path.display()
        );
        Ok(catalog)
    }
}

/// Load the built-in catalog and merge the project catalog into it
///
/// The project catalog is optional: when it cannot be read it contributes
/// nothing.
pub fn load_catalog(
    source: &dyn CatalogSource,
    builtin: &Path,
    project: Option<&Path>,
) -> Result<Catalog> {
    let defaults = source.load_directory(builtin, "validationtest")?;
    if defaults.is_empty() {
        tracing::warn!(
            "No built-in tests found at {}; set runner.builtin_catalog in the config file",
            builtin.display()
        );
    }

    let overrides = match project {
        Some(path) => source.load_directory(path, "vlocitytests").unwrap_or_else(|e| {
            tracing::warn!("Ignoring project tests at {}: {}", path.display(), e);
            Catalog::new()
        }),
        None => Catalog::new(),
    };

    merge_catalogs(defaults, overrides)
}

/// Merge project tests into the built-in catalog
///
/// The same file name under the same subject type in both is a
/// configuration error.
pub fn merge_catalogs(mut defaults: Catalog, overrides: Catalog) -> Result<Catalog> {
    for (subject_type, files) in overrides {
        let target = defaults.entry(subject_type.clone()).or_default();
        for (file_name, text) in files {
            if target.contains_key(&file_name) {
                return Err(Error::catalog_conflict(&subject_type, &file_name));
            }
            target.insert(file_name, text);
        }
    }
    Ok(defaults)
}

/// Which tests a run asked for
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CategorySelection {
    /// Tests whose first action is `Org`
    pub org: bool,
    /// Tests whose first action is `Local`
    pub local: bool,
    /// Explicit `Type/file.yaml` selectors
    pub explicit: HashSet<String>,
}

impl CategorySelection {
    /// Interpret the requested categories
    ///
    /// Explicit selectors without an extension get `.yaml` appended;
    /// anything else is ignored.
    pub fn parse<S: AsRef<str>>(requested: &[S]) -> Self {
        let mut selection = Self::default();
        for category in requested {
            let category = category.as_ref();
            if category == "Org" {
                selection.org = true;
            } else if category == "Local" {
                selection.local = true;
            } else if category.contains('/') {
                let selector = if category.contains(".yaml") {
                    category.to_string()
                } else {
                    format!("{}.yaml", category)
                };
                selection.explicit.insert(selector);
            }
        }
        selection
    }

    /// Whether a test file is retained
    pub fn retains(&self, subject_type: &str, file_name: &str, text: &str) -> bool {
        if self
            .explicit
            .contains(&format!("{}/{}", subject_type, file_name))
        {
            return true;
        }

        let actions = match parse_actions(text) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!("Skipping {}/{}: {}", subject_type, file_name, e);
                return false;
            }
        };

        match actions.first().and_then(|a| a.name.as_deref()) {
            Some("Org") => self.org,
            Some("Local") => self.local,
            _ => false,
        }
    }
}

/// Keep only the tests the run asked for
pub fn filter_by_requested_types<S: AsRef<str>>(catalog: &Catalog, requested: &[S]) -> Catalog {
    let selection = CategorySelection::parse(requested);
    let mut filtered = Catalog::new();

    for (subject_type, files) in catalog {
        for (file_name, text) in files {
            if selection.retains(subject_type, file_name, text) {
                filtered
                    .entry(subject_type.clone())
                    .or_default()
                    .insert(file_name.clone(), text.clone());
            }
        }
    }

    filtered
}

//! Test definition and run configuration types
//!
//! Defines the data structures for deserializing YAML test files, the
//! candidate records they run against, and the object templates used when
//! tests create records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};
use crate::store::NamespaceRewriter;

/// Object templates shipped with the crate
const SHIPPED_TEMPLATES: &str = include_str!("../../settings/object_templates.yaml");

/// Default report file name
pub const DEFAULT_LOG_NAME: &str = "ValidationTest.yaml";

/// A single step of a test file
///
/// Everything besides the well-known keys ends up in `parameters`, so a step
/// like `{Action: query, Query: "..."}` carries `Query` as a parameter.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Action {
    /// Operation selector (e.g. "query", "createSObject")
    #[serde(rename = "Action", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expectations checked against the operation's result
    #[serde(rename = "Assert", default, skip_serializing_if = "Option::is_none")]
    pub assert: Option<Map<String, Value>>,
    /// Record how long the operation took
    #[serde(rename = "TimeTrack", default, skip_serializing_if = "std::ops::Not::not")]
    pub time_track: bool,
    /// Operation specific parameters
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

impl Action {
    /// Create a bare action with the given name
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Name for messages; unnamed actions show as an empty string
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// String parameter by key
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Parse the ordered action list of a test file
///
/// An empty file yields no actions.
pub fn parse_actions(text: &str) -> Result<Vec<Action>> {
    let actions: Option<Vec<Action>> = serde_yaml::from_str(text)?;
    Ok(actions.unwrap_or_default())
}

/// A DataPack as exported from the project, one per record under test
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CandidateRecord {
    /// Subject type of the DataPack (e.g. "Product2")
    #[serde(rename = "VlocityDataPackType", default)]
    pub data_pack_type: Option<String>,
    /// DataPack payload holding the primary record
    #[serde(rename = "VlocityDataPackData", default)]
    pub data: Value,
}

impl CandidateRecord {
    pub fn new(data_pack_type: &str, data: Value) -> Self {
        Self {
            data_pack_type: Some(data_pack_type.to_string()),
            data,
        }
    }

    /// The primary record: first element of the first record list in the payload
    pub fn record(&self) -> Option<&Value> {
        self.data.as_object()?.values().find_map(|value| {
            value
                .as_array()
                .and_then(|records| records.first())
                .filter(|record| record.is_object())
        })
    }
}

/// Load candidate records from a JSON or YAML file holding a list
pub fn load_records(path: &Path) -> Result<Vec<CandidateRecord>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Options of one validation run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Delete records created by a test when that test fails
    pub clean_test_data: bool,
    /// Requested categories: "Org", "Local" and explicit "Type/file" selectors
    pub tests: Vec<String>,
    /// Project directory; its sibling `test/vlocitytests` holds project tests
    pub project_path: Option<PathBuf>,
    /// Code of the price list used by product tests
    pub default_price_list: Option<String>,
    /// Report file name
    pub log_name: String,
    /// Set when the run recorded any error
    pub has_error: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            clean_test_data: false,
            tests: Vec::new(),
            project_path: None,
            default_price_list: None,
            log_name: DEFAULT_LOG_NAME.to_string(),
            has_error: false,
        }
    }
}

/// Field templates for records created by tests, keyed by object type
#[derive(Debug, Clone, Default)]
pub struct ObjectTemplates {
    templates: HashMap<String, Map<String, Value>>,
}

impl ObjectTemplates {
    /// Templates shipped with the crate
    pub fn shipped() -> Result<Self> {
        Self::parse(SHIPPED_TEMPLATES)
    }

    /// Load templates from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let templates: Option<HashMap<String, Map<String, Value>>> = serde_yaml::from_str(text)?;
        Ok(Self {
            templates: templates.unwrap_or_default(),
        })
    }

    /// Substitute the namespace placeholder in all templates
    pub fn rewrite(self, namespace: &NamespaceRewriter) -> Self {
        let templates = self
            .templates
            .into_iter()
            .map(|(object, fields)| {
                let fields = match namespace.rewrite_value(&Value::Object(fields)) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                (namespace.rewrite(&object), fields)
            })
            .collect();
        Self { templates }
    }

    pub fn get(&self, sobject_type: &str) -> Option<&Map<String, Value>> {
        self.templates.get(sobject_type)
    }

    pub fn insert(&mut self, sobject_type: &str, fields: Map<String, Value>) {
        self.templates.insert(sobject_type.to_string(), fields);
    }
}

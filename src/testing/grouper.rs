//! Pairing of catalog tests with candidate records
//!
//! Every (record, applicable test file) pair becomes one [`TestInstance`]
//! with a fresh key. Subject types may register a [`TestInitializer`] that
//! resolves the business key of the instance before it runs.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use uuid::Uuid;

use super::catalog::{Catalog, ALL_SUBJECT_TYPES};
use super::config::{parse_actions, Action, CandidateRecord};
use super::context::RunContext;
use crate::common::{test_name_from_file, Error, Result};

/// Record field holding the global key of a product
const GLOBAL_KEY_FIELD: &str = "%vlocity_namespace%__GlobalKey__c";

/// One test file bound to one record
#[derive(Debug, Clone, PartialEq)]
pub struct TestInstance {
    /// Unique within a run
    pub unique_key: String,
    pub test_name: String,
    pub subject_type: String,
    /// Own copy of the test's steps
    pub actions: Vec<Action>,
    pub record: Value,
    pub record_source_key: String,
    /// Business key resolved by an initializer
    pub data_pack_unique_key: Option<String>,
    /// Set when the instance could not be prepared; it then runs no action
    pub setup_failure: Option<String>,
}

/// Prepares instances of one subject type
pub trait TestInitializer: Send + Sync {
    /// Resolve the business key of an instance
    fn initialize(&self, run: &RunContext, instance: &TestInstance) -> Result<Option<String>>;
}

/// Products are identified by their global key and need a price list
pub struct Product2Initializer;

impl TestInitializer for Product2Initializer {
    fn initialize(&self, run: &RunContext, instance: &TestInstance) -> Result<Option<String>> {
        if run.default_price_list.as_deref().filter(|code| !code.is_empty()).is_none() {
            return Err(Error::Setup("Default PriceList Missing".to_string()));
        }

        let global_key = instance
            .record
            .get(GLOBAL_KEY_FIELD)
            .or_else(|| instance.record.get(&run.namespace.rewrite(GLOBAL_KEY_FIELD)))
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty());

        match global_key {
            Some(key) => Ok(Some(key.to_string())),
            None => Err(Error::Setup("Global Key Missing".to_string())),
        }
    }
}

/// Subject type -> initializer
pub struct InitializerRegistry {
    initializers: HashMap<String, Box<dyn TestInitializer>>,
}

impl InitializerRegistry {
    pub fn empty() -> Self {
        Self {
            initializers: HashMap::new(),
        }
    }

    /// Registry with the built-in initializers
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("Product2", Product2Initializer);
        registry
    }

    pub fn register(&mut self, subject_type: &str, initializer: impl TestInitializer + 'static) {
        self.initializers
            .insert(subject_type.to_string(), Box::new(initializer));
    }

    pub fn get(&self, subject_type: &str) -> Option<&dyn TestInitializer> {
        self.initializers.get(subject_type).map(|i| i.as_ref())
    }
}

impl Default for InitializerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Tests applying to a subject type: the wildcard ones, overridden by the
/// subject type's own on a file name collision
fn applicable_tests<'a>(catalog: &'a Catalog, subject_type: &str) -> BTreeMap<&'a str, &'a str> {
    let mut tests = BTreeMap::new();
    for key in [ALL_SUBJECT_TYPES, subject_type] {
        if let Some(files) = catalog.get(key) {
            for (file_name, text) in files {
                tests.insert(file_name.as_str(), text.as_str());
            }
        }
    }
    tests
}

/// Build the runnable instances for every candidate record
///
/// Records without a subject type or a primary record are skipped. The
/// instances keep record order and, per record, file name order.
pub fn group(
    records: &[CandidateRecord],
    catalog: &Catalog,
    run: &RunContext,
    initializers: &InitializerRegistry,
) -> Vec<TestInstance> {
    let mut instances = Vec::new();

    for candidate in records {
        let (Some(subject_type), Some(record)) = (candidate.data_pack_type.as_deref(), candidate.record()) else {
            continue;
        };

        for (file_name, text) in applicable_tests(catalog, subject_type) {
            let unique_key = Uuid::new_v4().to_string();
            let record_source_key = record
                .get("VlocityRecordSourceKey")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| unique_key.clone());

            let mut instance = TestInstance {
                unique_key,
                test_name: test_name_from_file(file_name).to_string(),
                subject_type: subject_type.to_string(),
                actions: Vec::new(),
                record: record.clone(),
                record_source_key,
                data_pack_unique_key: None,
                setup_failure: None,
            };

            let prepared = parse_actions(text)
                .map_err(|e| Error::invalid_test(file_name, e.to_string()))
                .and_then(|actions| {
                    instance.actions = actions;
                    match initializers.get(subject_type) {
                        Some(initializer) => initializer.initialize(run, &instance),
                        None => Ok(None),
                    }
                });

            match prepared {
                Ok(key) => instance.data_pack_unique_key = key,
                Err(e) => {
                    run.flag_error();
                    let message = match e {
                        Error::Setup(message) => message,
                        other => other.to_string(),
                    };
                    tracing::error!(
                        "{} VlocityRecordSourceKey {}",
                        message,
                        instance.record_source_key
                    );
                    instance.setup_failure = Some(message);
                }
            }

            instances.push(instance);
        }
    }

    tracing::debug!("Grouped {} test instances", instances.len());
    instances
}

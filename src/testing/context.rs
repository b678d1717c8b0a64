//! Run-wide and per-test state
//!
//! [`RunContext`] lives for one call to `validate` and is shared by all test
//! tasks. [`ExecutionState`] belongs to exactly one test instance and is only
//! touched by the task running it.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::config::ObjectTemplates;
use super::functions::SpecialValue;
use super::grouper::TestInstance;
use super::report::{save_report, ActionReport, FailedAction, ReportEntry, ReportStore, ValidationReport};
use crate::store::{MatchingKeyRegistry, NamespaceRewriter, RecordStore};

/// State shared by every test of a run
pub struct RunContext {
    pub store: Arc<dyn RecordStore>,
    pub namespace: NamespaceRewriter,
    pub templates: ObjectTemplates,
    pub matching_keys: MatchingKeyRegistry,
    pub default_price_list: Option<String>,
    pub clean_test_data: bool,
    report_path: Option<PathBuf>,
    reports: Mutex<ReportStore>,
    report_write: tokio::sync::Mutex<()>,
    /// price book id -> product key -> price book entry id
    pricebook_entries: Mutex<HashMap<String, HashMap<String, String>>>,
    matching_keys_seen: Mutex<HashSet<String>>,
    error_happened: AtomicBool,
}

impl RunContext {
    pub fn new(store: Arc<dyn RecordStore>, namespace: NamespaceRewriter) -> Self {
        Self {
            store,
            namespace,
            templates: ObjectTemplates::default(),
            matching_keys: MatchingKeyRegistry::default(),
            default_price_list: None,
            clean_test_data: false,
            report_path: None,
            reports: Mutex::new(ReportStore::default()),
            report_write: tokio::sync::Mutex::new(()),
            pricebook_entries: Mutex::new(HashMap::new()),
            matching_keys_seen: Mutex::new(HashSet::new()),
            error_happened: AtomicBool::new(false),
        }
    }

    pub fn with_templates(mut self, templates: ObjectTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_matching_keys(mut self, matching_keys: MatchingKeyRegistry) -> Self {
        self.matching_keys = matching_keys;
        self
    }

    pub fn with_default_price_list(mut self, code: Option<String>) -> Self {
        self.default_price_list = code;
        self
    }

    pub fn with_cleanup(mut self, clean_test_data: bool) -> Self {
        self.clean_test_data = clean_test_data;
        self
    }

    /// Write a report snapshot to `path` after every action
    pub fn with_report_path(mut self, path: PathBuf) -> Self {
        self.report_path = Some(path);
        self
    }

    /// Mark the run as failed; never reset within a run
    pub fn flag_error(&self) {
        self.error_happened.store(true, Ordering::SeqCst);
    }

    pub fn error_happened(&self) -> bool {
        self.error_happened.load(Ordering::SeqCst)
    }

    /// Publish the current report of a test and persist a snapshot
    pub async fn publish(&self, state: &ExecutionState) {
        self.reports.lock().publish(
            &state.test_key,
            ReportEntry {
                record_source_key: state.record_source_key.clone(),
                test_name: state.test_name.clone(),
                report: state.report.clone(),
            },
        );
        self.persist().await;
    }

    /// Snapshots are built and written under one lock so the file never
    /// goes back to an older state
    async fn persist(&self) {
        let Some(path) = &self.report_path else {
            return;
        };
        let _guard = self.report_write.lock().await;
        let snapshot = self.build_report(false);
        if let Err(e) = save_report(path, &snapshot).await {
            tracing::warn!("Could not write report to {}: {}", path.display(), e);
        }
    }

    /// Render the report of everything published so far
    pub fn build_report(&self, failures_only: bool) -> ValidationReport {
        self.reports
            .lock()
            .build_report(failures_only, self.error_happened())
    }

    /// Latest published report of a test instance
    pub fn report_for(&self, test_key: &str) -> Option<ReportEntry> {
        self.reports.lock().get(test_key).cloned()
    }

    pub fn cached_pricebook_entry(&self, pricebook_id: &str, product_key: &str) -> Option<String> {
        self.pricebook_entries
            .lock()
            .get(pricebook_id)
            .and_then(|entries| entries.get(product_key))
            .cloned()
    }

    pub fn cache_pricebook_entry(&self, pricebook_id: &str, product_key: &str, entry_id: &str) {
        self.pricebook_entries
            .lock()
            .entry(pricebook_id.to_string())
            .or_default()
            .insert(product_key.to_string(), entry_id.to_string());
    }

    /// Run a duplicate check against the run's matching key set
    ///
    /// The set is held for the whole check and emptied afterwards.
    pub fn with_matching_keys_seen<R>(&self, check: impl FnOnce(&mut HashSet<String>) -> R) -> R {
        let mut seen = self.matching_keys_seen.lock();
        let result = check(&mut seen);
        seen.clear();
        result
    }
}

/// Ids of records created by a test, grouped by object type in creation order
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CleanupMap {
    entries: Vec<(String, Vec<String>)>,
}

impl CleanupMap {
    pub fn push(&mut self, sobject_type: &str, id: &str) {
        match self.entries.iter_mut().find(|(t, _)| t == sobject_type) {
            Some((_, ids)) => ids.push(id.to_string()),
            None => self
                .entries
                .push((sobject_type.to_string(), vec![id.to_string()])),
        }
    }

    pub fn ids(&self, sobject_type: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(t, _)| t == sobject_type)
            .map(|(_, ids)| ids.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand out every entry, leaving the map empty
    pub fn take(&mut self) -> Vec<(String, Vec<String>)> {
        std::mem::take(&mut self.entries)
    }
}

/// State of one test instance while it runs
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub test_key: String,
    pub test_name: String,
    pub record: Value,
    pub record_source_key: String,
    pub data_pack_unique_key: String,
    pub cleanup: CleanupMap,
    /// Results of earlier actions, visible to later ones
    pub working_data: Map<String, Value>,
    pub report: ActionReport,
    pub action_failed: bool,
    pub action_message: String,
    pub substitutions: HashMap<SpecialValue, Value>,
}

impl ExecutionState {
    pub fn new(instance: &TestInstance) -> Self {
        Self {
            test_key: instance.unique_key.clone(),
            test_name: instance.test_name.clone(),
            record: instance.record.clone(),
            record_source_key: instance.record_source_key.clone(),
            data_pack_unique_key: instance
                .data_pack_unique_key
                .clone()
                .unwrap_or_else(|| instance.unique_key.clone()),
            cleanup: CleanupMap::default(),
            working_data: Map::new(),
            report: ActionReport::default(),
            action_failed: false,
            action_message: String::new(),
            substitutions: HashMap::new(),
        }
    }

    /// Reset the per-action failure signal
    pub fn begin_action(&mut self) {
        self.action_failed = false;
        self.action_message.clear();
    }

    /// Fail the current action and the run
    pub fn fail(&mut self, run: &RunContext, message: impl Into<String>) {
        run.flag_error();
        self.action_failed = true;
        self.action_message = message.into();
    }

    /// Write the outcome of the action that just ran into the report
    pub fn record_action(&mut self, action_name: &str) {
        self.report.test_result = !self.action_failed;
        if self.action_failed {
            self.report.failed_action = Some(FailedAction {
                name: action_name.to_string(),
                message: self.action_message.clone(),
            });
        }
    }

    /// Value stored by an earlier action
    pub fn working_value(&self, key: &str) -> Option<&Value> {
        self.working_data.get(key)
    }

    /// Field of a value stored by an earlier action
    pub fn working_field(&self, key: &str, field: &str) -> Option<&Value> {
        self.working_data.get(key).and_then(|v| v.get(field))
    }
}

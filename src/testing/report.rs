//! Test report aggregation and persistence
//!
//! Each running test publishes its [`ActionReport`] after every action. The
//! [`ReportStore`] keeps the latest one per test instance and renders the
//! nested `record -> test -> result` report on demand.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use colored::Colorize;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::common::Result;

/// Outcome of a test so far
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ActionReport {
    #[serde(rename = "TestResult")]
    pub test_result: bool,
    #[serde(rename = "FailedAction", skip_serializing_if = "Option::is_none")]
    pub failed_action: Option<FailedAction>,
    #[serde(rename = "ElapsedTimeTracking", skip_serializing_if = "Vec::is_empty")]
    pub elapsed_time_tracking: Vec<TimedAction>,
}

/// The action that failed a test
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FailedAction {
    #[serde(rename = "ActionName")]
    pub name: String,
    #[serde(rename = "Message")]
    pub message: String,
}

/// Duration of one timed action, serialized as `{action: millis}`
#[derive(Debug, Clone, PartialEq)]
pub struct TimedAction {
    pub action: String,
    pub duration_ms: u64,
}

impl Serialize for TimedAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.action, &self.duration_ms)?;
        map.end()
    }
}

/// Latest report of one test instance
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub record_source_key: String,
    pub test_name: String,
    pub report: ActionReport,
}

/// The rendered report
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// One `{record source key: {test name: result}}` map per record
    pub records: Vec<BTreeMap<String, BTreeMap<String, ActionReport>>>,
    /// `"error"` when the run recorded any error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ValidationReport {
    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }

    /// Number of (record, test) results in the report
    pub fn test_count(&self) -> usize {
        self.records
            .iter()
            .flat_map(|r| r.values())
            .map(BTreeMap::len)
            .sum()
    }
}

/// Reports of all test instances of a run, keyed by instance key
#[derive(Debug, Default)]
pub struct ReportStore {
    entries: HashMap<String, ReportEntry>,
}

impl ReportStore {
    /// Record the latest report of a test instance
    pub fn publish(&mut self, test_key: &str, entry: ReportEntry) {
        self.entries.insert(test_key.to_string(), entry);
    }

    pub fn get(&self, test_key: &str) -> Option<&ReportEntry> {
        self.entries.get(test_key)
    }

    /// Group results by record and test
    ///
    /// With `failures_only`, passing tests are dropped, and so are records
    /// left without any test.
    pub fn build_report(&self, failures_only: bool, error_happened: bool) -> ValidationReport {
        let mut grouped: BTreeMap<String, BTreeMap<String, ActionReport>> = BTreeMap::new();

        for entry in self.entries.values() {
            let tests = grouped.entry(entry.record_source_key.clone()).or_default();
            if !failures_only || !entry.report.test_result {
                tests.insert(entry.test_name.clone(), entry.report.clone());
            }
        }

        let records = grouped
            .into_iter()
            .filter(|(_, tests)| !tests.is_empty())
            .map(|(key, tests)| BTreeMap::from([(key, tests)]))
            .collect();

        ValidationReport {
            records,
            status: error_happened.then(|| "error".to_string()),
        }
    }
}

/// Write a report snapshot as YAML, creating parent directories
pub async fn save_report(path: &Path, report: &ValidationReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let yaml = serde_yaml::to_string(report)?;
    tokio::fs::write(path, yaml).await?;
    Ok(())
}

/// Print the end-of-run banner and summaries
///
/// The failures summary is always printed when there are failures; the full
/// summary only when verbose.
pub fn print_summary(failures: &ValidationReport, full: &ValidationReport, verbose: bool) {
    if full.is_error() {
        println!("\n{}", "Validation Test Failed".red().bold());
    } else {
        println!("\n{}", "Validation Test Completed".green().bold());
    }

    if !failures.records.is_empty() {
        match serde_yaml::to_string(&failures.records) {
            Ok(yaml) => println!("{}\n{}", "Summary".yellow().bold(), yaml),
            Err(e) => tracing::warn!("Could not render summary: {}", e),
        }
    }

    if verbose {
        match serde_yaml::to_string(&full.records) {
            Ok(yaml) => println!("{}\n{}", "Summary".cyan(), yaml.dimmed()),
            Err(e) => tracing::warn!("Could not render summary: {}", e),
        }
    }

    println!(
        "{} tests, {} failed",
        full.test_count(),
        failures.test_count()
    );
}

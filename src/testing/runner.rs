//! Validation run orchestration
//!
//! Loads and filters the catalog, binds it to the candidate records, and
//! runs every test instance with bounded parallelism. Instances are admitted
//! in grouping order as soon as a running one finishes.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::assertions::AssertionEngine;
use super::catalog::{filter_by_requested_types, load_catalog, Catalog, CatalogSource, DirectoryCatalog};
use super::config::{CandidateRecord, ObjectTemplates, RunConfig};
use super::context::RunContext;
use super::executor::{run_test, TestOutcome};
use super::grouper::{group, InitializerRegistry};
use super::handlers::HandlerRegistry;
use super::report::{print_summary, ValidationReport};
use crate::common::config::RunnerConfig;
use crate::common::{paths, Error, Result};
use crate::store::{MatchingKeyRegistry, NamespaceRewriter, RecordStore};

/// Everything a run needs besides its options and records
pub struct RunEnvironment {
    pub store: Arc<dyn RecordStore>,
    pub catalog_source: Box<dyn CatalogSource>,
    pub namespace: NamespaceRewriter,
    pub templates: ObjectTemplates,
    /// Loaded from the org when not given
    pub matching_keys: Option<MatchingKeyRegistry>,
    pub handlers: HandlerRegistry,
    pub assertions: AssertionEngine,
    pub initializers: InitializerRegistry,
    pub builtin_catalog: PathBuf,
    pub max_parallel: usize,
    /// Directory the report snapshot is written to
    pub report_dir: PathBuf,
    pub verbose: bool,
}

impl RunEnvironment {
    /// Environment with the built-in registries and default locations
    pub fn new(store: Arc<dyn RecordStore>, namespace: NamespaceRewriter) -> Self {
        let runner = RunnerConfig::default();
        Self {
            store,
            catalog_source: Box::new(DirectoryCatalog),
            namespace,
            templates: ObjectTemplates::default(),
            matching_keys: None,
            handlers: HandlerRegistry::builtin(),
            assertions: AssertionEngine::builtin(),
            initializers: InitializerRegistry::builtin(),
            builtin_catalog: paths::builtin_catalog_dir(),
            max_parallel: runner.max_parallel,
            report_dir: PathBuf::from(paths::REPORT_DIR),
            verbose: false,
        }
    }
}

/// Load the built-in and project catalogs and keep the requested tests
pub fn requested_catalog(
    source: &dyn CatalogSource,
    builtin: &std::path::Path,
    config: &RunConfig,
) -> Result<Catalog> {
    let project = config.project_path.as_deref().map(paths::project_catalog_dir);
    let catalog = load_catalog(source, builtin, project.as_deref())?;
    Ok(filter_by_requested_types(&catalog, &config.tests))
}

/// Run every requested test against every candidate record
///
/// A catalog conflict aborts the run before any test starts. Test failures
/// do not make this an error; they show in the returned report and set
/// `config.has_error`.
pub async fn validate(
    config: &mut RunConfig,
    records: &[CandidateRecord],
    env: RunEnvironment,
) -> Result<ValidationReport> {
    let catalog = match requested_catalog(env.catalog_source.as_ref(), &env.builtin_catalog, config) {
        Ok(catalog) => catalog,
        Err(e) => {
            config.has_error = true;
            tracing::error!("{}", e);
            return Err(e);
        }
    };

    let matching_keys = match env.matching_keys {
        Some(keys) => keys,
        None => MatchingKeyRegistry::load(env.store.as_ref(), &env.namespace).await?,
    };

    let run = Arc::new(
        RunContext::new(env.store.clone(), env.namespace.clone())
            .with_templates(env.templates.rewrite(&env.namespace))
            .with_matching_keys(matching_keys)
            .with_default_price_list(config.default_price_list.clone())
            .with_cleanup(config.clean_test_data)
            .with_report_path(env.report_dir.join(&config.log_name)),
    );

    let instances = group(records, &catalog, &run, &env.initializers);
    tracing::info!(
        "Running {} tests on {} records",
        instances.len(),
        records.len()
    );

    let handlers = Arc::new(env.handlers);
    let assertions = Arc::new(env.assertions);
    let semaphore = Arc::new(Semaphore::new(env.max_parallel.max(1)));
    let mut join_set = JoinSet::new();

    for instance in instances {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("test limiter closed: {}", e)))?;
        let run = run.clone();
        let handlers = handlers.clone();
        let assertions = assertions.clone();

        join_set.spawn(async move {
            let outcome = run_test(&run, &handlers, &assertions, instance).await;
            drop(permit);
            outcome
        });
    }

    let mut outcomes: Vec<TestOutcome> = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_error) => {
                run.flag_error();
                tracing::error!("Test task join error: {}", join_error);
            }
        }
    }

    let failed = outcomes.iter().filter(|o| !o.passed()).count();
    tracing::debug!("{} tests finished, {} failed", outcomes.len(), failed);

    let failures = run.build_report(true);
    let full = run.build_report(false);
    print_summary(&failures, &full, env.verbose);

    if run.error_happened() {
        config.has_error = true;
    }

    Ok(full)
}

//! CLI command handling
//!
//! Builds the record store and run environment from the config file and
//! flags, then runs or lists the tests.

use std::sync::Arc;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::{Config, RunnerConfig};
use crate::common::{test_name_from_file, Error, Result};
use crate::store::{NamespaceRewriter, RestRecordStore};
use crate::testing::{
    load_records, requested_catalog, validate, DirectoryCatalog, ObjectTemplates, RunConfig,
    RunEnvironment,
};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, verbose: bool) -> Result<()> {
    let config = Config::load()?;

    match command {
        Commands::Validate {
            records,
            tests,
            project_path,
            default_price_list,
            clean_test_data,
            log_name,
            instance_url,
            access_token,
        } => {
            let mut connection = config.connection.clone();
            if instance_url.is_some() {
                connection.instance_url = instance_url;
            }
            if access_token.is_some() {
                connection.access_token = access_token;
            }

            let candidates = load_records(&records)?;
            let store = Arc::new(RestRecordStore::new(&connection)?);

            let mut env = RunEnvironment::new(store, NamespaceRewriter::new(connection.namespace.clone()));
            env.templates = load_templates(&config.runner)?;
            env.builtin_catalog = config.runner.builtin_catalog.clone();
            env.max_parallel = config.runner.max_parallel;
            env.verbose = verbose;

            let mut run_config = RunConfig {
                clean_test_data,
                tests,
                project_path,
                default_price_list,
                log_name,
                has_error: false,
            };

            validate(&mut run_config, &candidates, env).await?;

            if run_config.has_error {
                return Err(Error::ValidationFailed);
            }
            Ok(())
        }

        Commands::List {
            tests,
            project_path,
        } => {
            let run_config = RunConfig {
                tests,
                project_path,
                ..RunConfig::default()
            };
            let catalog = requested_catalog(&DirectoryCatalog, &config.runner.builtin_catalog, &run_config)?;

            if catalog.is_empty() {
                println!("No tests match {}", run_config.tests.join(", "));
                return Ok(());
            }

            for (subject_type, files) in &catalog {
                println!("{}", subject_type.cyan().bold());
                for file_name in files.keys() {
                    println!("  {:24} {}", test_name_from_file(file_name), file_name.dimmed());
                }
            }

            Ok(())
        }
    }
}

/// Object templates from the configured settings file, or the shipped ones
fn load_templates(runner: &RunnerConfig) -> Result<ObjectTemplates> {
    match runner.settings.as_deref() {
        Some(path) => ObjectTemplates::load(path),
        None => ObjectTemplates::shipped(),
    }
}

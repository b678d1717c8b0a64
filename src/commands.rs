//! CLI command definitions
//!
//! Defines the clap commands for the validator CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run validation tests against exported DataPacks
    Validate {
        /// JSON or YAML file with the DataPacks to validate
        records: PathBuf,

        /// Test categories to run: Org, Local, or Type/file selectors
        /// Can be specified multiple times: --tests Local --tests Product2/addToCart
        #[arg(long = "tests", short = 't', default_value = "Local")]
        tests: Vec<String>,

        /// Project directory; tests in ../test/vlocitytests are added to the built-in ones
        #[arg(long)]
        project_path: Option<PathBuf>,

        /// Code of the price list used by product tests
        #[arg(long)]
        default_price_list: Option<String>,

        /// Delete records created by a test when it fails
        #[arg(long)]
        clean_test_data: bool,

        /// Report file name under vlocity-temp/validationTest
        #[arg(long, default_value = "ValidationTest.yaml")]
        log_name: String,

        /// Org instance URL (overrides the config file)
        #[arg(long)]
        instance_url: Option<String>,

        /// Access token (overrides the config file)
        #[arg(long, env = "DATAPACK_VALIDATOR_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
    },

    /// List the tests a validation run would use
    List {
        /// Test categories: Org, Local, or Type/file selectors
        #[arg(long = "tests", short = 't', default_values = ["Org", "Local"])]
        tests: Vec<String>,

        /// Project directory; tests in ../test/vlocitytests are added to the built-in ones
        #[arg(long)]
        project_path: Option<PathBuf>,
    },
}

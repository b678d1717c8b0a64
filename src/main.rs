//! DataPack Validator - declarative validation tests for DataPack records
//!
//! Runs YAML-defined test actions against an org and reports which records
//! pass.

use clap::Parser;
use datapack_validator::{cli, commands, common::logging};
use commands::Commands;

#[derive(Parser)]
#[command(name = "datapack-validator", about = "Validation tests for DataPack records")]
#[command(version, long_about = None)]
struct Cli {
    /// Debug logging and the full report summary
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_cli(cli.verbose);

    if let Err(e) = cli::dispatch(cli.command, cli.verbose).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

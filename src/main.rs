//! Installation harness CLI
//!
//! Runs the ordered installation test suite against a disposable container
//! or the local host and exits non-zero when any test case failed.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use harness::{cli, commands, common};

#[derive(Parser)]
#[command(name = "install-harness", about = "Installation test harness")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/install-harness/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output, including every dispatched command
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Also write full-detail logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    common::logging::init_cli(cli.verbose, cli.log_file.as_deref());

    let code = match cli::dispatch(cli.command, cli.config.as_deref()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    std::process::exit(code);
}

//! CLI command handling
//!
//! Maps parsed commands onto the library and formats their output.

use std::path::Path;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::{Error, Result, SuiteConfig};
use crate::suite::runner::OutputFormat;
use crate::suite::{all_cases, Orchestrator, RunOptions};
use crate::target;

/// Dispatch a CLI command, returning the process exit code
pub async fn dispatch(command: Commands, config_path: Option<&Path>) -> Result<i32> {
    let mut config = SuiteConfig::load(config_path)?;

    match command {
        Commands::Run {
            mode,
            image,
            only,
            json,
            no_progress,
        } => {
            if let Some(mode) = mode {
                config.target.mode = mode;
            }
            if let Some(image) = image {
                config.target.image = image;
            }
            config.validate()?;

            let options = RunOptions {
                only,
                format: if json {
                    OutputFormat::Json
                } else {
                    OutputFormat::Text
                },
                progress: !no_progress,
            };
            run_suite(config, options).await
        }

        Commands::List => {
            println!("{}", "Test cases (execution order):".bold());
            for (index, case) in all_cases().iter().enumerate() {
                println!(
                    "  {:>2}. {:<30} {}",
                    index + 1,
                    case.name(),
                    case.description().dimmed()
                );
            }
            Ok(0)
        }

        Commands::Check { mode } => {
            if let Some(mode) = mode {
                config.target.mode = mode;
            }
            match target::check_prerequisites(&config).await {
                Ok(detail) => {
                    println!(
                        "{} {} target available: {}",
                        "✓".green(),
                        config.target.mode,
                        detail
                    );
                    Ok(0)
                }
                Err(e) => {
                    println!("{} {} target unavailable: {}", "✗".red(), config.target.mode, e);
                    Ok(1)
                }
            }
        }

        Commands::Config => {
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| Error::Internal(format!("Failed to render configuration: {}", e)))?;
            print!("{}", rendered);
            Ok(0)
        }
    }
}

async fn run_suite(config: SuiteConfig, options: RunOptions) -> Result<i32> {
    let mut target = target::from_config(&config);
    let orchestrator = Orchestrator::new(config, options);

    match orchestrator.run(target.as_mut()).await {
        Ok(report) => Ok(report.exit_code()),
        Err(e @ Error::Config(_)) => Err(e),
        Err(e) => {
            eprintln!("{} {}", "Suite could not run:".red().bold(), e);
            Ok(1)
        }
    }
}

//! CLI command definitions
//!
//! Defines the clap commands for the installation harness.

use clap::Subcommand;

use crate::target::TargetMode;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the installation test suite
    Run {
        /// Where commands run (overrides target.mode)
        #[arg(long, value_enum)]
        mode: Option<TargetMode>,

        /// Container image to test against (overrides target.image)
        #[arg(long)]
        image: Option<String>,

        /// Run only the named test case; can be given multiple times.
        /// Other cases are reported as skipped
        #[arg(long = "only", value_name = "NAME")]
        only: Vec<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Don't draw the progress spinner
        #[arg(long)]
        no_progress: bool,
    },

    /// List the test cases in execution order
    List,

    /// Check that the selected target can be provisioned
    Check {
        /// Target to check (overrides target.mode)
        #[arg(long, value_enum)]
        mode: Option<TargetMode>,
    },

    /// Print the effective configuration as TOML
    Config,
}

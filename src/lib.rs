//! Installation test harness
//!
//! Validates a multi-step software installation (package repository,
//! database engine, application packages, configuration, service) by running
//! an ordered suite of test cases against an interchangeable execution
//! target: a disposable privileged container or the local host.

pub mod cli;
pub mod commands;
pub mod common;
pub mod install;
pub mod progress;
pub mod report;
pub mod suite;
pub mod target;

// Re-export commonly used types for tests
pub use common::{Error, Result, SuiteConfig};
pub use install::{InstallState, Phase};
pub use report::{SuiteReport, TestStatus};
pub use suite::{Orchestrator, RunOptions};
pub use target::{ExecOutput, ExecutionTarget, MockTarget, TargetMode};

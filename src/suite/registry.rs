//! Test case registry
//!
//! The declaration order below is the execution order.

use super::cases::{
    Configuration, DatabaseEngineInstallation, FilePermissions, HttpEndpoint,
    PackageInstallation, RepositoryInstallation, ServiceStart, ServiceStatus, StdioMode,
    TokenManagement, UserManagement,
};
use super::TestCase;

/// Every test case, in execution order
pub fn all_cases() -> Vec<Box<dyn TestCase>> {
    vec![
        Box::new(RepositoryInstallation),
        Box::new(DatabaseEngineInstallation),
        Box::new(PackageInstallation),
        Box::new(FilePermissions),
        Box::new(Configuration),
        Box::new(ServiceStart),
        Box::new(ServiceStatus),
        Box::new(HttpEndpoint),
        Box::new(TokenManagement),
        Box::new(UserManagement),
        Box::new(StdioMode),
    ]
}

/// Get a test case by name
pub fn find_case(name: &str) -> Option<Box<dyn TestCase>> {
    all_cases().into_iter().find(|c| c.name() == name)
}

/// Names of every test case, in execution order
pub fn case_names() -> Vec<&'static str> {
    all_cases().iter().map(|c| c.name()).collect()
}

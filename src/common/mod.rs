//! Common utilities shared by the targets, the installer and the suite

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

use std::sync::atomic::{AtomicU64, Ordering};

pub use config::SuiteConfig;
pub use error::{Error, Result};

/// Quote a string for safe inclusion in a POSIX shell command
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Milliseconds since the Unix epoch, used to make names unique
pub fn epoch_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Suffix distinct for every call, across runs on the same host
pub fn unique_suffix() -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        epoch_millis(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain_words_unchanged() {
        assert_eq!(shell_quote("/usr/bin/psql"), "/usr/bin/psql");
        assert_eq!(shell_quote("pgedge:pgedge"), "pgedge:pgedge");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
    }

    #[test]
    fn test_unique_suffix_needs_no_quoting() {
        let first = unique_suffix();
        let second = unique_suffix();
        assert_ne!(first, second);
        assert_eq!(shell_quote(&first), first);
    }
}

//! Integration tests for logging system

use bridge_traits::logging::LogLevel;
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};

#[test]
fn test_logging_initializes_once() {
    // Only one global subscriber can be installed per process
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug);

    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_err());

    tracing::debug!(target: "core_sync", "logging ready");
}

#[test]
fn test_identity_tokens_are_redacted() {
    assert_eq!(
        redact_if_sensitive("identity_token", "0123-abcd"),
        "[REDACTED]"
    );
    assert_eq!(redact_if_sensitive("Identity", "0123-abcd"), "[REDACTED]");
}

#[test]
fn test_file_names_pass_through() {
    assert_eq!(redact_if_sensitive("name", "notes.txt"), "notes.txt");
    assert_eq!(redact_if_sensitive("new_name", "draft.md"), "draft.md");
}

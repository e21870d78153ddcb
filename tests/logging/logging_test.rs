//! Tests for `src/logging.rs`.

use actuation_kernel::logging::{LoggingGuard, LOG_FILE_PREFIX};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // Only one global subscriber per process; the directory is created
    // before installation is attempted.
    let _result = actuation_kernel::logging::init_production(&logs_dir, "info");
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_cli_twice_is_harmless() {
    actuation_kernel::logging::init_cli("warn");
    actuation_kernel::logging::init_cli("warn");
}

#[test]
fn log_prefix_names_the_crate() {
    assert!(LOG_FILE_PREFIX.starts_with("actuation-kernel"));
}

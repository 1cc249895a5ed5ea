//! Tests for `src/logging.rs`.

use poolwatch::logging::LoggingGuard;

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

    // The global subscriber can only be installed once per process, so the
    // result is not asserted; the directory is created either way.
    let _result = poolwatch::logging::init_production(&logs_dir, "info");
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_cli_twice_does_not_panic() {
    poolwatch::logging::init_cli("info").expect("valid level");
    poolwatch::logging::init_cli("poolwatch=debug,info").expect("valid directives");
}

#[test]
fn invalid_default_level_is_rejected() {
    // RUST_LOG overrides the configured level entirely.
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    assert!(poolwatch::logging::init_cli("poolwatch=loudest").is_err());

    let tmp = tempfile::tempdir().expect("should create temp dir");
    assert!(poolwatch::logging::init_production(&tmp.path().join("logs"), "poolwatch=loudest").is_err());
}

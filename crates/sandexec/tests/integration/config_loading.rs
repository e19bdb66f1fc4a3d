use std::path::PathBuf;
use std::time::Duration;

use sandexec::{Config, EntryPolicy, IsolationMode};

use super::fixture_config_path;

#[test]
fn test_load_valid_config() {
    let config = Config::from_file(fixture_config_path("valid_full.toml"))
        .expect("Failed to load config");

    assert_eq!(config.sandbox_root, PathBuf::from("/var/lib/sandexec"));
    assert_eq!(config.interpreter_binary(), PathBuf::from("/usr/bin/python3"));
    assert_eq!(config.working_dir(), PathBuf::from("/srv/app"));
    assert_eq!(config.isolation, IsolationMode::UnprivilegedUser);
    assert_eq!(config.sandbox_user, "runner");
    assert_eq!(config.sensitive_env_prefixes, vec!["PG", "SECRET"]);
    assert_eq!(config.timeout(), Some(Duration::from_secs_f64(5.5)));
    assert_eq!(config.entry_policy, EntryPolicy::Single);
    assert_eq!(config.max_concurrency, Some(4));
}

#[test]
fn test_load_minimal_config() {
    let config = Config::from_file(fixture_config_path("valid_minimal.toml"))
        .expect("Failed to load config");

    assert_eq!(config.sandbox_root, PathBuf::from("sandbox"));
    assert_eq!(config.isolation, IsolationMode::Local);
    assert!(config.is_sensitive("PGPASSWORD"));
}

#[test]
fn test_load_invalid_timeout() {
    assert!(Config::from_file(fixture_config_path("invalid_timeout.toml")).is_err());
}

#[test]
fn test_load_invalid_empty_prefix() {
    assert!(Config::from_file(fixture_config_path("invalid_empty_prefix.toml")).is_err());
}

#[test]
fn test_load_invalid_isolation() {
    assert!(Config::from_file(fixture_config_path("invalid_isolation.toml")).is_err());
}

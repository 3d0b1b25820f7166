use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};

use tempfile::TempDir;
use triggers::config::{ConfigError, ConfigLoader, ExecutionStrategy};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

const KEYS: &[&str] = &[
    "TRIGGERS_PROFILE",
    "TRIGGERS_LOG_LEVEL",
    "TRIGGERS_DATABASE_URL",
    "TRIGGERS_EXECUTION_STRATEGY",
    "TRIGGERS_AUDIT_ENABLED",
    "TRIGGERS_DURABLE_MAX_ACTIVITY_RETRIES",
    "TRIGGERS_DURABLE_PARALLEL_ACTIONS",
];

fn clear_env() {
    for key in KEYS {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.execution_strategy, ExecutionStrategy::Queued);
    assert!(cfg.audit_enabled);
    assert_eq!(cfg.durable.max_activity_retries, 3);
    assert!(cfg.durable.parallel_actions);
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "TRIGGERS_EXECUTION_STRATEGY=inline\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "TRIGGERS_EXECUTION_STRATEGY=queued\nTRIGGERS_DURABLE_MAX_ACTIVITY_RETRIES=5\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "TRIGGERS_EXECUTION_STRATEGY=durable\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "TRIGGERS_PROFILE=test\nTRIGGERS_LOG_LEVEL=debug\nOTHER_APP_LOG_LEVEL=trace\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.execution_strategy, ExecutionStrategy::Durable);
    assert_eq!(cfg.durable.max_activity_retries, 5);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "TRIGGERS_AUDIT_ENABLED=true\nTRIGGERS_DURABLE_PARALLEL_ACTIONS=yes\n",
    );

    unsafe {
        env::set_var("TRIGGERS_AUDIT_ENABLED", "off");
        env::set_var("TRIGGERS_DURABLE_PARALLEL_ACTIONS", "0");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert!(!cfg.audit_enabled);
    assert!(!cfg.durable.parallel_actions);

    clear_env();
}

#[test]
fn unknown_execution_strategy_returns_error() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("TRIGGERS_EXECUTION_STRATEGY", "celery");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("unknown strategy should fail");
    assert!(matches!(err, ConfigError::InvalidExecutionStrategy { .. }));
    assert!(format!("{}", err).contains("celery"));

    clear_env();
}

#[test]
fn zero_retry_ceiling_is_rejected() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("TRIGGERS_DURABLE_MAX_ACTIVITY_RETRIES", "0");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("zero retries should fail");
    assert!(format!("{}", err).contains("DURABLE_MAX_ACTIVITY_RETRIES"));

    clear_env();
}

use edu_hub::{
    AppConfig,
    config::{BackendKind, Env, LOCAL_JWT_SECRET},
};
use serial_test::serial;
use std::{env, panic, path::PathBuf};

const CONFIG_VARS: [&str; 7] = [
    "APP_ENV",
    "APP_BACKEND",
    "SUPABASE_URL",
    "SUPABASE_ANON_KEY",
    "SUPABASE_JWT_SECRET",
    "SESSION_FILE",
    "APP_ADDR",
];

// --- Setup/Teardown Utilities ---

/// Runs `test` with exactly the given variables set (all other config variables
/// cleared) and restores the previous environment afterward.
fn run_with_env<T, R>(vars: &[(&str, &str)], test: T) -> R
where
    T: FnOnce() -> R + panic::UnwindSafe,
{
    let originals: Vec<(&str, Option<String>)> = CONFIG_VARS
        .iter()
        .map(|&var| (var, env::var(var).ok()))
        .collect();

    unsafe {
        for var in CONFIG_VARS {
            env::remove_var(var);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
    }

    let result = panic::catch_unwind(test);

    for (key, original_value) in originals {
        unsafe {
            match original_value {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }

    match result {
        Ok(value) => value,
        Err(e) => panic::resume_unwind(e),
    }
}

// --- Tests ---

#[test]
#[serial]
fn test_app_config_production_fail_fast() {
    let result = run_with_env(
        &[
            ("APP_ENV", "production"),
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            // SUPABASE_JWT_SECRET is missing
        ],
        || panic::catch_unwind(AppConfig::load),
    );

    assert!(
        result.is_err(),
        "Production config loading should panic on missing secrets"
    );
}

#[test]
#[serial]
fn test_app_config_production_reads_all_secrets() {
    let config = run_with_env(
        &[
            ("APP_ENV", "production"),
            ("APP_BACKEND", "memory"),
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_JWT_SECRET", "prod-secret"),
            ("APP_ADDR", "0.0.0.0:8080"),
        ],
        AppConfig::load,
    );

    assert_eq!(config.env, Env::Production);
    // The in-memory backend is never used in production.
    assert_eq!(config.backend, BackendKind::Supabase);
    assert_eq!(config.supabase_url, "https://project.supabase.co");
    assert_eq!(config.jwt_secret, "prod-secret");
    assert_eq!(config.bind_addr, "0.0.0.0:8080");
}

#[test]
#[serial]
fn test_app_config_local_env_defaults() {
    let config = run_with_env(&[("APP_ENV", "local")], AppConfig::load);

    assert_eq!(config.env, Env::Local);
    assert_eq!(config.backend, BackendKind::Supabase);
    assert_eq!(config.supabase_url, "http://localhost:54321");
    assert_eq!(config.jwt_secret, LOCAL_JWT_SECRET);
    assert_eq!(config.bind_addr, "127.0.0.1:3000");
    assert!(config.session_file.is_none());
}

#[test]
#[serial]
fn test_app_config_local_memory_backend_and_session_file() {
    let config = run_with_env(
        &[
            ("APP_BACKEND", "memory"),
            ("SESSION_FILE", "/tmp/edu-hub-session.json"),
        ],
        AppConfig::load,
    );

    assert_eq!(config.env, Env::Local);
    assert_eq!(config.backend, BackendKind::Memory);
    assert_eq!(
        config.session_file,
        Some(PathBuf::from("/tmp/edu-hub-session.json"))
    );
}

#[test]
#[serial]
fn test_app_config_blank_session_file_disables_persistence() {
    let config = run_with_env(&[("SESSION_FILE", "  ")], AppConfig::load);

    assert!(config.session_file.is_none());
}

#[test]
fn test_default_config_needs_no_environment() {
    let config = AppConfig::default();

    assert_eq!(config.env, Env::Local);
    assert_eq!(config.backend, BackendKind::Memory);
    assert!(config.session_file.is_none());
}

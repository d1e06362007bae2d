use std::{env, path::PathBuf};

/// Fallback JWT secret for local runs. Matches the Supabase CLI's local stack default.
pub const LOCAL_JWT_SECRET: &str = "super-secret-jwt-token-with-at-least-32-characters-long";

/// AppConfig
///
/// Holds the application's configuration. Immutable once loaded and shared through
/// the router state via FromRef.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls log format and which backends are allowed.
    pub env: Env,
    // Which backend implementation serves auth and tables.
    pub backend: BackendKind,
    // Base URL of the Supabase project (GoTrue under /auth/v1, PostgREST under /rest/v1).
    pub supabase_url: String,
    // Public anon key, sent as `apikey` on every request.
    pub supabase_anon_key: String,
    // Secret used to verify access tokens restored from disk.
    pub jwt_secret: String,
    // Where the signed-in session is persisted between runs. None disables persistence.
    pub session_file: Option<PathBuf>,
    // Address the HTTP server binds to.
    pub bind_addr: String,
}

/// Env
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// BackendKind
///
/// `Memory` runs the portal against the seeded in-process backend. Only honoured locally.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BackendKind {
    Supabase,
    Memory,
}

impl Default for AppConfig {
    /// default
    ///
    /// Non-panicking configuration for tests; nothing here touches the environment.
    fn default() -> Self {
        Self {
            env: Env::Local,
            backend: BackendKind::Memory,
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            session_file: None,
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables (after `.env` has been applied).
    ///
    /// # Panics
    /// Panics in production when `SUPABASE_URL`, `SUPABASE_ANON_KEY` or
    /// `SUPABASE_JWT_SECRET` is missing. The process must not start half-configured.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let session_file = env::var("SESSION_FILE")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let bind_addr = env::var("APP_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());

        match env {
            Env::Local => {
                // The in-memory backend is a local convenience; anything else means Supabase.
                let backend = match env::var("APP_BACKEND").as_deref() {
                    Ok("memory") => BackendKind::Memory,
                    _ => BackendKind::Supabase,
                };
                Self {
                    env,
                    backend,
                    supabase_url: env::var("SUPABASE_URL")
                        .unwrap_or_else(|_| "http://localhost:54321".to_string()),
                    supabase_anon_key: env::var("SUPABASE_ANON_KEY").unwrap_or_default(),
                    jwt_secret: env::var("SUPABASE_JWT_SECRET")
                        .unwrap_or_else(|_| LOCAL_JWT_SECRET.to_string()),
                    session_file,
                    bind_addr,
                }
            }
            Env::Production => {
                if env::var("APP_BACKEND").as_deref() == Ok("memory") {
                    tracing::warn!("APP_BACKEND=memory is ignored in production");
                }
                Self {
                    env,
                    backend: BackendKind::Supabase,
                    supabase_url: required("SUPABASE_URL"),
                    supabase_anon_key: required("SUPABASE_ANON_KEY"),
                    jwt_secret: required("SUPABASE_JWT_SECRET"),
                    session_file,
                    bind_addr,
                }
            }
        }
    }
}

fn required(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("FATAL: {name} must be set in production."))
}

//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. Components never
//! read it directly; they receive explicit options derived from a snapshot of it.

use std::env;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// Represents the complete client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub api_timeout_secs: u64,
    pub summary_debounce_ms: u64,
    pub default_result_eta_ms: u64,
    /// Zero disables the result timeout.
    pub result_timeout_grace_secs: u64,
}

/// Debounce window of exercise summaries when `SUMMARY_DEBOUNCE_MS` is unset.
pub const DEFAULT_SUMMARY_DEBOUNCE_MS: u64 = 300;

/// Result ETA assumed until the server sends one.
pub const DEFAULT_RESULT_ETA_MS: u64 = 120_000;

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable value '{raw}' for {key}");
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Every field has a default, so loading never fails; unparsable numbers fall
    /// back to their default with a warning.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            project_name: env::var("PROJECT_NAME").unwrap_or_else(|_| "submission-tracker".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "tracker=info".into()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "tracker.log".into()),
            log_to_stdout: env::var("LOG_TO_STDOUT").unwrap_or_else(|_| "false".into()) == "true",
            api_base_url: env::var("API_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080/api".into()),
            api_token: env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),
            api_timeout_secs: parsed_or("API_TIMEOUT_SECS", 30),
            summary_debounce_ms: parsed_or("SUMMARY_DEBOUNCE_MS", DEFAULT_SUMMARY_DEBOUNCE_MS),
            default_result_eta_ms: parsed_or("DEFAULT_RESULT_ETA_MS", DEFAULT_RESULT_ETA_MS),
            result_timeout_grace_secs: parsed_or("RESULT_TIMEOUT_GRACE_SECS", 0),
        }
    }

    /// Returns a shared reference to the global configuration.
    ///
    /// # Panics
    /// Panics if the lock is poisoned.
    pub fn global() -> std::sync::RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .expect("Failed to acquire AppConfig read lock")
    }

    /// Returns an owned copy of the global configuration.
    pub fn snapshot() -> AppConfig {
        Self::global().clone()
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock
                .write()
                .expect("Failed to acquire AppConfig write lock");
            *guard = AppConfig::from_env();
        }
    }

    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock
            .write()
            .expect("Failed to acquire AppConfig write lock");
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_api_base_url(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.api_base_url = value.into());
    }

    pub fn set_api_token(value: Option<String>) {
        AppConfig::set_field(|cfg| cfg.api_token = value);
    }

    pub fn set_summary_debounce_ms(value: u64) {
        AppConfig::set_field(|cfg| cfg.summary_debounce_ms = value);
    }

    pub fn set_default_result_eta_ms(value: u64) {
        AppConfig::set_field(|cfg| cfg.default_result_eta_ms = value);
    }

    pub fn set_result_timeout_grace_secs(value: u64) {
        AppConfig::set_field(|cfg| cfg.result_timeout_grace_secs = value);
    }
}

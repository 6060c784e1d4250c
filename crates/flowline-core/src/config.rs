// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use flowline_engine::EngineConfig;

/// Flowline Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Base URL of the execution engine REST API; `None` disables engine
    /// deployment (local-only mode).
    pub engine_url: Option<String>,
    /// Basic-auth username for the engine.
    pub engine_user: Option<String>,
    /// Basic-auth password for the engine.
    pub engine_password: Option<String>,
    /// Per-request engine timeout in seconds.
    pub engine_timeout_secs: u64,
    /// History retention stamped on deployed definitions, in days.
    pub history_ttl_days: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FLOWLINE_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `FLOWLINE_ENGINE_URL`: engine REST base URL (default: unset, local-only)
    /// - `FLOWLINE_ENGINE_USER` / `FLOWLINE_ENGINE_PASSWORD`: basic auth
    /// - `FLOWLINE_ENGINE_TIMEOUT_SECS`: engine request timeout (default: 30)
    /// - `FLOWLINE_HISTORY_TTL_DAYS`: definition history retention (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FLOWLINE_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("FLOWLINE_DATABASE_URL"))?;

        let engine_url = std::env::var("FLOWLINE_ENGINE_URL").ok();
        let engine_user = std::env::var("FLOWLINE_ENGINE_USER").ok();
        let engine_password = std::env::var("FLOWLINE_ENGINE_PASSWORD").ok();

        let engine_timeout_secs: u64 = std::env::var("FLOWLINE_ENGINE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("FLOWLINE_ENGINE_TIMEOUT_SECS", "must be a positive integer")
            })?;

        let history_ttl_days: u32 = std::env::var("FLOWLINE_HISTORY_TTL_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("FLOWLINE_HISTORY_TTL_DAYS", "must be a positive integer")
            })?;

        Ok(Self {
            database_url,
            engine_url,
            engine_user,
            engine_password,
            engine_timeout_secs,
            history_ttl_days,
        })
    }

    /// Engine connection settings, if an engine URL is configured.
    pub fn engine_config(&self) -> Option<EngineConfig> {
        self.engine_url.as_ref().map(|url| EngineConfig {
            base_url: url.clone(),
            username: self.engine_user.clone(),
            password: self.engine_password.clone(),
            timeout: Duration::from_secs(self.engine_timeout_secs),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("FLOWLINE_DATABASE_URL", "sqlite::memory:");
        guard.remove("FLOWLINE_ENGINE_URL");
        guard.remove("FLOWLINE_ENGINE_TIMEOUT_SECS");
        guard.remove("FLOWLINE_HISTORY_TTL_DAYS");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert!(config.engine_url.is_none());
        assert!(config.engine_config().is_none());
        assert_eq!(config.engine_timeout_secs, 30);
        assert_eq!(config.history_ttl_days, 30);
    }

    #[test]
    fn from_env_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("FLOWLINE_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("FLOWLINE_DATABASE_URL")));
    }

    #[test]
    fn from_env_with_engine() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("FLOWLINE_DATABASE_URL", "postgres://localhost/flowline");
        guard.set("FLOWLINE_ENGINE_URL", "http://engine:8080/engine-rest");
        guard.set("FLOWLINE_ENGINE_USER", "demo");
        guard.set("FLOWLINE_ENGINE_PASSWORD", "secret");
        guard.set("FLOWLINE_HISTORY_TTL_DAYS", "180");

        let config = Config::from_env().unwrap();
        assert_eq!(config.history_ttl_days, 180);
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.base_url, "http://engine:8080/engine-rest");
        assert_eq!(engine.username.as_deref(), Some("demo"));
    }

    #[test]
    fn from_env_rejects_invalid_ttl() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("FLOWLINE_DATABASE_URL", "sqlite::memory:");
        guard.set("FLOWLINE_HISTORY_TTL_DAYS", "soon");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("FLOWLINE_HISTORY_TTL_DAYS", _)
        ));
    }
}

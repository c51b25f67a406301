//! Process configuration, read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub use sampletrack_observability::LogFormat;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// PostgreSQL connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Upper bound on waiting for another writer's row locks.
    pub lock_timeout: Duration,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse_var("SAMPLETRACK_BIND_ADDR", get("SAMPLETRACK_BIND_ADDR"), DEFAULT_BIND_ADDR)?;
        let db_max_connections: u32 = parse_var(
            "SAMPLETRACK_DB_MAX_CONNECTIONS",
            get("SAMPLETRACK_DB_MAX_CONNECTIONS"),
            &DEFAULT_DB_MAX_CONNECTIONS.to_string(),
        )?;
        if db_max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "SAMPLETRACK_DB_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let lock_timeout_ms: u64 = parse_var(
            "SAMPLETRACK_LOCK_TIMEOUT_MS",
            get("SAMPLETRACK_LOCK_TIMEOUT_MS"),
            &DEFAULT_LOCK_TIMEOUT_MS.to_string(),
        )?;
        // Postgres reads `lock_timeout = 0` as "wait forever".
        if lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "SAMPLETRACK_LOCK_TIMEOUT_MS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let log_format = parse_var("SAMPLETRACK_LOG_FORMAT", get("SAMPLETRACK_LOG_FORMAT"), "json")?;

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            db_max_connections,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            log_format,
        })
    }
}

fn parse_var<T>(var: &'static str, value: Option<String>, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = value.unwrap_or_else(|| default.to_string());
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_select_in_memory_store() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.db_max_connections, 10);
        assert_eq!(cfg.lock_timeout, Duration::from_millis(5_000));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("SAMPLETRACK_BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/sampletrack"),
            ("SAMPLETRACK_DB_MAX_CONNECTIONS", "4"),
            ("SAMPLETRACK_LOCK_TIMEOUT_MS", "250"),
            ("SAMPLETRACK_LOG_FORMAT", "pretty"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/sampletrack"));
        assert_eq!(cfg.db_max_connections, 4);
        assert_eq!(cfg.lock_timeout, Duration::from_millis(250));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        assert_eq!(config(&[("DATABASE_URL", "  ")]).unwrap().database_url, None);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = config(&[("SAMPLETRACK_LOCK_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SAMPLETRACK_LOCK_TIMEOUT_MS", .. }));

        assert!(config(&[("SAMPLETRACK_BIND_ADDR", "nowhere")]).is_err());
        assert!(config(&[("SAMPLETRACK_DB_MAX_CONNECTIONS", "0")]).is_err());
        assert!(config(&[("SAMPLETRACK_LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn zero_lock_timeout_is_rejected() {
        let err = config(&[("SAMPLETRACK_LOCK_TIMEOUT_MS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SAMPLETRACK_LOCK_TIMEOUT_MS", .. }));
        assert_eq!(config(&[("SAMPLETRACK_LOCK_TIMEOUT_MS", "1")]).unwrap().lock_timeout, Duration::from_millis(1));
    }
}

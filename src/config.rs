//! Configuration constants for the loader
//!
//! This module centralizes all tunable parameters and defaults used throughout
//! the application, plus the connection settings for the target database.

use std::time::Duration;

// ============================================================================
// Connection Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

pub const DEFAULT_HOST: &str = "localhost";

/// ClickHouse HTTP interface port
pub const DEFAULT_PORT: u16 = 8123;

pub const DEFAULT_USER: &str = "default";

pub const DEFAULT_PASSWORD: &str = "default";

pub const DEFAULT_DATABASE: &str = "default";

// ============================================================================
// Load Configuration
// ============================================================================

/// Number of rows sent per INSERT when a dataset is split into windows
pub const DEFAULT_CHUNK_ROWS: usize = 10_000;

pub const CSV_TABLE_NAME: &str = "csv_table";
pub const JSON_TABLE_NAME: &str = "json_table";
pub const XLSX_TABLE_NAME: &str = "xlsx_table";
pub const PARQUET_TABLE_NAME: &str = "parquet_table";

// ============================================================================
// Logging Configuration
// ============================================================================

pub const DEFAULT_LOG_DIR: &str = "logs";

/// Prefix of the per-run log file; the unix timestamp is appended
pub const LOG_FILE_PREFIX: &str = "loader";

/// Connection settings for the ClickHouse server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

impl ConnectionSettings {
    /// Read `CLICKHOUSE_HOST`, `CLICKHOUSE_PORT`, `CLICKHOUSE_USER`,
    /// `CLICKHOUSE_PASSWORD` and `CLICKHOUSE_DATABASE`, falling back to the
    /// local defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let port = match lookup("CLICKHOUSE_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| anyhow::anyhow!("Invalid CLICKHOUSE_PORT '{}': {}", raw, e))?,
            None => defaults.port,
        };

        Ok(Self {
            host: lookup("CLICKHOUSE_HOST").unwrap_or(defaults.host),
            port,
            user: lookup("CLICKHOUSE_USER").unwrap_or(defaults.user),
            password: lookup("CLICKHOUSE_PASSWORD").unwrap_or(defaults.password),
            database: lookup("CLICKHOUSE_DATABASE").unwrap_or(defaults.database),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_settings_defaults_when_unset() {
        let settings = ConnectionSettings::from_lookup(|_| None).unwrap();
        assert_eq!(settings, ConnectionSettings::default());
        assert_eq!(settings.port, 8123);
        assert_eq!(settings.host, "localhost");
    }

    #[test]
    fn test_settings_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("CLICKHOUSE_HOST", "ch.internal"),
            ("CLICKHOUSE_PORT", "18123"),
            ("CLICKHOUSE_USER", "loader"),
        ]
        .into_iter()
        .collect();

        let settings =
            ConnectionSettings::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(settings.host, "ch.internal");
        assert_eq!(settings.port, 18123);
        assert_eq!(settings.user, "loader");
        assert_eq!(settings.password, "default");
        assert_eq!(settings.database, "default");
    }

    #[test]
    fn test_settings_invalid_port() {
        let result = ConnectionSettings::from_lookup(|key| {
            (key == "CLICKHOUSE_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }
}

//! Runtime configuration.
//!
//! Values come from the environment (a `.env` file is loaded first when
//! present); CLI flags override them through the `with_*` setters.
//!
//! | Variable                   | Default                         |
//! |----------------------------|---------------------------------|
//! | `DATABASE_URL`             | `sqlite://rostersync.db`        |
//! | `PORT`                     | `3000`                          |
//! | `ROSTERSYNC_MIN_RECORDS`   | `100`                           |
//! | `ROSTERSYNC_CACHE_MINUTES` | `30`                            |
//! | `ROSTERSYNC_LOOKUPS`       | embedded tables                 |
//! | `ROSTERSYNC_STRATEGY`      | `set-based`                     |

use chrono::Duration;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::DEFAULT_TTL_MINUTES;
use crate::error::ConfigError;
use crate::reconcile::DEFAULT_MIN_RECORDS;
use crate::store::ApplyStrategy;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://rostersync.db";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub min_records: usize,
    pub cache_minutes: i64,
    /// Lookup file override; `None` uses the embedded tables.
    pub lookups: Option<PathBuf>,
    pub strategy: ApplyStrategy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            port: DEFAULT_PORT,
            min_records: DEFAULT_MIN_RECORDS,
            cache_minutes: DEFAULT_TTL_MINUTES,
            lookups: None,
            strategy: ApplyStrategy::default(),
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through `get`, unset keys keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = get("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            config.database_url = url;
        }
        if let Some(port) = parse_var(&get, "PORT")? {
            config.port = port;
        }
        if let Some(min) = parse_var(&get, "ROSTERSYNC_MIN_RECORDS")? {
            config.min_records = min;
        }
        if let Some(minutes) = parse_var::<i64>(&get, "ROSTERSYNC_CACHE_MINUTES")? {
            if minutes <= 0 || Duration::try_minutes(minutes).is_none() {
                return Err(ConfigError::Invalid {
                    key: "ROSTERSYNC_CACHE_MINUTES".to_string(),
                    value: minutes.to_string(),
                });
            }
            config.cache_minutes = minutes;
        }
        if let Some(path) = get("ROSTERSYNC_LOOKUPS").filter(|v| !v.trim().is_empty()) {
            config.lookups = Some(PathBuf::from(path));
        }
        if let Some(strategy) = get("ROSTERSYNC_STRATEGY").filter(|v| !v.trim().is_empty()) {
            config.strategy = strategy.parse()?;
        }

        Ok(config)
    }

    /// Cache validity window. Out-of-range minutes fall back to the default.
    pub fn cache_ttl(&self) -> Duration {
        Duration::try_minutes(self.cache_minutes)
            .filter(|ttl| *ttl > Duration::zero())
            .unwrap_or_else(|| Duration::minutes(DEFAULT_TTL_MINUTES))
    }

    pub fn with_database_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.database_url = url;
        }
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    pub fn with_min_records(mut self, min_records: Option<usize>) -> Self {
        if let Some(min) = min_records {
            self.min_records = min;
        }
        self
    }

    pub fn with_lookups(mut self, lookups: Option<PathBuf>) -> Self {
        if lookups.is_some() {
            self.lookups = lookups;
        }
        self
    }

    pub fn with_strategy(mut self, strategy: Option<ApplyStrategy>) -> Self {
        if let Some(strategy) = strategy {
            self.strategy = strategy;
        }
        self
    }
}

fn parse_var<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.min_records, 100);
        assert_eq!(config.cache_minutes, 30);
    }

    #[test]
    fn test_reads_variables() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite://test.db"),
            ("PORT", "8080"),
            ("ROSTERSYNC_MIN_RECORDS", "250"),
            ("ROSTERSYNC_CACHE_MINUTES", "5"),
            ("ROSTERSYNC_LOOKUPS", "/etc/rostersync/lookups.toml"),
            ("ROSTERSYNC_STRATEGY", "full-replace"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "sqlite://test.db");
        assert_eq!(config.port, 8080);
        assert_eq!(config.min_records, 250);
        assert_eq!(config.cache_minutes, 5);
        assert_eq!(config.lookups, Some(PathBuf::from("/etc/rostersync/lookups.toml")));
        assert_eq!(config.strategy, ApplyStrategy::FullReplace);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("ROSTERSYNC_MIN_RECORDS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("ROSTERSYNC_MIN_RECORDS"));

        assert!(AppConfig::from_lookup(lookup(&[("ROSTERSYNC_CACHE_MINUTES", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("ROSTERSYNC_STRATEGY", "yolo")])).is_err());
    }

    #[test]
    fn test_cache_minutes_out_of_range() {
        let err = AppConfig::from_lookup(lookup(&[(
            "ROSTERSYNC_CACHE_MINUTES",
            "9223372036854775807",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { ref key, .. } if key == "ROSTERSYNC_CACHE_MINUTES"
        ));

        let config = AppConfig {
            cache_minutes: i64::MAX,
            ..AppConfig::default()
        };
        assert_eq!(config.cache_ttl(), Duration::minutes(30));
        assert_eq!(AppConfig::default().cache_ttl(), Duration::minutes(30));
    }

    #[test]
    fn test_cli_overrides() {
        let config = AppConfig::default()
            .with_port(Some(9000))
            .with_min_records(None)
            .with_strategy(Some(ApplyStrategy::FullReplace));
        assert_eq!(config.port, 9000);
        assert_eq!(config.min_records, 100);
        assert_eq!(config.strategy, ApplyStrategy::FullReplace);
    }
}

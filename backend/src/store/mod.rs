//! Registry store: where persisted employees live.
//!
//! [`RegistryStore`] is the contract the pipeline talks to; [`SqliteRegistry`]
//! is the implementation shipped with the binary.

mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, StoreResult};
use crate::models::PersistedEmployee;
use crate::reconcile::Diff;

pub use sqlite::SqliteRegistry;

// =============================================================================
// Apply strategy
// =============================================================================

/// How a diff is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyStrategy {
    /// Insert, update and delete key by key in one transaction. A failing key
    /// is reported and the others still commit.
    #[default]
    SetBased,
    /// Empty the table and insert every merged row in one transaction. Any
    /// failure rolls everything back.
    FullReplace,
}

impl ApplyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyStrategy::SetBased => "set-based",
            ApplyStrategy::FullReplace => "full-replace",
        }
    }
}

impl fmt::Display for ApplyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplyStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "set-based" | "setbased" => Ok(ApplyStrategy::SetBased),
            "full-replace" | "fullreplace" => Ok(ApplyStrategy::FullReplace),
            _ => Err(ConfigError::Invalid {
                key: "strategy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Apply report
// =============================================================================

/// Operation attempted for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOperation {
    Insert,
    Update,
    Delete,
}

/// A key whose write failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFailure {
    pub key: String,
    pub operation: ApplyOperation,
    pub reason: String,
    /// Whether the write took effect anyway.
    pub applied: bool,
}

/// Outcome of applying a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub strategy: ApplyStrategy,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failures: Vec<KeyFailure>,
    /// The whole transaction was rolled back; nothing changed.
    pub rolled_back: bool,
}

impl ApplyReport {
    pub fn new(strategy: ApplyStrategy) -> Self {
        Self {
            strategy,
            inserted: 0,
            updated: 0,
            deleted: 0,
            failures: Vec::new(),
            rolled_back: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.rolled_back
    }
}

// =============================================================================
// Store contract
// =============================================================================

/// Persistent employee registry.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Every registry row, ordered by key.
    async fn load(&self) -> StoreResult<Vec<PersistedEmployee>>;

    /// Write a diff. Not reentrant: callers serialize applies against the
    /// same registry.
    async fn apply(&self, diff: &Diff, strategy: ApplyStrategy) -> StoreResult<ApplyReport>;

    /// Copy every registry row into the history table stamped with
    /// `recorded_at`. Returns the number of rows copied.
    async fn archive(&self, recorded_at: DateTime<Utc>) -> StoreResult<u64>;

    /// Check the store is reachable.
    async fn ping(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("set-based".parse::<ApplyStrategy>().unwrap(), ApplyStrategy::SetBased);
        assert_eq!("FULL_REPLACE".parse::<ApplyStrategy>().unwrap(), ApplyStrategy::FullReplace);
        assert!("truncate".parse::<ApplyStrategy>().is_err());
        assert_eq!(ApplyStrategy::default(), ApplyStrategy::SetBased);
        assert_eq!(ApplyStrategy::FullReplace.to_string(), "full-replace");
    }

    #[test]
    fn test_report_serialization() {
        let mut report = ApplyReport::new(ApplyStrategy::SetBased);
        report.failures.push(KeyFailure {
            key: "12345678901".into(),
            operation: ApplyOperation::Update,
            reason: "row not found".into(),
            applied: false,
        });
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["strategy"], "set-based");
        assert_eq!(json["rolledBack"], false);
        assert_eq!(json["failures"][0]["operation"], "update");
        assert!(!report.is_clean());
    }
}

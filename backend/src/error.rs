//! Error types for the roster reconciliation pipeline.
//!
//! One enum per layer, mirroring how data flows through the system:
//!
//! - [`GridError`] - Reading an uploaded file into a cell grid
//! - [`LookupError`] - Loading the lookup tables
//! - [`ConfigError`] - Environment / CLI configuration
//! - [`ReconcileError`] - Preconditions of the reconciliation engine
//! - [`StoreError`] - Registry storage (retryable vs. permanent)
//! - [`ExportError`] - Writing xlsx / csv exports
//! - [`PipelineError`] - Top-level orchestration errors
//! - [`ServerError`] - HTTP layer
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Grid Errors
// =============================================================================

/// Errors while turning an uploaded file into a cell grid.
#[derive(Debug, Error)]
pub enum GridError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// File extension is not a supported spreadsheet format.
    #[error("Unsupported file format '{0}' (expected .xlsx, .xls, .ods or .csv)")]
    UnsupportedFormat(String),

    /// The workbook could not be opened or read.
    #[error("Invalid workbook: {0}")]
    Workbook(String),

    /// The workbook has no worksheet, or the worksheet has no cells.
    #[error("Worksheet '{0}' is empty")]
    EmptySheet(String),

    /// Malformed CSV.
    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),
}

// =============================================================================
// Lookup Errors
// =============================================================================

/// Errors while loading lookup tables.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Failed to read the lookup file.
    #[error("Failed to read lookup file: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML.
    #[error("Invalid lookup file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A situation key that is not an integer code.
    #[error("Situation code '{0}' is not an integer")]
    InvalidSituationCode(String),

    /// A company matricula prefix that is not exactly one character.
    #[error("Company '{company}' has prefix '{prefix}', expected a single character")]
    InvalidPrefix { company: String, prefix: String },
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Invalid configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },
}

// =============================================================================
// Reconciliation Errors
// =============================================================================

/// Preconditions checked before any diff is computed.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Snapshot is too small to be trusted as the full roster.
    #[error("Snapshot has {found} records, below the safety floor of {minimum}; registry left untouched")]
    BelowSafetyFloor { found: usize, minimum: usize },
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the registry store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage could not be reached. Safe to retry later.
    #[error("Registry storage unavailable: {0}")]
    Unavailable(String),

    /// The storage engine rejected an operation.
    #[error("Registry database error: {0}")]
    Database(String),

    /// A persisted row violates the registry invariants.
    #[error("Corrupt registry row '{key}': {message}")]
    Corrupt { key: String, message: String },
}

impl StoreError {
    /// Whether the caller may retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(ref db) if db.message().contains("database is locked") => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

// =============================================================================
// Export Errors
// =============================================================================

/// Errors while writing exports.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write xlsx: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("Failed to write csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("Export IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported export format '{0}' (expected .xlsx or .csv)")]
    UnsupportedFormat(String),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the error type returned by [`crate::pipeline::RosterService`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Reconciliation aborted: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Parsing produced no employee records.
    #[error("No active employees found in the spreadsheet")]
    EmptySnapshot,

    /// No cached snapshot for this session.
    #[error("No upload found for session {0}; upload the file first")]
    SessionNotFound(String),

    /// Cached snapshot is older than the cache window.
    #[error("Upload for session {0} has expired; upload the file again")]
    SessionExpired(String),
}

impl PipelineError {
    /// Whether the failure came from storage being unreachable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Store(e) if e.is_retryable())
    }
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

pub type GridResult<T> = Result<T, GridError>;

pub type LookupResult<T> = Result<T, LookupError>;

pub type StoreResult<T> = Result<T, StoreError>;

pub type ExportResult<T> = Result<T, ExportError>;

pub type PipelineResult<T> = Result<T, PipelineError>;

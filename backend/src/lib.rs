//! # rostersync - Roster spreadsheet ingestion and registry reconciliation
//!
//! rostersync reads the periodic payroll roster export (xlsx or csv), turns
//! its loosely structured rows into typed employee snapshots and reconciles
//! them into a persisted employee registry without overwriting the fields
//! people curate by hand.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐
//! │ xlsx / csv │──▶│   Grid   │──▶│  Snapshot  │──▶│ Reconcile  │──▶│ Registry │
//! │            │   │ (parser) │   │ (+lookups) │   │ (diff)     │   │ (SQLite) │
//! └────────────┘   └──────────┘   └────────────┘   └────────────┘   └──────────┘
//!                                        │                                │
//!                                        ▼                                ▼
//!                                 snapshot cache ─────▶ preview / export (xlsx, csv)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rostersync::{AppConfig, RosterService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = RosterService::from_config(&AppConfig::from_env().unwrap()).await.unwrap();
//!     let parsed = service.parse_file("roster.xlsx".as_ref()).unwrap();
//!     let outcome = service.sync_snapshot(parsed, None, true).await.unwrap();
//!     println!("{} new, {} removed", outcome.summary.inserted, outcome.summary.deleted);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Employee records and the national id key
//! - [`lookups`] - Company, classification and situation tables
//! - [`normalize`] - Field cleaning and derivation
//! - [`parser`] - xlsx/csv to cell grid
//! - [`snapshot`] - Grid to employee snapshot
//! - [`reconcile`] - Snapshot vs registry diff
//! - [`store`] - Registry persistence
//! - [`cache`] - Upload cache for previews
//! - [`export`] - xlsx/csv writers
//! - [`pipeline`] - The service the CLI and API share
//! - [`api`] - HTTP API server

// Core modules
pub mod clock;
pub mod config;
pub mod error;
pub mod models;

// Input
pub mod lookups;
pub mod normalize;
pub mod parser;
pub mod snapshot;

// Reconciliation and storage
pub mod reconcile;
pub mod store;

// Caching
pub mod cache;

// Output
pub mod export;

// Orchestration
pub mod pipeline;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, ExportError, GridError, LookupError, PipelineError, ReconcileError, ServerError,
    StoreError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{EmployeeSnapshot, NationalId, PersistedEmployee};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use lookups::LookupTables;
pub use parser::{read_grid, read_grid_bytes, Cell, Grid, GridFormat};
pub use snapshot::{ColumnLayout, ParsedSnapshot, SnapshotParser, SnapshotReport};

// =============================================================================
// Re-exports - Reconciliation
// =============================================================================

pub use reconcile::{merge_for_preview, reconcile, Diff, DiffSummary, ReconcileOptions};
pub use store::{ApplyReport, ApplyStrategy, RegistryStore, SqliteRegistry};

// =============================================================================
// Re-exports - Export
// =============================================================================

pub use export::{ExportFormat, ExportRow};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use cache::SnapshotCache;
pub use clock::{Clock, SystemClock};
pub use config::AppConfig;
pub use pipeline::{ArchiveOutcome, RosterService, SyncOutcome, UploadOutcome};

// Server
pub mod server {
    pub use crate::api::server::start_server;
}

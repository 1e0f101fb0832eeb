//! REST API types.
//!
//! Everything is serialized camelCase for the web client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::EmployeeSnapshot;
use crate::pipeline::{SyncOutcome, UploadOutcome};
use crate::snapshot::SnapshotReport;

/// Records echoed back in an upload response.
pub const PREVIEW_LIMIT: usize = 10;

/// Response sent after an upload was parsed and cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Session id for `GET /api/preview/{session}`
    pub session_id: String,

    /// "ready" when every employee row was kept, "warning" otherwise
    pub status: String,

    /// First records of the snapshot
    pub preview: Vec<EmployeeSnapshot>,

    pub metadata: UploadMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub file_name: String,
    pub sheet: String,
    pub total_records: usize,
    pub rows_scanned: usize,
    pub companies: Vec<String>,
    pub terminated: usize,
    pub rejected: usize,
    pub unknown_companies: Vec<String>,
    pub unmapped_titles: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl UploadResponse {
    pub fn from_outcome(outcome: &UploadOutcome, ttl: chrono::Duration) -> Self {
        let entry = &outcome.entry;
        let report = &entry.snapshot.report;
        let rejected = rejected_rows(report);

        UploadResponse {
            session_id: outcome.session.clone(),
            status: if rejected == 0 { "ready" } else { "warning" }.to_string(),
            preview: entry
                .snapshot
                .records
                .iter()
                .take(PREVIEW_LIMIT)
                .cloned()
                .collect(),
            metadata: UploadMetadata {
                file_name: entry.file_name.clone(),
                sheet: report.sheet.clone(),
                total_records: entry.snapshot.records.len(),
                rows_scanned: report.rows_scanned,
                companies: report.companies.clone(),
                terminated: report.terminated_count(),
                rejected,
                unknown_companies: report.unknown_companies.clone(),
                unmapped_titles: report.unmapped_titles.clone(),
                expires_at: entry.created_at + ttl,
            },
        }
    }
}

/// Response of `POST /api/sync`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// "applied", "partial", "rolled-back" or "dry-run"
    pub status: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

impl From<SyncOutcome> for SyncResponse {
    fn from(outcome: SyncOutcome) -> Self {
        let status = match &outcome.apply {
            None => "dry-run",
            Some(report) if report.rolled_back => "rolled-back",
            Some(report) if !report.failures.is_empty() => "partial",
            Some(_) => "applied",
        };
        SyncResponse {
            status: status.to_string(),
            outcome,
        }
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: String,
    pub service: String,
    pub version: String,
    pub store: String,
    pub lookups_version: String,
    pub cached_sessions: usize,
}

fn rejected_rows(report: &SnapshotReport) -> usize {
    report.skipped.len() - report.terminated_count()
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

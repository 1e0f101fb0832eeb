//! Roster pipeline: the operations the CLI and the HTTP API expose.
//!
//! ```text
//! upload:  bytes ─▶ grid ─▶ snapshot ─▶ cache (session id)
//! sync:    bytes ─▶ grid ─▶ snapshot ─▶ reconcile(registry) ─▶ apply
//! preview: cache(session) ─▶ merge with registry ─▶ rows
//! archive: registry ─▶ history table
//! ```
//!
//! Sync never reads the cache; it always parses the file it is given.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::api::logs::{log_error, log_info, log_success, log_warning, LogEntry, LOG_BROADCASTER};
use crate::cache::{CacheMiss, CachedSnapshot, SnapshotCache};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::lookups::LookupTables;
use crate::models::PersistedEmployee;
use crate::parser::{read_grid, read_grid_bytes, Grid};
use crate::reconcile::{merge_for_preview, reconcile, DiffSummary, ReconcileOptions};
use crate::snapshot::{ParsedSnapshot, SnapshotParser, SnapshotReport};
use crate::store::{ApplyReport, ApplyStrategy, RegistryStore, SqliteRegistry};

/// Result of an upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub session: String,
    pub entry: Arc<CachedSnapshot>,
}

/// Result of a sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub report: SnapshotReport,
    pub summary: DiffSummary,
    pub review_recommended: bool,
    pub strategy: ApplyStrategy,
    pub dry_run: bool,
    /// `None` for dry runs.
    pub apply: Option<ApplyReport>,
}

/// Result of an archive run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveOutcome {
    pub archived: u64,
    pub recorded_at: DateTime<Utc>,
}

/// The roster service shared by the CLI and the HTTP server.
pub struct RosterService {
    tables: Arc<LookupTables>,
    store: Arc<dyn RegistryStore>,
    cache: SnapshotCache,
    clock: Arc<dyn Clock>,
    options: ReconcileOptions,
    default_strategy: ApplyStrategy,
    sync_lock: Mutex<()>,
}

impl RosterService {
    pub fn new(
        tables: Arc<LookupTables>,
        store: Arc<dyn RegistryStore>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        Self {
            cache: SnapshotCache::new(config.cache_ttl(), Arc::clone(&clock)),
            tables,
            store,
            clock,
            options: ReconcileOptions {
                min_records: config.min_records,
            },
            default_strategy: config.strategy,
            sync_lock: Mutex::new(()),
        }
    }

    /// Load lookups, open the SQLite registry and build the service.
    pub async fn from_config(config: &AppConfig) -> PipelineResult<Self> {
        let tables = LookupTables::load_or_embedded(config.lookups.as_deref())?;
        let (companies, classifications, functions, situations) = tables.counts();
        log_info(format!(
            "📚 Lookup tables v{}: {} companies, {} classifications, {} functions, {} situations",
            tables.version(),
            companies,
            classifications,
            functions,
            situations
        ));
        warn_if_unconfirmed(&tables);

        let store = SqliteRegistry::connect(&config.database_url).await?;
        log_success(format!("Registry store ready at {}", config.database_url));

        Ok(Self::new(
            Arc::new(tables),
            Arc::new(store),
            Arc::new(SystemClock),
            config,
        ))
    }

    pub fn tables(&self) -> &LookupTables {
        &self.tables
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn default_strategy(&self) -> ApplyStrategy {
        self.default_strategy
    }

    pub fn min_records(&self) -> usize {
        self.options.min_records
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    /// Parse a grid. A parse with no records at all is an error.
    pub fn parse_grid(&self, grid: &Grid) -> PipelineResult<ParsedSnapshot> {
        log_info(format!(
            "📖 Scanning sheet '{}' ({} rows)",
            grid.sheet,
            grid.height()
        ));
        let parsed = SnapshotParser::new(&self.tables, self.clock.as_ref()).parse(grid);
        let report = &parsed.report;

        log_success(format!(
            "{} employees across {} companies",
            parsed.records.len(),
            report.companies.len()
        ));
        if report.terminated_count() > 0 {
            log_info(format!("{} terminated employees excluded", report.terminated_count()));
        }
        let rejected = report.skipped.len() - report.terminated_count();
        if rejected > 0 {
            log_warning(format!("{} employee rows rejected", rejected));
        }

        if parsed.records.is_empty() {
            log_error("No active employees found in the spreadsheet");
            return Err(PipelineError::EmptySnapshot);
        }
        Ok(parsed)
    }

    pub fn parse_file(&self, path: &Path) -> PipelineResult<ParsedSnapshot> {
        let grid = read_grid(path)?;
        self.parse_grid(&grid)
    }

    pub fn parse_bytes(&self, bytes: Vec<u8>, file_name: &str) -> PipelineResult<ParsedSnapshot> {
        let grid = read_grid_bytes(bytes, file_name)?;
        self.parse_grid(&grid)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Parse an upload and cache it under a new session.
    pub fn upload(&self, bytes: Vec<u8>, file_name: &str) -> PipelineResult<UploadOutcome> {
        let parsed = self.parse_bytes(bytes, file_name)?;
        self.cache.purge_expired();
        let session = self.cache.insert(file_name, parsed);
        let entry = self.session(&session)?;
        log_success(format!("Upload cached as session {}", session));
        Ok(UploadOutcome { session, entry })
    }

    /// Parse `bytes` and reconcile them into the registry.
    pub async fn sync(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        strategy: Option<ApplyStrategy>,
        dry_run: bool,
    ) -> PipelineResult<SyncOutcome> {
        let parsed = self.parse_bytes(bytes, file_name)?;
        self.sync_snapshot(parsed, strategy, dry_run).await
    }

    /// Reconcile an already parsed snapshot into the registry.
    ///
    /// Load, reconcile and apply run under one lock so only one sync touches
    /// the registry at a time.
    pub async fn sync_snapshot(
        &self,
        parsed: ParsedSnapshot,
        strategy: Option<ApplyStrategy>,
        dry_run: bool,
    ) -> PipelineResult<SyncOutcome> {
        let strategy = strategy.unwrap_or(self.default_strategy);
        let _guard = self.sync_lock.lock().await;

        log_info("🔄 Loading registry...");
        let registry = self.store.load().await?;
        log_info(format!("{} employees in registry", registry.len()));

        let diff = match reconcile(&parsed.records, &registry, &self.options) {
            Ok(diff) => diff,
            Err(e) => {
                log_error(format!("{}", e));
                return Err(e.into());
            }
        };

        let s = &diff.summary;
        log_success(format!(
            "Diff: {} new, {} updated ({} functions kept, {} projects kept), {} removed",
            s.inserted, s.updated, s.function_protected, s.project_preserved, s.deleted
        ));
        if s.review_recommended() {
            log_warning(format!(
                "{} of {} registry rows would be deleted; review the snapshot",
                s.deleted, s.registry_size
            ));
        }

        let apply = if dry_run {
            log_info("Dry run: registry left untouched");
            None
        } else {
            log_info(format!("💾 Applying diff ({})...", strategy));
            let report = self.store.apply(&diff, strategy).await?;
            if report.rolled_back {
                log_error(format!(
                    "Apply rolled back: {}",
                    report
                        .failures
                        .first()
                        .map(|f| format!("{} ({})", f.key, f.reason))
                        .unwrap_or_default()
                ));
            } else {
                if !report.failures.is_empty() {
                    log_warning(format!("{} keys failed to apply", report.failures.len()));
                }
                for failure in &report.failures {
                    LOG_BROADCASTER.log(
                        LogEntry::warning(format!("{:?} {}: {}", failure.operation, failure.key, failure.reason))
                            .with_indent(1),
                    );
                }
                log_success(format!(
                    "Registry updated: {} inserted, {} updated, {} deleted",
                    report.inserted, report.updated, report.deleted
                ));
            }
            Some(report)
        };

        Ok(SyncOutcome {
            report: parsed.report,
            review_recommended: diff.summary.review_recommended(),
            summary: diff.summary,
            strategy,
            dry_run,
            apply,
        })
    }

    /// Cached upload for `session`.
    pub fn session(&self, session: &str) -> PipelineResult<Arc<CachedSnapshot>> {
        self.cache.get(session).map_err(|miss| match miss {
            CacheMiss::NotFound => PipelineError::SessionNotFound(session.to_string()),
            CacheMiss::Expired => PipelineError::SessionExpired(session.to_string()),
        })
    }

    /// The cached upload merged with the registry, as a sync would leave it.
    pub async fn preview(&self, session: &str) -> PipelineResult<Vec<PersistedEmployee>> {
        let entry = self.session(session)?;
        self.preview_snapshot(&entry.snapshot).await
    }

    pub async fn preview_snapshot(
        &self,
        parsed: &ParsedSnapshot,
    ) -> PipelineResult<Vec<PersistedEmployee>> {
        let registry = self.store.load().await?;
        let merged = merge_for_preview(&parsed.records, &registry);
        log_success(format!("Preview: {} employees", merged.len()));
        Ok(merged)
    }

    /// Every registry row.
    pub async fn export_registry(&self) -> PipelineResult<Vec<PersistedEmployee>> {
        Ok(self.store.load().await?)
    }

    /// Copy the registry into the history table.
    pub async fn archive(&self) -> PipelineResult<ArchiveOutcome> {
        let recorded_at = self.clock.now();
        let archived = self.store.archive(recorded_at).await?;
        log_success(format!(
            "📦 Archived {} employees at {}",
            archived,
            recorded_at.format("%Y-%m-%d %H:%M")
        ));
        Ok(ArchiveOutcome {
            archived,
            recorded_at,
        })
    }
}

/// Unconfirmed situation tables are used, but loudly.
pub fn warn_if_unconfirmed(tables: &LookupTables) {
    if !tables.situations_confirmed() {
        log_warning(
            "Situation labels are not confirmed for this deployment; set `confirmed = true` in the lookup file once verified",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    /// Positional roster csv: one company header then `ids` employee rows.
    fn roster_csv(ids: impl IntoIterator<Item = u64>, situation: &str) -> Vec<u8> {
        let mut out = String::from("LARSIL FLORESTAL LTDA;;\n");
        for id in ids {
            let mut fields = vec![String::new(); 29];
            fields[0] = id.to_string();
            fields[4] = format!("Employee {}", id);
            fields[11] = "Motorista Caminhao".to_string();
            fields[18] = "2040A1".to_string();
            fields[22] = "45000".to_string();
            fields[26] = situation.to_string();
            fields[28] = format!("{:011}", id);
            out.push_str(&fields.join(";"));
            out.push('\n');
        }
        out.into_bytes()
    }

    async fn service() -> (Arc<ManualClock>, RosterService) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 16, 7, 0, 0).unwrap(),
        ));
        let store = SqliteRegistry::connect("sqlite::memory:").await.unwrap();
        let service = RosterService::new(
            Arc::new(LookupTables::embedded().unwrap()),
            Arc::new(store),
            clock.clone(),
            &AppConfig::default(),
        );
        (clock, service)
    }

    #[tokio::test]
    async fn test_sync_into_empty_registry() {
        let (_, service) = service().await;
        let outcome = service
            .sync(roster_csv(1..=120, "1"), "roster.csv", None, false)
            .await
            .unwrap();

        assert_eq!(outcome.summary.inserted, 120);
        assert_eq!(outcome.strategy, ApplyStrategy::SetBased);
        let apply = outcome.apply.unwrap();
        assert!(apply.is_clean());
        assert_eq!(apply.inserted, 120);

        let rows = service.export_registry().await.unwrap();
        assert_eq!(rows.len(), 120);
        assert_eq!(rows[0].matricula, "10001");
        assert_eq!(rows[0].project, "2040");
        assert_eq!(rows[0].team, "");
    }

    #[tokio::test]
    async fn test_small_snapshot_leaves_registry_untouched() {
        let (_, service) = service().await;
        service
            .sync(roster_csv(1..=120, "1"), "roster.csv", None, false)
            .await
            .unwrap();

        let err = service
            .sync(roster_csv(1..=40, "1"), "roster.csv", None, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Reconcile(crate::error::ReconcileError::BelowSafetyFloor { found: 40, minimum: 100 })
        ));
        assert_eq!(service.export_registry().await.unwrap().len(), 120);
    }

    #[tokio::test]
    async fn test_disappeared_employee_is_deleted() {
        let (_, service) = service().await;
        service
            .sync(roster_csv(1..=120, "1"), "roster.csv", None, false)
            .await
            .unwrap();

        let outcome = service
            .sync(roster_csv(2..=120, "1"), "roster.csv", Some(ApplyStrategy::FullReplace), false)
            .await
            .unwrap();
        assert_eq!(outcome.summary.deleted, 1);
        assert_eq!(outcome.apply.unwrap().strategy, ApplyStrategy::FullReplace);

        let rows = service.export_registry().await.unwrap();
        assert_eq!(rows.len(), 119);
        assert!(rows.iter().all(|r| r.national_id.as_str() != "00000000001"));
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let (_, service) = service().await;
        let outcome = service
            .sync(roster_csv(1..=100, "1"), "roster.csv", None, true)
            .await
            .unwrap();
        assert!(outcome.dry_run);
        assert!(outcome.apply.is_none());
        assert_eq!(outcome.summary.inserted, 100);
        assert!(service.export_registry().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_terminated_is_empty_snapshot() {
        let (_, service) = service().await;
        let err = service
            .sync(roster_csv(1..=5, "8"), "roster.csv", None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptySnapshot));
    }

    #[tokio::test]
    async fn test_upload_then_preview() {
        let (clock, service) = service().await;
        let upload = service.upload(roster_csv(1..=3, "1"), "roster.csv").unwrap();
        assert_eq!(upload.entry.snapshot.records.len(), 3);

        // Small uploads preview fine; the floor only guards syncs.
        let rows = service.preview(&upload.session).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].name, "EMPLOYEE 3");

        clock.advance(Duration::minutes(31));
        assert!(matches!(
            service.preview(&upload.session).await,
            Err(PipelineError::SessionExpired(_))
        ));
        assert!(matches!(
            service.preview("nope").await,
            Err(PipelineError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_archive_uses_clock() {
        let (_, service) = service().await;
        service
            .sync(roster_csv(1..=100, "1"), "roster.csv", None, false)
            .await
            .unwrap();
        let outcome = service.archive().await.unwrap();
        assert_eq!(outcome.archived, 100);
        assert_eq!(outcome.recorded_at, Utc.with_ymd_and_hms(2026, 10, 16, 7, 0, 0).unwrap());
    }
}

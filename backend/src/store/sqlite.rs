//! SQLite registry through sqlx.
//!
//! Two tables: `employees` keyed by national ID, and `employee_history`
//! holding archived copies. Every statement is parameterized.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;

use super::{ApplyOperation, ApplyReport, ApplyStrategy, KeyFailure, RegistryStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{NationalId, PersistedEmployee};
use crate::reconcile::{Diff, ProtectedUpdate};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS employees (
        national_id        TEXT PRIMARY KEY NOT NULL,
        name               TEXT NOT NULL,
        job_title          TEXT,
        admission_date     TEXT,
        project            TEXT NOT NULL DEFAULT '',
        team               TEXT NOT NULL DEFAULT '',
        coordinator        TEXT NOT NULL DEFAULT '',
        supervisor         TEXT NOT NULL DEFAULT '',
        team_lead          TEXT NOT NULL DEFAULT '',
        hours_worked       INTEGER NOT NULL DEFAULT 8,
        executing_function TEXT,
        classification     TEXT NOT NULL,
        tax_id             TEXT NOT NULL DEFAULT '',
        company            TEXT NOT NULL,
        matricula          TEXT NOT NULL,
        cost_center        TEXT NOT NULL DEFAULT '',
        situation_code     TEXT NOT NULL DEFAULT '',
        situation_label    TEXT NOT NULL DEFAULT '',
        updated_at         TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS employee_history (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        national_id        TEXT NOT NULL,
        name               TEXT NOT NULL,
        job_title          TEXT,
        admission_date     TEXT,
        project            TEXT NOT NULL DEFAULT '',
        team               TEXT NOT NULL DEFAULT '',
        coordinator        TEXT NOT NULL DEFAULT '',
        supervisor         TEXT NOT NULL DEFAULT '',
        team_lead          TEXT NOT NULL DEFAULT '',
        hours_worked       INTEGER NOT NULL DEFAULT 8,
        executing_function TEXT,
        classification     TEXT NOT NULL,
        tax_id             TEXT NOT NULL DEFAULT '',
        company            TEXT NOT NULL,
        matricula          TEXT NOT NULL,
        cost_center        TEXT NOT NULL DEFAULT '',
        situation_code     TEXT NOT NULL DEFAULT '',
        situation_label    TEXT NOT NULL DEFAULT '',
        updated_at         TEXT NOT NULL,
        recorded_at        TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_employee_history_recorded_at ON employee_history (recorded_at)",
];

const COLUMNS: &str = "national_id, name, job_title, admission_date, project, team, coordinator, \
     supervisor, team_lead, hours_worked, executing_function, classification, tax_id, company, \
     matricula, cost_center, situation_code, situation_label, updated_at";

/// Registry backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    ///
    /// `sqlite::memory:` keeps a single connection alive so every query sees
    /// the same database.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(options.busy_timeout(Duration::from_secs(5)))
                .await?
        };

        let registry = Self { pool };
        registry.migrate().await?;
        Ok(registry)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Number of rows in the history table.
    pub async fn history_len(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM employee_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn apply_set_based(&self, diff: &Diff) -> StoreResult<ApplyReport> {
        let mut report = ApplyReport::new(ApplyStrategy::SetBased);
        let mut tx = self.pool.begin().await?;

        for row in &diff.inserts {
            match insert_row(&mut tx, row).await {
                Ok(()) => report.inserted += 1,
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => report.failures.push(failure(&row.national_id, ApplyOperation::Insert, e)),
            }
        }

        for update in &diff.updates {
            let key = &update.record.national_id;
            match update_row(&mut tx, update).await {
                Ok(true) => report.updated += 1,
                Ok(false) => report.failures.push(KeyFailure {
                    key: key.to_string(),
                    operation: ApplyOperation::Update,
                    reason: "row no longer exists".to_string(),
                    applied: false,
                }),
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => report.failures.push(failure(key, ApplyOperation::Update, e)),
            }
        }

        for key in &diff.deletions {
            let result = sqlx::query("DELETE FROM employees WHERE national_id = ?")
                .bind(key.as_str())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from);
            match result {
                Ok(done) if done.rows_affected() > 0 => report.deleted += 1,
                Ok(_) => {}
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => report.failures.push(failure(key, ApplyOperation::Delete, e)),
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    async fn apply_full_replace(&self, diff: &Diff) -> StoreResult<ApplyReport> {
        let mut report = ApplyReport::new(ApplyStrategy::FullReplace);
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM employees")
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;

        for row in diff.merged_rows() {
            if let Err(e) = insert_row(&mut tx, row).await {
                tx.rollback().await?;
                if e.is_retryable() {
                    return Err(e);
                }
                report.failures.push(failure(&row.national_id, ApplyOperation::Insert, e));
                report.rolled_back = true;
                return Ok(report);
            }
        }

        tx.commit().await?;
        report.inserted = diff.inserts.len();
        report.updated = diff.updates.len();
        report.deleted = removed.saturating_sub(diff.updates.len());
        Ok(report)
    }
}

#[async_trait]
impl RegistryStore for SqliteRegistry {
    async fn load(&self) -> StoreResult<Vec<PersistedEmployee>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM employees ORDER BY national_id",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_employee).collect()
    }

    async fn apply(&self, diff: &Diff, strategy: ApplyStrategy) -> StoreResult<ApplyReport> {
        match strategy {
            ApplyStrategy::SetBased => self.apply_set_based(diff).await,
            ApplyStrategy::FullReplace => self.apply_full_replace(diff).await,
        }
    }

    async fn archive(&self, recorded_at: DateTime<Utc>) -> StoreResult<u64> {
        let done = sqlx::query(&format!(
            "INSERT INTO employee_history ({cols}, recorded_at) SELECT {cols}, ? FROM employees",
            cols = COLUMNS
        ))
        .bind(recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// Statements
// =============================================================================

async fn insert_row(tx: &mut Transaction<'_, Sqlite>, row: &PersistedEmployee) -> StoreResult<()> {
    sqlx::query(&format!(
        "INSERT INTO employees ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        COLUMNS
    ))
    .bind(row.national_id.as_str())
    .bind(&row.name)
    .bind(&row.job_title)
    .bind(row.admission_date)
    .bind(&row.project)
    .bind(&row.team)
    .bind(&row.coordinator)
    .bind(&row.supervisor)
    .bind(&row.team_lead)
    .bind(i64::from(row.hours_worked))
    .bind(&row.executing_function)
    .bind(&row.classification)
    .bind(&row.tax_id)
    .bind(&row.company)
    .bind(&row.matricula)
    .bind(&row.cost_center)
    .bind(&row.situation_code)
    .bind(&row.situation_label)
    .bind(row.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Curated columns other than project are left out of the SET list so edits
/// made after the registry was read survive.
async fn update_row(tx: &mut Transaction<'_, Sqlite>, update: &ProtectedUpdate) -> StoreResult<bool> {
    let row = &update.record;
    let done = sqlx::query(
        r#"
        UPDATE employees SET
            name = ?, job_title = ?, admission_date = ?, project = ?, hours_worked = ?,
            executing_function = ?, classification = ?, tax_id = ?, company = ?,
            matricula = ?, cost_center = ?, situation_code = ?, situation_label = ?,
            updated_at = ?
        WHERE national_id = ?
        "#,
    )
    .bind(&row.name)
    .bind(&row.job_title)
    .bind(row.admission_date)
    .bind(&row.project)
    .bind(i64::from(row.hours_worked))
    .bind(&row.executing_function)
    .bind(&row.classification)
    .bind(&row.tax_id)
    .bind(&row.company)
    .bind(&row.matricula)
    .bind(&row.cost_center)
    .bind(&row.situation_code)
    .bind(&row.situation_label)
    .bind(row.updated_at)
    .bind(row.national_id.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(done.rows_affected() > 0)
}

fn failure(key: &NationalId, operation: ApplyOperation, err: StoreError) -> KeyFailure {
    KeyFailure {
        key: key.to_string(),
        operation,
        reason: err.to_string(),
        applied: false,
    }
}

fn row_to_employee(row: &SqliteRow) -> StoreResult<PersistedEmployee> {
    let raw_id: String = row.try_get("national_id")?;
    let national_id = NationalId::new(raw_id.clone()).ok_or_else(|| StoreError::Corrupt {
        key: raw_id.clone(),
        message: "national ID is not 11 digits".to_string(),
    })?;
    let hours: i64 = row.try_get("hours_worked")?;
    let hours_worked = u32::try_from(hours).map_err(|_| StoreError::Corrupt {
        key: raw_id.clone(),
        message: format!("hours_worked out of range: {}", hours),
    })?;

    Ok(PersistedEmployee {
        national_id,
        name: row.try_get("name")?,
        job_title: row.try_get("job_title")?,
        admission_date: row.try_get::<Option<NaiveDate>, _>("admission_date")?,
        project: row.try_get("project")?,
        team: row.try_get("team")?,
        coordinator: row.try_get("coordinator")?,
        supervisor: row.try_get("supervisor")?,
        team_lead: row.try_get("team_lead")?,
        hours_worked,
        executing_function: row.try_get("executing_function")?,
        classification: row.try_get("classification")?,
        tax_id: row.try_get("tax_id")?,
        company: row.try_get("company")?,
        matricula: row.try_get("matricula")?,
        cost_center: row.try_get("cost_center")?,
        situation_code: row.try_get("situation_code")?,
        situation_label: row.try_get("situation_label")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::tests::{nid, snap, snapshot};
    use crate::reconcile::{insert_from_snapshot, reconcile, ReconcileOptions};
    use chrono::TimeZone;

    async fn memory_registry() -> SqliteRegistry {
        SqliteRegistry::connect("sqlite::memory:").await.unwrap()
    }

    fn options() -> ReconcileOptions {
        ReconcileOptions { min_records: 1 }
    }

    async fn seed(registry: &SqliteRegistry, rows: &[PersistedEmployee]) {
        let diff = Diff {
            inserts: rows.to_vec(),
            ..Default::default()
        };
        let report = registry.apply(&diff, ApplyStrategy::SetBased).await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_rows_survive_round_trip() {
        let registry = memory_registry().await;
        let mut row = insert_from_snapshot(&snap(1));
        row.admission_date = NaiveDate::from_ymd_opt(2019, 5, 2);
        row.team = "EQUIPE 3".into();
        seed(&registry, &[row.clone()]).await;

        let loaded = registry.load().await.unwrap();
        assert_eq!(loaded, vec![row]);
    }

    #[tokio::test]
    async fn test_set_based_applies_diff() {
        let registry = memory_registry().await;
        let mut existing: Vec<_> = snapshot(1..4).iter().map(insert_from_snapshot).collect();
        existing[0].coordinator = "RITA".into();
        existing[0].executing_function = Some("OPERADOR".into());
        seed(&registry, &existing).await;

        // Key 3 disappears, key 4 is new.
        let mut incoming = snapshot(1..3);
        incoming.push(snap(4));
        incoming[0].name = "RENOMEADO".into();
        let diff = reconcile(&incoming, &registry.load().await.unwrap(), &options()).unwrap();

        let report = registry.apply(&diff, ApplyStrategy::SetBased).await.unwrap();
        assert_eq!((report.inserted, report.updated, report.deleted), (1, 2, 1));
        assert!(report.is_clean());

        let loaded = registry.load().await.unwrap();
        let keys: Vec<_> = loaded.iter().map(|r| r.national_id.clone()).collect();
        assert_eq!(keys, vec![nid(1), nid(2), nid(4)]);
        assert_eq!(loaded[0].name, "RENOMEADO");
        assert_eq!(loaded[0].coordinator, "RITA");
        assert_eq!(loaded[0].executing_function.as_deref(), Some("OPERADOR"));
    }

    #[tokio::test]
    async fn test_set_based_isolates_failing_keys() {
        let registry = memory_registry().await;
        seed(&registry, &[insert_from_snapshot(&snap(1))]).await;

        // Stale diff: key 1 already exists, key 9 no longer does.
        let diff = Diff {
            inserts: vec![insert_from_snapshot(&snap(1)), insert_from_snapshot(&snap(2))],
            updates: vec![ProtectedUpdate {
                record: insert_from_snapshot(&snap(9)),
                function_protected: false,
                project_preserved: false,
            }],
            ..Default::default()
        };

        let report = registry.apply(&diff, ApplyStrategy::SetBased).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.updated, 0);
        assert!(!report.rolled_back);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].key, nid(1).to_string());
        assert_eq!(report.failures[0].operation, ApplyOperation::Insert);
        assert_eq!(report.failures[1].operation, ApplyOperation::Update);

        assert_eq!(registry.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_full_replace_rewrites_table() {
        let registry = memory_registry().await;
        seed(&registry, &snapshot(1..4).iter().map(insert_from_snapshot).collect::<Vec<_>>()).await;

        let incoming = snapshot(2..6);
        let diff = reconcile(&incoming, &registry.load().await.unwrap(), &options()).unwrap();
        let report = registry.apply(&diff, ApplyStrategy::FullReplace).await.unwrap();

        assert!(report.is_clean());
        assert_eq!((report.inserted, report.updated, report.deleted), (2, 2, 1));
        assert_eq!(registry.load().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_full_replace_rolls_back_on_failure() {
        let registry = memory_registry().await;
        let before: Vec<_> = snapshot(1..4).iter().map(insert_from_snapshot).collect();
        seed(&registry, &before).await;

        // The same key twice violates the primary key on the second insert.
        let diff = Diff {
            inserts: vec![insert_from_snapshot(&snap(7)), insert_from_snapshot(&snap(7))],
            ..Default::default()
        };
        let report = registry.apply(&diff, ApplyStrategy::FullReplace).await.unwrap();

        assert!(report.rolled_back);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, nid(7).to_string());
        assert_eq!(registry.load().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_archive_copies_rows() {
        let registry = memory_registry().await;
        seed(&registry, &snapshot(1..6).iter().map(insert_from_snapshot).collect::<Vec<_>>()).await;

        let at = Utc.with_ymd_and_hms(2026, 10, 16, 23, 0, 0).unwrap();
        assert_eq!(registry.archive(at).await.unwrap(), 5);
        assert_eq!(registry.archive(at).await.unwrap(), 5);
        assert_eq!(registry.history_len().await.unwrap(), 10);
        assert_eq!(registry.load().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_corrupt_key_reported() {
        let registry = memory_registry().await;
        sqlx::query(
            "INSERT INTO employees (national_id, name, classification, company, matricula, updated_at) \
             VALUES ('123', 'X', 'OUT', 'Y', '00001', '2026-10-16T00:00:00Z')",
        )
        .execute(registry.pool())
        .await
        .unwrap();

        let err = registry.load().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref key, .. } if key == "123"));
        registry.ping().await.unwrap();
    }
}

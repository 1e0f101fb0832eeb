//! Reconciliation engine: snapshot vs. registry three-way merge.
//!
//! Given a freshly parsed snapshot `S` and the current registry `P`, both
//! keyed by national ID, every key falls in exactly one case:
//!
//! | Case        | Condition     | Effect                                     |
//! |-------------|---------------|--------------------------------------------|
//! | New hire    | `k ∈ S, ∉ P`  | insert, curated fields empty               |
//! | Existing    | `k ∈ S ∩ P`   | update under the protection rules          |
//! | Disappeared | `k ∈ P, ∉ S`  | delete                                     |
//!
//! Protection rules for updates:
//!
//! - Team, coordinator, supervisor and team lead are never touched.
//! - A non-empty persisted project is kept; an empty one takes the
//!   cost-center guess from the snapshot.
//! - A persisted executing-function containing `MOTORISTA` or `OPERADOR`
//!   (any case) is kept.
//!
//! The whole operation is refused when the de-duplicated snapshot is smaller
//! than the safety floor. Nothing here touches storage; see [`crate::store`].

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::error::ReconcileError;
use crate::models::{EmployeeSnapshot, NationalId, PersistedEmployee};

/// Default safety floor.
pub const DEFAULT_MIN_RECORDS: usize = 100;

/// Persisted functions that survive snapshot updates.
const PROTECTED_FUNCTIONS: &[&str] = &["MOTORISTA", "OPERADOR"];

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Smallest de-duplicated snapshot accepted as a full roster.
    pub min_records: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            min_records: DEFAULT_MIN_RECORDS,
        }
    }
}

/// An update of an existing registry row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedUpdate {
    /// The merged row to write.
    pub record: PersistedEmployee,
    /// The persisted executing-function was kept.
    pub function_protected: bool,
    /// The persisted project was kept.
    pub project_preserved: bool,
}

/// Aggregate counts of a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    /// De-duplicated snapshot size.
    pub snapshot_size: usize,
    pub registry_size: usize,
    pub inserted: usize,
    pub updated: usize,
    pub function_protected: usize,
    pub project_preserved: usize,
    pub deleted: usize,
}

impl DiffSummary {
    /// More than a tenth of the registry would be deleted.
    pub fn review_recommended(&self) -> bool {
        self.deleted * 10 > self.registry_size
    }
}

/// The computed change set. Inserts and updates are in snapshot order,
/// deletions sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diff {
    pub inserts: Vec<PersistedEmployee>,
    pub updates: Vec<ProtectedUpdate>,
    pub deletions: Vec<NationalId>,
    pub summary: DiffSummary,
}

impl Diff {
    /// Every row the registry holds once the diff is applied.
    pub fn merged_rows(&self) -> impl Iterator<Item = &PersistedEmployee> {
        self.inserts
            .iter()
            .chain(self.updates.iter().map(|u| &u.record))
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletions.is_empty()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Collapse duplicate keys, last row wins. Each surviving record keeps the
/// position of its last occurrence.
pub fn dedupe(snapshot: &[EmployeeSnapshot]) -> Vec<&EmployeeSnapshot> {
    let mut seen = HashSet::new();
    let mut kept: Vec<&EmployeeSnapshot> = snapshot
        .iter()
        .rev()
        .filter(|r| seen.insert(&r.national_id))
        .collect();
    kept.reverse();
    kept
}

/// Compute the diff of `snapshot` against `registry`.
pub fn reconcile(
    snapshot: &[EmployeeSnapshot],
    registry: &[PersistedEmployee],
    options: &ReconcileOptions,
) -> Result<Diff, ReconcileError> {
    let snapshot = dedupe(snapshot);
    if snapshot.len() < options.min_records {
        return Err(ReconcileError::BelowSafetyFloor {
            found: snapshot.len(),
            minimum: options.min_records,
        });
    }

    let persisted: HashMap<&NationalId, &PersistedEmployee> =
        registry.iter().map(|p| (&p.national_id, p)).collect();

    let mut diff = Diff::default();
    for record in &snapshot {
        match persisted.get(&record.national_id) {
            Some(existing) => {
                let update = merge_update(record, existing);
                diff.summary.function_protected += usize::from(update.function_protected);
                diff.summary.project_preserved += usize::from(update.project_preserved);
                diff.updates.push(update);
            }
            None => diff.inserts.push(insert_from_snapshot(record)),
        }
    }

    let in_snapshot: HashSet<&NationalId> = snapshot.iter().map(|r| &r.national_id).collect();
    diff.deletions = persisted
        .keys()
        .filter(|k| !in_snapshot.contains(*k))
        .map(|k| (*k).clone())
        .collect();
    diff.deletions.sort();

    diff.summary.snapshot_size = snapshot.len();
    diff.summary.registry_size = persisted.len();
    diff.summary.inserted = diff.inserts.len();
    diff.summary.updated = diff.updates.len();
    diff.summary.deleted = diff.deletions.len();

    Ok(diff)
}

/// Read-side merge for previews: every snapshot record as it would look in
/// the registry after a sync. No deletions, no safety floor.
pub fn merge_for_preview(
    snapshot: &[EmployeeSnapshot],
    registry: &[PersistedEmployee],
) -> Vec<PersistedEmployee> {
    let persisted: HashMap<&NationalId, &PersistedEmployee> =
        registry.iter().map(|p| (&p.national_id, p)).collect();

    dedupe(snapshot)
        .into_iter()
        .map(|record| match persisted.get(&record.national_id) {
            Some(existing) => merge_update(record, existing).record,
            None => insert_from_snapshot(record),
        })
        .collect()
}

/// A new registry row built entirely from the snapshot.
pub fn insert_from_snapshot(record: &EmployeeSnapshot) -> PersistedEmployee {
    PersistedEmployee {
        national_id: record.national_id.clone(),
        name: record.name.clone(),
        job_title: record.job_title.clone(),
        admission_date: record.admission_date,
        project: record.project_guess.clone(),
        team: String::new(),
        coordinator: String::new(),
        supervisor: String::new(),
        team_lead: String::new(),
        hours_worked: record.hours_worked,
        executing_function: record.executing_function.clone(),
        classification: record.classification.clone(),
        tax_id: record.tax_id.clone(),
        company: record.company.clone(),
        matricula: record.matricula.clone(),
        cost_center: record.cost_center.clone(),
        situation_code: record.situation_code.clone(),
        situation_label: record.situation_label.clone(),
        updated_at: record.processed_at,
    }
}

/// Merge a snapshot record into an existing registry row.
pub fn merge_update(record: &EmployeeSnapshot, existing: &PersistedEmployee) -> ProtectedUpdate {
    let function_protected = existing
        .executing_function
        .as_deref()
        .is_some_and(is_protected_function);
    let project_preserved = !existing.project.is_empty();

    let merged = PersistedEmployee {
        national_id: existing.national_id.clone(),
        name: record.name.clone(),
        job_title: record.job_title.clone(),
        admission_date: record.admission_date,
        project: if project_preserved {
            existing.project.clone()
        } else {
            record.project_guess.clone()
        },
        team: existing.team.clone(),
        coordinator: existing.coordinator.clone(),
        supervisor: existing.supervisor.clone(),
        team_lead: existing.team_lead.clone(),
        hours_worked: record.hours_worked,
        executing_function: if function_protected {
            existing.executing_function.clone()
        } else {
            record.executing_function.clone()
        },
        classification: record.classification.clone(),
        tax_id: record.tax_id.clone(),
        company: record.company.clone(),
        matricula: record.matricula.clone(),
        cost_center: record.cost_center.clone(),
        situation_code: record.situation_code.clone(),
        situation_label: record.situation_label.clone(),
        updated_at: record.processed_at,
    };

    ProtectedUpdate {
        record: merged,
        function_protected,
        project_preserved,
    }
}

/// Whether a persisted executing-function must survive updates.
pub fn is_protected_function(function: &str) -> bool {
    let upper = function.to_uppercase();
    PROTECTED_FUNCTIONS.iter().any(|p| upper.contains(p))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    pub(crate) fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap()
    }

    /// National ID built from a small integer.
    pub(crate) fn nid(n: u64) -> NationalId {
        NationalId::new(format!("{:011}", n)).unwrap()
    }

    pub(crate) fn snap(n: u64) -> EmployeeSnapshot {
        EmployeeSnapshot {
            national_id: nid(n),
            name: format!("EMPLOYEE {}", n),
            job_title_raw: Some("Ajudante Florestal".into()),
            job_title: Some("AJUDANTE FLORESTAL".into()),
            admission_date: None,
            classification: "AJF".into(),
            executing_function: Some("AJUDANTE".into()),
            hours_worked: 8,
            company: "S5 FLORESTAL LTDA".into(),
            tax_id: "00.000.000/0001-00".into(),
            matricula: format!("3{:04}", n),
            cost_center: "1020A3".into(),
            project_guess: "1020".into(),
            situation_code: "1".into(),
            situation_label: "Trabalhando".into(),
            processed_at: ts(),
            source_row: n as usize,
        }
    }

    pub(crate) fn snapshot(range: std::ops::Range<u64>) -> Vec<EmployeeSnapshot> {
        range.map(snap).collect()
    }

    fn registry_from(snapshot: &[EmployeeSnapshot]) -> Vec<PersistedEmployee> {
        snapshot.iter().map(insert_from_snapshot).collect()
    }

    fn small() -> ReconcileOptions {
        ReconcileOptions { min_records: 1 }
    }

    #[test]
    fn test_empty_registry_inserts_everything() {
        let s = snapshot(1..121);
        let diff = reconcile(&s, &[], &ReconcileOptions::default()).unwrap();

        assert_eq!(diff.summary.inserted, 120);
        assert_eq!(diff.summary.updated, 0);
        assert_eq!(diff.summary.deleted, 0);
        for row in &diff.inserts {
            assert_eq!(row.team, "");
            assert_eq!(row.coordinator, "");
            assert_eq!(row.supervisor, "");
            assert_eq!(row.team_lead, "");
            assert_eq!(row.project, "1020");
        }
        // Snapshot order is kept.
        assert_eq!(diff.inserts[0].national_id, nid(1));
        assert_eq!(diff.inserts[119].national_id, nid(120));
    }

    #[test]
    fn test_unchanged_snapshot_is_all_updates() {
        let s = snapshot(1..101);
        let mut registry = registry_from(&s);
        registry[0].team = "EQUIPE 7".into();
        registry[0].coordinator = "CARLOS".into();

        let diff = reconcile(&s, &registry, &ReconcileOptions::default()).unwrap();

        assert_eq!(diff.summary.updated, 100);
        assert_eq!(diff.summary.inserted, 0);
        assert_eq!(diff.summary.deleted, 0);
        for (update, before) in diff.updates.iter().zip(&registry) {
            assert_eq!(update.record.curated(), before.curated());
        }
    }

    #[test]
    fn test_below_floor_is_refused() {
        let s = snapshot(1..41);
        let err = reconcile(&s, &registry_from(&snapshot(1..500)), &ReconcileOptions::default())
            .unwrap_err();
        assert!(matches!(err, ReconcileError::BelowSafetyFloor { found: 40, minimum: 100 }));
    }

    #[test]
    fn test_floor_counts_unique_keys() {
        let mut s = snapshot(1..100);
        s.push(snap(1));
        s.push(snap(2));
        assert_eq!(s.len(), 101);

        let err = reconcile(&s, &[], &ReconcileOptions::default()).unwrap_err();
        assert!(matches!(err, ReconcileError::BelowSafetyFloor { found: 99, .. }));
    }

    #[test]
    fn test_disappeared_keys_deleted_sorted() {
        let s = snapshot(1..101);
        let mut registry = registry_from(&snapshot(1..101));
        registry.insert(0, insert_from_snapshot(&snap(900)));
        registry.push(insert_from_snapshot(&snap(500)));

        let diff = reconcile(&s, &registry, &ReconcileOptions::default()).unwrap();
        assert_eq!(diff.deletions, vec![nid(500), nid(900)]);
        assert_eq!(diff.summary.registry_size, 102);
        assert!(!diff.summary.review_recommended());
    }

    #[test]
    fn test_protected_function_kept() {
        let mut existing = insert_from_snapshot(&snap(1));
        existing.executing_function = Some("motorista caminhao".into());
        let mut incoming = snap(1);
        incoming.executing_function = Some("OUTRO".into());

        let update = merge_update(&incoming, &existing);
        assert!(update.function_protected);
        assert_eq!(update.record.executing_function.as_deref(), Some("motorista caminhao"));

        existing.executing_function = Some("AJUDANTE".into());
        let update = merge_update(&incoming, &existing);
        assert!(!update.function_protected);
        assert_eq!(update.record.executing_function.as_deref(), Some("OUTRO"));
    }

    #[test]
    fn test_project_rules() {
        let mut existing = insert_from_snapshot(&snap(1));
        existing.project = String::new();
        let mut incoming = snap(1);
        incoming.cost_center = "A123".into();
        incoming.project_guess = crate::normalize::project_from_cost_center("A123");

        let update = merge_update(&incoming, &existing);
        assert!(!update.project_preserved);
        assert_eq!(update.record.project, "A123");

        existing.project = "FAZENDA BOA VISTA".into();
        let update = merge_update(&incoming, &existing);
        assert!(update.project_preserved);
        assert_eq!(update.record.project, "FAZENDA BOA VISTA");
        assert_eq!(update.record.cost_center, "A123");
    }

    #[test]
    fn test_update_overwrites_snapshot_fields() {
        let mut existing = insert_from_snapshot(&snap(1));
        existing.team_lead = "MARCOS".into();
        existing.supervisor = "LUCIA".into();
        let mut incoming = snap(1);
        incoming.name = "NOVO NOME".into();
        incoming.company = "LARSIL FLORESTAL LTDA".into();
        incoming.matricula = "10001".into();
        incoming.situation_code = "2".into();
        incoming.situation_label = "Auxilio Doenca".into();

        let merged = merge_update(&incoming, &existing).record;
        assert_eq!(merged.name, "NOVO NOME");
        assert_eq!(merged.company, "LARSIL FLORESTAL LTDA");
        assert_eq!(merged.matricula, "10001");
        assert_eq!(merged.situation_code, "2");
        assert_eq!(merged.team_lead, "MARCOS");
        assert_eq!(merged.supervisor, "LUCIA");
    }

    #[test]
    fn test_duplicates_last_row_wins() {
        let mut first = snap(7);
        first.name = "PRIMEIRO".into();
        let mut last = snap(7);
        last.name = "ULTIMO".into();
        let s = vec![first, snap(8), last];

        let kept = dedupe(&s);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].national_id, nid(8));
        assert_eq!(kept[1].name, "ULTIMO");

        let diff = reconcile(&s, &[], &small()).unwrap();
        assert_eq!(diff.summary.snapshot_size, 2);
        assert_eq!(diff.inserts[1].name, "ULTIMO");
    }

    #[test]
    fn test_summary_counts_protections() {
        let s = snapshot(1..4);
        let mut registry = registry_from(&s);
        registry[0].executing_function = Some("OPERADOR DE MAQUINAS".into());
        registry[1].project = String::new();
        registry.push(insert_from_snapshot(&snap(9)));

        let diff = reconcile(&s, &registry, &small()).unwrap();
        assert_eq!(
            diff.summary,
            DiffSummary {
                snapshot_size: 3,
                registry_size: 4,
                inserted: 0,
                updated: 3,
                function_protected: 1,
                project_preserved: 2,
                deleted: 1,
            }
        );
        assert!(diff.summary.review_recommended());
        assert_eq!(diff.merged_rows().count(), 3);
    }

    #[test]
    fn test_preview_merge_has_no_deletions() {
        let mut registry = registry_from(&snapshot(1..3));
        registry[0].project = "FAZENDA".into();
        registry.push(insert_from_snapshot(&snap(50)));

        let merged = merge_for_preview(&snapshot(1..4), &registry);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].project, "FAZENDA");
        assert_eq!(merged[2].national_id, nid(3));
        assert!(merged.iter().all(|r| r.national_id != nid(50)));
    }

    #[test]
    fn test_is_protected_function() {
        assert!(is_protected_function("Motorista"));
        assert!(is_protected_function("OPERADOR DE MUNCK"));
        assert!(!is_protected_function("AJUDANTE"));
    }
}

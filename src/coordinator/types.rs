// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine coordinator.

use std::time::Duration;

use chrono::NaiveDateTime;

/// Whether an upsert created the destination row or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// First sync of this reference
    Inserted,
    /// Re-sync of a reference already at the destination
    Resynced,
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inserted => write!(f, "Inserted"),
            Self::Resynced => write!(f, "Resynced"),
        }
    }
}

/// Timestamps written to the destination for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    pub kind: SyncKind,
    pub created: NaiveDateTime,
    pub modified: Option<NaiveDateTime>,
}

impl Provenance {
    /// The first sync of a reference fixes `created` and leaves `modified` empty;
    /// every later sync keeps that `created` and takes the incoming `modified`.
    #[must_use]
    pub fn resolve(
        existing_created: Option<NaiveDateTime>,
        incoming_created: NaiveDateTime,
        incoming_modified: Option<NaiveDateTime>,
    ) -> Self {
        match existing_created {
            Some(created) => Self {
                kind: SyncKind::Resynced,
                created,
                modified: incoming_modified,
            },
            None => Self {
                kind: SyncKind::Inserted,
                created: incoming_created,
                modified: None,
            },
        }
    }
}

/// What happened to one staging record during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Written to the destination and removed from staging
    Synced,
    /// Rejected by validation, left in staging
    Invalid,
    /// Destination lookup or write failed, left in staging
    UpsertFailed,
    /// Written to the destination but still in staging
    DeleteFailed,
}

impl RecordOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Invalid => "invalid",
            Self::UpsertFailed => "upsert_failed",
            Self::DeleteFailed => "delete_failed",
        }
    }
}

/// Result of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Staging fetches issued, including the final empty or short one
    pub fetches: usize,
    /// Records seen across all batches
    pub fetched: usize,
    pub synced: usize,
    pub invalid: usize,
    pub upsert_failed: usize,
    pub delete_failed: usize,
    pub duration: Duration,
}

impl CycleReport {
    pub(super) fn count(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Synced => self.synced += 1,
            RecordOutcome::Invalid => self.invalid += 1,
            RecordOutcome::UpsertFailed => self.upsert_failed += 1,
            RecordOutcome::DeleteFailed => self.delete_failed += 1,
        }
    }

    /// Records that did not make it all the way through
    #[must_use]
    pub fn failed(&self) -> usize {
        self.invalid + self.upsert_failed + self.delete_failed
    }

    /// Check if all records succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_first_sync_uses_incoming_created_and_null_modified() {
        let p = Provenance::resolve(None, at(5), Some(at(6)));
        assert_eq!(p.kind, SyncKind::Inserted);
        assert_eq!(p.created, at(5));
        assert_eq!(p.modified, None);
    }

    #[test]
    fn test_resync_keeps_existing_created() {
        let p = Provenance::resolve(Some(at(1)), at(5), Some(at(6)));
        assert_eq!(p.kind, SyncKind::Resynced);
        assert_eq!(p.created, at(1));
        assert_eq!(p.modified, Some(at(6)));
    }

    #[test]
    fn test_resync_with_null_modified() {
        let p = Provenance::resolve(Some(at(1)), at(5), None);
        assert_eq!(p.modified, None);
    }

    #[test]
    fn test_cycle_report_counts() {
        let mut report = CycleReport::default();
        report.count(RecordOutcome::Synced);
        report.count(RecordOutcome::Synced);
        assert!(report.is_success());

        report.count(RecordOutcome::Invalid);
        report.count(RecordOutcome::DeleteFailed);
        assert_eq!(report.synced, 2);
        assert_eq!(report.failed(), 2);
        assert!(!report.is_success());
    }

    #[test]
    fn test_display() {
        assert_eq!(SyncKind::Inserted.to_string(), "Inserted");
        assert_eq!(RecordOutcome::DeleteFailed.as_str(), "delete_failed");
    }
}

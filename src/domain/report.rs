use serde::Serialize;

use crate::domain::rollback::RollbackRecord;

/// Row counters for one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub added: usize,
    pub updated: usize,
    /// Unchanged matched rows plus rows carrying data but no key.
    pub skipped: usize,
    /// Mutations lost to rejected batches.
    pub errors: usize,
    /// Rows with no data at all (trailing blank lines). Not part of `skipped`.
    pub empty_rows: usize,
    /// Rows with data but every key field empty. Included in `skipped`.
    pub keyless_rows: usize,
}

impl ImportStats {
    pub fn absorb(&mut self, other: &ImportStats) {
        self.added += other.added;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.empty_rows += other.empty_rows;
        self.keyless_rows += other.keyless_rows;
    }
}

/// Outcome of an import (one sheet or a whole workbook).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub sheet_name: String,
    pub stats: ImportStats,
    pub dry_run: bool,
    /// Human-readable lines: one per processed row plus warnings.
    pub resume: Vec<String>,
    pub warnings: Vec<String>,
    pub failures: Vec<BatchFailure>,
    pub rollback: RollbackRecord,
}

/// Rows of a rejected batch, 1-based and inclusive, in mutation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub first: usize,
    pub last: usize,
    pub message: String,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch rows {}-{} rejected: {}",
            self.first, self.last, self.message
        )
    }
}

/// Result of executing a rollback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// No undoable import exists for this session.
    NothingToUndo,
    Completed {
        deleted: usize,
        restored: usize,
        /// Inverse mutations lost to rejected batches.
        errors: usize,
        warnings: Vec<String>,
    },
}

impl RollbackOutcome {
    pub fn message(&self) -> String {
        match self {
            RollbackOutcome::NothingToUndo => "Nothing to undo.".to_string(),
            RollbackOutcome::Completed {
                deleted,
                restored,
                errors,
                ..
            } if *errors > 0 => format!(
                "Rollback incomplete: {deleted} deletion(s), {restored} restoration(s), {errors} failed."
            ),
            RollbackOutcome::Completed {
                deleted, restored, ..
            } => format!("Rollback finished: {deleted} deletion(s), {restored} restoration(s)."),
        }
    }

    pub fn action_count(&self) -> usize {
        match self {
            RollbackOutcome::NothingToUndo => 0,
            RollbackOutcome::Completed {
                deleted, restored, ..
            } => deleted + restored,
        }
    }
}

/// Pre-import check results. `valid` is false when any error was found.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_sums_every_counter() {
        let mut total = ImportStats::default();
        let sheet = ImportStats {
            added: 1,
            updated: 2,
            skipped: 3,
            errors: 4,
            empty_rows: 5,
            keyless_rows: 6,
        };
        total.absorb(&sheet);
        total.absorb(&sheet);
        assert_eq!(total.updated, 4);
        assert_eq!(total.keyless_rows, 12);
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(RollbackOutcome::NothingToUndo.message(), "Nothing to undo.");
        let done = RollbackOutcome::Completed {
            deleted: 1,
            restored: 2,
            errors: 0,
            warnings: vec![],
        };
        assert_eq!(done.action_count(), 3);
        assert!(done.message().starts_with("Rollback finished"));
    }
}

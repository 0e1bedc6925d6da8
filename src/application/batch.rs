use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::domain::mutation::{returned_row_id, UserAction};
use crate::domain::ports::HostStore;
use crate::domain::report::BatchFailure;
use crate::domain::value_objects::RowId;

/// Mutations per host call unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// What happened to a sequence of submitted actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Identifiers assigned to inserted rows, in submission order. Rows of
    /// rejected batches have none.
    pub added_ids: Vec<RowId>,
    /// Actions lost to rejected batches.
    pub errors: usize,
    pub failures: Vec<BatchFailure>,
    pub submitted: bool,
}

impl BatchOutcome {
    /// Whether the action at 0-based `position` was in a rejected batch.
    pub fn failed(&self, position: usize) -> bool {
        let line = position + 1;
        self.failures
            .iter()
            .any(|f| f.first <= line && line <= f.last)
    }
}

/// Submits actions in fixed-size batches, strictly one after another.
///
/// A rejected batch is logged and counted; the following batches are still
/// submitted.
pub struct BatchApplier {
    store: Arc<dyn HostStore>,
    batch_size: usize,
}

impl BatchApplier {
    pub fn new(store: Arc<dyn HostStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[instrument(skip_all, fields(actions = actions.len(), dry_run = dry_run), level = "info")]
    pub async fn apply(&self, actions: &[UserAction], dry_run: bool) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if dry_run {
            info!(actions = actions.len(), "dry run: nothing submitted");
            return outcome;
        }
        outcome.submitted = true;

        for (n, batch) in actions.chunks(self.batch_size).enumerate() {
            let first = n * self.batch_size + 1;
            let last = first + batch.len() - 1;
            match self.store.apply_actions(batch).await {
                Ok(returned) => {
                    for (action, value) in batch.iter().zip(&returned) {
                        if action.is_add_record() {
                            if let Some(id) = returned_row_id(value) {
                                outcome.added_ids.push(id);
                            }
                        }
                    }
                    debug!(first, last, "batch applied");
                }
                Err(e) => {
                    error!(first, last, error = %e, "batch rejected");
                    outcome.errors += batch.len();
                    outcome.failures.push(BatchFailure {
                        first,
                        last,
                        message: format!("{e:#}"),
                    });
                }
            }
        }
        outcome
    }
}

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::application::batch::BatchApplier;
use crate::application::session::{PendingRollback, Session};
use crate::domain::errors::PreconditionError;
use crate::domain::import_log::{import_log_columns, ImportLogEntry, StoredLogEntry};
use crate::domain::mutation::{returned_row_id, UserAction};
use crate::domain::ports::HostStore;
use crate::domain::report::RollbackOutcome;
use crate::domain::rollback::RollbackRecord;
use crate::domain::value_objects::{RowId, TableName};

/// Keeps the audit table and undoes imports.
pub struct RollbackManager {
    store: Arc<dyn HostStore>,
    log_table: TableName,
    applier: BatchApplier,
}

impl RollbackManager {
    pub fn new(store: Arc<dyn HostStore>, log_table: TableName, batch_size: usize) -> Self {
        Self {
            applier: BatchApplier::new(Arc::clone(&store), batch_size),
            store,
            log_table,
        }
    }

    pub fn log_table(&self) -> &TableName {
        &self.log_table
    }

    // ─── Audit log ──────────────────────────────────────────────────────────

    /// Create the audit table, or add the columns an older one lacks.
    async fn ensure_log_table(&self) -> Result<()> {
        let tables = self
            .store
            .list_tables()
            .await
            .context("Failed to list tables")?;

        if !tables.contains(&self.log_table) {
            self.store
                .apply_actions(&[UserAction::AddTable {
                    table: self.log_table.clone(),
                    columns: import_log_columns(),
                }])
                .await
                .with_context(|| format!("Failed to create {}", self.log_table))?;
            info!(table = %self.log_table, "audit table created");
            return Ok(());
        }

        let present: HashSet<String> = match self.store.column_metadata(&self.log_table).await {
            Ok(meta) if !meta.is_empty() => meta.into_iter().map(|m| m.col_id).collect(),
            _ => self
                .store
                .fetch_table(&self.log_table)
                .await
                .with_context(|| format!("Failed to read {}", self.log_table))?
                .columns
                .into_iter()
                .map(|c| c.name)
                .collect(),
        };
        let missing: Vec<UserAction> = import_log_columns()
            .into_iter()
            .filter(|c| !present.contains(&c.id))
            .map(|column| UserAction::AddColumn {
                table: self.log_table.clone(),
                column,
            })
            .collect();
        if !missing.is_empty() {
            self.store
                .apply_actions(&missing)
                .await
                .with_context(|| format!("Failed to migrate {}", self.log_table))?;
            info!(table = %self.log_table, added = missing.len(), "audit table migrated");
        }
        Ok(())
    }

    /// Append an audit row. Best effort: a failure is logged and yields
    /// `None`, it never fails the import.
    #[instrument(skip_all, fields(sheet = %entry.sheet_name), level = "debug")]
    pub async fn log_import(&self, entry: &ImportLogEntry) -> Option<RowId> {
        let written = async {
            self.ensure_log_table().await?;
            let returned = self
                .store
                .apply_actions(&[UserAction::AddRecord {
                    table: self.log_table.clone(),
                    fields: entry.to_fields(),
                }])
                .await
                .with_context(|| format!("Failed to append to {}", self.log_table))?;
            Ok::<_, anyhow::Error>(returned.first().and_then(returned_row_id))
        }
        .await;

        match written {
            Ok(id) => {
                debug!(log_id = ?id, "import logged");
                id
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "could not write the import log");
                None
            }
        }
    }

    /// Remember `record` as the session's undoable import, unless it holds
    /// nothing to undo.
    pub fn record_rollback(
        &self,
        session: &mut Session,
        record: RollbackRecord,
        log_id: Option<RowId>,
    ) {
        if record.is_empty() {
            return;
        }
        session.set_pending_rollback(PendingRollback { record, log_id });
    }

    // ─── Lookup ─────────────────────────────────────────────────────────────

    /// Latest undoable import of `session`: the in-memory record first, then
    /// the newest matching audit row.
    #[instrument(skip_all, fields(session = %session.id()), level = "debug")]
    pub async fn last_rollback(&self, session: &Session) -> Option<PendingRollback> {
        if let Some(pending) = session.pending_rollback() {
            return Some(pending.clone());
        }

        let data = match self.store.fetch_table(&self.log_table).await {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, "no readable audit table");
                return None;
            }
        };

        let mut entries = StoredLogEntry::read_all(&data);
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        for entry in entries {
            let candidate = entry.session_id.as_deref() == Some(session.id().as_str())
                && !entry.dry_run
                && !entry.rolled_back
                && !entry.rollback_data.trim().is_empty();
            if !candidate {
                continue;
            }
            match RollbackRecord::from_payload(&entry.rollback_data) {
                Ok(record) if !record.is_empty() => {
                    return Some(PendingRollback {
                        record,
                        log_id: Some(entry.id),
                    })
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(log_id = entry.id, error = %e, "corrupt rollback payload skipped");
                    continue;
                }
            }
        }
        None
    }

    // ─── Execution ──────────────────────────────────────────────────────────

    /// Invert one import against the table's current state.
    ///
    /// Rows that no longer exist produce warnings. Restores and deletes go
    /// out through the same batching as imports.
    #[instrument(skip_all, fields(added = record.added.len(), updated = record.updated.len()), level = "info")]
    pub async fn rollback(
        &self,
        record: &RollbackRecord,
        fallback_table: Option<&TableName>,
    ) -> Result<RollbackOutcome> {
        let table = record
            .table
            .as_ref()
            .or(fallback_table)
            .ok_or(PreconditionError::NoTargetTable)?;
        let current = self
            .store
            .fetch_table(table)
            .await
            .with_context(|| format!("Failed to read {} for rollback", table))?;
        let live: HashSet<RowId> = current.ids.iter().copied().collect();

        let mut actions = Vec::new();
        let mut warnings = Vec::new();

        let mut restored = 0;
        // newest pre-image first, so the oldest value of a row lands last
        for pre in record.updated.iter().rev() {
            if pre.previous_values.is_empty() {
                continue;
            }
            if !live.contains(&pre.id) {
                warnings.push(format!("Row #{} no longer exists; not restored", pre.id));
                continue;
            }
            actions.push(UserAction::UpdateRecord {
                table: table.clone(),
                id: pre.id,
                fields: pre.previous_values.clone(),
            });
            restored += 1;
        }

        let mut deleted = 0;
        for id in &record.added {
            if !live.contains(id) {
                warnings.push(format!("Row #{id} was already deleted"));
                continue;
            }
            actions.push(UserAction::RemoveRecord {
                table: table.clone(),
                id: *id,
            });
            deleted += 1;
        }

        let outcome = self.applier.apply(&actions, false).await;
        warnings.extend(outcome.failures.iter().map(|f| f.to_string()));
        info!(table = %table, deleted, restored, errors = outcome.errors, "rollback applied");

        Ok(RollbackOutcome::Completed {
            deleted,
            restored,
            errors: outcome.errors,
            warnings,
        })
    }

    /// Undo the session's latest import and retire it, so a second call
    /// finds nothing. A rollback with rejected batches stays pending.
    #[instrument(skip_all, fields(session = %session.id()), level = "info")]
    pub async fn rollback_last(&self, session: &mut Session) -> Result<RollbackOutcome> {
        let Some(pending) = self.last_rollback(session).await else {
            info!("nothing to undo");
            return Ok(RollbackOutcome::NothingToUndo);
        };

        let outcome = self
            .rollback(&pending.record, session.current_table())
            .await?;
        if let RollbackOutcome::Completed { errors, .. } = &outcome {
            if *errors > 0 {
                return Ok(outcome);
            }
        }

        session.clear_pending_rollback();
        if let Some(log_id) = pending.log_id {
            self.mark_rolled_back(log_id).await;
        }
        Ok(outcome)
    }

    async fn mark_rolled_back(&self, log_id: RowId) {
        let result = self
            .store
            .apply_actions(&[UserAction::UpdateRecord {
                table: self.log_table.clone(),
                id: log_id,
                fields: [
                    ("rolled_back".to_string(), json!(true)),
                    ("rollback_data".to_string(), json!("")),
                ]
                .into(),
            }])
            .await;
        if let Err(e) = result {
            warn!(log_id, error = %e, "could not mark the import as rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::ImportStats;
    use crate::domain::rollback::UpdatePreImage;
    use crate::domain::table::{ColumnMeta, RowMap};
    use crate::domain::value_objects::SessionId;
    use crate::infrastructure::memory_store::MemoryStore;

    fn row(pairs: &[(&str, serde_json::Value)]) -> RowMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new().with_table(
            "People",
            vec![ColumnMeta::data("Name", "Text")],
            vec![row(&[("Name", json!("Changed"))]), row(&[("Name", json!("Inserted"))])],
        ))
    }

    fn manager(store: &Arc<MemoryStore>) -> RollbackManager {
        RollbackManager::new(store.clone(), TableName::new("IMPORT_LOG"), 100)
    }

    fn record() -> RollbackRecord {
        RollbackRecord {
            table: Some(TableName::new("People")),
            added: vec![2],
            updated: vec![UpdatePreImage {
                id: 1,
                previous_values: row(&[("Name", json!("Original"))]),
            }],
        }
    }

    fn entry(session: &Session, record: &RollbackRecord, dry_run: bool) -> ImportLogEntry {
        ImportLogEntry {
            timestamp: "2024-01-01T00:00:00Z".into(),
            file_name: "people.xlsx".into(),
            sheet_name: "Sheet1".into(),
            stats: ImportStats::default(),
            dry_run,
            rollback_data: record.to_payload().unwrap(),
            session_id: session.id().clone(),
            rolled_back: false,
        }
    }

    #[tokio::test]
    async fn rollback_restores_and_deletes() {
        let store = store();
        let outcome = manager(&store).rollback(&record(), None).await.unwrap();
        assert_eq!(
            outcome,
            RollbackOutcome::Completed {
                deleted: 1,
                restored: 1,
                errors: 0,
                warnings: vec![]
            }
        );
        let rows = store.records("People").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Name"), &json!("Original"));
    }

    #[tokio::test]
    async fn overlapping_pre_images_end_at_the_oldest_value() {
        let store = store();
        let mut rec = record();
        rec.added.clear();
        rec.updated.push(UpdatePreImage {
            id: 1,
            previous_values: row(&[("Name", json!("Intermediate"))]),
        });
        let outcome = manager(&store).rollback(&rec, None).await.unwrap();
        assert!(matches!(
            outcome,
            RollbackOutcome::Completed { restored: 2, errors: 0, .. }
        ));
        let rows = store.records("People").unwrap();
        assert_eq!(rows[0].get("Name"), &json!("Original"));
    }

    #[tokio::test]
    async fn vanished_rows_become_warnings() {
        let store = store();
        let mut rec = record();
        rec.added.push(42);
        rec.updated[0].id = 77;
        let outcome = manager(&store).rollback(&rec, None).await.unwrap();
        match outcome {
            RollbackOutcome::Completed {
                deleted,
                restored,
                warnings,
                ..
            } => {
                assert_eq!((deleted, restored), (1, 0));
                assert_eq!(warnings.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn audit_log_lookup_filters_by_session() {
        let store = store();
        let manager = manager(&store);
        let mine = Session::with_id(SessionId("mine".into()));
        let other = Session::with_id(SessionId("other".into()));

        assert!(manager.log_import(&entry(&mine, &record(), false)).await.is_some());
        manager.log_import(&entry(&mine, &record(), true)).await;
        manager.log_import(&entry(&other, &record(), false)).await;

        let found = manager.last_rollback(&mine).await.unwrap();
        assert_eq!(found.log_id, Some(1));
        assert_eq!(found.record, record());
        assert!(manager
            .last_rollback(&Session::with_id(SessionId("nobody".into())))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn corrupt_payload_is_skipped() {
        let store = store();
        let manager = manager(&store);
        let session = Session::with_id(SessionId("s".into()));
        manager.log_import(&entry(&session, &record(), false)).await;
        let mut broken = entry(&session, &record(), false);
        broken.rollback_data = "{not json".into();
        manager.log_import(&broken).await;

        let found = manager.last_rollback(&session).await.unwrap();
        assert_eq!(found.log_id, Some(1));
    }

    #[tokio::test]
    async fn rollback_last_runs_once() {
        let store = store();
        let manager = manager(&store);
        let mut session = Session::with_id(SessionId("s".into()));
        let log_id = manager.log_import(&entry(&session, &record(), false)).await;
        manager.record_rollback(&mut session, record(), log_id);

        let first = manager.rollback_last(&mut session).await.unwrap();
        assert_eq!(first.action_count(), 2);

        let second = manager.rollback_last(&mut session).await.unwrap();
        assert_eq!(second, RollbackOutcome::NothingToUndo);
        assert_eq!(second.action_count(), 0);

        // the audit row was retired, so a fresh session object finds nothing either
        let resumed = Session::with_id(SessionId("s".into()));
        assert!(manager.last_rollback(&resumed).await.is_none());
    }

    #[tokio::test]
    async fn older_audit_tables_are_migrated() {
        let store = Arc::new(MemoryStore::new().with_table(
            "IMPORT_LOG",
            vec![
                ColumnMeta::data("timestamp", "Text"),
                ColumnMeta::data("file_name", "Text"),
                ColumnMeta::data("sheet_name", "Text"),
                ColumnMeta::data("rows_added", "Int"),
                ColumnMeta::data("rows_updated", "Int"),
                ColumnMeta::data("rows_skipped", "Int"),
                ColumnMeta::data("rows_errors", "Int"),
                ColumnMeta::data("dry_run", "Bool"),
                ColumnMeta::data("rollback_data", "Text"),
            ],
            vec![],
        ));
        let manager = manager(&store);
        let session = Session::new();
        assert!(manager.log_import(&entry(&session, &record(), false)).await.is_some());
        let meta = store
            .column_metadata(&TableName::new("IMPORT_LOG"))
            .await
            .unwrap();
        assert!(meta.iter().any(|c| c.col_id == "session_id"));
        assert!(meta.iter().any(|c| c.col_id == "rolled_back"));
    }
}

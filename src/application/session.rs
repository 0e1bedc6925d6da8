use crate::application::coerce::ReferenceCache;
use crate::domain::rollback::RollbackRecord;
use crate::domain::value_objects::{RowId, SessionId, TableName};

/// Most recent undoable import of this session, held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRollback {
    pub record: RollbackRecord,
    /// Audit row the import wrote, when the write succeeded.
    pub log_id: Option<RowId>,
}

/// State one operator session carries between imports.
///
/// Engines never share a session, so separate instances (one per test, for
/// example) cannot see each other's caches or rollbacks.
#[derive(Debug, Default)]
pub struct Session {
    id: SessionId,
    current_table: Option<TableName>,
    references: ReferenceCache,
    pending: Option<PendingRollback>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a session whose audit rows should remain undoable.
    pub fn with_id(id: SessionId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Table the host currently has selected.
    pub fn current_table(&self) -> Option<&TableName> {
        self.current_table.as_ref()
    }

    /// Record the host's table-identity signal.
    pub fn set_current_table(&mut self, table: TableName) {
        self.current_table = Some(table);
    }

    pub fn references(&self) -> &ReferenceCache {
        &self.references
    }

    pub fn references_mut(&mut self) -> &mut ReferenceCache {
        &mut self.references
    }

    /// Forget every cached reference lookup; the next import re-reads them.
    pub fn clear_reference_cache(&mut self) {
        self.references.clear();
    }

    pub fn pending_rollback(&self) -> Option<&PendingRollback> {
        self.pending.as_ref()
    }

    pub fn set_pending_rollback(&mut self, pending: PendingRollback) {
        self.pending = Some(pending);
    }

    pub fn take_pending_rollback(&mut self) -> Option<PendingRollback> {
        self.pending.take()
    }

    pub fn clear_pending_rollback(&mut self) {
        self.pending = None;
    }
}

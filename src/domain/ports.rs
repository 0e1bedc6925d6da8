use crate::domain::{
    mutation::UserAction,
    table::{ColumnMeta, TableData},
    value_objects::TableName,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Port: the host's tabular store (implemented by MemoryStore, JsonFileStore)
#[async_trait]
pub trait HostStore: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<TableName>>;

    /// Full columnar contents of one table.
    async fn fetch_table(&self, table: &TableName) -> Result<TableData>;

    /// Store-native column descriptions; empty when the host exposes none.
    async fn column_metadata(&self, table: &TableName) -> Result<Vec<ColumnMeta>>;

    /// Apply a bundle of actions atomically. Returns one value per action:
    /// the new row identifier for `AddRecord`, `null` otherwise.
    async fn apply_actions(&self, actions: &[UserAction]) -> Result<Vec<Value>>;
}

/// Port: receives `(current_row, total_rows)` while an import walks its rows
pub trait ProgressSink: Send + Sync {
    fn progress(&self, current: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn progress(&self, current: usize, total: usize) {
        self(current, total)
    }
}

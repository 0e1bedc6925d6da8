use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::domain::ports::HostStore;
use crate::domain::schema::{ColumnInfo, ColumnKind, TableSchema};
use crate::domain::table::TableData;
use crate::domain::value_objects::{is_internal_column, ColumnName, TableName};

/// Reads the typed column layout of a store table.
pub struct SchemaIntrospector {
    store: Arc<dyn HostStore>,
}

impl SchemaIntrospector {
    pub fn new(store: Arc<dyn HostStore>) -> Self {
        Self { store }
    }

    /// Column kinds and formula flags of `table`.
    ///
    /// Declared metadata is preferred. Without it, kinds are inferred from
    /// the first row; an empty table reports every column as `Text`.
    #[instrument(skip(self), fields(db.table = %table), level = "debug")]
    pub async fn table_schema(&self, table: &TableName) -> Result<TableSchema> {
        match self.store.column_metadata(table).await {
            Ok(meta) if !meta.is_empty() => {
                let columns = meta
                    .iter()
                    .filter(|m| !is_internal_column(&m.col_id))
                    .map(|m| ColumnInfo {
                        name: ColumnName::new(&m.col_id),
                        kind: ColumnKind::from_declared(&m.col_type),
                        formula: m.is_computed(),
                    })
                    .collect();
                return Ok(TableSchema::new(columns));
            }
            Ok(_) => debug!(table = %table, "no column metadata; sampling rows"),
            Err(e) => warn!(table = %table, error = %e, "column metadata unreadable; sampling rows"),
        }

        let data = self
            .store
            .fetch_table(table)
            .await
            .with_context(|| format!("Failed to read table {}", table))?;
        Ok(schema_from_sample(&data))
    }
}

/// Infer a schema from the first row of a table.
pub fn schema_from_sample(data: &TableData) -> TableSchema {
    let columns = data
        .columns
        .iter()
        .filter(|c| !is_internal_column(&c.name))
        .map(|c| ColumnInfo {
            name: ColumnName::new(&c.name),
            kind: match c.values.first() {
                Some(v) => infer_kind(v),
                None => ColumnKind::Text,
            },
            formula: false,
        })
        .collect();
    TableSchema::new(columns)
}

/// Kind suggested by the runtime shape of one stored value.
pub fn infer_kind(value: &Value) -> ColumnKind {
    match value {
        Value::Number(_) => ColumnKind::Numeric,
        Value::Bool(_) => ColumnKind::Bool,
        Value::String(_) => ColumnKind::Text,
        Value::Array(items) => match items.first().and_then(Value::as_str) {
            Some("d") | Some("D") => ColumnKind::Date,
            Some("L") => ColumnKind::Choice,
            _ => ColumnKind::Unknown,
        },
        _ => ColumnKind::Unknown,
    }
}

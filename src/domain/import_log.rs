use serde_json::{json, Value};

use crate::domain::mutation::ColumnSpec;
use crate::domain::report::ImportStats;
use crate::domain::table::{truthy, RowMap, TableData};
use crate::domain::value_objects::{RowId, SessionId};

/// Columns of the audit table, with their store types.
pub const IMPORT_LOG_COLUMNS: [(&str, &str); 11] = [
    ("timestamp", "Text"),
    ("file_name", "Text"),
    ("sheet_name", "Text"),
    ("rows_added", "Int"),
    ("rows_updated", "Int"),
    ("rows_skipped", "Int"),
    ("rows_errors", "Int"),
    ("dry_run", "Bool"),
    ("rollback_data", "Text"),
    ("session_id", "Text"),
    ("rolled_back", "Bool"),
];

pub fn import_log_columns() -> Vec<ColumnSpec> {
    IMPORT_LOG_COLUMNS
        .iter()
        .map(|(id, ty)| ColumnSpec::new(id, ty))
        .collect()
}

/// One persisted audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportLogEntry {
    pub timestamp: String,
    pub file_name: String,
    pub sheet_name: String,
    pub stats: ImportStats,
    pub dry_run: bool,
    /// Serialized `RollbackRecord`, empty when there is nothing to undo.
    pub rollback_data: String,
    pub session_id: SessionId,
    pub rolled_back: bool,
}

impl ImportLogEntry {
    pub fn to_fields(&self) -> RowMap {
        let mut fields = RowMap::new();
        fields.insert("timestamp".into(), json!(self.timestamp));
        fields.insert("file_name".into(), json!(self.file_name));
        fields.insert("sheet_name".into(), json!(self.sheet_name));
        fields.insert("rows_added".into(), json!(self.stats.added));
        fields.insert("rows_updated".into(), json!(self.stats.updated));
        fields.insert("rows_skipped".into(), json!(self.stats.skipped));
        fields.insert("rows_errors".into(), json!(self.stats.errors));
        fields.insert("dry_run".into(), json!(self.dry_run));
        fields.insert("rollback_data".into(), json!(self.rollback_data));
        fields.insert("session_id".into(), json!(self.session_id.0));
        fields.insert("rolled_back".into(), json!(self.rolled_back));
        fields
    }
}

/// Audit row as read back for rollback lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLogEntry {
    pub id: RowId,
    pub timestamp: String,
    pub file_name: String,
    pub session_id: Option<String>,
    pub dry_run: bool,
    pub rolled_back: bool,
    pub rollback_data: String,
}

impl StoredLogEntry {
    /// Read every audit row, oldest first. Missing columns read as empty.
    pub fn read_all(data: &TableData) -> Vec<StoredLogEntry> {
        let text = |col: &str, i: usize| -> String {
            data.column(col)
                .and_then(|v| v.get(i))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let flag = |col: &str, i: usize| -> bool {
            data.column(col)
                .and_then(|v| v.get(i))
                .map(truthy)
                .unwrap_or(false)
        };
        data.ids
            .iter()
            .enumerate()
            .map(|(i, id)| StoredLogEntry {
                id: *id,
                timestamp: text("timestamp", i),
                file_name: text("file_name", i),
                session_id: data
                    .column("session_id")
                    .and_then(|v| v.get(i))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                dry_run: flag("dry_run", i),
                rolled_back: flag("rolled_back", i),
                rollback_data: text("rollback_data", i),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::table::ColumnValues;

    #[test]
    fn read_all_tolerates_missing_columns() {
        let data = TableData {
            ids: vec![1],
            columns: vec![
                ColumnValues { name: "timestamp".into(), values: vec![json!("t")] },
                ColumnValues { name: "dry_run".into(), values: vec![json!(false)] },
                ColumnValues { name: "rollback_data".into(), values: vec![json!("{}")] },
            ],
        };
        let entries = StoredLogEntry::read_all(&data);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].session_id, None);
        assert!(!entries[0].rolled_back);
        assert_eq!(entries[0].rollback_data, "{}");
    }

    #[test]
    fn fields_cover_every_log_column() {
        let entry = ImportLogEntry {
            timestamp: "2024-01-01T00:00:00Z".into(),
            file_name: "f.xlsx".into(),
            sheet_name: "Sheet1".into(),
            stats: ImportStats::default(),
            dry_run: false,
            rollback_data: String::new(),
            session_id: SessionId("s".into()),
            rolled_back: false,
        };
        let fields = entry.to_fields();
        for (col, _) in IMPORT_LOG_COLUMNS {
            assert!(fields.contains_key(col), "missing {col}");
        }
    }
}

use serde::Serialize;
use serde_json::Value;

use crate::domain::table::RowMap;
use crate::domain::value_objects::{RowId, TableName};

/// A change the engine wants applied to the target table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// New row; the store assigns the identifier.
    Insert { fields: RowMap },
    /// Sparse update of an existing row. Never empty.
    Update { id: RowId, fields: RowMap },
}

impl Mutation {
    pub fn into_action(self, table: &TableName) -> UserAction {
        match self {
            Mutation::Insert { fields } => UserAction::AddRecord {
                table: table.clone(),
                fields,
            },
            Mutation::Update { id, fields } => UserAction::UpdateRecord {
                table: table.clone(),
                id,
                fields,
            },
        }
    }

    pub fn fields(&self) -> &RowMap {
        match self {
            Mutation::Insert { fields } | Mutation::Update { fields, .. } => fields,
        }
    }
}

/// Column definition used when creating tables or columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub col_type: String,
}

impl ColumnSpec {
    pub fn new(id: &str, col_type: &str) -> Self {
        Self {
            id: id.to_string(),
            col_type: col_type.to_string(),
        }
    }
}

/// One host mutation call. A slice of these is submitted atomically.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action")]
pub enum UserAction {
    AddRecord {
        table: TableName,
        fields: RowMap,
    },
    UpdateRecord {
        table: TableName,
        id: RowId,
        fields: RowMap,
    },
    RemoveRecord {
        table: TableName,
        id: RowId,
    },
    AddTable {
        table: TableName,
        columns: Vec<ColumnSpec>,
    },
    AddColumn {
        table: TableName,
        column: ColumnSpec,
    },
}

impl UserAction {
    pub fn table(&self) -> &TableName {
        match self {
            UserAction::AddRecord { table, .. }
            | UserAction::UpdateRecord { table, .. }
            | UserAction::RemoveRecord { table, .. }
            | UserAction::AddTable { table, .. }
            | UserAction::AddColumn { table, .. } => table,
        }
    }

    pub fn is_add_record(&self) -> bool {
        matches!(self, UserAction::AddRecord { .. })
    }
}

/// Extract the identifier a store returned for an `AddRecord`.
pub fn returned_row_id(value: &Value) -> Option<RowId> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as RowId)
    })
}

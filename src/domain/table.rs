use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::value_objects::{is_internal_column, RowId};

/// Type alias for a row represented as a sorted map of column name → JSON value.
pub type RowMap = BTreeMap<String, Value>;

/// One existing row of the store: identifier plus its field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RowId,
    pub fields: RowMap,
}

impl Record {
    pub fn get(&self, column: &str) -> &Value {
        self.fields.get(column).unwrap_or(&Value::Null)
    }
}

/// One column of a columnar table fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnValues {
    pub name: String,
    pub values: Vec<Value>,
}

/// Columnar table contents as the host delivers them: an identifier array and
/// one value array per column, in the store's column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub ids: Vec<RowId>,
    pub columns: Vec<ColumnValues>,
}

impl TableData {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Column names in store order, without the store's own bookkeeping columns.
    pub fn user_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|n| !is_internal_column(n))
    }

    /// Pivot the columnar payload into one `Record` per identifier.
    pub fn records(&self) -> Vec<Record> {
        self.ids
            .iter()
            .enumerate()
            .map(|(i, id)| Record {
                id: *id,
                fields: self
                    .columns
                    .iter()
                    .filter(|c| !is_internal_column(&c.name))
                    .map(|c| (c.name.clone(), c.values.get(i).cloned().unwrap_or(Value::Null)))
                    .collect(),
            })
            .collect()
    }
}

/// Loose boolean reading of a cell, as the store's flag columns hold it.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        _ => false,
    }
}

/// Store-native description of one column, as read from the host's
/// metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub col_id: String,
    /// Declared type, e.g. `Text`, `Numeric`, `Date`, `Ref:People`.
    #[serde(rename = "type", default = "default_col_type")]
    pub col_type: String,
    #[serde(default)]
    pub is_formula: bool,
    #[serde(default)]
    pub formula: String,
}

fn default_col_type() -> String {
    "Any".to_string()
}

impl ColumnMeta {
    pub fn data(col_id: &str, col_type: &str) -> Self {
        Self {
            col_id: col_id.to_string(),
            col_type: col_type.to_string(),
            is_formula: false,
            formula: String::new(),
        }
    }

    pub fn formula(col_id: &str, col_type: &str, body: &str) -> Self {
        Self {
            col_id: col_id.to_string(),
            col_type: col_type.to_string(),
            is_formula: true,
            formula: body.to_string(),
        }
    }

    /// Computed columns only count as formulas when they carry a body;
    /// a computed-but-empty column still accepts writes.
    pub fn is_computed(&self) -> bool {
        self.is_formula && !self.formula.trim().is_empty()
    }

    /// Target table of a `Ref:`/`RefList:` column.
    pub fn reference_target(&self) -> Option<&str> {
        self.col_type
            .strip_prefix("Ref:")
            .or_else(|| self.col_type.strip_prefix("RefList:"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> TableData {
        TableData {
            ids: vec![1, 2],
            columns: vec![
                ColumnValues {
                    name: "manualSort".into(),
                    values: vec![json!(1), json!(2)],
                },
                ColumnValues {
                    name: "Name".into(),
                    values: vec![json!("Alice"), json!("Bob")],
                },
                ColumnValues {
                    name: "Age".into(),
                    values: vec![json!(30)],
                },
            ],
        }
    }

    #[test]
    fn records_pivot_columns_and_skip_internal() {
        let records = sample().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[0].get("Name"), &json!("Alice"));
        assert!(!records[0].fields.contains_key("manualSort"));
        // short column pads with null
        assert_eq!(records[1].get("Age"), &Value::Null);
    }

    #[test]
    fn user_columns_keep_store_order() {
        let t = sample();
        assert_eq!(t.user_columns().collect::<Vec<_>>(), vec!["Name", "Age"]);
    }

    #[test]
    fn computed_requires_formula_body() {
        assert!(ColumnMeta::formula("Total", "Numeric", "$A + $B").is_computed());
        assert!(!ColumnMeta::formula("Total", "Numeric", "").is_computed());
        assert!(!ColumnMeta::data("Total", "Numeric").is_computed());
    }

    #[test]
    fn reference_target_from_type() {
        assert_eq!(ColumnMeta::data("Owner", "Ref:People").reference_target(), Some("People"));
        assert_eq!(ColumnMeta::data("Tags", "RefList:Tags").reference_target(), Some("Tags"));
        assert_eq!(ColumnMeta::data("Name", "Text").reference_target(), None);
    }
}

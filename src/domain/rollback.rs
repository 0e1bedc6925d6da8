use serde::{Deserialize, Serialize};

use crate::domain::table::RowMap;
use crate::domain::value_objects::{RowId, TableName};

/// Pre-mutation values of every field an update changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePreImage {
    pub id: RowId,
    #[serde(rename = "previousValues")]
    pub previous_values: RowMap,
}

/// Minimal data needed to invert one import.
///
/// Serialized as-is into the audit table's `rollback_data` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    /// Table the import wrote to. Older payloads omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TableName>,
    /// Identifiers the store assigned to inserted rows, in submission order.
    #[serde(default)]
    pub added: Vec<RowId>,
    #[serde(default)]
    pub updated: Vec<UpdatePreImage>,
}

impl RollbackRecord {
    pub fn for_table(table: &TableName) -> Self {
        Self {
            table: Some(table.clone()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.iter().all(|u| u.previous_values.is_empty())
    }

    /// Append another import's record (multi-sheet runs share one payload).
    /// Pre-images keep run order; undo replays them newest first.
    pub fn merge(&mut self, other: RollbackRecord) {
        if self.table.is_none() {
            self.table = other.table;
        }
        self.added.extend(other.added);
        self.updated.extend(other.updated);
    }

    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_uses_persisted_key_names() {
        let record = RollbackRecord {
            table: Some(TableName::new("Contacts")),
            added: vec![5],
            updated: vec![UpdatePreImage {
                id: 1,
                previous_values: [("Name".to_string(), json!("Old"))].into(),
            }],
        };
        let value: serde_json::Value = serde_json::from_str(&record.to_payload().unwrap()).unwrap();
        assert_eq!(value["added"], json!([5]));
        assert_eq!(value["updated"][0]["previousValues"]["Name"], json!("Old"));
    }

    #[test]
    fn reads_payload_without_table() {
        let record =
            RollbackRecord::from_payload(r#"{"added":[3,4],"updated":[]}"#).unwrap();
        assert_eq!(record.table, None);
        assert_eq!(record.added, vec![3, 4]);
    }

    #[test]
    fn empty_pre_images_count_as_empty() {
        let record = RollbackRecord {
            updated: vec![UpdatePreImage { id: 1, previous_values: RowMap::new() }],
            ..RollbackRecord::default()
        };
        assert!(record.is_empty());
    }

    #[test]
    fn merge_keeps_order() {
        let table = TableName::new("T");
        let mut a = RollbackRecord::for_table(&table);
        a.added.push(1);
        let mut b = RollbackRecord::for_table(&table);
        b.added.push(2);
        a.merge(b);
        assert_eq!(a.added, vec![1, 2]);
    }
}

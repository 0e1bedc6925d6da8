use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

use crate::domain::mutation::UserAction;
use crate::domain::ports::HostStore;
use crate::domain::table::{ColumnMeta, ColumnValues, Record, RowMap, TableData};
use crate::domain::value_objects::{RowId, TableName};

/// One table held by [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemTable {
    pub columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub rows: Vec<Record>,
}

impl MemTable {
    fn next_id(&self) -> RowId {
        self.rows.iter().map(|r| r.id).max().unwrap_or(0) + 1
    }

    fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.col_id == name)
    }

    fn check_writable(&self, table: &str, fields: &RowMap) -> Result<()> {
        for name in fields.keys() {
            match self.column(name) {
                None => bail!("Invalid column \"{}\" in table {}", name, table),
                Some(c) if c.is_computed() => {
                    bail!("Cannot write formula column \"{}\" in table {}", name, table)
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn to_data(&self) -> TableData {
        TableData {
            ids: self.rows.iter().map(|r| r.id).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| ColumnValues {
                    name: c.col_id.clone(),
                    values: self.rows.iter().map(|r| r.get(&c.col_id).clone()).collect(),
                })
                .collect(),
        }
    }
}

/// In-process implementation of [`HostStore`].
///
/// Every `apply_actions` call works on a copy of the tables and only commits
/// when all actions succeed, matching the host's bundle semantics.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, MemTable>>,
    hide_metadata: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: BTreeMap<String, MemTable>) -> Self {
        Self {
            tables: Mutex::new(tables),
            hide_metadata: false,
        }
    }

    /// Add a table with the given columns and rows; identifiers start at 1.
    pub fn with_table(self, name: &str, columns: Vec<ColumnMeta>, rows: Vec<RowMap>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, fields)| Record {
                id: i as RowId + 1,
                fields,
            })
            .collect();
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(name.to_string(), MemTable { columns, rows });
        }
        self
    }

    /// Report no column metadata, as a host without a metadata table would.
    pub fn without_metadata(mut self) -> Self {
        self.hide_metadata = true;
        self
    }

    pub fn snapshot(&self) -> Result<BTreeMap<String, MemTable>> {
        Ok(self.lock()?.clone())
    }

    pub fn records(&self, table: &str) -> Result<Vec<Record>> {
        let tables = self.lock()?;
        let t = tables
            .get(table)
            .ok_or_else(|| anyhow!("Unknown table {}", table))?;
        Ok(t.rows.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, MemTable>>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

fn apply_one(tables: &mut BTreeMap<String, MemTable>, action: &UserAction) -> Result<Value> {
    let name = action.table().0.as_str();
    match action {
        UserAction::AddTable { columns, .. } => {
            if tables.contains_key(name) {
                bail!("Table {} already exists", name);
            }
            let columns = columns
                .iter()
                .map(|c| ColumnMeta::data(&c.id, &c.col_type))
                .collect();
            tables.insert(name.to_string(), MemTable { columns, rows: vec![] });
            Ok(Value::Null)
        }
        UserAction::AddColumn { column, .. } => {
            let t = table_mut(tables, name)?;
            if t.column(&column.id).is_some() {
                bail!("Column {} already exists in {}", column.id, name);
            }
            t.columns.push(ColumnMeta::data(&column.id, &column.col_type));
            Ok(Value::Null)
        }
        UserAction::AddRecord { fields, .. } => {
            let t = table_mut(tables, name)?;
            t.check_writable(name, fields)?;
            let id = t.next_id();
            t.rows.push(Record {
                id,
                fields: fields.clone(),
            });
            Ok(Value::from(id))
        }
        UserAction::UpdateRecord { id, fields, .. } => {
            let t = table_mut(tables, name)?;
            t.check_writable(name, fields)?;
            let row = t
                .rows
                .iter_mut()
                .find(|r| r.id == *id)
                .ok_or_else(|| anyhow!("Row {} not found in {}", id, name))?;
            for (k, v) in fields {
                row.fields.insert(k.clone(), v.clone());
            }
            Ok(Value::Null)
        }
        UserAction::RemoveRecord { id, .. } => {
            let t = table_mut(tables, name)?;
            let before = t.rows.len();
            t.rows.retain(|r| r.id != *id);
            if t.rows.len() == before {
                bail!("Row {} not found in {}", id, name);
            }
            Ok(Value::Null)
        }
    }
}

fn table_mut<'a>(tables: &'a mut BTreeMap<String, MemTable>, name: &str) -> Result<&'a mut MemTable> {
    tables
        .get_mut(name)
        .ok_or_else(|| anyhow!("Unknown table {}", name))
}

#[async_trait]
impl HostStore for MemoryStore {
    async fn list_tables(&self) -> Result<Vec<TableName>> {
        Ok(self.lock()?.keys().map(|k| TableName(k.clone())).collect())
    }

    async fn fetch_table(&self, table: &TableName) -> Result<TableData> {
        let tables = self.lock()?;
        let t = tables
            .get(&table.0)
            .ok_or_else(|| anyhow!("Unknown table {}", table))?;
        Ok(t.to_data())
    }

    async fn column_metadata(&self, table: &TableName) -> Result<Vec<ColumnMeta>> {
        if self.hide_metadata {
            return Ok(vec![]);
        }
        let tables = self.lock()?;
        let t = tables
            .get(&table.0)
            .ok_or_else(|| anyhow!("Unknown table {}", table))?;
        Ok(t.columns.clone())
    }

    async fn apply_actions(&self, actions: &[UserAction]) -> Result<Vec<Value>> {
        let mut tables = self.lock()?;
        let mut working = tables.clone();
        let mut returned = Vec::with_capacity(actions.len());
        for action in actions {
            returned.push(apply_one(&mut working, action)?);
        }
        *tables = working;
        debug!(actions = actions.len(), "memory store applied bundle");
        Ok(returned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> RowMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn store() -> MemoryStore {
        MemoryStore::new().with_table(
            "People",
            vec![
                ColumnMeta::data("Name", "Text"),
                ColumnMeta::formula("Upper", "Text", "$Name.upper()"),
            ],
            vec![row(&[("Name", json!("Ada"))])],
        )
    }

    #[tokio::test]
    async fn add_record_returns_new_id() {
        let s = store();
        let table = TableName::new("People");
        let ret = s
            .apply_actions(&[UserAction::AddRecord {
                table: table.clone(),
                fields: row(&[("Name", json!("Bob"))]),
            }])
            .await
            .unwrap();
        assert_eq!(ret, vec![json!(2)]);
        assert_eq!(s.fetch_table(&table).await.unwrap().ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn failing_bundle_applies_nothing() {
        let s = store();
        let table = TableName::new("People");
        let err = s
            .apply_actions(&[
                UserAction::AddRecord {
                    table: table.clone(),
                    fields: row(&[("Name", json!("Bob"))]),
                },
                UserAction::RemoveRecord {
                    table: table.clone(),
                    id: 99,
                },
            ])
            .await;
        assert!(err.is_err());
        assert_eq!(s.records("People").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_formula_and_unknown_columns() {
        let s = store();
        let table = TableName::new("People");
        for col in ["Upper", "Nope"] {
            let res = s
                .apply_actions(&[UserAction::UpdateRecord {
                    table: table.clone(),
                    id: 1,
                    fields: row(&[(col, json!("x"))]),
                }])
                .await;
            assert!(res.is_err(), "{col} should be rejected");
        }
    }

    #[tokio::test]
    async fn metadata_can_be_hidden() {
        let s = store().without_metadata();
        let meta = s.column_metadata(&TableName::new("People")).await.unwrap();
        assert!(meta.is_empty());
    }
}

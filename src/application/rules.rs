use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::application::schema::SchemaIntrospector;
use crate::domain::errors::PreconditionError;
use crate::domain::mutation::{ColumnSpec, UserAction};
use crate::domain::naming::{clean_label, normalize_name};
use crate::domain::ports::HostStore;
use crate::domain::rules::{
    KeyColumn, KeyMode, PolicyRule, RuleEntry, RuleSet, RuleSource, LOWEST_KEY_PRIORITY,
};
use crate::domain::table::{truthy, RowMap, TableData};
use crate::domain::value_objects::{RowId, TableName};

const COL_NAME: &str = "col_name";
const RULE: &str = "rule";
const IS_KEY: &str = "is_key";
const KEY_PRIORITY: &str = "key_priority";
const KEY_MODE: &str = "key_mode";

/// What `ensure_rules_table` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulesTableStatus {
    Present,
    /// Created with one row per target column.
    Created { rows: usize },
    /// The `is_key` column was added to an older table.
    Migrated,
}

/// Reads and edits the persisted rule configuration table.
pub struct RuleStore {
    store: Arc<dyn HostStore>,
    table: TableName,
}

/// One usable row of the rules table.
struct RuleRow {
    id: RowId,
    col_name: String,
    rule: Value,
    is_key: bool,
    priority: Option<i64>,
    key_mode: Option<String>,
}

fn cell<'a>(data: &'a TableData, column: &str, i: usize) -> &'a Value {
    data.column(column)
        .and_then(|v| v.get(i))
        .unwrap_or(&Value::Null)
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn priority_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn read_rows(data: &TableData) -> Vec<RuleRow> {
    data.ids
        .iter()
        .enumerate()
        .filter_map(|(i, id)| {
            Some(RuleRow {
                id: *id,
                col_name: cell_text(cell(data, COL_NAME, i))?,
                rule: cell(data, RULE, i).clone(),
                is_key: truthy(cell(data, IS_KEY, i)),
                priority: priority_of(cell(data, KEY_PRIORITY, i)),
                key_mode: cell_text(cell(data, KEY_MODE, i)),
            })
        })
        .collect()
}

/// Fold raw rule-table contents into a [`RuleSet`].
///
/// Rows without a column name or a rule are skipped. Unknown rule values
/// fall back to `ignore`. The key mode is taken from the first row that
/// sets one.
pub fn rules_from_table(data: &TableData) -> RuleSet {
    let mut entries = BTreeMap::new();
    let mut keys = Vec::new();
    let mut key_mode = None;

    for row in read_rows(data) {
        let Some(raw_rule) = cell_text(&row.rule) else {
            continue;
        };
        let rule = raw_rule.parse::<PolicyRule>().unwrap_or_else(|e| {
            warn!(column = %row.col_name, error = %e, "treating rule as ignore");
            PolicyRule::Ignore
        });
        let normalized = normalize_name(&row.col_name);
        if key_mode.is_none() {
            key_mode = row.key_mode.as_deref().map(KeyMode::parse);
        }
        if row.is_key {
            keys.push(KeyColumn {
                name: normalized.clone(),
                priority: row.priority.unwrap_or(LOWEST_KEY_PRIORITY),
            });
        }
        entries.insert(
            normalized,
            RuleEntry {
                rule,
                label: clean_label(&row.col_name),
                original: row.col_name,
            },
        );
    }

    RuleSet::from_source(
        RuleSource::Enriched(entries),
        keys,
        key_mode.unwrap_or_default(),
    )
}

impl RuleStore {
    pub fn new(store: Arc<dyn HostStore>, table: TableName) -> Self {
        Self { store, table }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Load the rule configuration. A missing or unreadable rules table
    /// yields an empty set, which has no unique key.
    #[instrument(skip(self), fields(db.table = %self.table), level = "debug")]
    pub async fn load_rules(&self) -> Result<RuleSet> {
        let data = match self.store.fetch_table(&self.table).await {
            Ok(data) => data,
            Err(e) => {
                warn!(table = %self.table, error = %e, "rules table unreadable");
                return Ok(RuleSet::default());
            }
        };
        let rules = rules_from_table(&data);
        if !rules.has_keys() {
            warn!(table = %self.table, "no unique key configured");
        }
        debug!(policies = rules.policies.len(), keys = rules.keys.len(), "rules loaded");
        Ok(rules)
    }

    async fn fetch(&self) -> Result<TableData> {
        self.store
            .fetch_table(&self.table)
            .await
            .with_context(|| format!("Failed to read rules table {}", self.table))
    }

    async fn submit(&self, actions: Vec<UserAction>) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        self.store
            .apply_actions(&actions)
            .await
            .with_context(|| format!("Failed to update rules table {}", self.table))?;
        Ok(())
    }

    /// Create the rules table for `target` when it is missing, or add the
    /// `is_key` column to an older one.
    ///
    /// A new table gets one `ignore` row per target column, with the first
    /// column as unique key. A migrated table has its first row marked as
    /// key.
    #[instrument(skip(self), fields(db.table = %self.table), level = "info")]
    pub async fn ensure_rules_table(&self, target: &TableName) -> Result<RulesTableStatus> {
        let tables = self
            .store
            .list_tables()
            .await
            .context("Failed to list tables")?;

        if !tables.contains(&self.table) {
            let schema = SchemaIntrospector::new(Arc::clone(&self.store))
                .table_schema(target)
                .await?;
            let mut actions = vec![UserAction::AddTable {
                table: self.table.clone(),
                columns: vec![
                    ColumnSpec::new(COL_NAME, "Text"),
                    ColumnSpec::new(IS_KEY, "Bool"),
                    ColumnSpec::new(RULE, "Text"),
                ],
            }];
            for (i, column) in schema.columns.iter().enumerate() {
                let mut fields = RowMap::new();
                fields.insert(COL_NAME.into(), json!(column.name.0));
                fields.insert(IS_KEY.into(), json!(i == 0));
                fields.insert(RULE.into(), json!(PolicyRule::Ignore.as_str()));
                actions.push(UserAction::AddRecord {
                    table: self.table.clone(),
                    fields,
                });
            }
            let rows = schema.columns.len();
            self.submit(actions).await?;
            info!(table = %self.table, rows, "rules table created");
            return Ok(RulesTableStatus::Created { rows });
        }

        let data = self.fetch().await?;
        if data.has_column(IS_KEY) {
            return Ok(RulesTableStatus::Present);
        }
        let mut actions = vec![UserAction::AddColumn {
            table: self.table.clone(),
            column: ColumnSpec::new(IS_KEY, "Bool"),
        }];
        if let Some(first) = data.ids.first() {
            actions.push(UserAction::UpdateRecord {
                table: self.table.clone(),
                id: *first,
                fields: [(IS_KEY.to_string(), json!(true))].into(),
            });
        }
        self.submit(actions).await?;
        info!(table = %self.table, "rules table migrated: is_key added");
        Ok(RulesTableStatus::Migrated)
    }

    /// Set the policy of one column, adding a rule row when none matches.
    #[instrument(skip(self), fields(db.table = %self.table), level = "info")]
    pub async fn set_rule(&self, column: &str, rule: PolicyRule) -> Result<()> {
        let data = self.fetch().await?;
        let wanted = normalize_name(column);
        let existing = read_rows(&data)
            .into_iter()
            .find(|r| normalize_name(&r.col_name) == wanted);

        let action = match existing {
            Some(row) => UserAction::UpdateRecord {
                table: self.table.clone(),
                id: row.id,
                fields: [(RULE.to_string(), json!(rule.as_str()))].into(),
            },
            None => {
                let mut fields = RowMap::new();
                fields.insert(COL_NAME.into(), json!(column));
                fields.insert(RULE.into(), json!(rule.as_str()));
                if data.has_column(IS_KEY) {
                    fields.insert(IS_KEY.into(), json!(false));
                }
                UserAction::AddRecord {
                    table: self.table.clone(),
                    fields,
                }
            }
        };
        self.submit(vec![action]).await
    }

    /// Mark exactly `columns` as unique keys, in priority order.
    ///
    /// Every name must match a rule row. Priorities are written only when
    /// the table has a `key_priority` column.
    #[instrument(skip(self), fields(db.table = %self.table), level = "info")]
    pub async fn set_unique_keys(&self, columns: &[String]) -> Result<()> {
        let data = self.fetch().await?;
        let rows = read_rows(&data);
        let known: HashSet<String> = rows.iter().map(|r| normalize_name(&r.col_name)).collect();

        let wanted: Vec<String> = columns.iter().map(|c| normalize_name(c)).collect();
        if let Some(missing) = columns
            .iter()
            .zip(&wanted)
            .find(|(_, n)| !known.contains(*n))
            .map(|(c, _)| c)
        {
            return Err(PreconditionError::UnknownKeyColumn(missing.clone()).into());
        }

        let with_priority = data.has_column(KEY_PRIORITY);
        let mut actions = Vec::new();
        if !data.has_column(IS_KEY) {
            actions.push(UserAction::AddColumn {
                table: self.table.clone(),
                column: ColumnSpec::new(IS_KEY, "Bool"),
            });
        }
        for row in &rows {
            let position = wanted
                .iter()
                .position(|w| *w == normalize_name(&row.col_name));
            let mut fields = RowMap::new();
            fields.insert(IS_KEY.into(), json!(position.is_some()));
            if with_priority {
                let priority = position.map(|p| json!(p + 1)).unwrap_or(Value::Null);
                fields.insert(KEY_PRIORITY.into(), priority);
            }
            let unchanged = row.is_key == position.is_some()
                && (!with_priority || row.priority == position.map(|p| p as i64 + 1));
            if !unchanged {
                actions.push(UserAction::UpdateRecord {
                    table: self.table.clone(),
                    id: row.id,
                    fields,
                });
            }
        }
        self.submit(actions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::table::{ColumnMeta, ColumnValues};
    use crate::infrastructure::memory_store::MemoryStore;

    fn column(name: &str, values: Vec<Value>) -> ColumnValues {
        ColumnValues {
            name: name.into(),
            values,
        }
    }

    #[test]
    fn incomplete_rows_are_skipped() {
        let data = TableData {
            ids: vec![1, 2, 3, 4],
            columns: vec![
                column(COL_NAME, vec![json!("E-mail"), json!(""), json!("Phone"), json!("Nom")]),
                column(RULE, vec![json!("overwrite"), json!("overwrite"), json!(""), json!("bogus")]),
                column(IS_KEY, vec![json!(true), json!(false), json!(true), json!(false)]),
            ],
        };
        let rules = rules_from_table(&data);
        assert_eq!(rules.policies.len(), 2);
        assert_eq!(rules.policy("email"), PolicyRule::Overwrite);
        assert_eq!(rules.policy("nom"), PolicyRule::Ignore);
        assert_eq!(rules.policies["email"].original, "E-mail");
        // the Phone row has no rule, so its key flag is dropped with it
        assert_eq!(rules.key_names().collect::<Vec<_>>(), vec!["email"]);
        assert_eq!(rules.key_mode, KeyMode::Composite);
    }

    #[test]
    fn fallback_priorities_and_mode() {
        let data = TableData {
            ids: vec![1, 2, 3],
            columns: vec![
                column(COL_NAME, vec![json!("Email"), json!("Code"), json!("Phone")]),
                column(RULE, vec![json!("match"), json!("ignore"), json!("ignore")]),
                column(IS_KEY, vec![json!(true), json!(true), json!(true)]),
                column(KEY_PRIORITY, vec![json!(2), json!(1), Value::Null]),
                column(KEY_MODE, vec![Value::Null, json!("fallback"), Value::Null]),
            ],
        };
        let rules = rules_from_table(&data);
        assert_eq!(rules.key_mode, KeyMode::Fallback);
        assert_eq!(
            rules.keys,
            vec![
                KeyColumn { name: "code".into(), priority: 1 },
                KeyColumn { name: "email".into(), priority: 2 },
                KeyColumn { name: "phone".into(), priority: LOWEST_KEY_PRIORITY },
            ]
        );
    }

    fn target_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new().with_table(
            "Contacts",
            vec![ColumnMeta::data("Email", "Text"), ColumnMeta::data("Name", "Text")],
            vec![],
        ))
    }

    #[tokio::test]
    async fn missing_rules_table_loads_empty() {
        let rules = RuleStore::new(target_store(), TableName::new("RULES_CONFIG"))
            .load_rules()
            .await
            .unwrap();
        assert!(!rules.has_keys());
    }

    #[tokio::test]
    async fn bootstrap_then_edit() {
        let store = target_store();
        let rules = RuleStore::new(store.clone(), TableName::new("RULES_CONFIG"));

        let status = rules
            .ensure_rules_table(&TableName::new("Contacts"))
            .await
            .unwrap();
        assert_eq!(status, RulesTableStatus::Created { rows: 2 });
        assert_eq!(
            rules.ensure_rules_table(&TableName::new("Contacts")).await.unwrap(),
            RulesTableStatus::Present
        );

        let loaded = rules.load_rules().await.unwrap();
        assert_eq!(loaded.key_names().collect::<Vec<_>>(), vec!["email"]);
        assert_eq!(loaded.policy("name"), PolicyRule::Ignore);

        rules.set_rule("name", PolicyRule::Overwrite).await.unwrap();
        rules.set_unique_keys(&["Name".to_string()]).await.unwrap();
        let loaded = rules.load_rules().await.unwrap();
        assert_eq!(loaded.policy("name"), PolicyRule::Overwrite);
        assert_eq!(loaded.key_names().collect::<Vec<_>>(), vec!["name"]);

        let err = rules.set_unique_keys(&["Missing".to_string()]).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<PreconditionError>(),
            Some(&PreconditionError::UnknownKeyColumn("Missing".into()))
        );
    }

    #[tokio::test]
    async fn migrates_tables_without_is_key() {
        let store = Arc::new(MemoryStore::new().with_table(
            "RULES_CONFIG",
            vec![ColumnMeta::data(COL_NAME, "Text"), ColumnMeta::data(RULE, "Text")],
            vec![
                [(COL_NAME.to_string(), json!("Email")), (RULE.to_string(), json!("ignore"))].into(),
                [(COL_NAME.to_string(), json!("Name")), (RULE.to_string(), json!("overwrite"))].into(),
            ],
        ));
        let rules = RuleStore::new(store, TableName::new("RULES_CONFIG"));
        assert_eq!(
            rules.ensure_rules_table(&TableName::new("Contacts")).await.unwrap(),
            RulesTableStatus::Migrated
        );
        let loaded = rules.load_rules().await.unwrap();
        assert_eq!(loaded.key_names().collect::<Vec<_>>(), vec!["email"]);
    }
}

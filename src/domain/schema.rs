use serde::Serialize;
use std::collections::HashMap;

use crate::domain::naming::normalize_name;
use crate::domain::value_objects::{ColumnName, TableName};

/// Semantic type of a store column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "target")]
pub enum ColumnKind {
    Text,
    Numeric,
    Date,
    Bool,
    Choice,
    Reference(TableName),
    Unknown,
}

impl ColumnKind {
    /// Map a store-declared type string onto a kind.
    pub fn from_declared(col_type: &str) -> Self {
        if let Some(target) = col_type
            .strip_prefix("Ref:")
            .or_else(|| col_type.strip_prefix("RefList:"))
        {
            return ColumnKind::Reference(TableName::new(target));
        }
        // `DateTime` carries a timezone suffix, e.g. `DateTime:Europe/Paris`
        if col_type == "Date" || col_type.starts_with("DateTime") {
            return ColumnKind::Date;
        }
        match col_type {
            "Int" | "Numeric" => ColumnKind::Numeric,
            "Bool" => ColumnKind::Bool,
            "Choice" | "ChoiceList" => ColumnKind::Choice,
            _ => ColumnKind::Text,
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, ColumnKind::Date)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Numeric)
    }

    pub fn reference_target(&self) -> Option<&TableName> {
        match self {
            ColumnKind::Reference(t) => Some(t),
            _ => None,
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnKind::Text => f.write_str("text"),
            ColumnKind::Numeric => f.write_str("numeric"),
            ColumnKind::Date => f.write_str("date"),
            ColumnKind::Bool => f.write_str("bool"),
            ColumnKind::Choice => f.write_str("choice"),
            ColumnKind::Reference(t) => write!(f, "ref:{t}"),
            ColumnKind::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: ColumnName,
    pub kind: ColumnKind,
    /// Store-computed; must never be written.
    pub formula: bool,
}

/// Typed view of a store table's writable-or-not columns, in store order.
/// Identifier and ordering columns are never present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.0 == name)
    }

    pub fn kind(&self, name: &str) -> ColumnKind {
        self.column(name)
            .map(|c| c.kind.clone())
            .unwrap_or(ColumnKind::Unknown)
    }

    pub fn is_formula(&self, name: &str) -> bool {
        self.column(name).map(|c| c.formula).unwrap_or(false)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.0.clone()).collect()
    }

    pub fn formula_columns(&self) -> impl Iterator<Item = &ColumnName> {
        self.columns.iter().filter(|c| c.formula).map(|c| &c.name)
    }

    /// Normalized name → store column. When two store columns normalize to
    /// the same key the first one in store order wins.
    pub fn normalized_index(&self) -> HashMap<String, &ColumnInfo> {
        let mut index = HashMap::with_capacity(self.columns.len());
        for col in &self.columns {
            index.entry(normalize_name(&col.name.0)).or_insert(col);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_types_map_to_kinds() {
        assert_eq!(ColumnKind::from_declared("DateTime:Europe/Paris"), ColumnKind::Date);
        assert_eq!(ColumnKind::from_declared("DateTime"), ColumnKind::Date);
        assert_eq!(ColumnKind::from_declared("Int"), ColumnKind::Numeric);
        assert_eq!(ColumnKind::from_declared("ChoiceList"), ColumnKind::Choice);
        assert_eq!(ColumnKind::from_declared("Any"), ColumnKind::Text);
        assert_eq!(
            ColumnKind::from_declared("Ref:People"),
            ColumnKind::Reference(TableName::new("People"))
        );
    }

    #[test]
    fn normalized_index_first_wins() {
        let schema = TableSchema::new(vec![
            ColumnInfo {
                name: ColumnName::new("Email"),
                kind: ColumnKind::Text,
                formula: false,
            },
            ColumnInfo {
                name: ColumnName::new("E_mail"),
                kind: ColumnKind::Text,
                formula: false,
            },
        ]);
        assert_eq!(schema.normalized_index()["email"].name.0, "Email");
    }
}

use serde::Serialize;
use std::collections::HashSet;

use crate::domain::naming::normalize_name;
use crate::domain::schema::TableSchema;
use crate::domain::value_objects::ColumnName;

/// Where one incoming column lands in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedColumn {
    /// Header as it appears in the sheet.
    pub source: String,
    /// Position of the column in the sheet's rows.
    pub index: usize,
    /// `None` when no store column matches.
    pub target: Option<ColumnName>,
}

/// Incoming header → store column, one entry per non-blank incoming header,
/// in sheet order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub columns: Vec<MappedColumn>,
}

impl ColumnMapping {
    pub fn target(&self, source: &str) -> Option<&ColumnName> {
        self.columns
            .iter()
            .find(|c| c.source == source)
            .and_then(|c| c.target.as_ref())
    }

    /// Entries with a store target.
    pub fn mapped(&self) -> impl Iterator<Item = (&MappedColumn, &ColumnName)> {
        self.columns
            .iter()
            .filter_map(|c| c.target.as_ref().map(|t| (c, t)))
    }

    pub fn has_matches(&self) -> bool {
        self.columns.iter().any(|c| c.target.is_some())
    }

    pub fn unmatched_sources(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.target.is_none())
            .map(|c| c.source.as_str())
            .collect()
    }

    /// Store columns no incoming header maps to, in store order.
    pub fn unmapped_targets(&self, schema: &TableSchema) -> Vec<ColumnName> {
        let used: HashSet<&ColumnName> = self.mapped().map(|(_, t)| t).collect();
        schema
            .columns
            .iter()
            .filter(|c| !used.contains(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Match sheet headers to store columns by normalized name.
///
/// Blank headers are skipped. When several store columns normalize to the
/// same key, the first in store order wins. Two headers may map to the same
/// store column; the later one then overwrites the earlier one's value.
pub fn match_columns(headers: &[String], schema: &TableSchema) -> ColumnMapping {
    let index = schema.normalized_index();
    let columns = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.trim().is_empty())
        .map(|(i, h)| MappedColumn {
            source: h.clone(),
            index: i,
            target: index.get(&normalize_name(h)).map(|c| c.name.clone()),
        })
        .collect();
    ColumnMapping { columns }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::{ColumnInfo, ColumnKind};

    fn schema(names: &[&str]) -> TableSchema {
        TableSchema::new(
            names
                .iter()
                .map(|n| ColumnInfo {
                    name: ColumnName::new(*n),
                    kind: ColumnKind::Text,
                    formula: false,
                })
                .collect(),
        )
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn matches_through_normalization() {
        let m = match_columns(
            &headers(&["E-mail", "Prénom ", "Phone"]),
            &schema(&["Email", "Prenom", "City"]),
        );
        assert_eq!(m.target("E-mail"), Some(&ColumnName::new("Email")));
        assert_eq!(m.target("Prénom "), Some(&ColumnName::new("Prenom")));
        assert_eq!(m.target("Phone"), None);
        assert_eq!(m.unmatched_sources(), vec!["Phone"]);
        assert_eq!(
            m.unmapped_targets(&schema(&["Email", "Prenom", "City"])),
            vec![ColumnName::new("City")]
        );
    }

    #[test]
    fn blank_headers_never_appear() {
        let m = match_columns(&headers(&["", "  ", "Email"]), &schema(&["Email"]));
        assert_eq!(m.columns.len(), 1);
        assert_eq!(m.columns[0].index, 2);
    }

    #[test]
    fn first_store_column_wins_on_collision() {
        let m = match_columns(&headers(&["first name"]), &schema(&["First_Name", "FirstName"]));
        assert_eq!(m.target("first name"), Some(&ColumnName::new("First_Name")));
    }

    #[test]
    fn no_matches_reported() {
        let m = match_columns(&headers(&["A"]), &schema(&["B"]));
        assert!(!m.has_matches());
    }
}

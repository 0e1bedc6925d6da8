use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One sheet of an uploaded spreadsheet: a header row and uniform-width
/// data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Sheet {
    /// Build a sheet from a raw grid whose first row holds the headers.
    ///
    /// Header cells are trimmed, columns with a blank header are dropped and
    /// short rows are right-padded with empty strings.
    pub fn from_raw(name: impl Into<String>, grid: Vec<Vec<Value>>) -> Self {
        let mut grid = grid.into_iter();
        let Some(header_row) = grid.next() else {
            return Sheet {
                name: name.into(),
                ..Sheet::default()
            };
        };

        let header_text: Vec<String> = header_row.iter().map(cell_text).collect();
        let kept: Vec<usize> = header_text
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_empty())
            .map(|(i, _)| i)
            .collect();

        let headers = kept.iter().map(|&i| header_text[i].clone()).collect();
        let rows = grid
            .map(|row| {
                kept.iter()
                    .map(|&i| match row.get(i) {
                        Some(Value::Null) | None => Value::String(String::new()),
                        Some(v) => v.clone(),
                    })
                    .collect()
            })
            .collect();

        Sheet {
            name: name.into(),
            headers,
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
struct RawSheet {
    name: String,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl<'de> Deserialize<'de> for Sheet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawSheet::deserialize(deserializer)?;
        Ok(Sheet::from_raw(raw.name, raw.rows))
    }
}

/// A parsed spreadsheet file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    pub file_name: String,
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_blank_headers_and_pads_rows() {
        let sheet = Sheet::from_raw(
            "S",
            vec![
                vec![json!(" Name "), json!(""), json!("Age")],
                vec![json!("Ada"), json!("junk"), json!(36)],
                vec![json!("Bob")],
            ],
        );
        assert_eq!(sheet.headers, vec!["Name", "Age"]);
        assert_eq!(sheet.rows[0], vec![json!("Ada"), json!(36)]);
        assert_eq!(sheet.rows[1], vec![json!("Bob"), json!("")]);
    }

    #[test]
    fn empty_grid_gives_empty_sheet() {
        let sheet = Sheet::from_raw("S", vec![]);
        assert!(sheet.headers.is_empty());
        assert!(sheet.is_empty());
    }

    #[test]
    fn workbook_deserializes_and_cleans_sheets() {
        let wb: Workbook = serde_json::from_value(json!({
            "file_name": "contacts.xlsx",
            "sheets": [{"name": "A", "rows": [["Id", null], [1, 2]]}]
        }))
        .unwrap();
        assert_eq!(wb.sheet("A").unwrap().headers, vec!["Id"]);
        assert_eq!(wb.sheet_names(), vec!["A"]);
    }
}

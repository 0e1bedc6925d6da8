use serde_json::Value;

use crate::application::coerce::{is_blank, parse_date};
use crate::application::matcher::ColumnMapping;
use crate::domain::report::ValidationReport;
use crate::domain::schema::TableSchema;
use crate::domain::workbook::Sheet;

/// Pre-import checks over a sheet and its column mapping.
///
/// Errors (import cannot run): no data rows, no mapped column. Warnings:
/// mapped formula columns, unrecognized dates and non-numeric values in the
/// first `sample` rows, headers without a match.
pub fn validate_import(
    sheet: &Sheet,
    mapping: &ColumnMapping,
    schema: &TableSchema,
    sample: usize,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if sheet.is_empty() {
        report
            .errors
            .push("The sheet is empty or only has headers.".to_string());
        return report;
    }
    if !mapping.has_matches() {
        report
            .errors
            .push("No sheet column matches a column of the table.".to_string());
        return report;
    }

    let formula_mapped: Vec<&str> = mapping
        .mapped()
        .filter(|(_, t)| schema.is_formula(&t.0))
        .map(|(_, t)| t.0.as_str())
        .collect();
    if !formula_mapped.is_empty() {
        report.warnings.push(format!(
            "{} formula column(s) excluded from the import: {}",
            formula_mapped.len(),
            formula_mapped.join(", ")
        ));
    }

    let mut date_columns = Vec::new();
    let mut numeric_columns = Vec::new();
    for (source, target) in mapping.mapped() {
        let kind = schema.kind(&target.0);
        if kind.is_date() {
            date_columns.push(source.index);
        } else if kind.is_numeric() {
            numeric_columns.push(source.index);
        }
    }

    let mut invalid_dates = 0;
    let mut invalid_numbers = 0;
    for row in sheet.rows.iter().take(sample) {
        for value in date_columns.iter().filter_map(|&i| row.get(i)) {
            if let Value::String(_) = value {
                if !is_blank(value) && parse_date(value).is_none() {
                    invalid_dates += 1;
                }
            }
        }
        for value in numeric_columns.iter().filter_map(|&i| row.get(i)) {
            if let Value::String(s) = value {
                if !is_blank(value) && s.trim().parse::<f64>().is_err() {
                    invalid_numbers += 1;
                }
            }
        }
    }
    if invalid_dates > 0 {
        report
            .warnings
            .push(format!("{invalid_dates} date value(s) in an unrecognized format."));
    }
    if invalid_numbers > 0 {
        report
            .warnings
            .push(format!("{invalid_numbers} non-numeric value(s) in numeric columns."));
    }

    let unmatched = mapping.unmatched_sources();
    if !unmatched.is_empty() {
        report.warnings.push(format!(
            "{} column(s) without a match: {}",
            unmatched.len(),
            unmatched.join(", ")
        ));
    }

    report.valid = report.errors.is_empty();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::matcher::match_columns;
    use crate::domain::schema::{ColumnInfo, ColumnKind};
    use crate::domain::value_objects::ColumnName;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnInfo { name: ColumnName::new("Due"), kind: ColumnKind::Date, formula: false },
            ColumnInfo { name: ColumnName::new("Qty"), kind: ColumnKind::Numeric, formula: false },
            ColumnInfo { name: ColumnName::new("Total"), kind: ColumnKind::Numeric, formula: true },
        ])
    }

    fn sheet(rows: Vec<Vec<Value>>) -> Sheet {
        Sheet {
            name: "S".into(),
            headers: vec!["Due".into(), "Qty".into(), "Total".into(), "Extra".into()],
            rows,
        }
    }

    #[test]
    fn collects_warnings_from_the_sample() {
        let s = sheet(vec![
            vec![json!("2024-01-31"), json!("3"), json!(1), json!("x")],
            vec![json!("tomorrow"), json!("three"), json!(1), json!("x")],
            vec![json!(45000), json!(4), json!(1), json!("x")],
            vec![json!("soon"), json!("many"), json!(1), json!("x")],
        ]);
        let schema = schema();
        let mapping = match_columns(&s.headers, &schema);

        let report = validate_import(&s, &mapping, &schema, 50);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 4);
        assert!(report.warnings[0].contains("Total"));
        assert!(report.warnings[1].starts_with("2 date"));
        assert!(report.warnings[2].starts_with("2 non-numeric"));
        assert!(report.warnings[3].contains("Extra"));

        // only the first two rows are inspected
        let report = validate_import(&s, &mapping, &schema, 2);
        assert!(report.warnings[1].starts_with("1 date"));
    }

    #[test]
    fn empty_sheet_and_no_mapping_are_errors() {
        let schema = schema();
        let empty = sheet(vec![]);
        let mapping = match_columns(&empty.headers, &schema);
        let report = validate_import(&empty, &mapping, &schema, 50);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);

        let unrelated = Sheet {
            name: "S".into(),
            headers: vec!["Nope".into()],
            rows: vec![vec![json!("x")]],
        };
        let mapping = match_columns(&unrelated.headers, &schema);
        assert!(!validate_import(&unrelated, &mapping, &schema, 50).valid);
    }
}

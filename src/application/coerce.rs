use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::domain::ports::HostStore;
use crate::domain::schema::ColumnKind;
use crate::domain::table::TableData;
use crate::domain::value_objects::{RowId, TableName, EMPTY_REFERENCE};

// ─── Dates ───────────────────────────────────────────────────────────────────

/// Largest spreadsheet day serial accepted as a date (9999-12-31).
pub const MAX_DATE_SERIAL: f64 = 2_958_465.0;

const ISO_DATE: &str = "%Y-%m-%d";

fn iso_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("static regex"))
}

fn day_first_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("static regex"))
}

/// Decode a spreadsheet day serial. The fractional part (time of day) is
/// dropped.
///
/// Serials count a 1900-02-29 that never existed: serials below 61 are
/// one day ahead of the plain offset from 1899-12-30.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_DATE_SERIAL).contains(&serial) {
        return None;
    }
    let days = serial.floor() as i64;
    let epoch = if days <= 60 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };
    epoch.checked_add_signed(Duration::days(days))
}

/// Date carried by a store-native cell, `["d", epoch_seconds]` or
/// `["D", epoch_seconds, tz]`.
fn host_encoded_date(value: &Value) -> Option<NaiveDate> {
    host_encoded_instant(value).map(|dt| dt.date())
}

fn host_encoded_instant(value: &Value) -> Option<NaiveDateTime> {
    let items = value.as_array()?;
    let tag = items.first()?.as_str()?;
    if tag != "d" && tag != "D" {
        return None;
    }
    let secs = items.get(1)?.as_f64()?;
    DateTime::from_timestamp(secs.floor() as i64, 0).map(|dt| dt.naive_utc())
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Calendar date of a cell, if it carries one.
///
/// Accepts day serials, `YYYY-MM-DD`, `D/M/YYYY` (day first) and the
/// store's native date encoding. Anything else, including impossible dates
/// such as `2024-13-01`, yields `None`.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => serial_to_date(n.as_f64()?),
        Value::String(s) => {
            let s = s.trim();
            if let Some(caps) = iso_shape().captures(s) {
                return ymd(&caps[1], &caps[2], &caps[3]);
            }
            if let Some(caps) = day_first_shape().captures(s) {
                return ymd(&caps[3], &caps[2], &caps[1]);
            }
            None
        }
        Value::Array(_) => host_encoded_date(value),
        _ => None,
    }
}

/// Canonical `YYYY-MM-DD` text of a date-bearing cell.
pub fn normalize_date(value: &Value) -> Option<String> {
    parse_date(value).map(|d| d.format(ISO_DATE).to_string())
}

/// Point in time used by `update_if_newer`. Plain dates are taken at
/// midnight.
pub fn parse_instant(value: &Value) -> Option<NaiveDateTime> {
    if let Some(dt) = host_encoded_instant(value) {
        return Some(dt);
    }
    if let Some(d) = parse_date(value) {
        return d.and_hms_opt(0, 0, 0);
    }
    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

// ─── Comparison ──────────────────────────────────────────────────────────────

/// Null, or a string of whitespace only.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

fn number_text(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// Trimmed text form of a cell. Integral numbers print without a fraction,
/// so `42.0` and `"42"` read the same.
pub fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => number_text(f),
            None => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Loose equality between an incoming and a stored value.
///
/// Checked in order: nulls, two dates, one numeric side, trimmed text.
/// Two numbers in the day-serial range compare as dates, so times of day
/// are ignored.
pub fn are_equal(a: &Value, b: &Value) -> bool {
    match (a.is_null(), b.is_null()) {
        (true, true) => return true,
        (true, false) | (false, true) => return false,
        _ => {}
    }
    if let (Some(da), Some(db)) = (parse_date(a), parse_date(b)) {
        return da == db;
    }
    if a.is_number() || b.is_number() {
        return match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };
    }
    text_of(a) == text_of(b)
}

// ─── References ──────────────────────────────────────────────────────────────

/// Display text → row identifier for one referenced table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceLookup {
    ids: HashMap<String, RowId>,
}

impl ReferenceLookup {
    /// Index the table's first non-internal column, lower-cased and trimmed.
    /// The first row wins when two rows show the same text.
    pub fn from_table(data: &TableData) -> Self {
        let mut ids = HashMap::new();
        let Some(display) = data.user_columns().next() else {
            return Self { ids };
        };
        if let Some(values) = data.column(display) {
            for (id, value) in data.ids.iter().zip(values) {
                if is_blank(value) {
                    continue;
                }
                ids.entry(text_of(value).to_lowercase()).or_insert(*id);
            }
        }
        Self { ids }
    }

    pub fn get(&self, text: &str) -> Option<RowId> {
        self.ids.get(&text.trim().to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Per-session memo of reference lookups, keyed by referenced table.
///
/// Never invalidated implicitly: rows added to a referenced table after its
/// first lookup are invisible until [`ReferenceCache::clear`].
#[derive(Debug, Clone, Default)]
pub struct ReferenceCache {
    tables: HashMap<TableName, ReferenceLookup>,
}

impl ReferenceCache {
    pub fn get(&self, table: &TableName) -> Option<&ReferenceLookup> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &TableName) -> bool {
        self.tables.contains_key(table)
    }

    pub fn insert(&mut self, table: TableName, lookup: ReferenceLookup) {
        self.tables.insert(table, lookup);
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Load the lookup for `table` unless already cached. A failed read is
    /// logged and not cached; the next import tries again.
    pub async fn ensure(&mut self, store: &dyn HostStore, table: &TableName) {
        if self.contains(table) {
            return;
        }
        match store.fetch_table(table).await {
            Ok(data) => {
                let lookup = ReferenceLookup::from_table(&data);
                debug!(table = %table, entries = lookup.len(), "reference lookup cached");
                self.insert(table.clone(), lookup);
            }
            Err(e) => {
                warn!(table = %table, error = %e, "reference table unavailable; values resolve to the empty reference")
            }
        }
    }
}

/// Map an incoming cell onto a reference identifier. Blank and unknown
/// values resolve to [`EMPTY_REFERENCE`]; numbers are taken as identifiers.
pub fn resolve_reference(value: &Value, lookup: Option<&ReferenceLookup>) -> Value {
    if is_blank(value) {
        return Value::from(EMPTY_REFERENCE);
    }
    if value.is_number() {
        return value.clone();
    }
    let id = lookup
        .and_then(|l| l.get(&text_of(value)))
        .unwrap_or(EMPTY_REFERENCE);
    Value::from(id)
}

/// Convert one incoming cell to the representation its target column wants.
/// Date columns fall back to the raw value when it is not a recognizable
/// date; other non-reference kinds pass through.
pub fn coerce(value: &Value, kind: &ColumnKind, refs: &ReferenceCache) -> Value {
    match kind {
        ColumnKind::Date => normalize_date(value)
            .map(Value::String)
            .unwrap_or_else(|| value.clone()),
        ColumnKind::Reference(target) => resolve_reference(value, refs.get(target)),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::table::ColumnValues;
    use serde_json::json;

    #[test]
    fn decodes_day_serials() {
        assert_eq!(normalize_date(&json!(44927)), Some("2023-01-01".into()));
        assert_eq!(normalize_date(&json!(44927.75)), Some("2023-01-01".into()));
        assert_eq!(normalize_date(&json!(1)), Some("1900-01-01".into()));
        assert_eq!(normalize_date(&json!(59)), Some("1900-02-28".into()));
        assert_eq!(normalize_date(&json!(61)), Some("1900-03-01".into()));
        assert_eq!(normalize_date(&json!(2_958_465)), Some("9999-12-31".into()));
        assert_eq!(normalize_date(&json!(0)), None);
        assert_eq!(normalize_date(&json!(2_958_466)), None);
    }

    #[test]
    fn parses_supported_text_shapes() {
        assert_eq!(normalize_date(&json!("2024-02-29")), Some("2024-02-29".into()));
        assert_eq!(normalize_date(&json!(" 5/3/2024 ")), Some("2024-03-05".into()));
        assert_eq!(normalize_date(&json!("15/12/2023")), Some("2023-12-15".into()));
    }

    #[test]
    fn rejects_impossible_or_unknown_dates() {
        assert_eq!(normalize_date(&json!("2024-13-01")), None);
        assert_eq!(normalize_date(&json!("32/01/2024")), None);
        assert_eq!(normalize_date(&json!("March 5th")), None);
        assert_eq!(normalize_date(&json!("")), None);
        assert_eq!(normalize_date(&Value::Null), None);
    }

    #[test]
    fn reads_host_encoded_dates() {
        // 2023-01-01T00:00:00Z
        assert_eq!(normalize_date(&json!(["d", 1672531200])), Some("2023-01-01".into()));
        assert_eq!(normalize_date(&json!(["x", 1672531200])), None);
    }

    #[test]
    fn instants_accept_datetimes() {
        let a = parse_instant(&json!("2024-01-01 10:00:00")).unwrap();
        let b = parse_instant(&json!("2024-01-01T09:00:00Z")).unwrap();
        assert!(a > b);
        assert_eq!(
            parse_instant(&json!("2024-01-01")),
            NaiveDate::from_ymd_opt(2024, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert_eq!(parse_instant(&json!("soon")), None);
    }

    #[test]
    fn equality_rules() {
        assert!(are_equal(&Value::Null, &Value::Null));
        assert!(!are_equal(&Value::Null, &json!("")));
        assert!(are_equal(&json!(" X "), &json!("X")));
        assert!(are_equal(&json!(42), &json!("42")));
        assert!(are_equal(&json!(42.0), &json!(42)));
        assert!(!are_equal(&json!(0.2), &json!(0.7)));
        assert!(!are_equal(&json!(3000000.5), &json!(3000000.7)));
        assert!(are_equal(&json!(44927), &json!(44927.5)));
        assert!(!are_equal(&json!(44927), &json!(44928)));
        assert!(are_equal(&json!(44927), &json!("2023-01-01")));
        assert!(are_equal(&json!("1/1/2023"), &json!("2023-01-01")));
        assert!(!are_equal(&json!(3), &json!("")));
        assert!(!are_equal(&json!(3), &json!("three")));
        assert!(!are_equal(&json!("a"), &json!("b")));
    }

    #[test]
    fn blank_values() {
        assert!(is_blank(&Value::Null));
        assert!(is_blank(&json!("   ")));
        assert!(!is_blank(&json!(0)));
        assert!(!is_blank(&json!(false)));
    }

    fn people() -> TableData {
        TableData {
            ids: vec![7, 8, 9],
            columns: vec![
                ColumnValues {
                    name: "manualSort".into(),
                    values: vec![json!(1), json!(2), json!(3)],
                },
                ColumnValues {
                    name: "Name".into(),
                    values: vec![json!("Ada "), json!("Bob"), json!("ada")],
                },
            ],
        }
    }

    #[test]
    fn references_resolve_case_insensitively() {
        let lookup = ReferenceLookup::from_table(&people());
        assert_eq!(resolve_reference(&json!(" ADA"), Some(&lookup)), json!(7));
        assert_eq!(resolve_reference(&json!("bob"), Some(&lookup)), json!(8));
        assert_eq!(resolve_reference(&json!("Zed"), Some(&lookup)), json!(0));
        assert_eq!(resolve_reference(&json!(""), Some(&lookup)), json!(0));
        assert_eq!(resolve_reference(&json!(12), Some(&lookup)), json!(12));
        assert_eq!(resolve_reference(&json!("Ada"), None), json!(0));
    }

    #[test]
    fn coerce_by_kind() {
        let mut refs = ReferenceCache::default();
        refs.insert(TableName::new("People"), ReferenceLookup::from_table(&people()));
        assert_eq!(coerce(&json!(44927), &ColumnKind::Date, &refs), json!("2023-01-01"));
        assert_eq!(coerce(&json!("n/a"), &ColumnKind::Date, &refs), json!("n/a"));
        assert_eq!(
            coerce(&json!("Bob"), &ColumnKind::Reference(TableName::new("People")), &refs),
            json!(8)
        );
        assert_eq!(coerce(&json!(44927), &ColumnKind::Numeric, &refs), json!(44927));
    }
}

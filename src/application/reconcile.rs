use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::application::coerce::{
    are_equal, coerce, is_blank, normalize_date, parse_instant, text_of, ReferenceCache,
};
use crate::application::matcher::ColumnMapping;
use crate::domain::errors::PreconditionError;
use crate::domain::mutation::Mutation;
use crate::domain::naming::normalize_name;
use crate::domain::ports::ProgressSink;
use crate::domain::report::ImportStats;
use crate::domain::rollback::UpdatePreImage;
use crate::domain::rules::{KeyMode, PolicyRule, RuleSet};
use crate::domain::schema::{ColumnKind, TableSchema};
use crate::domain::table::{Record, RowMap};
use crate::domain::value_objects::{ColumnName, EMPTY_REFERENCE};
use crate::domain::workbook::Sheet;

/// Joins composite key parts. Spreadsheet cells cannot contain it.
pub const KEY_SEPARATOR: char = '\u{1F}';

/// Placed between the stored and the incoming value by `append_if_different`.
pub const APPEND_SEPARATOR: &str = " | ";

// ─── Plan ────────────────────────────────────────────────────────────────────

/// Everything one sheet's reconciliation decided, before anything is applied.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub mutations: Vec<Mutation>,
    /// Pre-images of updates, keyed by the position of their mutation.
    pub pre_images: BTreeMap<usize, UpdatePreImage>,
    /// Planned counts; `errors` is filled in once batches are applied.
    pub stats: ImportStats,
    pub resume: Vec<String>,
    pub warnings: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

// ─── Policies ────────────────────────────────────────────────────────────────

/// Empty for comparison purposes: blank, or the empty reference.
fn is_empty_cell(value: &Value, kind: &ColumnKind) -> bool {
    is_blank(value)
        || (matches!(kind, ColumnKind::Reference(_))
            && value.as_i64() == Some(EMPTY_REFERENCE))
}

/// New value for a matched cell under `rule`, or `None` to leave it alone.
///
/// `incoming_empty` is judged on the raw sheet value, so a blank cell that
/// coerced to the empty reference still counts as empty.
pub fn apply_policy(
    rule: PolicyRule,
    incoming: &Value,
    incoming_empty: bool,
    current: &Value,
    current_empty: bool,
) -> Option<Value> {
    match rule {
        PolicyRule::Ignore => None,
        PolicyRule::Overwrite => {
            (!incoming_empty && !are_equal(incoming, current)).then(|| incoming.clone())
        }
        PolicyRule::UpdateIfNewer => {
            let new = parse_instant(incoming)?;
            match parse_instant(current) {
                Some(old) if new <= old => None,
                _ => Some(incoming.clone()),
            }
        }
        // both names share one behaviour
        PolicyRule::FillIfEmpty | PolicyRule::PreserveIfNotEmpty => {
            (current_empty && !incoming_empty).then(|| incoming.clone())
        }
        PolicyRule::AppendIfDifferent => {
            if incoming_empty || are_equal(incoming, current) {
                None
            } else if current_empty {
                Some(incoming.clone())
            } else {
                Some(Value::String(format!(
                    "{}{}{}",
                    text_of(current),
                    APPEND_SEPARATOR,
                    text_of(incoming)
                )))
            }
        }
    }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// One incoming value projected onto its store column.
#[derive(Debug, Clone)]
struct Cell<'s> {
    column: ColumnName,
    kind: ColumnKind,
    formula: bool,
    raw: &'s Value,
    value: Value,
}

impl Cell<'_> {
    fn is_empty(&self) -> bool {
        is_blank(self.raw)
    }
}

/// Incoming row keyed by normalized store-column name.
type NormalizedRow<'s> = BTreeMap<String, Cell<'s>>;

fn key_text(value: &Value, kind: &ColumnKind) -> Option<String> {
    if is_empty_cell(value, kind) {
        return None;
    }
    match kind {
        ColumnKind::Date => Some(normalize_date(value).unwrap_or_else(|| text_of(value))),
        _ => Some(text_of(value)),
    }
}

#[derive(Debug, Clone)]
struct KeyField {
    normalized: String,
    column: ColumnName,
    kind: ColumnKind,
}

enum KeyIndex {
    Composite(HashMap<String, usize>),
    /// One index per key field, in priority order.
    Fallback(Vec<HashMap<String, usize>>),
}

enum Resolution {
    /// Every key field is empty.
    Keyless,
    Matched { at: usize, via: String },
    Unmatched,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Decides, row by row, what one sheet does to the target table.
pub struct ReconciliationEngine<'a> {
    schema: &'a TableSchema,
    rules: &'a RuleSet,
    mapping: &'a ColumnMapping,
    refs: &'a ReferenceCache,
    keys: Vec<KeyField>,
}

impl<'a> ReconciliationEngine<'a> {
    /// Fails when no unique key is configured, a key names no store column,
    /// or no incoming column maps onto the table.
    pub fn new(
        schema: &'a TableSchema,
        rules: &'a RuleSet,
        mapping: &'a ColumnMapping,
        refs: &'a ReferenceCache,
    ) -> Result<Self, PreconditionError> {
        if !rules.has_keys() {
            return Err(PreconditionError::NoUniqueKey);
        }
        if !mapping.has_matches() {
            return Err(PreconditionError::NoMappedColumns);
        }
        let index = schema.normalized_index();
        let keys = rules
            .keys
            .iter()
            .map(|k| match index.get(&k.name) {
                Some(col) => Ok(KeyField {
                    normalized: k.name.clone(),
                    column: col.name.clone(),
                    kind: col.kind.clone(),
                }),
                None => Err(PreconditionError::UnknownKeyColumn(
                    rules
                        .policies
                        .get(&k.name)
                        .map(|e| e.original.clone())
                        .unwrap_or_else(|| k.name.clone()),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            schema,
            rules,
            mapping,
            refs,
            keys,
        })
    }

    fn normalize_row<'s>(&self, row: &'s [Value]) -> NormalizedRow<'s> {
        let mut out = NormalizedRow::new();
        for (source, target) in self.mapping.mapped() {
            let Some(raw) = row.get(source.index) else {
                continue;
            };
            let kind = self.schema.kind(&target.0);
            let value = coerce(raw, &kind, self.refs);
            out.insert(
                normalize_name(&target.0),
                Cell {
                    column: target.clone(),
                    formula: self.schema.is_formula(&target.0),
                    kind,
                    raw,
                    value,
                },
            );
        }
        out
    }

    fn incoming_key(&self, row: &NormalizedRow<'_>, field: &KeyField) -> Option<String> {
        row.get(&field.normalized)
            .filter(|c| !c.is_empty())
            .and_then(|c| key_text(&c.value, &c.kind))
    }

    fn build_index(&self, existing: &[Record]) -> KeyIndex {
        match self.rules.key_mode {
            KeyMode::Composite => {
                let mut index = HashMap::with_capacity(existing.len());
                for (at, record) in existing.iter().enumerate() {
                    let parts: Vec<Option<String>> = self
                        .keys
                        .iter()
                        .map(|k| key_text(record.get(&k.column.0), &k.kind))
                        .collect();
                    if parts.iter().all(Option::is_none) {
                        continue;
                    }
                    index.entry(join_key(&parts)).or_insert(at);
                }
                KeyIndex::Composite(index)
            }
            KeyMode::Fallback => KeyIndex::Fallback(
                self.keys
                    .iter()
                    .map(|k| {
                        let mut index = HashMap::new();
                        for (at, record) in existing.iter().enumerate() {
                            if let Some(text) = key_text(record.get(&k.column.0), &k.kind) {
                                index.entry(text).or_insert(at);
                            }
                        }
                        index
                    })
                    .collect(),
            ),
        }
    }

    fn resolve(&self, row: &NormalizedRow<'_>, index: &KeyIndex) -> Resolution {
        match index {
            KeyIndex::Composite(index) => {
                let parts: Vec<Option<String>> =
                    self.keys.iter().map(|k| self.incoming_key(row, k)).collect();
                if parts.iter().all(Option::is_none) {
                    return Resolution::Keyless;
                }
                match index.get(&join_key(&parts)) {
                    Some(at) => Resolution::Matched {
                        at: *at,
                        via: self
                            .keys
                            .iter()
                            .map(|k| k.column.0.as_str())
                            .collect::<Vec<_>>()
                            .join("+"),
                    },
                    None => Resolution::Unmatched,
                }
            }
            KeyIndex::Fallback(indexes) => {
                let mut any_key = false;
                for (field, index) in self.keys.iter().zip(indexes) {
                    let Some(text) = self.incoming_key(row, field) else {
                        continue;
                    };
                    any_key = true;
                    if let Some(at) = index.get(&text) {
                        return Resolution::Matched {
                            at: *at,
                            via: field.column.0.clone(),
                        };
                    }
                }
                if any_key {
                    Resolution::Unmatched
                } else {
                    Resolution::Keyless
                }
            }
        }
    }

    /// Sparse changes for a matched row, with the stored values they replace.
    fn changes(&self, row: &NormalizedRow<'_>, record: &Record) -> (RowMap, RowMap) {
        let mut fields = RowMap::new();
        let mut previous = RowMap::new();
        for (normalized, entry) in &self.rules.policies {
            if entry.rule.is_noop() {
                continue;
            }
            let Some(cell) = row.get(normalized) else {
                continue;
            };
            if cell.formula {
                continue;
            }
            let current = record.get(&cell.column.0);
            let Some(mut value) = apply_policy(
                entry.rule,
                &cell.value,
                cell.is_empty(),
                current,
                is_empty_cell(current, &cell.kind),
            ) else {
                continue;
            };
            if cell.kind.is_date() {
                value = normalize_date(&value)
                    .map(Value::String)
                    .unwrap_or_else(|| cell.raw.clone());
            }
            if are_equal(&value, current) {
                continue;
            }
            previous.insert(cell.column.0.clone(), current.clone());
            fields.insert(cell.column.0.clone(), value);
        }
        (fields, previous)
    }

    fn insertion(&self, row: &NormalizedRow<'_>) -> RowMap {
        row.values()
            .filter(|c| !c.formula)
            .map(|c| (c.column.0.clone(), c.value.clone()))
            .collect()
    }

    /// Walk every data row of `sheet` against the `existing` rows of the
    /// target table.
    pub fn plan(
        &self,
        sheet: &Sheet,
        existing: &[Record],
        progress: Option<&dyn ProgressSink>,
    ) -> Plan {
        let index = self.build_index(existing);
        let mut plan = Plan::default();
        let total = sheet.rows.len();

        for (i, raw_row) in sheet.rows.iter().enumerate() {
            let line = i + 1;
            if let Some(sink) = progress {
                sink.progress(line, total);
            }
            let row = self.normalize_row(raw_row);

            match self.resolve(&row, &index) {
                Resolution::Keyless => {
                    if raw_row.iter().all(is_blank) {
                        plan.stats.empty_rows += 1;
                    } else {
                        plan.stats.keyless_rows += 1;
                        plan.stats.skipped += 1;
                    }
                    debug!(line, "keyless row");
                }
                Resolution::Matched { at, via } => {
                    let record = &existing[at];
                    let (fields, previous) = self.changes(&row, record);
                    if fields.is_empty() {
                        plan.stats.skipped += 1;
                        plan.resume
                            .push(format!("Row {line}: IGNORE (no change, #{} via {via})", record.id));
                        debug!(line, id = record.id, "unchanged");
                        continue;
                    }
                    let summary = fields
                        .iter()
                        .map(|(col, new)| {
                            format!("{col}: {} -> {}", previous[col], new)
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    plan.resume
                        .push(format!("Row {line}: UPDATE #{} via {via} ({summary})", record.id));
                    debug!(line, id = record.id, fields = fields.len(), "update");
                    plan.pre_images.insert(
                        plan.mutations.len(),
                        UpdatePreImage {
                            id: record.id,
                            previous_values: previous,
                        },
                    );
                    plan.mutations.push(Mutation::Update {
                        id: record.id,
                        fields,
                    });
                    plan.stats.updated += 1;
                }
                Resolution::Unmatched => {
                    let fields = self.insertion(&row);
                    let key_label = self
                        .keys
                        .iter()
                        .map(|k| self.incoming_key(&row, k).unwrap_or_default())
                        .collect::<Vec<_>>()
                        .join(" | ");
                    plan.resume.push(format!("Row {line}: ADD [{key_label}]"));
                    debug!(line, "insert");
                    plan.mutations.push(Mutation::Insert { fields });
                    plan.stats.added += 1;
                }
            }
        }

        self.summarize(&mut plan);
        plan
    }

    fn summarize(&self, plan: &mut Plan) {
        if plan.stats.empty_rows > 0 {
            plan.resume
                .push(format!("{} empty row(s) ignored", plan.stats.empty_rows));
        }
        if plan.stats.keyless_rows > 0 {
            let joiner = match self.rules.key_mode {
                KeyMode::Composite => " + ",
                KeyMode::Fallback => " / ",
            };
            let labels = self
                .keys
                .iter()
                .map(|k| k.column.0.as_str())
                .collect::<Vec<_>>()
                .join(joiner);
            plan.warnings.push(format!(
                "{} row(s) ignored: data present but key \"{labels}\" missing",
                plan.stats.keyless_rows
            ));
        }
        let unmapped: Vec<String> = self
            .mapping
            .unmapped_targets(self.schema)
            .into_iter()
            .filter(|c| !self.schema.is_formula(&c.0))
            .map(|c| c.0)
            .collect();
        if !unmapped.is_empty() {
            plan.warnings.push(format!(
                "Table columns not present in the sheet (left untouched): {}",
                unmapped.join(", ")
            ));
        }
        let missing_keys: Vec<&str> = self
            .keys
            .iter()
            .filter(|k| self.mapping.mapped().all(|(_, t)| *t != k.column))
            .map(|k| k.column.0.as_str())
            .collect();
        if !missing_keys.is_empty() {
            plan.warnings.push(format!(
                "Key column(s) missing from the sheet: {}",
                missing_keys.join(", ")
            ));
        }
        plan.resume.extend(plan.warnings.iter().cloned());
    }
}

fn join_key(parts: &[Option<String>]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        if let Some(p) = part {
            key.push_str(p);
        }
    }
    key
}

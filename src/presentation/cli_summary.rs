use crate::application::matcher::ColumnMapping;
use crate::application::monitoring::PerfReport;
use crate::domain::report::{ImportReport, RollbackOutcome, ValidationReport};
use crate::domain::rules::RuleSet;
use crate::domain::schema::TableSchema;
use colored::*;
use tabled::settings::{object::Columns, Alignment, Modify, Style};
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct SummaryRow {
    metric: String,
    value: String,
}

/// Print the outcome of an import: the per-row resume, then the counters.
pub fn print_import_summary(report: &ImportReport) {
    println!();

    let title = if report.dry_run {
        "SHEETSYNC IMPORT (dry run)"
    } else {
        "SHEETSYNC IMPORT"
    };
    println!("{}", title.bold().cyan());
    println!("Sheet: {}", report.sheet_name.bright_yellow());
    println!();

    for line in &report.resume {
        println!("  {}", colorize_line(line));
    }
    if !report.resume.is_empty() {
        println!();
    }

    for failure in &report.failures {
        println!("{} {}", "✗".bold().red(), failure.to_string().red());
    }

    let s = &report.stats;
    let mut rows = vec![
        SummaryRow {
            metric: "Added".into(),
            value: s.added.to_string().green().to_string(),
        },
        SummaryRow {
            metric: "Updated".into(),
            value: s.updated.to_string().yellow().to_string(),
        },
        SummaryRow {
            metric: "Skipped".into(),
            value: s.skipped.to_string().dimmed().to_string(),
        },
    ];
    if s.empty_rows > 0 {
        rows.push(SummaryRow {
            metric: "Empty rows".into(),
            value: s.empty_rows.to_string().dimmed().to_string(),
        });
    }
    if s.errors > 0 {
        rows.push(SummaryRow {
            metric: "Errors".into(),
            value: s.errors.to_string().bold().red().to_string(),
        });
    }

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..=1)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    if report.dry_run {
        println!("{}", "Dry run: nothing was written.".italic());
    } else if report.rollback.is_empty() {
        println!("{}", "Nothing to undo for this import.".italic());
    } else {
        println!(
            "Undo available: {} insertion(s), {} update(s).",
            report.rollback.added.len().to_string().bold(),
            report.rollback.updated.len().to_string().bold(),
        );
    }
    println!();
}

fn colorize_line(line: &str) -> String {
    if line.contains(": ADD ") {
        line.green().to_string()
    } else if line.contains(": UPDATE ") {
        line.yellow().to_string()
    } else if line.contains(": IGNORE ") {
        line.dimmed().to_string()
    } else if line.starts_with("ERROR") {
        line.red().to_string()
    } else if line.starts_with("---") {
        line.bold().to_string()
    } else {
        line.to_string()
    }
}

// ─── Rollback summary ─────────────────────────────────────────────────────────

/// Print the result of undoing the last import.
///
/// Returns `true` when some inverse mutations failed (so the caller can exit
/// non-zero).
pub fn print_rollback_summary(outcome: &RollbackOutcome) -> bool {
    println!();
    match outcome {
        RollbackOutcome::NothingToUndo => {
            println!("{}", outcome.message().italic());
            println!();
            false
        }
        RollbackOutcome::Completed {
            errors, warnings, ..
        } => {
            let message = outcome.message();
            if *errors > 0 {
                println!("{}", message.bold().red());
                println!("{}", "The import stays undoable; run rollback again.".dimmed());
            } else {
                println!("{}", message.bold().green());
            }
            for w in warnings {
                println!("  {} {}", "!".yellow(), w);
            }
            println!();
            *errors > 0
        }
    }
}

// ─── Mapping & rules ──────────────────────────────────────────────────────────

#[derive(Tabled)]
struct MappingRow {
    #[tabled(rename = "sheet column")]
    source: String,
    #[tabled(rename = "table column")]
    target: String,
    kind: String,
}

/// Print how the sheet headers line up with the table columns.
pub fn print_mapping(mapping: &ColumnMapping, schema: &TableSchema) {
    println!("{}", "COLUMN MAPPING".bold().cyan());

    let rows: Vec<MappingRow> = mapping
        .columns
        .iter()
        .map(|c| match &c.target {
            Some(target) => {
                let kind = schema.kind(&target.0);
                let kind = if schema.is_formula(&target.0) {
                    format!("{kind} (formula)").dimmed().to_string()
                } else {
                    kind.to_string()
                };
                MappingRow {
                    source: c.source.clone(),
                    target: target.0.green().to_string(),
                    kind,
                }
            }
            None => MappingRow {
                source: c.source.clone(),
                target: "-".red().to_string(),
                kind: String::new(),
            },
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");

    let missing = mapping.unmapped_targets(schema);
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|c| c.0.as_str()).collect();
        println!("  Not in the sheet: {}", names.join(", ").dimmed());
    }
    println!();
}

#[derive(Tabled)]
struct RuleRow {
    column: String,
    rule: String,
    key: String,
}

/// Print the merge rule of every configured column, key columns first.
pub fn print_rules(rules: &RuleSet) {
    println!("{}", "MERGE RULES".bold().cyan());
    println!("Key mode: {}", rules.key_mode.as_str().bright_yellow());

    let mut rows: Vec<(Option<usize>, RuleRow)> = rules
        .policies
        .iter()
        .map(|(norm, entry)| {
            let position = rules.keys.iter().position(|k| &k.name == norm);
            let key = match position {
                Some(p) => format!("#{}", p + 1).bold().to_string(),
                None => String::new(),
            };
            let rule = if entry.rule.is_noop() {
                entry.rule.as_str().dimmed().to_string()
            } else {
                entry.rule.as_str().to_string()
            };
            (
                position,
                RuleRow {
                    column: entry.original.clone(),
                    rule,
                    key,
                },
            )
        })
        .collect();
    rows.sort_by_key(|(p, _)| p.unwrap_or(usize::MAX));

    let table = Table::new(rows.into_iter().map(|(_, r)| r))
        .with(Style::rounded())
        .to_string();
    println!("{table}");

    if !rules.has_keys() {
        println!(
            "{}",
            "No unique key configured: imports will be refused.".bold().red()
        );
    }
    println!();
}

// ─── Validation ───────────────────────────────────────────────────────────────

/// Print pre-import checks. Returns `true` when the import cannot run.
pub fn print_validation(report: &ValidationReport) -> bool {
    if report.valid && report.warnings.is_empty() {
        println!("{}", "✓ Sheet looks ready to import.".bold().green());
        return false;
    }

    for e in &report.errors {
        println!("{} {}", "✗".bold().red(), e.red());
    }
    for w in &report.warnings {
        println!("{} {}", "!".bold().yellow(), w);
    }
    println!();

    !report.valid
}

// ─── Performance summary ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct PerfRow {
    operation: String,
    table: String,
    #[tabled(rename = "rows")]
    rows: String,
    #[tabled(rename = "time (ms)")]
    duration_ms: String,
}

/// Print a performance timing table to stdout.
pub fn print_perf_summary(report: &PerfReport) {
    if report.timings.is_empty() {
        return;
    }

    println!("{}", "PERFORMANCE".bold().cyan());

    let rows: Vec<PerfRow> = report
        .timings
        .iter()
        .map(|t| PerfRow {
            operation: t.operation.dimmed().to_string(),
            table: t.table.bold().to_string(),
            rows: t.rows.to_string(),
            duration_ms: format_duration(t.duration_ms),
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..=3)).with(Alignment::right()))
        .to_string();

    println!("{table}");

    println!(
        "  Total: {} row(s) fetched  ·  {} action(s) sent  ·  {} ms",
        report.total_rows_fetched.to_string().bold(),
        report.total_actions.to_string().bold(),
        format_duration(report.total_ms),
    );
    println!();
}

fn format_duration(ms: u128) -> String {
    if ms >= 1_000 {
        format!("{:.1}s", ms as f64 / 1_000.0).yellow().to_string()
    } else if ms >= 100 {
        ms.to_string().yellow().to_string()
    } else {
        ms.to_string().green().to_string()
    }
}

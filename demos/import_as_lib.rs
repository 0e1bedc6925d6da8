//! # Sheetsync: library usage example
//!
//! Shows three common patterns for consuming sheetsync as a Rust library:
//!
//! 1. **From a config file**: mirrors the CLI, backed by a JSON store file
//! 2. **In-memory store**: no files at all, handy for tests and embedding
//! 3. **Inspect and undo**: walk the report, then roll the import back
//!
//! Run with a config file and a workbook:
//!   cargo run --example import_as_lib -- sheetsync.toml workbook.json
//!
//! Run the built-in in-memory scenario:
//!   cargo run --example import_as_lib

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use sheetsync::{
    AppConfig, ColumnMeta, ImportReport, ImportService, ImportSettings, MemoryStore, RowMap,
    SessionId, Sheet, Workbook,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match (args.get(1), args.get(2)) {
        (Some(config), Some(workbook)) => from_config_file(config, workbook).await,
        _ => in_memory().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern 1: load config from a TOML file (same as the CLI does internally)
// ─────────────────────────────────────────────────────────────────────────────
async fn from_config_file(config: &str, workbook: &str) -> Result<()> {
    println!("=== Pattern 1: from config file ({config}) ===\n");

    let cfg = AppConfig::load(config)?;
    let workbook: Workbook = serde_json::from_str(&std::fs::read_to_string(workbook)?)?;

    // Dry run first: same report, nothing written
    let (preview, _) = sheetsync::import_with_timing(
        &cfg,
        &workbook,
        &[],
        SessionId("demo".into()),
        true,
    )
    .await?;
    print_summary(&preview);

    let (report, perf) =
        sheetsync::import_with_timing(&cfg, &workbook, &[], SessionId("demo".into()), false)
            .await?;
    print_summary(&report);
    println!("{} store call(s) in {} ms", perf.timings.len(), perf.total_ms);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern 2: everything in memory. The store is any `HostStore`; here the
// bundled `MemoryStore` stands in for the live document.
// ─────────────────────────────────────────────────────────────────────────────
async fn in_memory() -> Result<()> {
    println!("=== Pattern 2: in-memory store ===\n");

    let store = Arc::new(
        MemoryStore::new()
            .with_table(
                "Contacts",
                vec![
                    ColumnMeta::data("Email", "Text"),
                    ColumnMeta::data("Name", "Text"),
                    ColumnMeta::data("Since", "Date"),
                ],
                vec![row(&[
                    ("Email", json!("ada@example.com")),
                    ("Name", json!("Ada")),
                    ("Since", json!("2023-01-15")),
                ])],
            )
            .with_table(
                "RULES_CONFIG",
                vec![
                    ColumnMeta::data("col_name", "Text"),
                    ColumnMeta::data("is_key", "Bool"),
                    ColumnMeta::data("rule", "Text"),
                ],
                vec![
                    row(&[("col_name", json!("Email")), ("is_key", json!(true)), ("rule", json!("ignore"))]),
                    row(&[("col_name", json!("Name")), ("is_key", json!(false)), ("rule", json!("overwrite"))]),
                    row(&[("col_name", json!("Since")), ("is_key", json!(false)), ("rule", json!("update_if_newer"))]),
                ],
            ),
    );

    let settings = ImportSettings {
        target_table: Some("Contacts".into()),
        ..ImportSettings::default()
    };
    let mut svc = ImportService::new(store.clone(), settings);

    let sheet = Sheet::from_raw(
        "Export",
        vec![
            vec![json!("E-mail"), json!("Full name"), json!("Since")],
            vec![json!("ada@example.com"), json!("Ada L."), json!("15/02/2023")],
            vec![json!("bob@example.com"), json!("Bob"), json!(45000)],
        ],
    );

    let validation = svc.validate(&sheet).await?;
    for w in &validation.warnings {
        println!("  ! {w}");
    }

    let report = svc.import_sheet("export.xlsx", &sheet, false).await?;

    // Hand off to pattern 3
    inspect_and_undo(&mut svc, &report, &store).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern 3: the report is plain serialisable data; the undo record is
// kept on the session and in the audit table.
// ─────────────────────────────────────────────────────────────────────────────
async fn inspect_and_undo(
    svc: &mut ImportService,
    report: &ImportReport,
    store: &MemoryStore,
) -> Result<()> {
    println!("=== Pattern 3: inspect and undo ===\n");

    for line in &report.resume {
        println!("  {line}");
    }
    println!();

    for pre in &report.rollback.updated {
        for (col, before) in &pre.previous_values {
            println!("  ~ #{}  {col} was {before}", pre.id);
        }
    }

    let json = serde_json::to_string_pretty(report)?;
    println!("Full report: {} bytes of JSON\n", json.len());

    let outcome = svc.rollback_last().await?;
    println!("{}", outcome.message());
    println!("Contacts now holds {} row(s).", store.records("Contacts")?.len());

    print_summary(report);
    Ok(())
}

fn row(pairs: &[(&str, Value)]) -> RowMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn print_summary(report: &ImportReport) {
    println!("\n── summary ──────────────────────");
    println!("  dry run : {}", report.dry_run);
    println!("  added   : {}", report.stats.added);
    println!("  updated : {}", report.stats.updated);
    println!("  skipped : {}", report.stats.skipped);
    println!("  errors  : {}", report.stats.errors);
}

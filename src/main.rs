use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sheetsync::application::rules::RulesTableStatus;
use sheetsync::presentation::cli_summary::{
    print_import_summary, print_mapping, print_perf_summary, print_rollback_summary, print_rules,
    print_validation,
};
use sheetsync::{
    init_tracing, AppConfig, ImportService, LogLevel, PerfReport, PolicyRule, SessionId,
    TableName, Workbook,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "sheetsync",
    about = "Sheetsync: merge spreadsheet rows into a live table, with rules and undo."
)]
struct Cli {
    /// Config file; defaults to <config_dir>/sheetsync/config.toml when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Session identifier. Reuse it to undo an import from a later run.
    #[arg(short, long, global = true, default_value = "default")]
    session: String,

    /// Target table, overriding the configured one.
    #[arg(short, long, global = true)]
    table: Option<String>,

    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print store call timings after the command.
    #[arg(long, global = true)]
    perf: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import sheets of a workbook (JSON) into the target table.
    Import {
        workbook: PathBuf,
        /// Sheet to import; repeat for several. All sheets when omitted.
        #[arg(long = "sheet")]
        sheets: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Undo the latest import of the session.
    Rollback,
    /// Check a sheet against the target table without writing anything.
    Validate {
        workbook: PathBuf,
        #[arg(long)]
        sheet: Option<String>,
    },
    /// Show or edit the merge rules.
    Rules {
        #[command(subcommand)]
        action: Option<RulesAction>,
    },
}

#[derive(Subcommand, Debug)]
enum RulesAction {
    /// Print the configured rules (default).
    Show,
    /// Create the rules table for the target table, or add missing columns.
    Init,
    /// Set the merge rule of one column.
    Set { column: String, rule: String },
    /// Choose the unique key columns, highest priority first.
    Keys {
        #[arg(required = true)]
        columns: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(if cli.quiet {
        LogLevel::Error
    } else if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });

    let cfg = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };

    let report = PerfReport::new();
    let store = sheetsync::open_store(&cfg, Arc::clone(&report))?;
    let mut svc = sheetsync::service(&cfg, store, SessionId(cli.session.clone()));
    if let Some(table) = &cli.table {
        svc.session_mut().set_current_table(TableName::new(table.as_str()));
    }

    let failed = match cli.command {
        Command::Import {
            workbook,
            sheets,
            dry_run,
        } => {
            let workbook = read_workbook(&workbook)?;
            let sheets = if sheets.is_empty() {
                workbook.sheet_names()
            } else {
                sheets
            };
            let outcome = svc.import_workbook(&workbook, &sheets, dry_run).await?;
            print_import_summary(&outcome);
            outcome.stats.errors > 0
        }
        Command::Rollback => {
            let outcome = svc.rollback_last().await?;
            print_rollback_summary(&outcome)
        }
        Command::Validate { workbook, sheet } => {
            let workbook = read_workbook(&workbook)?;
            let sheet = match sheet {
                Some(name) => workbook
                    .sheet(&name)
                    .with_context(|| format!("No sheet named {name}"))?,
                None => workbook
                    .sheets
                    .first()
                    .context("The workbook has no sheet")?,
            };
            let (schema, mapping) = svc.preview_mapping(sheet).await?;
            print_mapping(&mapping, &schema);
            print_validation(&svc.validate(sheet).await?)
        }
        Command::Rules { action } => {
            run_rules(&svc, action.unwrap_or(RulesAction::Show)).await?;
            false
        }
    };

    if cli.perf {
        if let Ok(perf) = report.lock() {
            print_perf_summary(&perf);
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_rules(svc: &ImportService, action: RulesAction) -> Result<()> {
    let rules = svc.rules();
    match action {
        RulesAction::Show => {}
        RulesAction::Init => {
            let target = svc.target_table()?;
            match rules.ensure_rules_table(&target).await? {
                RulesTableStatus::Present => println!("{} is up to date.", rules.table()),
                RulesTableStatus::Created { rows } => {
                    println!("Created {} with {rows} column(s) of {target}.", rules.table())
                }
                RulesTableStatus::Migrated => println!("Added the key column to {}.", rules.table()),
            }
        }
        RulesAction::Set { column, rule } => {
            let rule: PolicyRule = rule.parse()?;
            rules.set_rule(&column, rule).await?;
        }
        RulesAction::Keys { columns } => {
            rules.set_unique_keys(&columns).await?;
        }
    }
    print_rules(&rules.load_rules().await?);
    Ok(())
}

fn read_workbook(path: &Path) -> Result<Workbook> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workbook: {}", path.display()))?;
    let mut workbook: Workbook = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse workbook: {}", path.display()))?;
    if workbook.file_name.is_empty() {
        workbook.file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    Ok(workbook)
}

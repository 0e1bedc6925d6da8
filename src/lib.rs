use anyhow::Result;
use std::sync::{Arc, Mutex};

pub mod application;
pub mod domain;
pub mod infrastructure;
#[cfg(feature = "cli")]
pub mod presentation;

// ─── Log level ────────────────────────────────────────────────────────────────

/// Controls the verbosity of sheetsync's internal tracing output.
///
/// Pass to [`init_tracing`] before calling any async entry point.
///
/// | Variant | `tracing` level | When to use                              |
/// |---------|-----------------|------------------------------------------|
/// | `Error` | `error`         | `--quiet` / CI scripting                 |
/// | `Info`  | `info`          | Default: store timings, batch failures   |
/// | `Debug` | `debug`         | `--verbose`: per-row matching decisions  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Info,
    Debug,
}

/// Initialise the global `tracing` subscriber for sheetsync.
///
/// Respects `RUST_LOG` when set, falling back to `level` otherwise. Call
/// once at startup. Library consumers who manage their own subscriber
/// should skip this.
///
/// Only available with the `cli` feature (pulls in `tracing-subscriber`).
#[cfg(feature = "cli")]
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let default_filter = match level {
        LogLevel::Error => "sheetsync=error",
        LogLevel::Info => "sheetsync=info",
        LogLevel::Debug => "sheetsync=debug",
    };

    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

// ─── Public API Facade ───

pub use application::import::ImportService;
pub use application::matcher::{match_columns, ColumnMapping};
pub use application::monitoring::{MonitoringHostStore, PerfReport};
pub use application::reconcile::{apply_policy, ReconciliationEngine};
pub use application::rules::RuleStore;
pub use application::session::Session;
pub use domain::errors::PreconditionError;
pub use domain::mutation::UserAction;
pub use domain::ports::{HostStore, ProgressSink};
pub use domain::report::{ImportReport, ImportStats, RollbackOutcome, ValidationReport};
pub use domain::rollback::{RollbackRecord, UpdatePreImage};
pub use domain::rules::{KeyMode, PolicyRule, RuleSet};
pub use domain::table::{ColumnMeta, RowMap, TableData};
pub use domain::value_objects::{ColumnName, RowId, SessionId, TableName};
pub use domain::workbook::{Sheet, Workbook};
pub use infrastructure::config::{AppConfig, ImportSettings, StoreConfig};
pub use infrastructure::json_store::JsonFileStore;
pub use infrastructure::memory_store::MemoryStore;

// ─── Public entry points ───

/// Open the configured file store, wrapped in the timing decorator.
///
/// The shared `report` accumulates timings from every call made through the
/// returned store.
pub fn open_store(cfg: &AppConfig, report: Arc<Mutex<PerfReport>>) -> Result<Arc<dyn HostStore>> {
    let store = Arc::new(JsonFileStore::open(&cfg.store.path)?);
    Ok(Arc::new(MonitoringHostStore::new(store, report)))
}

/// Build an import service over `store` for the given session.
///
/// Passing the same session id across runs makes an earlier import
/// undoable through the audit log.
pub fn service(cfg: &AppConfig, store: Arc<dyn HostStore>, session: SessionId) -> ImportService {
    ImportService::new(store, cfg.import.clone()).with_session(Session::with_id(session))
}

/// Import the named sheets of a workbook into the configured target table.
///
/// Returns the report and a [`PerfReport`] of store timings.
pub async fn import_with_timing(
    cfg: &AppConfig,
    workbook: &Workbook,
    sheets: &[String],
    session: SessionId,
    dry_run: bool,
) -> Result<(ImportReport, PerfReport)> {
    let report = PerfReport::new();
    let store = open_store(cfg, Arc::clone(&report))?;
    let mut svc = service(cfg, store, session);

    let sheets = if sheets.is_empty() {
        workbook.sheet_names()
    } else {
        sheets.to_vec()
    };
    let outcome = svc.import_workbook(workbook, &sheets, dry_run).await?;

    Ok((outcome, snapshot_perf(&report)))
}

/// Undo the session's latest import.
pub async fn rollback_with_timing(
    cfg: &AppConfig,
    session: SessionId,
) -> Result<(RollbackOutcome, PerfReport)> {
    let report = PerfReport::new();
    let store = open_store(cfg, Arc::clone(&report))?;
    let mut svc = service(cfg, store, session);
    let outcome = svc.rollback_last().await?;
    Ok((outcome, snapshot_perf(&report)))
}

fn snapshot_perf(report: &Arc<Mutex<PerfReport>>) -> PerfReport {
    report.lock().map(|r| r.clone()).unwrap_or_default()
}

use crate::domain::mutation::UserAction;
use crate::domain::ports::HostStore;
use crate::domain::table::{ColumnMeta, TableData};
use crate::domain::value_objects::TableName;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, instrument};

// ─── PerfReport ──────────────────────────────────────────────────────────────

/// A single timed store call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpTiming {
    /// Operation name: "fetch_table" or "apply_actions".
    pub operation: &'static str,
    /// Table the call targeted; the first action's table for bundles.
    pub table: String,
    /// Elapsed wall time in milliseconds.
    pub duration_ms: u128,
    /// Rows fetched, or actions submitted.
    pub rows: usize,
}

/// Accumulated store timings for a single sheetsync run.
///
/// Shared across all decorator instances for one run via `Arc<Mutex<_>>`.
/// After the run, pass to [`crate::presentation::cli_summary::print_perf_summary`]
/// to render a human-readable table.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct PerfReport {
    pub timings: Vec<OpTiming>,
    pub total_rows_fetched: usize,
    pub total_actions: usize,
    pub total_ms: u128,
}

impl PerfReport {
    pub fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    fn record(report: &Arc<Mutex<Self>>, timing: OpTiming) {
        if let Ok(mut r) = report.lock() {
            r.total_ms += timing.duration_ms;
            match timing.operation {
                "fetch_table" => r.total_rows_fetched += timing.rows,
                "apply_actions" => r.total_actions += timing.rows,
                _ => {}
            }
            r.timings.push(timing);
        }
    }
}

// ─── MonitoringHostStore ─────────────────────────────────────────────────────

/// Decorator: wraps any `HostStore`, measures wall time per `fetch_table` and
/// `apply_actions` call, and appends the result to the shared `PerfReport`.
/// Failed calls are not recorded.
pub struct MonitoringHostStore {
    inner: Arc<dyn HostStore>,
    report: Arc<Mutex<PerfReport>>,
}

impl MonitoringHostStore {
    pub fn new(inner: Arc<dyn HostStore>, report: Arc<Mutex<PerfReport>>) -> Self {
        Self { inner, report }
    }
}

#[async_trait]
impl HostStore for MonitoringHostStore {
    async fn list_tables(&self) -> Result<Vec<TableName>> {
        self.inner.list_tables().await
    }

    #[instrument(
        name = "fetch_table",
        skip(self, table),
        fields(db.table = %table.0),
        level = "info"
    )]
    async fn fetch_table(&self, table: &TableName) -> Result<TableData> {
        let start = Instant::now();
        let data = self.inner.fetch_table(table).await?;
        let duration_ms = start.elapsed().as_millis();

        info!(table = %table.0, rows = data.len(), duration_ms, "fetch_table completed");

        PerfReport::record(
            &self.report,
            OpTiming {
                operation: "fetch_table",
                table: table.0.clone(),
                duration_ms,
                rows: data.len(),
            },
        );

        Ok(data)
    }

    async fn column_metadata(&self, table: &TableName) -> Result<Vec<ColumnMeta>> {
        self.inner.column_metadata(table).await
    }

    #[instrument(
        name = "apply_actions",
        skip(self, actions),
        fields(actions = actions.len()),
        level = "info"
    )]
    async fn apply_actions(&self, actions: &[UserAction]) -> Result<Vec<Value>> {
        let start = Instant::now();
        let returned = self.inner.apply_actions(actions).await?;
        let duration_ms = start.elapsed().as_millis();
        let table = actions
            .first()
            .map(|a| a.table().0.clone())
            .unwrap_or_default();

        info!(table = %table, actions = actions.len(), duration_ms, "apply_actions completed");

        PerfReport::record(
            &self.report,
            OpTiming {
                operation: "apply_actions",
                table,
                duration_ms,
                rows: actions.len(),
            },
        );

        Ok(returned)
    }
}

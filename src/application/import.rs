use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::application::batch::BatchApplier;
use crate::application::matcher::{match_columns, ColumnMapping};
use crate::application::reconcile::ReconciliationEngine;
use crate::application::rollback::RollbackManager;
use crate::application::rules::RuleStore;
use crate::application::schema::SchemaIntrospector;
use crate::application::session::{PendingRollback, Session};
use crate::application::validation::validate_import;
use crate::domain::errors::PreconditionError;
use crate::domain::import_log::ImportLogEntry;
use crate::domain::mutation::UserAction;
use crate::domain::ports::{HostStore, ProgressSink};
use crate::domain::report::{ImportReport, RollbackOutcome, ValidationReport};
use crate::domain::rollback::RollbackRecord;
use crate::domain::rules::RuleSet;
use crate::domain::schema::TableSchema;
use crate::domain::value_objects::TableName;
use crate::domain::workbook::{Sheet, Workbook};
use crate::infrastructure::config::ImportSettings;

/// Runs imports and rollbacks for one session against one store.
///
/// Methods that change session state take `&mut self`, so two imports can
/// never run at once on the same service.
pub struct ImportService {
    store: Arc<dyn HostStore>,
    settings: ImportSettings,
    rules: RuleStore,
    introspector: SchemaIntrospector,
    applier: BatchApplier,
    rollbacks: RollbackManager,
    session: Session,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl ImportService {
    pub fn new(store: Arc<dyn HostStore>, settings: ImportSettings) -> Self {
        Self {
            rules: RuleStore::new(Arc::clone(&store), settings.rules_table()),
            introspector: SchemaIntrospector::new(Arc::clone(&store)),
            applier: BatchApplier::new(Arc::clone(&store), settings.batch_size),
            rollbacks: RollbackManager::new(
                Arc::clone(&store),
                settings.log_table(),
                settings.batch_size,
            ),
            session: Session::new(),
            progress: None,
            store,
            settings,
        }
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    /// Report `(current_row, total_rows)` while sheets are processed.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// Table the host has selected, else the configured default.
    pub fn target_table(&self) -> Result<TableName, PreconditionError> {
        self.session
            .current_table()
            .cloned()
            .or_else(|| self.settings.target_table())
            .ok_or(PreconditionError::NoTargetTable)
    }

    /// Target schema and the header mapping a sheet would use.
    pub async fn preview_mapping(&self, sheet: &Sheet) -> Result<(TableSchema, ColumnMapping)> {
        let table = self.target_table()?;
        let schema = self.introspector.table_schema(&table).await?;
        let mapping = match_columns(&sheet.headers, &schema);
        Ok((schema, mapping))
    }

    #[instrument(skip_all, fields(sheet = %sheet.name), level = "info")]
    pub async fn validate(&self, sheet: &Sheet) -> Result<ValidationReport> {
        let (schema, mapping) = self.preview_mapping(sheet).await?;
        Ok(validate_import(
            sheet,
            &mapping,
            &schema,
            self.settings.validation_sample,
        ))
    }

    /// Load rules and refuse to start without a unique key.
    async fn load_rules(&self) -> Result<RuleSet> {
        let rules = self.rules.load_rules().await?;
        if !rules.has_keys() {
            return Err(PreconditionError::NoUniqueKey.into());
        }
        Ok(rules)
    }

    /// Reconcile one sheet against the current table contents and apply the
    /// result. Nothing is logged here.
    async fn run_sheet(
        &mut self,
        table: &TableName,
        sheet: &Sheet,
        rules: &RuleSet,
        dry_run: bool,
    ) -> Result<ImportReport> {
        let schema = self.introspector.table_schema(table).await?;
        let mapping = match_columns(&sheet.headers, &schema);

        for (_, target) in mapping.mapped() {
            if let Some(referenced) = schema.kind(&target.0).reference_target() {
                self.session
                    .references_mut()
                    .ensure(self.store.as_ref(), referenced)
                    .await;
            }
        }

        let existing = self
            .store
            .fetch_table(table)
            .await
            .with_context(|| format!("Failed to read table {}", table))?
            .records();

        let plan = ReconciliationEngine::new(&schema, rules, &mapping, self.session.references())?
            .plan(sheet, &existing, self.progress.as_deref());

        let actions: Vec<UserAction> = plan
            .mutations
            .iter()
            .cloned()
            .map(|m| m.into_action(table))
            .collect();
        let outcome = self.applier.apply(&actions, dry_run).await;

        let mut stats = plan.stats;
        stats.errors = outcome.errors;

        let mut rollback = RollbackRecord::for_table(table);
        if outcome.submitted {
            rollback.added = outcome.added_ids.clone();
            rollback.updated = plan
                .pre_images
                .into_iter()
                .filter(|(position, _)| !outcome.failed(*position))
                .map(|(_, pre)| pre)
                .collect();
        }

        let mut resume = plan.resume;
        resume.extend(outcome.failures.iter().map(|f| format!("ERROR {f}")));

        info!(
            table = %table,
            sheet = %sheet.name,
            added = stats.added,
            updated = stats.updated,
            skipped = stats.skipped,
            errors = stats.errors,
            dry_run,
            "sheet reconciled"
        );

        Ok(ImportReport {
            sheet_name: sheet.name.clone(),
            stats,
            dry_run,
            resume,
            warnings: plan.warnings,
            failures: outcome.failures,
            rollback,
        })
    }

    fn log_entry(&self, file_name: &str, report: &ImportReport, payload: &RollbackRecord) -> ImportLogEntry {
        let rollback_data = if payload.is_empty() {
            String::new()
        } else {
            payload.to_payload().unwrap_or_else(|e| {
                warn!(error = %e, "rollback payload not serializable");
                String::new()
            })
        };
        ImportLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            file_name: file_name.to_string(),
            sheet_name: report.sheet_name.clone(),
            stats: report.stats,
            dry_run: report.dry_run,
            rollback_data,
            session_id: self.session.id().clone(),
            rolled_back: false,
        }
    }

    /// Import one sheet into the target table.
    ///
    /// Precondition failures abort before anything is written. A real run
    /// writes one audit row and becomes the session's undoable import.
    #[instrument(skip_all, fields(sheet = %sheet.name, dry_run = dry_run), level = "info")]
    pub async fn import_sheet(
        &mut self,
        file_name: &str,
        sheet: &Sheet,
        dry_run: bool,
    ) -> Result<ImportReport> {
        let table = self.target_table()?;
        if sheet.is_empty() {
            return Err(PreconditionError::EmptySource.into());
        }
        let rules = self.load_rules().await?;
        let report = self.run_sheet(&table, sheet, &rules, dry_run).await?;

        if !dry_run {
            let entry = self.log_entry(file_name, &report, &report.rollback);
            let log_id = self.rollbacks.log_import(&entry).await;
            self.rollbacks
                .record_rollback(&mut self.session, report.rollback.clone(), log_id);
        }
        Ok(report)
    }

    /// Import several sheets of one workbook, in the given order.
    ///
    /// Sheets are independent: an empty, missing or failing sheet is reported
    /// and the next one proceeds. Each sheet gets its own audit row without
    /// rollback data; a final combined row carries the merged rollback.
    #[instrument(skip_all, fields(file = %workbook.file_name, sheets = sheet_names.len(), dry_run = dry_run), level = "info")]
    pub async fn import_workbook(
        &mut self,
        workbook: &Workbook,
        sheet_names: &[String],
        dry_run: bool,
    ) -> Result<ImportReport> {
        if let [only] = sheet_names {
            let sheet = workbook
                .sheet(only)
                .ok_or(PreconditionError::EmptySource)?;
            return self.import_sheet(&workbook.file_name, sheet, dry_run).await;
        }

        let table = self.target_table()?;
        if sheet_names.is_empty() {
            return Err(PreconditionError::EmptySource.into());
        }
        let rules = self.load_rules().await?;

        let mut combined = ImportReport {
            sheet_name: sheet_names.join(", "),
            dry_run,
            rollback: RollbackRecord::for_table(&table),
            ..ImportReport::default()
        };

        for name in sheet_names {
            let Some(sheet) = workbook.sheet(name) else {
                combined.resume.push(format!("--- {name}: sheet not found, skipped ---"));
                continue;
            };
            if sheet.is_empty() {
                combined.resume.push(format!("--- {name}: empty sheet, skipped ---"));
                continue;
            }
            match self.run_sheet(&table, sheet, &rules, dry_run).await {
                Ok(report) => {
                    combined.resume.push(format!("--- {name} ---"));
                    combined.resume.extend(report.resume.iter().cloned());
                    combined.warnings.extend(report.warnings.iter().cloned());
                    combined.failures.extend(report.failures.iter().cloned());
                    combined.stats.absorb(&report.stats);
                    if !dry_run {
                        let entry =
                            self.log_entry(&workbook.file_name, &report, &RollbackRecord::default());
                        self.rollbacks.log_import(&entry).await;
                    }
                    combined.rollback.merge(report.rollback);
                }
                Err(e) => {
                    warn!(sheet = %name, error = %format!("{e:#}"), "sheet import failed");
                    combined.resume.push(format!("--- {name}: ERROR {e:#} ---"));
                }
            }
        }

        if !dry_run {
            let entry = self.log_entry(&workbook.file_name, &combined, &combined.rollback);
            let log_id = self.rollbacks.log_import(&entry).await;
            self.rollbacks
                .record_rollback(&mut self.session, combined.rollback.clone(), log_id);
        }
        Ok(combined)
    }

    pub async fn last_rollback(&self) -> Option<PendingRollback> {
        self.rollbacks.last_rollback(&self.session).await
    }

    /// Undo the session's latest import.
    pub async fn rollback_last(&mut self) -> Result<RollbackOutcome> {
        self.rollbacks.rollback_last(&mut self.session).await
    }
}

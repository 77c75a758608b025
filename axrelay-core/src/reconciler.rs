//! Turns a verdict document into a file move and a terminal ledger update.

use std::{io, path::PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    appliance::VerdictDocument,
    context::EngineContext,
    error::{LedgerError, RunError},
    layout::move_into_unique,
    types::{
        ContentHash, Resolution, ResultState, SubmissionKey, SubmissionRecord,
    },
};

/// The appliance reported a digest that differs from the file on disk.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "{}: appliance reported {reported} for {} but file hashes to {actual}",
    .path.display(),
    .threat.as_deref().unwrap_or("<unnamed>")
)]
pub struct IntegrityWarning {
    pub path: PathBuf,
    pub threat: Option<String>,
    pub reported: String,
    pub actual: ContentHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub state: ResultState,
    pub destination: PathBuf,
    pub warnings: Vec<IntegrityWarning>,
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The file could not be read or moved; the record stays pending.
    #[error("file {path} could not be reconciled: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The verdict was applied on disk but could not be recorded.
    #[error("verdict for {key} could not be recorded: {source}")]
    Ledger {
        key: SubmissionKey,
        #[source]
        source: LedgerError,
    },
}

impl ReconcileError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconcileError::Ledger { .. })
    }

    /// The run-ending error for fatal failures; `None` when recoverable.
    pub fn into_run_error(self) -> Option<RunError> {
        match self {
            ReconcileError::Ledger { key, source } => {
                Some(RunError::VerdictLost { key, source })
            }
            ReconcileError::Filesystem { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResultReconciler<'a> {
    ctx: &'a EngineContext,
}

impl<'a> ResultReconciler<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Maps the governing alert's severity to a result state.
    pub fn classify(
        &self,
        document: &VerdictDocument,
    ) -> (ResultState, Option<String>) {
        let codes = &self.ctx.config().severity;
        let Some(alert) = document.governing_alert(codes) else {
            warn!("verdict carries no alert; classifying as unknown");
            return (ResultState::Unknown, None);
        };
        let state = codes.classify(alert.severity.as_deref());
        if state == ResultState::Unknown {
            warn!(
                severity = alert.severity.as_deref().unwrap_or("<none>"),
                "unanticipated severity code; classifying as unknown"
            );
        }
        (state, alert.alert_url.clone())
    }

    pub async fn reconcile(
        &self,
        record: &SubmissionRecord,
        document: &VerdictDocument,
    ) -> Result<Reconciled, ReconcileError> {
        let (state, detail_url) = self.classify(document);
        let warnings = self.check_integrity(record, document).await?;
        let threat_names = document.threat_names();

        let target_dir = self
            .ctx
            .config()
            .layout
            .stage_dir(&record.profile, state.into());
        let destination = move_into_unique(
            &record.path,
            &target_dir,
            record.analysis_id.as_str(),
        )
        .await
        .map_err(|source| ReconcileError::Filesystem {
            path: record.path.clone(),
            source,
        })?;

        let key = record.key();
        let resolution = Resolution {
            state,
            completed_at: Utc::now(),
            threat_names,
            detail_url,
            path: destination.clone(),
        };
        match self.ctx.ledger().resolve(&key, &resolution).await {
            Ok(0) => {
                return Err(ReconcileError::Ledger {
                    source: LedgerError::NoPendingRecord(key.clone()),
                    key,
                });
            }
            Ok(_) => {}
            Err(source) => return Err(ReconcileError::Ledger { key, source }),
        }

        info!(
            appliance = %record.appliance,
            analysis_id = %record.analysis_id,
            result = %state,
            path = %destination.display(),
            threats = ?resolution.threat_names,
            "verdict recorded"
        );
        Ok(Reconciled {
            state,
            destination,
            warnings,
        })
    }

    async fn check_integrity(
        &self,
        record: &SubmissionRecord,
        document: &VerdictDocument,
    ) -> Result<Vec<IntegrityWarning>, ReconcileError> {
        let hasher = self.ctx.hasher();
        let algorithm = hasher.algorithm();
        let actual = hasher
            .hash_file(&record.path)
            .await
            .map_err(|source| ReconcileError::Filesystem {
                path: record.path.clone(),
                source,
            })?;

        let mut warnings = Vec::new();
        let mut compared = 0usize;
        for entry in document.threat_entries() {
            let Some(reported) = entry.reported_digest(algorithm) else {
                continue;
            };
            compared += 1;
            if !reported.eq_ignore_ascii_case(actual.as_str()) {
                let warning = IntegrityWarning {
                    path: record.path.clone(),
                    threat: entry.name.clone(),
                    reported: reported.to_string(),
                    actual: actual.clone(),
                };
                warn!(analysis_id = %record.analysis_id, "{warning}");
                warnings.push(warning);
            }
        }
        if compared == 0 && document.threat_entries().next().is_some() {
            debug!(
                analysis_id = %record.analysis_id,
                algorithm = %algorithm,
                "no reported digest to verify against"
            );
        }
        Ok(warnings)
    }
}

//! Status sweep over pending records.

use std::ops::AddAssign;

use futures::future::join_all;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    appliance::SubmissionStatus,
    config::ExecutionMode,
    context::EngineContext,
    error::{PollError, RunError},
    reconciler::ResultReconciler,
    session::{ActiveAppliance, AppliancePool},
    types::SubmissionRecord,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub checked: usize,
    pub resolved: usize,
    pub in_progress: usize,
    pub not_found: usize,
    pub errors: usize,
    pub integrity_warnings: usize,
}

impl AddAssign for PollReport {
    fn add_assign(&mut self, rhs: Self) {
        self.checked += rhs.checked;
        self.resolved += rhs.resolved;
        self.in_progress += rhs.in_progress;
        self.not_found += rhs.not_found;
        self.errors += rhs.errors;
        self.integrity_warnings += rhs.integrity_warnings;
    }
}

/// Checks every pending record of every active appliance once. Returns early
/// only when a resolved verdict cannot be recorded.
pub async fn poll(
    ctx: &EngineContext,
    pool: &AppliancePool,
) -> Result<PollReport, RunError> {
    let mut report = PollReport::default();

    match ctx.config().execution {
        ExecutionMode::Sequential => {
            for active in pool.iter() {
                let span = info_span!("poll", appliance = %active.id());
                report += poll_appliance(ctx, active).instrument(span).await?;
            }
        }
        ExecutionMode::PerAppliance => {
            let sweeps = pool.iter().map(|active| {
                let span = info_span!("poll", appliance = %active.id());
                poll_appliance(ctx, active).instrument(span)
            });
            let mut fatal = None;
            for outcome in join_all(sweeps).await {
                match outcome {
                    Ok(partial) => report += partial,
                    Err(err) if fatal.is_none() => fatal = Some(err),
                    Err(err) => error!(
                        error = %err,
                        "additional fatal error during poll"
                    ),
                }
            }
            if let Some(err) = fatal {
                return Err(err);
            }
        }
    }

    Ok(report)
}

async fn poll_appliance(
    ctx: &EngineContext,
    active: &ActiveAppliance,
) -> Result<PollReport, RunError> {
    let mut report = PollReport::default();
    let pending = match ctx.ledger().pending_for(active.id()).await {
        Ok(pending) => pending,
        Err(err) => {
            error!(error = %err, "could not list pending submissions");
            report.errors += 1;
            return Ok(report);
        }
    };
    debug!(count = pending.len(), "pending submissions");

    for record in &pending {
        report.checked += 1;
        poll_record(ctx, active, record, &mut report).await?;
    }
    Ok(report)
}

async fn poll_record(
    ctx: &EngineContext,
    active: &ActiveAppliance,
    record: &SubmissionRecord,
    report: &mut PollReport,
) -> Result<(), RunError> {
    let status = match ctx
        .api()
        .submission_status(
            &active.appliance,
            &active.token,
            &record.analysis_id,
        )
        .await
    {
        Ok(status) => status,
        Err(err) => {
            log_poll_error(record, &err);
            report.errors += 1;
            return Ok(());
        }
    };

    match status {
        SubmissionStatus::Done => {}
        SubmissionStatus::InProgress => {
            info!(
                analysis_id = %record.analysis_id,
                path = %record.path.display(),
                "analysis in progress"
            );
            report.in_progress += 1;
            return Ok(());
        }
        SubmissionStatus::NotFound => {
            warn!(
                analysis_id = %record.analysis_id,
                path = %record.path.display(),
                "appliance does not know this submission; \
                 left pending for manual review"
            );
            report.not_found += 1;
            return Ok(());
        }
        SubmissionStatus::Unexpected(label) => {
            warn!(
                analysis_id = %record.analysis_id,
                status = %label,
                "unexpected submission status"
            );
            report.errors += 1;
            return Ok(());
        }
    }

    let document = match ctx
        .api()
        .submission_result(
            &active.appliance,
            &active.token,
            &record.analysis_id,
        )
        .await
    {
        Ok(document) => document,
        Err(err) => {
            log_poll_error(record, &err);
            report.errors += 1;
            return Ok(());
        }
    };

    match ResultReconciler::new(ctx).reconcile(record, &document).await {
        Ok(reconciled) => {
            report.resolved += 1;
            report.integrity_warnings += reconciled.warnings.len();
            Ok(())
        }
        Err(err) => {
            if err.is_fatal() {
                error!(
                    analysis_id = %record.analysis_id,
                    error = %err,
                    "aborting run"
                );
            } else {
                error!(
                    analysis_id = %record.analysis_id,
                    error = %err,
                    "reconciliation failed; left pending"
                );
                report.errors += 1;
            }
            match err.into_run_error() {
                Some(fatal) => Err(fatal),
                None => Ok(()),
            }
        }
    }
}

fn log_poll_error(record: &SubmissionRecord, err: &PollError) {
    match err {
        PollError::StillProcessing => {
            info!(analysis_id = %record.analysis_id, "result still processing")
        }
        _ => warn!(
            analysis_id = %record.analysis_id,
            error = %err,
            "poll failed; left pending"
        ),
    }
}

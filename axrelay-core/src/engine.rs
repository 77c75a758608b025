use tracing::{Instrument, error, info, info_span};

use crate::{
    context::EngineContext,
    dispatcher::{DispatchReport, dispatch},
    error::RunError,
    poller::{PollReport, poll},
    session::SessionManager,
};

/// Totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub configured_appliances: usize,
    pub active_appliances: usize,
    pub poll: PollReport,
    pub dispatch: DispatchReport,
}

/// Drives one dispatch-track-reconcile pass.
#[derive(Debug, Clone)]
pub struct Engine {
    ctx: EngineContext,
}

impl Engine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Logs in, polls pending records, dispatches new files, logs out.
    /// Sessions are closed on every path out once the pool is open.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let span = info_span!("run", mode = %self.ctx.config().execution);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<RunReport, RunError> {
        let config = self.ctx.config();
        let sessions = SessionManager::new(&self.ctx);

        let pool = sessions.open_all(&config.appliances).await;
        let mut report = RunReport {
            configured_appliances: config.appliances.len(),
            active_appliances: pool.len(),
            ..RunReport::default()
        };
        if pool.is_empty() {
            error!(
                configured = config.appliances.len(),
                "no appliance accepted a login"
            );
            return Err(RunError::NoActiveAppliances);
        }

        let outcome = async {
            report.poll = poll(&self.ctx, &pool).await?;

            let candidates = match config.layout.discover().await {
                Ok(candidates) => candidates,
                Err(err) => {
                    error!(
                        base_dir = %config.layout.base_dir().display(),
                        error = %err,
                        "failed to scan incoming directories"
                    );
                    Vec::new()
                }
            };
            report.dispatch = dispatch(&self.ctx, &pool, candidates).await?;
            Ok::<_, RunError>(())
        }
        .await;

        sessions.close_all(&pool).await;
        outcome?;

        info!(
            appliances = report.active_appliances,
            checked = report.poll.checked,
            resolved = report.poll.resolved,
            in_progress = report.poll.in_progress,
            integrity_warnings = report.poll.integrity_warnings,
            attempted = report.dispatch.attempted,
            submitted = report.dispatch.submitted,
            dropped = report.dispatch.dropped,
            deferred = report.dispatch.deferred,
            failed = report.dispatch.failed,
            orphaned = report.dispatch.orphaned,
            "run complete"
        );
        Ok(report)
    }
}

//! Round-robin assignment of incoming files to the active pool.

use std::ops::AddAssign;

use chrono::Utc;
use futures::future::join_all;
use tracing::{Instrument, debug, error, info_span};

use crate::{
    config::ExecutionMode,
    context::EngineContext,
    error::RunError,
    layout::Candidate,
    session::{ActiveAppliance, AppliancePool},
    submission::{SubmitFailure, submit},
    throttle::ThrottleGuard,
    types::SubmissionKey,
};

/// Cursor over a pool of `len` members. Advances once per call, wrapping.
#[derive(Debug, Clone, Copy)]
pub struct RoundRobin {
    cursor: usize,
    len: usize,
}

impl RoundRobin {
    pub fn new(len: usize) -> Self {
        Self { cursor: 0, len }
    }

    pub fn next_index(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let index = self.cursor % self.len;
        self.cursor = self.cursor.wrapping_add(1);
        Some(index)
    }
}

/// Pairs each candidate with a pool index, in candidate order.
pub fn assign(
    candidates: Vec<Candidate>,
    pool_len: usize,
) -> Vec<(usize, Candidate)> {
    let mut cursor = RoundRobin::new(pool_len);
    candidates
        .into_iter()
        .filter_map(|candidate| {
            cursor.next_index().map(|index| (index, candidate))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub submitted: usize,
    pub dropped: usize,
    pub deferred: usize,
    pub failed: usize,
    pub orphaned: usize,
}

impl AddAssign for DispatchReport {
    fn add_assign(&mut self, rhs: Self) {
        self.attempted += rhs.attempted;
        self.submitted += rhs.submitted;
        self.dropped += rhs.dropped;
        self.deferred += rhs.deferred;
        self.failed += rhs.failed;
        self.orphaned += rhs.orphaned;
    }
}

/// Sends every candidate to its assigned appliance. Each appliance's queue is
/// processed in order; in per-appliance mode the queues run concurrently.
pub async fn dispatch(
    ctx: &EngineContext,
    pool: &AppliancePool,
    candidates: Vec<Candidate>,
) -> Result<DispatchReport, RunError> {
    if pool.is_empty() {
        return Err(RunError::NoActiveAppliances);
    }

    let assignments = assign(candidates, pool.len());
    let mut report = DispatchReport::default();

    match ctx.config().execution {
        ExecutionMode::Sequential => {
            for (index, candidate) in &assignments {
                if let Some(target) = pool.get(*index) {
                    report += dispatch_one(ctx, target, candidate).await;
                }
            }
        }
        ExecutionMode::PerAppliance => {
            let mut queues: Vec<Vec<&Candidate>> = vec![Vec::new(); pool.len()];
            for (index, candidate) in &assignments {
                queues[*index].push(candidate);
            }

            let tasks = pool.iter().zip(queues).map(|(target, queue)| {
                let span = info_span!(
                    "dispatch",
                    appliance = %target.id(),
                    queued = queue.len()
                );
                async move {
                    let mut partial = DispatchReport::default();
                    for candidate in queue {
                        partial += dispatch_one(ctx, target, candidate).await;
                    }
                    partial
                }
                .instrument(span)
            });

            for partial in join_all(tasks).await {
                report += partial;
            }
        }
    }

    Ok(report)
}

async fn dispatch_one(
    ctx: &EngineContext,
    target: &ActiveAppliance,
    candidate: &Candidate,
) -> DispatchReport {
    let mut report = DispatchReport {
        attempted: 1,
        ..DispatchReport::default()
    };
    let path = candidate.path.as_path();

    let hash = match ctx.hasher().hash_file(path).await {
        Ok(hash) => hash,
        Err(err) => {
            error!(
                path = %path.display(),
                error = %err,
                "failed to hash file; left in place"
            );
            report.failed = 1;
            return report;
        }
    };
    debug!(
        path = %path.display(),
        hash = %hash,
        appliance = %target.id(),
        "assigned"
    );

    let key = SubmissionKey::new(
        hash,
        candidate.profile.clone(),
        target.id().clone(),
    );
    let guard =
        ThrottleGuard::new(ctx.ledger(), ctx.config().throttle.cooldown);
    let decision = match guard.apply(&key, path, Utc::now()).await {
        Ok(decision) => decision,
        Err(err) => {
            error!(
                identity = %key,
                path = %path.display(),
                error = %err,
                "ledger lookup failed; file left in place"
            );
            report.failed = 1;
            return report;
        }
    };
    if !decision.should_submit() {
        report.dropped = 1;
        return report;
    }

    match submit(ctx, target, path, &candidate.profile, key.hash).await {
        Ok(_) => report.submitted = 1,
        Err(SubmitFailure::Rejected(_)) => report.failed = 1,
        Err(SubmitFailure::Deferred { .. }) => report.deferred = 1,
        Err(
            SubmitFailure::OrphanedMove { .. }
            | SubmitFailure::OrphanedRecord { .. },
        ) => report.orphaned = 1,
    }
    report
}

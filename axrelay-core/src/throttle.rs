//! Deduplication and cool-down enforcement in front of every submission.

use std::{fmt, path::Path};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, warn};

use crate::{
    error::LedgerError,
    ledger::SubmissionLedger,
    types::{AnalysisId, ResultState, SubmissionKey, SubmissionRecord},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// First time this identity is seen.
    Submit,
    /// Seen before, cool-down elapsed.
    Reanalyze { previous: ResultState },
    /// An analysis is already in flight for this identity.
    DropInFlight { analysis_id: AnalysisId },
    /// Analysed too recently.
    DropCoolingDown { eligible_at: DateTime<Utc> },
}

impl ThrottleDecision {
    pub fn should_submit(&self) -> bool {
        matches!(
            self,
            ThrottleDecision::Submit | ThrottleDecision::Reanalyze { .. }
        )
    }

    /// Pure decision over the most recent record for an identity.
    pub fn decide(
        latest: Option<&SubmissionRecord>,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Self {
        let Some(record) = latest else {
            return ThrottleDecision::Submit;
        };
        if record.is_pending() {
            return ThrottleDecision::DropInFlight {
                analysis_id: record.analysis_id.clone(),
            };
        }
        let eligible_at = record.submitted_at + cooldown;
        if eligible_at >= now {
            ThrottleDecision::DropCoolingDown { eligible_at }
        } else {
            ThrottleDecision::Reanalyze {
                previous: record.state,
            }
        }
    }
}

#[derive(Clone, Copy)]
pub struct ThrottleGuard<'a> {
    ledger: &'a dyn SubmissionLedger,
    cooldown: Duration,
}

impl fmt::Debug for ThrottleGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleGuard")
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl<'a> ThrottleGuard<'a> {
    pub fn new(ledger: &'a dyn SubmissionLedger, cooldown: Duration) -> Self {
        Self { ledger, cooldown }
    }

    /// Looks up the identity and, when the decision is a drop, deletes the
    /// incoming file. A failed lookup leaves the file untouched.
    pub async fn apply(
        &self,
        key: &SubmissionKey,
        path: &Path,
        now: DateTime<Utc>,
    ) -> Result<ThrottleDecision, LedgerError> {
        let latest = self.ledger.latest_for(key).await?;
        let decision =
            ThrottleDecision::decide(latest.as_ref(), now, self.cooldown);

        match &decision {
            ThrottleDecision::Submit => {
                debug!(identity = %key, path = %path.display(), "new identity");
            }
            ThrottleDecision::Reanalyze { previous } => {
                debug!(
                    identity = %key,
                    previous = %previous,
                    "cool-down elapsed; re-analysing"
                );
            }
            ThrottleDecision::DropInFlight { analysis_id } => {
                warn!(
                    identity = %key,
                    path = %path.display(),
                    analysis_id = %analysis_id,
                    "analysis already in flight; deleting incoming copy"
                );
                remove_incoming(path).await;
            }
            ThrottleDecision::DropCoolingDown { eligible_at } => {
                warn!(
                    identity = %key,
                    path = %path.display(),
                    eligible_at = %eligible_at,
                    "analysed too recently; deleting incoming copy"
                );
                remove_incoming(path).await;
            }
        }
        Ok(decision)
    }
}

async fn remove_incoming(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        error!(
            path = %path.display(),
            error = %err,
            "failed to delete dropped file"
        );
    }
}

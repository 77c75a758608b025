//! Upload of a single file, followed by the local bookkeeping that records it.

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    appliance::FileUpload,
    context::EngineContext,
    error::{LedgerError, SubmissionError},
    layout::{Stage, destination_in, move_into},
    session::ActiveAppliance,
    types::{
        AnalysisId, ContentHash, NewSubmission, Profile, SubmissionKey,
        SubmissionRecord,
    },
};

#[derive(Error, Debug)]
pub enum SubmitFailure {
    /// The appliance did not accept the file; it stays where it was.
    #[error(transparent)]
    Rejected(#[from] SubmissionError),

    /// A pending sample already holds this file name; nothing was uploaded.
    #[error("{} is still awaiting a verdict", .occupied.display())]
    Deferred { occupied: PathBuf },

    /// The appliance accepted the file but it could not be moved to pending.
    #[error(
        "analysis {analysis_id} accepted but file could not be moved: {source}"
    )]
    OrphanedMove {
        analysis_id: AnalysisId,
        #[source]
        source: std::io::Error,
    },

    /// The appliance accepted the file but no ledger record was written.
    #[error("analysis {analysis_id} accepted but not recorded: {source}")]
    OrphanedRecord {
        analysis_id: AnalysisId,
        #[source]
        source: LedgerError,
    },
}

/// Submits `path` to `target` and, on acceptance, moves it into the
/// profile's pending directory and inserts a pending record.
pub async fn submit(
    ctx: &EngineContext,
    target: &ActiveAppliance,
    path: &Path,
    profile: &Profile,
    hash: ContentHash,
) -> Result<SubmissionRecord, SubmitFailure> {
    let pending_dir = ctx.config().layout.stage_dir(profile, Stage::Pending);
    let occupied = destination_in(path, &pending_dir)
        .map_err(|source| io_failure(path, source))?;
    match tokio::fs::try_exists(&occupied).await {
        Ok(false) => {}
        Ok(true) => {
            warn!(
                appliance = %target.id(),
                profile = %profile,
                path = %path.display(),
                "a pending sample has the same name; left in place"
            );
            return Err(SubmitFailure::Deferred { occupied });
        }
        Err(source) => return Err(io_failure(&occupied, source)),
    }

    let upload = FileUpload {
        path,
        profile,
        options: &ctx.config().submission,
    };

    let analysis_id = match ctx
        .api()
        .submit_file(&target.appliance, &target.token, upload)
        .await
    {
        Ok(id) => id,
        Err(err) => {
            warn!(
                appliance = %target.id(),
                profile = %profile,
                path = %path.display(),
                error = %err,
                "submission rejected; file left in place"
            );
            return Err(err.into());
        }
    };
    let submitted_at = Utc::now();
    info!(
        appliance = %target.id(),
        profile = %profile,
        path = %path.display(),
        analysis_id = %analysis_id,
        "file submitted"
    );

    let pending_path = match move_into(path, &pending_dir).await {
        Ok(moved) => moved,
        Err(source) => {
            error!(
                appliance = %target.id(),
                analysis_id = %analysis_id,
                path = %path.display(),
                error = %source,
                "orphaned remote analysis: file could not be moved to pending"
            );
            return Err(SubmitFailure::OrphanedMove {
                analysis_id,
                source,
            });
        }
    };

    let key = SubmissionKey::new(hash, profile.clone(), target.id().clone());
    let submission = NewSubmission {
        key,
        path: pending_path,
        analysis_id: analysis_id.clone(),
        submitted_at,
    };
    match ctx.ledger().insert_pending(submission).await {
        Ok(record) => Ok(record),
        Err(source) => {
            error!(
                appliance = %target.id(),
                analysis_id = %analysis_id,
                error = %source,
                "orphaned remote analysis: pending record could not be written"
            );
            Err(SubmitFailure::OrphanedRecord {
                analysis_id,
                source,
            })
        }
    }
}

fn io_failure(path: &Path, source: std::io::Error) -> SubmitFailure {
    SubmitFailure::Rejected(SubmissionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::types::SubmissionKey;

/// Login failures. None of these abort a run; the appliance is dropped from
/// the pool instead.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("web services API is not enabled on the appliance")]
    ServiceDisabled,

    #[error("login failed: {0}")]
    Unclassified(String),
}

/// Logout failures; always logged, never escalated.
#[derive(Error, Debug)]
pub enum SessionCloseError {
    #[error("logout returned unexpected status {0}")]
    UnexpectedStatus(StatusCode),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("appliance rejected submission parameters: {0}")]
    InvalidParameters(String),

    #[error("submission returned unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("submission response could not be understood: {0}")]
    MalformedResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Status and result query failures. The record stays pending.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("session token rejected (not logged in)")]
    Unauthorized,

    #[error("analysis id unknown to the appliance")]
    NotFound,

    #[error("result still processing")]
    StillProcessing,

    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Generic appliance call failure for operations outside the run loop.
#[derive(Error, Debug)]
pub enum ApplianceError {
    #[error("session token rejected (not logged in)")]
    Unauthorized,

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("no pending record matches {0}")]
    NoPendingRecord(SubmissionKey),
}

/// Failures that end a run early.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("no appliance accepted a session; nothing to dispatch to")]
    NoActiveAppliances,

    #[error("resolved verdict for {key} could not be recorded: {source}")]
    VerdictLost {
        key: SubmissionKey,
        #[source]
        source: LedgerError,
    },
}

pub type Result<T, E = RunError> = std::result::Result<T, E>;

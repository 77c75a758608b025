//! Durable submission ledger.
//!
//! Every other component reads and writes submission state through the
//! [`SubmissionLedger`] port; [`SqliteSubmissionLedger`] is the shipped
//! adapter.

use async_trait::async_trait;

use crate::{
    error::LedgerError,
    types::{
        ApplianceId, NewSubmission, Resolution, ResultState, SubmissionKey,
        SubmissionRecord,
    },
};

pub mod sqlite;

pub use sqlite::SqliteSubmissionLedger;

#[async_trait]
pub trait SubmissionLedger: Send + Sync {
    /// Most recent record for the identity, if any.
    async fn latest_for(&self, key: &SubmissionKey)
    -> Result<Option<SubmissionRecord>, LedgerError>;

    async fn insert_pending(
        &self,
        submission: NewSubmission,
    ) -> Result<SubmissionRecord, LedgerError>;

    /// Pending records for one appliance, oldest first.
    async fn pending_for(
        &self,
        appliance: &ApplianceId,
    ) -> Result<Vec<SubmissionRecord>, LedgerError>;

    /// Moves the pending record for `key` to its terminal state. Returns the
    /// number of rows changed; rows that already left `Pending` never match.
    async fn resolve(
        &self,
        key: &SubmissionKey,
        resolution: &Resolution,
    ) -> Result<u64, LedgerError>;

    async fn state_counts(
        &self,
    ) -> Result<Vec<(ResultState, u64)>, LedgerError>;
}

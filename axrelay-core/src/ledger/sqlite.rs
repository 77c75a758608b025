use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use tracing::debug;

use super::SubmissionLedger;
use crate::{
    MIGRATOR,
    error::LedgerError,
    types::{
        AnalysisId, ApplianceId, ContentHash, NewSubmission, Profile,
        Resolution, ResultState, SubmissionKey, SubmissionRecord,
    },
};

const RECORD_COLUMNS: &str = r#"
    id,
    hash,
    filename,
    profile,
    submitted_at,
    completed_at,
    appliance,
    analysis_id,
    result,
    threat_names,
    detail_url
"#;

/// SQLite-backed ledger. The pool holds a single connection so writes are
/// serialized even when appliances are swept concurrently.
#[derive(Debug, Clone)]
pub struct SqliteSubmissionLedger {
    pool: SqlitePool,
}

impl SqliteSubmissionLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (and optionally creates) the database file.
    pub async fn open(
        path: &Path,
        create_if_missing: bool,
    ) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create_if_missing);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        debug!(path = %path.display(), "opened submission ledger");
        Ok(Self::new(pool))
    }

    /// Private in-memory database; used by tests and dry runs.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let ledger = Self::new(pool);
        ledger.migrate().await?;
        Ok(ledger)
    }

    pub async fn migrate(&self) -> Result<(), LedgerError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn map_row(row: &SqliteRow) -> Result<SubmissionRecord, LedgerError> {
        let id: i64 = row.try_get("id")?;
        let hash: String = row.try_get("hash")?;
        let filename: String = row.try_get("filename")?;
        let profile: String = row.try_get("profile")?;
        let submitted_at: DateTime<Utc> = row.try_get("submitted_at")?;
        let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at")?;
        let appliance: String = row.try_get("appliance")?;
        let analysis_id: String = row.try_get("analysis_id")?;
        let result: String = row.try_get("result")?;
        let threat_names: String = row.try_get("threat_names")?;
        let detail_url: Option<String> = row.try_get("detail_url")?;

        let state = ResultState::from_str(&result)
            .map_err(|e| LedgerError::Corrupt(format!("row {id}: {e}")))?;
        let threat_names: Vec<String> = serde_json::from_str(&threat_names)?;

        Ok(SubmissionRecord {
            id,
            hash: ContentHash::new(hash),
            path: PathBuf::from(filename),
            profile: Profile::new(profile),
            submitted_at,
            completed_at,
            appliance: ApplianceId::new(appliance),
            analysis_id: AnalysisId::new(analysis_id),
            state,
            threat_names,
            detail_url,
        })
    }
}

#[async_trait]
impl SubmissionLedger for SqliteSubmissionLedger {
    async fn latest_for(
        &self,
        key: &SubmissionKey,
    ) -> Result<Option<SubmissionRecord>, LedgerError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM submissions \
             WHERE hash = ?1 AND profile = ?2 AND appliance = ?3 \
             ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(key.hash.as_str())
            .bind(key.profile.as_str())
            .bind(key.appliance.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn insert_pending(
        &self,
        submission: NewSubmission,
    ) -> Result<SubmissionRecord, LedgerError> {
        let query = format!(
            "INSERT INTO submissions \
             (hash, filename, profile, submitted_at, appliance, \
              analysis_id, result, threat_names) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', '[]') \
             RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(submission.key.hash.as_str())
            .bind(submission.path.to_string_lossy().into_owned())
            .bind(submission.key.profile.as_str())
            .bind(submission.submitted_at)
            .bind(submission.key.appliance.as_str())
            .bind(submission.analysis_id.as_str())
            .fetch_one(&self.pool)
            .await?;

        Self::map_row(&row)
    }

    async fn pending_for(
        &self,
        appliance: &ApplianceId,
    ) -> Result<Vec<SubmissionRecord>, LedgerError> {
        let query = format!(
            "SELECT {RECORD_COLUMNS} FROM submissions \
             WHERE appliance = ?1 AND result = 'pending' \
             ORDER BY id ASC"
        );
        let rows = sqlx::query(&query)
            .bind(appliance.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn resolve(
        &self,
        key: &SubmissionKey,
        resolution: &Resolution,
    ) -> Result<u64, LedgerError> {
        if !resolution.state.is_terminal() {
            return Err(LedgerError::Corrupt(format!(
                "refusing to resolve {key} back to pending"
            )));
        }
        let threat_names = serde_json::to_string(&resolution.threat_names)?;

        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET filename = ?1,
                completed_at = ?2,
                result = ?3,
                threat_names = ?4,
                detail_url = ?5
            WHERE hash = ?6
              AND profile = ?7
              AND appliance = ?8
              AND result = 'pending'
            "#,
        )
        .bind(resolution.path.to_string_lossy().into_owned())
        .bind(resolution.completed_at)
        .bind(resolution.state.as_str())
        .bind(threat_names)
        .bind(resolution.detail_url.as_deref())
        .bind(key.hash.as_str())
        .bind(key.profile.as_str())
        .bind(key.appliance.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn state_counts(
        &self,
    ) -> Result<Vec<(ResultState, u64)>, LedgerError> {
        let rows = sqlx::query(
            "SELECT result, COUNT(*) AS total FROM submissions GROUP BY result",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts: Vec<(ResultState, u64)> =
            ResultState::ALL.iter().map(|state| (*state, 0)).collect();
        for row in rows {
            let result: String = row.try_get("result")?;
            let total: i64 = row.try_get("total")?;
            let state = ResultState::from_str(&result)
                .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
            if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == state) {
                slot.1 = total.max(0) as u64;
            }
        }
        Ok(counts)
    }
}

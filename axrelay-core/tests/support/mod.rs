#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axrelay_core::{
    appliance::{
        Appliance, ApplianceApi, Credentials, FileUpload, SessionToken,
        SubmissionStatus, VerdictDocument,
    },
    config::{EngineConfig, ExecutionMode},
    context::EngineContext,
    engine::Engine,
    error::{
        ApplianceError, AuthError, LedgerError, PollError, SessionCloseError,
        SubmissionError,
    },
    hashing::{HashAlgorithm, hasher_for},
    layout::{DirectoryLayout, StageDirs},
    ledger::{SqliteSubmissionLedger, SubmissionLedger},
    types::{
        AnalysisId, ApplianceId, NewSubmission, Profile, Resolution,
        ResultState, SubmissionKey, SubmissionRecord,
    },
};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Mutex;

pub const PROFILE: &str = "win7";

/// One accepted upload as the fake appliance saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub appliance: ApplianceId,
    pub file_name: String,
    pub profile: String,
    pub analysis_id: AnalysisId,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    uploads: Vec<Upload>,
    statuses: HashMap<AnalysisId, SubmissionStatus>,
    results: HashMap<AnalysisId, VerdictDocument>,
    logins: Vec<ApplianceId>,
    logouts: Vec<ApplianceId>,
}

/// In-memory appliance pool. Every appliance accepts logins unless listed in
/// `refuse_login`, and every upload unless listed in `reject_uploads`.
#[derive(Debug, Default)]
pub struct FakeAppliances {
    refuse_login: HashSet<ApplianceId>,
    reject_uploads: HashSet<ApplianceId>,
    state: Mutex<FakeState>,
}

impl FakeAppliances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing(mut self, id: &str) -> Self {
        self.refuse_login.insert(ApplianceId::from(id));
        self
    }

    pub fn rejecting_uploads(mut self, id: &str) -> Self {
        self.reject_uploads.insert(ApplianceId::from(id));
        self
    }

    pub async fn uploads(&self) -> Vec<Upload> {
        self.state.lock().await.uploads.clone()
    }

    pub async fn logouts(&self) -> Vec<ApplianceId> {
        self.state.lock().await.logouts.clone()
    }

    pub async fn upload_of(&self, file_name: &str) -> Option<Upload> {
        self.state
            .lock()
            .await
            .uploads
            .iter()
            .rev()
            .find(|u| u.file_name == file_name)
            .cloned()
    }

    pub async fn set_status(&self, id: &AnalysisId, status: SubmissionStatus) {
        self.state.lock().await.statuses.insert(id.clone(), status);
    }

    pub async fn complete(&self, id: &AnalysisId, document: VerdictDocument) {
        let mut state = self.state.lock().await;
        state.statuses.insert(id.clone(), SubmissionStatus::Done);
        state.results.insert(id.clone(), document);
    }
}

#[async_trait]
impl ApplianceApi for FakeAppliances {
    async fn authenticate(
        &self,
        appliance: &Appliance,
        _credentials: &Credentials,
    ) -> Result<SessionToken, AuthError> {
        if self.refuse_login.contains(&appliance.id) {
            return Err(AuthError::InvalidCredentials);
        }
        self.state.lock().await.logins.push(appliance.id.clone());
        Ok(SessionToken::new(format!("token-{}", appliance.id)))
    }

    async fn end_session(
        &self,
        appliance: &Appliance,
        _token: &SessionToken,
    ) -> Result<(), SessionCloseError> {
        self.state.lock().await.logouts.push(appliance.id.clone());
        Ok(())
    }

    async fn submit_file(
        &self,
        appliance: &Appliance,
        _token: &SessionToken,
        upload: FileUpload<'_>,
    ) -> Result<AnalysisId, SubmissionError> {
        if self.reject_uploads.contains(&appliance.id) {
            return Err(SubmissionError::InvalidParameters("bad filter".into()));
        }
        if !upload.path.exists() {
            return Err(SubmissionError::Io {
                path: upload.path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let analysis_id = AnalysisId::new(state.next_id.to_string());
        state.uploads.push(Upload {
            appliance: appliance.id.clone(),
            file_name: upload.file_name(),
            profile: upload.profile.to_string(),
            analysis_id: analysis_id.clone(),
        });
        state
            .statuses
            .insert(analysis_id.clone(), SubmissionStatus::InProgress);
        Ok(analysis_id)
    }

    async fn submission_status(
        &self,
        _appliance: &Appliance,
        _token: &SessionToken,
        analysis_id: &AnalysisId,
    ) -> Result<SubmissionStatus, PollError> {
        Ok(self
            .state
            .lock()
            .await
            .statuses
            .get(analysis_id)
            .cloned()
            .unwrap_or(SubmissionStatus::NotFound))
    }

    async fn submission_result(
        &self,
        _appliance: &Appliance,
        _token: &SessionToken,
        analysis_id: &AnalysisId,
    ) -> Result<VerdictDocument, PollError> {
        self.state
            .lock()
            .await
            .results
            .get(analysis_id)
            .cloned()
            .ok_or(PollError::StillProcessing)
    }

    async fn appliance_config(
        &self,
        appliance: &Appliance,
        _token: &SessionToken,
    ) -> Result<serde_json::Value, ApplianceError> {
        Ok(json!({ "appliance": appliance.id.as_str() }))
    }
}

/// Ledger that loses every terminal update.
#[derive(Debug)]
pub struct LosingLedger {
    inner: SqliteSubmissionLedger,
}

impl LosingLedger {
    pub fn new(inner: SqliteSubmissionLedger) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SubmissionLedger for LosingLedger {
    async fn latest_for(
        &self,
        key: &SubmissionKey,
    ) -> Result<Option<SubmissionRecord>, LedgerError> {
        self.inner.latest_for(key).await
    }

    async fn insert_pending(
        &self,
        submission: NewSubmission,
    ) -> Result<SubmissionRecord, LedgerError> {
        self.inner.insert_pending(submission).await
    }

    async fn pending_for(
        &self,
        appliance: &ApplianceId,
    ) -> Result<Vec<SubmissionRecord>, LedgerError> {
        self.inner.pending_for(appliance).await
    }

    async fn resolve(
        &self,
        _key: &SubmissionKey,
        _resolution: &Resolution,
    ) -> Result<u64, LedgerError> {
        Ok(0)
    }

    async fn state_counts(
        &self,
    ) -> Result<Vec<(ResultState, u64)>, LedgerError> {
        self.inner.state_counts().await
    }
}

/// Temporary queue directory plus the engine wiring around it.
pub struct Harness {
    pub dir: TempDir,
    pub api: Arc<FakeAppliances>,
    pub ledger: Arc<SqliteSubmissionLedger>,
    pub config: EngineConfig,
}

impl Harness {
    pub async fn new(appliances: &[&str], api: FakeAppliances) -> Result<Self> {
        let dir =
            tempfile::tempdir().context("failed to create queue directory")?;
        let layout = DirectoryLayout::new(
            dir.path(),
            vec![Profile::from(PROFILE)],
            StageDirs::default(),
        );
        for path in layout.all_dirs() {
            std::fs::create_dir_all(&path).with_context(|| {
                format!("failed to create {}", path.display())
            })?;
        }
        let appliances = appliances
            .iter()
            .map(|id| Appliance::new(*id, format!("{id}.lab.local")))
            .collect();

        Ok(Self {
            dir,
            api: Arc::new(api),
            ledger: Arc::new(SqliteSubmissionLedger::in_memory().await?),
            config: EngineConfig::new(appliances, layout),
        })
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.config = self.config.with_execution(execution);
        self
    }

    pub fn engine(&self) -> Engine {
        self.engine_with_ledger(self.ledger.clone())
    }

    pub fn engine_with_ledger(
        &self,
        ledger: Arc<dyn SubmissionLedger>,
    ) -> Engine {
        Engine::new(EngineContext::new(
            self.config.clone(),
            ledger,
            self.api.clone(),
            hasher_for(HashAlgorithm::Md5),
            Credentials::new("analyst", "secret"),
        ))
    }

    pub fn incoming(&self) -> PathBuf {
        self.dir.path().join(PROFILE)
    }

    pub fn stage(&self, name: &str) -> PathBuf {
        self.incoming().join(name)
    }

    pub fn drop_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.incoming().join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub async fn records(&self) -> Result<Vec<SubmissionRecord>> {
        let mut all = Vec::new();
        for appliance in &self.config.appliances {
            all.extend(self.ledger.pending_for(&appliance.id).await?);
        }
        Ok(all)
    }

    pub async fn total_records(&self) -> Result<u64> {
        Ok(self
            .ledger
            .state_counts()
            .await?
            .iter()
            .map(|(_, count)| count)
            .sum())
    }
}

pub fn md5_hex(bytes: &[u8]) -> String {
    hasher_for(HashAlgorithm::Md5)
        .hash_bytes(bytes)
        .as_str()
        .to_string()
}

pub fn verdict(severity: &str, threat: &str, md5: &str) -> VerdictDocument {
    serde_json::from_value(json!({
        "alert": [{
            "alert-url": format!("https://ax.lab.local/alerts/{threat}"),
            "severity": severity,
            "explanation": {
                "malware-detected": {
                    "malware": [{ "name": threat, "md5sum": md5 }]
                }
            }
        }]
    }))
    .expect("verdict fixture")
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

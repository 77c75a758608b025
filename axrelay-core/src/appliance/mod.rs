//! Remote analysis appliances: the model, the [`ApplianceApi`] port and its
//! HTTP adapter.

use std::{fmt, path::Path};

use async_trait::async_trait;
use serde::Serialize;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    config::SubmissionOptions,
    error::{
        ApplianceError, AuthError, PollError, SessionCloseError,
        SubmissionError,
    },
    types::{AnalysisId, ApplianceId, Profile},
};

pub mod endpoints;
pub mod http;
pub mod verdict;

pub use endpoints::{ApiVersion, Endpoint, EndpointResolver, Operation};
pub use http::{HttpApplianceClient, HttpClientConfig};
pub use verdict::{Alert, SeverityCodes, ThreatEntry, VerdictDocument};

/// Header carrying the session token on every authenticated call.
pub const TOKEN_HEADER: &str = "X-FeApi-Token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appliance {
    pub id: ApplianceId,
    pub address: String,
}

impl Appliance {
    pub fn new(id: impl Into<ApplianceId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for Appliance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.address)
    }
}

/// Username/password shared by every appliance in the pool.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Bearer credential scoped to a single appliance.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Status reported for a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    Done,
    InProgress,
    NotFound,
    Unexpected(String),
}

impl SubmissionStatus {
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "Done" => SubmissionStatus::Done,
            "In Progress" => SubmissionStatus::InProgress,
            "Submission not found" => SubmissionStatus::NotFound,
            other => SubmissionStatus::Unexpected(other.to_string()),
        }
    }
}

/// One file upload: the file plus the options it is analysed with.
#[derive(Debug, Clone, Copy)]
pub struct FileUpload<'a> {
    pub path: &'a Path,
    pub profile: &'a Profile,
    pub options: &'a SubmissionOptions,
}

#[derive(Debug, Serialize)]
struct OptionsPayload<'a> {
    application: &'a str,
    timeout: &'a str,
    priority: &'a str,
    profiles: [&'a str; 1],
    analysistype: &'a str,
    force: &'a str,
    prefetch: &'a str,
}

impl FileUpload<'_> {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The `options` form field, as the appliance expects it.
    pub fn options_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&OptionsPayload {
            application: &self.options.application,
            timeout: &self.options.timeout,
            priority: &self.options.priority,
            profiles: [self.profile.as_str()],
            analysistype: &self.options.analysis_type,
            force: &self.options.force,
            prefetch: &self.options.prefetch,
        })
    }
}

/// Operations the engine needs from an appliance.
#[async_trait]
pub trait ApplianceApi: Send + Sync {
    async fn authenticate(
        &self,
        appliance: &Appliance,
        credentials: &Credentials,
    ) -> Result<SessionToken, AuthError>;

    async fn end_session(
        &self,
        appliance: &Appliance,
        token: &SessionToken,
    ) -> Result<(), SessionCloseError>;

    async fn submit_file(
        &self,
        appliance: &Appliance,
        token: &SessionToken,
        upload: FileUpload<'_>,
    ) -> Result<AnalysisId, SubmissionError>;

    async fn submission_status(
        &self,
        appliance: &Appliance,
        token: &SessionToken,
        analysis_id: &AnalysisId,
    ) -> Result<SubmissionStatus, PollError>;

    async fn submission_result(
        &self,
        appliance: &Appliance,
        token: &SessionToken,
        analysis_id: &AnalysisId,
    ) -> Result<VerdictDocument, PollError>;

    async fn appliance_config(
        &self,
        appliance: &Appliance,
        token: &SessionToken,
    ) -> Result<serde_json::Value, ApplianceError>;
}

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header, multipart};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{
    Appliance, ApplianceApi, Credentials, FileUpload, SessionToken,
    SubmissionStatus, TOKEN_HEADER,
    endpoints::{ApiVersion, Endpoint, EndpointResolver, Operation},
    verdict::VerdictDocument,
};
use crate::{
    error::{
        ApplianceError, AuthError, PollError, SessionCloseError,
        SubmissionError,
    },
    types::AnalysisId,
};

/// Transport settings shared by every appliance.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub scheme: String,
    pub port: u16,
    pub timeout: Duration,
    pub verify_tls: bool,
    pub version_overrides: HashMap<Operation, ApiVersion>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            port: 443,
            timeout: Duration::from_secs(60),
            verify_tls: true,
            version_overrides: HashMap::new(),
        }
    }
}

/// reqwest-backed [`ApplianceApi`].
#[derive(Debug, Clone)]
pub struct HttpApplianceClient {
    client: Client,
    resolver: EndpointResolver,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(rename = "submissionStatus")]
    submission_status: String,
}

impl HttpApplianceClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        let resolver = config.version_overrides.into_iter().fold(
            EndpointResolver::new(config.scheme, config.port),
            |resolver, (operation, version)| {
                resolver.with_version(operation, version)
            },
        );

        Ok(Self { client, resolver })
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    fn url(
        &self,
        appliance: &Appliance,
        endpoint: Endpoint<'_>,
    ) -> Result<Url, String> {
        self.resolver
            .resolve(&appliance.address, endpoint)
            .map_err(|e| e.to_string())
    }

    fn authed(builder: RequestBuilder, token: &SessionToken) -> RequestBuilder {
        builder.header(TOKEN_HEADER, token.expose())
    }
}

async fn body_text(response: Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"))
}

/// The submit response is a JSON array whose first element carries `ID`,
/// either as a string or a number.
fn analysis_id_from(body: &serde_json::Value) -> Option<AnalysisId> {
    let id = body.get(0)?.get("ID")?;
    match id {
        serde_json::Value::String(s) if !s.trim().is_empty() => {
            Some(AnalysisId::new(s.trim()))
        }
        serde_json::Value::Number(n) => Some(AnalysisId::new(n.to_string())),
        _ => None,
    }
}

#[async_trait]
impl ApplianceApi for HttpApplianceClient {
    #[instrument(skip_all, fields(appliance = %appliance.id))]
    async fn authenticate(
        &self,
        appliance: &Appliance,
        credentials: &Credentials,
    ) -> Result<SessionToken, AuthError> {
        let url = self
            .url(appliance, Endpoint::Login)
            .map_err(AuthError::Unclassified)?;
        let response = self
            .client
            .post(url)
            .basic_auth(
                &credentials.username,
                Some(credentials.password.as_str()),
            )
            .send()
            .await
            .map_err(|e| AuthError::Unclassified(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .headers()
                .get(TOKEN_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(SessionToken::new)
                .ok_or_else(|| {
                    AuthError::Unclassified(format!(
                        "login succeeded without {TOKEN_HEADER}"
                    ))
                }),
            StatusCode::UNAUTHORIZED => Err(AuthError::InvalidCredentials),
            StatusCode::SERVICE_UNAVAILABLE => Err(AuthError::ServiceDisabled),
            status => Err(AuthError::Unclassified(format!(
                "status {status}: {}",
                body_text(response).await
            ))),
        }
    }

    #[instrument(skip_all, fields(appliance = %appliance.id))]
    async fn end_session(
        &self,
        appliance: &Appliance,
        token: &SessionToken,
    ) -> Result<(), SessionCloseError> {
        let url = self
            .url(appliance, Endpoint::Logout)
            .map_err(SessionCloseError::Transport)?;
        let response = Self::authed(self.client.post(url), token)
            .send()
            .await
            .map_err(|e| SessionCloseError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            status => Err(SessionCloseError::UnexpectedStatus(status)),
        }
    }

    #[instrument(
        skip_all,
        fields(appliance = %appliance.id, path = %upload.path.display())
    )]
    async fn submit_file(
        &self,
        appliance: &Appliance,
        token: &SessionToken,
        upload: FileUpload<'_>,
    ) -> Result<AnalysisId, SubmissionError> {
        let url = self
            .url(appliance, Endpoint::Submit)
            .map_err(SubmissionError::Transport)?;
        let bytes = tokio::fs::read(upload.path)
            .await
            .map_err(|source| SubmissionError::Io {
                path: upload.path.to_path_buf(),
                source,
            })?;
        let options = upload
            .options_json()
            .map_err(|e| SubmissionError::InvalidParameters(e.to_string()))?;
        let file_name = upload.file_name();

        let form = multipart::Form::new()
            .text("filename", file_name.clone())
            .text("options", options)
            .part("file", multipart::Part::bytes(bytes).file_name(file_name));

        let response = Self::authed(self.client.post(url), token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value =
                    response.json().await.map_err(|e| {
                        SubmissionError::MalformedResponse(e.to_string())
                    })?;
                let id = analysis_id_from(&body).ok_or_else(|| {
                    SubmissionError::MalformedResponse(format!(
                        "no submission ID in {body}"
                    ))
                })?;
                debug!(analysis_id = %id, "submission accepted");
                Ok(id)
            }
            StatusCode::BAD_REQUEST => Err(SubmissionError::InvalidParameters(
                body_text(response).await,
            )),
            status => Err(SubmissionError::UnexpectedStatus {
                status,
                body: body_text(response).await,
            }),
        }
    }

    #[instrument(
        skip_all,
        fields(appliance = %appliance.id, analysis_id = %analysis_id)
    )]
    async fn submission_status(
        &self,
        appliance: &Appliance,
        token: &SessionToken,
        analysis_id: &AnalysisId,
    ) -> Result<SubmissionStatus, PollError> {
        let url = self
            .url(appliance, Endpoint::Status(analysis_id))
            .map_err(PollError::Transport)?;
        let response = Self::authed(self.client.get(url), token)
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body: StatusBody = response
                    .json()
                    .await
                    .map_err(|e| PollError::Malformed(e.to_string()))?;
                Ok(SubmissionStatus::from_label(&body.submission_status))
            }
            StatusCode::UNAUTHORIZED => Err(PollError::Unauthorized),
            StatusCode::NOT_FOUND => Ok(SubmissionStatus::NotFound),
            status => Err(PollError::UnexpectedStatus(status)),
        }
    }

    #[instrument(
        skip_all,
        fields(appliance = %appliance.id, analysis_id = %analysis_id)
    )]
    async fn submission_result(
        &self,
        appliance: &Appliance,
        token: &SessionToken,
        analysis_id: &AnalysisId,
    ) -> Result<VerdictDocument, PollError> {
        let url = self
            .url(appliance, Endpoint::Results(analysis_id))
            .map_err(PollError::Transport)?;
        let response = Self::authed(self.client.get(url), token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json::<VerdictDocument>()
                .await
                .map_err(|e| PollError::Malformed(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(PollError::Unauthorized),
            StatusCode::NOT_FOUND => Err(PollError::NotFound),
            StatusCode::INTERNAL_SERVER_ERROR => {
                Err(PollError::StillProcessing)
            }
            status => Err(PollError::UnexpectedStatus(status)),
        }
    }

    #[instrument(skip_all, fields(appliance = %appliance.id))]
    async fn appliance_config(
        &self,
        appliance: &Appliance,
        token: &SessionToken,
    ) -> Result<serde_json::Value, ApplianceError> {
        let url = self
            .url(appliance, Endpoint::Config)
            .map_err(ApplianceError::Transport)?;
        let response = Self::authed(self.client.get(url), token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ApplianceError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| ApplianceError::Malformed(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(ApplianceError::Unauthorized),
            status => Err(ApplianceError::UnexpectedStatus {
                status,
                body: body_text(response).await,
            }),
        }
    }
}

//! Remote transcoder API client

use async_trait::async_trait;
use mediavault_config::TranscoderConfig;
use mediavault_types::RemoteJobState;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::job::JobSpec;
use crate::error::TranscoderError;

/// State of a remote job as last reported by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub name: String,
    pub state: RemoteJobState,
    pub failure_reason: Option<String>,
}

#[async_trait]
pub trait TranscoderClient: Send + Sync {
    async fn create_job(&self, spec: &JobSpec) -> Result<JobStatus, TranscoderError>;

    async fn get_job(&self, name: &str) -> Result<JobStatus, TranscoderError>;

    async fn delete_job(&self, name: &str) -> Result<(), TranscoderError>;
}

#[derive(Debug, Deserialize)]
struct JobResource {
    name: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<JobErrorResource>,
}

#[derive(Debug, Deserialize)]
struct JobErrorResource {
    #[serde(default)]
    message: String,
}

impl From<JobResource> for JobStatus {
    fn from(resource: JobResource) -> Self {
        Self {
            state: resource
                .state
                .as_deref()
                .map(RemoteJobState::parse)
                .unwrap_or(RemoteJobState::Unspecified),
            failure_reason: resource.error.map(|e| e.message).filter(|m| !m.is_empty()),
            name: resource.name,
        }
    }
}

/// REST client for a Transcoder-API style service
pub struct HttpTranscoderClient {
    http: reqwest::Client,
    endpoint: String,
    parent: String,
    access_token: Option<String>,
}

impl HttpTranscoderClient {
    pub fn new(config: &TranscoderConfig) -> Result<Self, TranscoderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| TranscoderError::Request(e.to_string()))?;

        info!(endpoint = %config.endpoint, project = %config.project, "Transcoder client initialized");

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            parent: format!("projects/{}/locations/{}", config.project, config.location),
            access_token: config.access_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, TranscoderError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| TranscoderError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscoderError::Api { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl TranscoderClient for HttpTranscoderClient {
    async fn create_job(&self, spec: &JobSpec) -> Result<JobStatus, TranscoderError> {
        let url = self.url(&format!("{}/jobs", self.parent));
        let response = self.send(self.http.post(&url).json(spec)).await?;
        let resource: JobResource = response
            .json()
            .await
            .map_err(|e| TranscoderError::Request(e.to_string()))?;

        debug!(job_name = %resource.name, "Transcoder job created");
        Ok(resource.into())
    }

    async fn get_job(&self, name: &str) -> Result<JobStatus, TranscoderError> {
        let response = self.send(self.http.get(self.url(name))).await?;
        let resource: JobResource = response
            .json()
            .await
            .map_err(|e| TranscoderError::Request(e.to_string()))?;
        Ok(resource.into())
    }

    async fn delete_job(&self, name: &str) -> Result<(), TranscoderError> {
        self.send(self.http.delete(self.url(name))).await?;
        debug!(job_name = name, "Transcoder job deleted");
        Ok(())
    }
}

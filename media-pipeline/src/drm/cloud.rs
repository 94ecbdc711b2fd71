//! Encryption delegated to a cloud streaming service
//!
//! The service reads the stored original, packages it as CENC-encrypted DASH
//! with the asset's key and writes the manifest and segments next to the
//! original. A stream resource is created and polled until it settles.

use async_trait::async_trait;
use mediavault_config::CloudEncryptionConfig;
use mediavault_types::Cid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ContentEncryptor, EncryptionJob};
use crate::error::{PipelineError, Result};
use crate::storage::{CidHasher, ObjectStorage};

/// Lifecycle of a stream resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Creating,
    Prepared,
    Running,
    Completed,
    InputError,
    Cancelled,
    Failed,
    Unknown(String),
}

impl StreamState {
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase().replace('-', "_");
        match upper.strip_prefix("STREAM_STATE_").unwrap_or(&upper) {
            "CREATING" => StreamState::Creating,
            "PREPARED" => StreamState::Prepared,
            "RUNNING" | "STARTING" => StreamState::Running,
            "COMPLETED" => StreamState::Completed,
            "INPUT_ERROR" => StreamState::InputError,
            "CANCELLED" => StreamState::Cancelled,
            "FAILED" => StreamState::Failed,
            _ => StreamState::Unknown(raw.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateStream<'a> {
    input_uri: String,
    output_uri: String,
    manifest_name: &'a str,
    key_id: String,
    key: String,
    iv: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamResource {
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_message: Option<String>,
}

pub struct CloudEncryptor {
    http: reqwest::Client,
    storage: Arc<dyn ObjectStorage>,
    config: CloudEncryptionConfig,
}

impl CloudEncryptor {
    pub fn new(config: CloudEncryptionConfig, storage: Arc<dyn ObjectStorage>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Encryption(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            storage,
            config,
        })
    }

    fn uri(&self, key: &str) -> String {
        format!("{}/{}", self.config.storage_uri.trim_end_matches('/'), key)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<StreamResource> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| PipelineError::Encryption(format!("stream request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Encryption(format!(
                "stream service returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::Encryption(format!("unreadable stream resource: {}", e)))
    }

    async fn wait_for_stream(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let url = format!("{}/v1/{}", self.config.endpoint.trim_end_matches('/'), name);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }

            let resource = self.send(self.http.get(&url)).await?;
            match StreamState::parse(&resource.state) {
                StreamState::Completed => return Ok(()),
                StreamState::InputError | StreamState::Cancelled | StreamState::Failed => {
                    return Err(PipelineError::Encryption(format!(
                        "stream {} ended in {}: {}",
                        name,
                        resource.state,
                        resource.error_message.unwrap_or_default()
                    )));
                }
                StreamState::Unknown(raw) => {
                    warn!(stream = name, state = %raw, "Unknown stream state");
                }
                state => debug!(stream = name, state = ?state, "Stream in progress"),
            }
        }
    }

    async fn manifest_cid(&self, key: &str) -> Result<Cid> {
        let mut reader = self.storage.obj_reader(key).await?;
        let mut hasher = CidHasher::default();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finish())
    }
}

#[async_trait]
impl ContentEncryptor for CloudEncryptor {
    async fn encrypt(&self, job: &EncryptionJob<'_>, cancel: &CancellationToken) -> Result<Cid> {
        let manifest_name = job
            .names
            .encrypted_key
            .rsplit('/')
            .next()
            .unwrap_or("encrypted.mpd");

        let body = CreateStream {
            input_uri: self.uri(job.original_key),
            output_uri: self.uri(&format!("{}/", job.names.folder)),
            manifest_name,
            key_id: job.metadata.key_id.to_hex(),
            key: job.metadata.key.to_hex(),
            iv: job.metadata.first_iv.to_hex(),
        };
        let url = format!("{}/v1/streams", self.config.endpoint.trim_end_matches('/'));
        let created = self.send(self.http.post(&url).json(&body)).await?;
        info!(folder = %job.names.folder, stream = %created.name, "Cloud encryption stream created");

        self.wait_for_stream(&created.name, cancel).await?;

        let cid = self.manifest_cid(&job.names.encrypted_key).await?;
        info!(folder = %job.names.folder, encrypted_cid = %cid, "Cloud encryption completed");
        Ok(cid)
    }
}

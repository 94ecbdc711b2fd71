//! Source opener - streams staged uploads from local disk, object storage or HTTP(S)
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use futures::TryStreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::storage::{ObjectReader, ObjectStorage};

/// Opens upload sources as byte streams
#[derive(Clone)]
pub struct SourceOpener {
    http: reqwest::Client,
    storage: Arc<dyn ObjectStorage>,
}

impl SourceOpener {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Download(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, storage })
    }

    /// Open `location`: an `http(s)://` URL, an `s3://bucket/key` object in
    /// the configured bucket, or a local path
    pub async fn open(&self, location: &str) -> Result<ObjectReader> {
        if location.starts_with("http://") || location.starts_with("https://") {
            self.open_http(location).await
        } else if location.starts_with("s3://") {
            let (bucket, key) = parse_s3_url(location)?;
            info!(bucket, key, "Opening staged object");
            Ok(self.storage.obj_reader(key).await?)
        } else {
            let path = Path::new(location.strip_prefix("file://").unwrap_or(location));
            let file = tokio::fs::File::open(path).await?;
            Ok(Box::pin(file))
        }
    }

    /// Stream an HTTP(S) response body
    pub async fn open_http(&self, url: &str) -> Result<ObjectReader> {
        info!(url, "Downloading from HTTP/HTTPS");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Download(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Download(format!(
                "HTTP request failed with status: {}",
                response.status()
            )));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::pin(StreamReader::new(stream)))
    }
}

/// Parse S3 URL into bucket and key
pub fn parse_s3_url(s3_url: &str) -> Result<(&str, &str)> {
    let path = s3_url
        .strip_prefix("s3://")
        .ok_or_else(|| PipelineError::Validation(format!("Invalid S3 URL: {}", s3_url)))?;

    match path.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(PipelineError::Validation(format!(
            "S3 URL must include a key: {}",
            s3_url
        ))),
    }
}

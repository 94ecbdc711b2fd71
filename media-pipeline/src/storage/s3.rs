//! S3-compatible object storage
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


use async_trait::async_trait;
use mediavault_config::ObjectStorageConfig;
use mediavault_types::Cid;
use rusoto_core::{request::HttpClient, Region};
use rusoto_credential::StaticProvider;
use rusoto_s3::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CompletedMultipartUpload,
    CompletedPart, CreateMultipartUploadRequest, DeleteObjectRequest, GetObjectRequest,
    PutObjectRequest, S3Client, UploadPartRequest, S3,
};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::{CidHasher, ObjectReader, ObjectStorage};
use crate::error::StorageError;

/// Size of each multipart chunk. S3 requires at least 5 MiB for all parts but
/// the last.
const PART_SIZE: usize = 8 * 1024 * 1024;

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(config: &ObjectStorageConfig) -> Result<Self, StorageError> {
        let credentials =
            StaticProvider::new_minimal(config.access_key.clone(), config.secret_key.clone());

        let region = Region::Custom {
            name: config
                .region
                .clone()
                .unwrap_or_else(|| "us-east-1".to_string()),
            endpoint: Self::extract_endpoint(&config.endpoint),
        };

        let http_client =
            HttpClient::new().map_err(|e| StorageError::Request(format!("HTTP client: {}", e)))?;

        info!(
            endpoint = %config.endpoint,
            bucket = %config.bucket,
            "Initializing S3-compatible object storage"
        );

        Ok(Self {
            client: S3Client::new_with(http_client, credentials, region),
            bucket: config.bucket.clone(),
        })
    }

    fn extract_endpoint(endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", endpoint.trim_start_matches("s3://"))
        }
    }

    /// Fill `buf` from `reader` until it is full or the reader is exhausted
    async fn read_part(reader: &mut ObjectReader, buf: &mut Vec<u8>) -> Result<(), StorageError> {
        buf.clear();
        let mut chunk = vec![0u8; 64 * 1024];
        while buf.len() < PART_SIZE {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    async fn put_single(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object(PutObjectRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                body: Some(body.into()),
                ..Default::default()
            })
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        Ok(())
    }

    async fn multipart(
        &self,
        key: &str,
        first: Vec<u8>,
        reader: &mut ObjectReader,
        hasher: &mut CidHasher,
    ) -> Result<(), StorageError> {
        let created = self
            .client
            .create_multipart_upload(CreateMultipartUploadRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        let upload_id = created
            .upload_id
            .ok_or_else(|| StorageError::Request("multipart upload id missing".to_string()))?;

        match self.upload_parts(key, &upload_id, first, reader, hasher).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload(CompleteMultipartUploadRequest {
                        bucket: self.bucket.clone(),
                        key: key.to_string(),
                        upload_id,
                        multipart_upload: Some(CompletedMultipartUpload { parts: Some(parts) }),
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| StorageError::Request(e.to_string()))?;
                Ok(())
            }
            Err(e) => {
                let abort = self
                    .client
                    .abort_multipart_upload(AbortMultipartUploadRequest {
                        bucket: self.bucket.clone(),
                        key: key.to_string(),
                        upload_id,
                        ..Default::default()
                    })
                    .await;
                if let Err(abort_err) = abort {
                    warn!(key, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        reader: &mut ObjectReader,
        hasher: &mut CidHasher,
    ) -> Result<Vec<CompletedPart>, StorageError> {
        let mut parts = Vec::new();
        let mut part = first;
        let mut part_number = 1i64;

        loop {
            let size = part.len();
            let uploaded = self
                .client
                .upload_part(UploadPartRequest {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                    upload_id: upload_id.to_string(),
                    part_number,
                    content_length: Some(size as i64),
                    body: Some(part.into()),
                    ..Default::default()
                })
                .await
                .map_err(|e| StorageError::Request(e.to_string()))?;

            parts.push(CompletedPart {
                e_tag: uploaded.e_tag,
                part_number: Some(part_number),
            });
            debug!(key, part_number, size, "Uploaded part");

            let mut next = Vec::with_capacity(PART_SIZE);
            Self::read_part(reader, &mut next).await?;
            if next.is_empty() {
                break;
            }
            hasher.update(&next);
            part = next;
            part_number += 1;
        }

        Ok(parts)
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn push_path(&self, key: &str, mut reader: ObjectReader) -> Result<Cid, StorageError> {
        let mut hasher = CidHasher::default();
        let mut first = Vec::with_capacity(PART_SIZE);
        Self::read_part(&mut reader, &mut first).await?;
        hasher.update(&first);

        if first.len() < PART_SIZE {
            self.put_single(key, first).await?;
        } else {
            self.multipart(key, first, &mut reader, &mut hasher).await?;
        }

        let cid = hasher.finish();
        info!(bucket = %self.bucket, key, cid = %cid, "Object stored");
        Ok(cid)
    }

    async fn obj_reader(&self, key: &str) -> Result<ObjectReader, StorageError> {
        let result = self
            .client
            .get_object(GetObjectRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| match e {
                rusoto_core::RusotoError::Service(rusoto_s3::GetObjectError::NoSuchKey(_)) => {
                    StorageError::NotFound(key.to_string())
                }
                other => StorageError::Request(other.to_string()),
            })?;

        let body = result
            .body
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(Box::pin(body.into_async_read()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object(DeleteObjectRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        debug!(bucket = %self.bucket, key, "Object deleted");
        Ok(())
    }
}

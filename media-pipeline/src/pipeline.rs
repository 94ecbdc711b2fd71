//! Per-job processing
//!
//! General uploads: transfer, remote transcode submission, thumbnail, DRM
//! keys, encryption, then waiting for the transcode. YouTube references:
//! the three-way ingest, then DRM keys and encryption. Every successful step
//! is persisted before the next starts. The job ends with the record in
//! `ready` or `failed`; the final status is validated against what is stored
//! at that moment, so a record another task already failed stays failed.
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


use mediavault_config::ToolsConfig;
use mediavault_types::{Asset, AssetStatus, AssetUpdate, ContentCategory, RemoteJobState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::datastore::Datastore;
use crate::downloader::SourceOpener;
use crate::drm::{DrmKeys, Encryption, EncryptionJob};
use crate::error::{PipelineError, TranscoderError};
use crate::job::{Job, JobSource};
use crate::naming::ArtifactNames;
use crate::retry::{upload_with_retry, RetryConfig};
use crate::storage::ObjectStorage;
use crate::tools::{probe_has_audio, ToolRunner};
use crate::transcoder::TranscodeManager;
use crate::transfer::transfer;
use crate::youtube::YoutubeIngest;

/// An error and the step it came from
#[derive(Debug)]
pub struct StageError {
    pub stage: &'static str,
    pub error: PipelineError,
}

type StageResult<T> = std::result::Result<T, StageError>;

trait Stage<T> {
    fn stage(self, stage: &'static str) -> StageResult<T>;
}

impl<T, E: Into<PipelineError>> Stage<T> for std::result::Result<T, E> {
    fn stage(self, stage: &'static str) -> StageResult<T> {
        self.map_err(|e| StageError {
            stage,
            error: e.into(),
        })
    }
}

/// How a job ended
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Ready(Box<Asset>),
    Failed {
        asset_id: Uuid,
        stage: String,
        error: String,
    },
}

impl JobOutcome {
    pub fn asset_id(&self) -> Uuid {
        match self {
            JobOutcome::Ready(asset) => asset.id,
            JobOutcome::Failed { asset_id, .. } => *asset_id,
        }
    }

    pub fn status(&self) -> AssetStatus {
        match self {
            JobOutcome::Ready(_) => AssetStatus::Ready,
            JobOutcome::Failed { .. } => AssetStatus::Failed,
        }
    }
}

/// Shared, long-lived collaborators of every job
pub struct Pipeline {
    datastore: Arc<dyn Datastore>,
    storage: Arc<dyn ObjectStorage>,
    runner: Arc<dyn ToolRunner>,
    opener: SourceOpener,
    transcoder: Option<Arc<TranscodeManager>>,
    youtube: YoutubeIngest,
    encryption: Encryption,
    tools: ToolsConfig,
    retry: RetryConfig,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        datastore: Arc<dyn Datastore>,
        storage: Arc<dyn ObjectStorage>,
        runner: Arc<dyn ToolRunner>,
        opener: SourceOpener,
        transcoder: Option<Arc<TranscodeManager>>,
        youtube: YoutubeIngest,
        encryption: Encryption,
        tools: ToolsConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            datastore,
            storage,
            runner,
            opener,
            transcoder,
            youtube,
            encryption,
            tools,
            retry,
        }
    }

    /// Run `job` to the end. The record is `ready` or `failed` afterwards.
    pub async fn process(&self, job: Job, cancel: &CancellationToken) -> JobOutcome {
        let asset_id = job.asset.id;
        info!(
            asset_id = %asset_id,
            folder = %job.meta.names.folder,
            youtube = job.is_youtube(),
            content_type = %job.meta.content_type,
            "Processing job"
        );

        let result = tokio::select! {
            result = self.run(&job, cancel) => result,
            _ = cancel.cancelled() => Err(StageError { stage: "cancelled", error: PipelineError::Cancelled }),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&job.meta.names.work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(asset_id = %asset_id, error = %e, "Failed to remove job work dir");
            }
        }

        match result {
            Ok(()) => self.finalize(asset_id).await,
            Err(failure) => {
                self.abandon_transcode(asset_id).await;
                self.fail(asset_id, failure).await
            }
        }
    }

    /// Drop the remote transcode job of a failed asset, if one was submitted
    async fn abandon_transcode(&self, asset_id: Uuid) {
        let Some(transcoder) = &self.transcoder else {
            return;
        };
        let asset = match self.datastore.get_asset(asset_id).await {
            Ok(asset) => asset,
            Err(e) => {
                warn!(asset_id = %asset_id, error = %e, "Could not look up failed asset");
                return;
            }
        };
        if let (Some(job_name), Some(original_key)) = (&asset.job_id, &asset.original_key) {
            transcoder.abandon(asset_id, job_name, original_key).await;
        }
    }

    async fn run(&self, job: &Job, cancel: &CancellationToken) -> StageResult<()> {
        tokio::fs::create_dir_all(&job.meta.names.work_dir)
            .await
            .stage("prepare")?;

        match &job.meta.source {
            JobSource::Youtube { video_id } => self.run_youtube(job, video_id, cancel).await,
            JobSource::Upload { location } => self.run_upload(job, location, cancel).await,
        }
    }

    async fn run_upload(&self, job: &Job, location: &str, cancel: &CancellationToken) -> StageResult<()> {
        let asset = &job.asset;
        let names = &job.meta.names;

        let reader = self.opener.open(location).await.stage("transfer")?;
        let original_cid = transfer(self.storage.as_ref(), reader, &names.original_key, &names.original_path)
            .await
            .stage("transfer")?;
        self.update(
            asset.id,
            AssetUpdate {
                original_key: Some(names.original_key.clone()),
                original_cid: Some(original_cid),
                ..Default::default()
            },
        )
        .await
        .stage("transfer")?;

        let transcode_job = match (&self.transcoder, names.category) {
            (Some(transcoder), ContentCategory::Video) => {
                let has_audio = probe_has_audio(self.runner.as_ref(), &self.tools.ffprobe, &names.original_path, cancel)
                    .await
                    .stage("transcode")?;
                let job_name = transcoder
                    .submit(asset, &names.original_path, &names.original_key, has_audio)
                    .await
                    .stage("transcode")?;
                Some((transcoder, job_name))
            }
            _ => None,
        };

        self.thumbnail(asset.id, names, &job.meta.content_type, cancel)
            .await
            .stage("thumbnail")?;
        self.encrypt(asset, names, cancel).await?;

        if let Some((transcoder, job_name)) = transcode_job {
            let state = transcoder
                .await_completion(asset.id, &job_name, cancel)
                .await
                .stage("transcode")?;
            if state == RemoteJobState::Failed {
                return Err(StageError {
                    stage: "transcode",
                    error: TranscoderError::JobFailed(job_name).into(),
                });
            }
        }

        Ok(())
    }

    async fn run_youtube(&self, job: &Job, video_id: &str, cancel: &CancellationToken) -> StageResult<()> {
        let asset = &job.asset;
        let names = &job.meta.names;

        let artifacts = self.youtube.run(video_id, names, cancel).await.stage("youtube")?;
        self.update(
            asset.id,
            AssetUpdate {
                original_key: Some(names.original_key.clone()),
                original_cid: Some(artifacts.original_cid),
                preview_key: Some(names.preview_key.clone()),
                preview_cid: Some(artifacts.preview_cid),
                thumbnail_key: Some(names.thumbnail_key.clone()),
                thumbnail_cid: Some(artifacts.thumbnail_cid),
                ..Default::default()
            },
        )
        .await
        .stage("youtube")?;

        self.encrypt(asset, names, cancel).await
    }

    /// Thumbnail of a video frame or a scaled-down image; other content has none
    async fn thumbnail(
        &self,
        asset_id: Uuid,
        names: &ArtifactNames,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let scale = format!("scale={}:-2", self.tools.thumbnail_width);
        let args = match names.category {
            ContentCategory::Video => crate::args![
                "-y",
                "-ss",
                self.tools.thumbnail_offset,
                "-i",
                names.original_path.display(),
                "-vframes",
                "1",
                "-vf",
                scale,
                names.thumbnail_path.display(),
            ],
            ContentCategory::File if content_type.starts_with("image/") => crate::args![
                "-y",
                "-i",
                names.original_path.display(),
                "-vf",
                scale,
                names.thumbnail_path.display(),
            ],
            _ => {
                debug!(asset_id = %asset_id, category = ?names.category, "No thumbnail for category");
                return Ok(());
            }
        };

        self.runner.run(&self.tools.ffmpeg, &args, cancel).await?;
        let thumbnail_cid =
            upload_with_retry(self.storage.as_ref(), &self.retry, &names.thumbnail_path, &names.thumbnail_key).await?;

        self.update(
            asset_id,
            AssetUpdate {
                thumbnail_key: Some(names.thumbnail_key.clone()),
                thumbnail_cid: Some(thumbnail_cid),
                ..Default::default()
            },
        )
        .await
    }

    async fn encrypt(&self, asset: &Asset, names: &ArtifactNames, cancel: &CancellationToken) -> StageResult<()> {
        let owner = self
            .datastore
            .get_account_by_id(asset.owner_id)
            .await
            .stage("drm")?;
        let keys = DrmKeys::for_owner(&owner).stage("drm")?;
        self.update(asset.id, keys.to_update()).await.stage("drm")?;

        let job = EncryptionJob {
            names,
            metadata: &keys.metadata,
            source: &names.original_path,
            original_key: &names.original_key,
        };
        let encrypted_cid = self.encryption.encrypt(&job, cancel).await.stage("encrypt")?;

        self.update(
            asset.id,
            AssetUpdate {
                encrypted_key: Some(names.encrypted_key.clone()),
                encrypted_cid: Some(encrypted_cid),
                ..Default::default()
            },
        )
        .await
        .stage("encrypt")
    }

    async fn update(&self, asset_id: Uuid, update: AssetUpdate) -> Result<(), PipelineError> {
        self.datastore.update_asset(asset_id, update).await?;
        Ok(())
    }

    async fn finalize(&self, asset_id: Uuid) -> JobOutcome {
        match self.datastore.mark_asset_status(asset_id, AssetStatus::Ready).await {
            Ok(_) => match self.datastore.get_asset(asset_id).await {
                Ok(asset) => {
                    info!(asset_id = %asset_id, "Asset ready");
                    JobOutcome::Ready(Box::new(asset))
                }
                Err(e) => self
                    .fail(asset_id, StageError { stage: "finalize", error: e.into() })
                    .await,
            },
            Err(e) => {
                // Typically a sibling task has already failed the record
                warn!(asset_id = %asset_id, error = %e, "Asset could not be marked ready");
                self.fail(asset_id, StageError { stage: "finalize", error: e.into() })
                    .await
            }
        }
    }

    async fn fail(&self, asset_id: Uuid, failure: StageError) -> JobOutcome {
        error!(
            asset_id = %asset_id,
            stage = failure.stage,
            error = %failure.error,
            "Job failed"
        );
        if let Err(e) = self.datastore.mark_asset_status(asset_id, AssetStatus::Failed).await {
            error!(asset_id = %asset_id, error = %e, "Failed to mark asset failed");
        }
        JobOutcome::Failed {
            asset_id,
            stage: failure.stage.to_string(),
            error: failure.error.to_string(),
        }
    }
}

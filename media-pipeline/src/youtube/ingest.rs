//! YouTube ingestion: three sub-jobs under one cancellation scope
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


use mediavault_types::Cid;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::resolver::{VideoFormat, VideoInfo, YoutubeResolver};
use super::select;
use crate::downloader::SourceOpener;
use crate::error::{PipelineError, Result, ToolError, YoutubeError};
use crate::naming::ArtifactNames;
use crate::retry::{upload_with_retry, RetryConfig};
use crate::storage::ObjectStorage;
use crate::tools::ToolRunner;
use crate::transfer::transfer;

/// CIDs of the three uploaded artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YoutubeArtifacts {
    pub original_cid: Cid,
    pub preview_cid: Cid,
    pub thumbnail_cid: Cid,
}

type VideoPicker = fn(&VideoInfo) -> std::result::Result<&VideoFormat, YoutubeError>;

pub struct YoutubeIngest {
    resolver: Arc<dyn YoutubeResolver>,
    runner: Arc<dyn ToolRunner>,
    storage: Arc<dyn ObjectStorage>,
    opener: SourceOpener,
    ffmpeg: String,
    retry: RetryConfig,
}

/// Whether an error only reports that the scope was cancelled
fn is_cancellation(error: &PipelineError) -> bool {
    matches!(
        error,
        PipelineError::Cancelled | PipelineError::Tool(ToolError::Cancelled { .. })
    )
}

/// Run one sub-job inside the shared scope. A failure cancels the scope.
async fn scoped<T>(
    scope: &CancellationToken,
    stage: &'static str,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    let result = tokio::select! {
        result = work => result,
        _ = scope.cancelled() => Err(PipelineError::Cancelled),
    };

    if let Err(e) = &result {
        if !is_cancellation(e) {
            warn!(stage, error = %e, "YouTube sub-job failed, cancelling siblings");
        }
        scope.cancel();
    }
    result
}

impl YoutubeIngest {
    pub fn new(
        resolver: Arc<dyn YoutubeResolver>,
        runner: Arc<dyn ToolRunner>,
        storage: Arc<dyn ObjectStorage>,
        opener: SourceOpener,
        ffmpeg: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            resolver,
            runner,
            storage,
            opener,
            ffmpeg: ffmpeg.into(),
            retry,
        }
    }

    /// Produce and upload the original, preview and thumbnail of `video_id`.
    ///
    /// The first failing sub-job cancels the other two and its error is
    /// returned; errors caused only by that cancellation are not.
    pub async fn run(
        &self,
        video_id: &str,
        names: &ArtifactNames,
        cancel: &CancellationToken,
    ) -> Result<YoutubeArtifacts> {
        let info = self.resolver.get_video(video_id).await?;
        tokio::fs::create_dir_all(&names.work_dir).await?;

        let scope = cancel.child_token();
        let (original, preview, thumbnail) = tokio::join!(
            scoped(
                &scope,
                "original",
                self.mux_and_upload(&info, select::original_video, &names.original_path, &names.original_key, &scope),
            ),
            scoped(
                &scope,
                "preview",
                self.mux_and_upload(&info, select::preview_video, &names.preview_path, &names.preview_key, &scope),
            ),
            scoped(&scope, "thumbnail", self.fetch_thumbnail(&info, names)),
        );

        match (original, preview, thumbnail) {
            (Ok(original_cid), Ok(preview_cid), Ok(thumbnail_cid)) => {
                info!(video_id, folder = %names.folder, "YouTube artifacts uploaded");
                Ok(YoutubeArtifacts {
                    original_cid,
                    preview_cid,
                    thumbnail_cid,
                })
            }
            (original, preview, thumbnail) => {
                let errors = [original.err(), preview.err(), thumbnail.err()];
                let mut fallback = None;
                for error in errors.into_iter().flatten() {
                    if !is_cancellation(&error) {
                        return Err(error);
                    }
                    fallback.get_or_insert(error);
                }
                Err(fallback.unwrap_or(PipelineError::Cancelled))
            }
        }
    }

    async fn mux_and_upload(
        &self,
        info: &VideoInfo,
        pick: VideoPicker,
        output: &Path,
        key: &str,
        scope: &CancellationToken,
    ) -> Result<Cid> {
        let video = pick(info)?;
        let audio = select::audio(info)?;
        let video_url = self.resolver.stream_url(info, video).await?;
        let audio_url = self.resolver.stream_url(info, audio).await?;

        info!(
            video_id = %info.id,
            video_format = %video.format_id,
            audio_format = %audio.format_id,
            key,
            "Muxing YouTube streams"
        );

        let args = crate::args![
            "-y",
            "-i",
            video_url,
            "-i",
            audio_url,
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
            "-c",
            "copy",
            "-movflags",
            "+faststart",
            output.display(),
        ];
        self.runner.run(&self.ffmpeg, &args, scope).await?;

        Ok(upload_with_retry(self.storage.as_ref(), &self.retry, output, key).await?)
    }

    async fn fetch_thumbnail(&self, info: &VideoInfo, names: &ArtifactNames) -> Result<Cid> {
        let thumbnail = select::thumbnail(info)?;
        let reader = self.opener.open_http(&thumbnail.url).await?;
        Ok(transfer(
            self.storage.as_ref(),
            reader,
            &names.thumbnail_key,
            &names.thumbnail_path,
        )
        .await?)
    }
}

//! Local encryption with ffmpeg and MP4Box
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
use mediavault_config::ToolsConfig;
use mediavault_keys::render_cenc_descriptor;
use mediavault_types::{Cid, ContentCategory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::file_cipher::encrypt_file;
use super::{ContentEncryptor, EncryptionJob};
use crate::error::{PipelineError, Result};
use crate::retry::{multi_upload_with_retry, RetryConfig};
use crate::storage::ObjectStorage;
use crate::tools::{probe_has_audio, ToolRunner};

/// DASH segment duration in milliseconds
const SEGMENT_DURATION_MS: u32 = 4000;
const AUDIO_BITRATE: &str = "128k";

/// Files to upload, entry point first
#[derive(Debug, Default)]
struct Packaged {
    files: Vec<PathBuf>,
    keys: Vec<String>,
}

impl Packaged {
    fn push(&mut self, file: PathBuf, key: String) {
        self.files.push(file);
        self.keys.push(key);
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::Encryption(format!("no file name in {}", path.display())))
}

/// Name MP4Box gives the init segment of `input` in onDemand DASH output
fn dash_init_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_dashinit.mp4", stem)
}

/// Keys of everything packaged next to the entry artifact at `encrypted_key`
pub fn packaged_keys(encrypted_key: &str, category: ContentCategory) -> Vec<String> {
    let mut keys = vec![encrypted_key.to_string()];
    if category.is_streamable() {
        let dir = encrypted_key.rsplit_once('/').map_or("", |(dir, _)| dir);
        for stream in ["video", "audio"] {
            let init = dash_init_name(Path::new(&format!("{}_enc.mp4", stream)));
            keys.push(if dir.is_empty() { init } else { format!("{}/{}", dir, init) });
        }
    }
    keys
}

pub struct LocalEncryptor {
    runner: Arc<dyn ToolRunner>,
    storage: Arc<dyn ObjectStorage>,
    tools: ToolsConfig,
    retry: RetryConfig,
}

impl LocalEncryptor {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        storage: Arc<dyn ObjectStorage>,
        tools: ToolsConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            runner,
            storage,
            tools,
            retry,
        }
    }

    async fn single_file(&self, job: &EncryptionJob<'_>, scratch: &Path) -> Result<Packaged> {
        let output = scratch.join(file_name(&job.names.encrypted_path)?);
        let size = encrypt_file(job.source, &output, job.metadata).await?;
        debug!(folder = %job.names.folder, size, "File encrypted");

        let mut packaged = Packaged::default();
        packaged.push(output, job.names.encrypted_key.clone());
        Ok(packaged)
    }

    async fn audio(
        &self,
        job: &EncryptionJob<'_>,
        scratch: &Path,
        cancel: &CancellationToken,
    ) -> Result<Packaged> {
        let intermediate = scratch.join("audio.mp4");
        let args = crate::args![
            "-y",
            "-i",
            job.source.display(),
            "-vn",
            "-c:a",
            "aac",
            "-b:a",
            AUDIO_BITRATE,
            intermediate.display(),
        ];
        self.runner.run(&self.tools.ffmpeg, &args, cancel).await?;

        let descriptor = self.write_descriptor(job, scratch).await?;
        let encrypted = self.crypt(&descriptor, &intermediate, scratch, cancel).await?;
        self.dash(job, scratch, &[(encrypted, "audio")], cancel).await
    }

    async fn video(
        &self,
        job: &EncryptionJob<'_>,
        scratch: &Path,
        cancel: &CancellationToken,
    ) -> Result<Packaged> {
        let has_audio = probe_has_audio(self.runner.as_ref(), &self.tools.ffprobe, job.source, cancel).await?;

        let video = scratch.join("video.mp4");
        let args = crate::args![
            "-y",
            "-i",
            job.source.display(),
            "-map",
            "0:v:0",
            "-c",
            "copy",
            "-an",
            video.display(),
        ];
        self.runner.run(&self.tools.ffmpeg, &args, cancel).await?;

        let descriptor = self.write_descriptor(job, scratch).await?;
        let mut streams = vec![(self.crypt(&descriptor, &video, scratch, cancel).await?, "video")];

        if has_audio {
            let audio = scratch.join("audio.mp4");
            let args = crate::args![
                "-y",
                "-i",
                job.source.display(),
                "-map",
                "0:a:0",
                "-vn",
                "-c:a",
                "aac",
                "-b:a",
                AUDIO_BITRATE,
                audio.display(),
            ];
            self.runner.run(&self.tools.ffmpeg, &args, cancel).await?;
            streams.push((self.crypt(&descriptor, &audio, scratch, cancel).await?, "audio"));
        } else {
            debug!(folder = %job.names.folder, "Source has no audio stream");
        }

        self.dash(job, scratch, &streams, cancel).await
    }

    async fn write_descriptor(&self, job: &EncryptionJob<'_>, scratch: &Path) -> Result<PathBuf> {
        let path = scratch.join("drm.xml");
        // Every elementary stream file has a single track
        tokio::fs::write(&path, render_cenc_descriptor(job.metadata, &[1])).await?;
        Ok(path)
    }

    async fn crypt(
        &self,
        descriptor: &Path,
        input: &Path,
        scratch: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = scratch.join(format!("{}_enc.mp4", stem));
        let args = crate::args![
            "-crypt",
            descriptor.display(),
            input.display(),
            "-out",
            output.display(),
        ];
        self.runner.run(&self.tools.mp4box, &args, cancel).await?;
        Ok(output)
    }

    async fn dash(
        &self,
        job: &EncryptionJob<'_>,
        scratch: &Path,
        streams: &[(PathBuf, &str)],
        cancel: &CancellationToken,
    ) -> Result<Packaged> {
        let manifest = scratch.join(file_name(&job.names.encrypted_path)?);

        let mut args = crate::args![
            "-dash",
            SEGMENT_DURATION_MS,
            "-rap",
            "-frag-rap",
            "-profile",
            "onDemand",
            "-out",
            manifest.display(),
        ];
        for (input, kind) in streams {
            args.push(format!("{}#{}", input.display(), kind));
        }
        self.runner.run(&self.tools.mp4box, &args, cancel).await?;

        let mut packaged = Packaged::default();
        packaged.push(manifest, job.names.encrypted_key.clone());
        for (input, _) in streams {
            let init = dash_init_name(input);
            packaged.push(scratch.join(&init), job.names.key_for(&init));
        }
        Ok(packaged)
    }
}

#[async_trait]
impl ContentEncryptor for LocalEncryptor {
    async fn encrypt(&self, job: &EncryptionJob<'_>, cancel: &CancellationToken) -> Result<Cid> {
        tokio::fs::create_dir_all(&job.names.work_dir).await?;
        // Removed on drop, whichever way this returns
        let scratch = tempfile::Builder::new()
            .prefix("drm-")
            .tempdir_in(&job.names.work_dir)?;

        let packaged = match job.names.category {
            ContentCategory::File => self.single_file(job, scratch.path()).await?,
            ContentCategory::Audio => self.audio(job, scratch.path(), cancel).await?,
            ContentCategory::Video => self.video(job, scratch.path(), cancel).await?,
        };

        let cid = multi_upload_with_retry(
            self.storage.as_ref(),
            &self.retry,
            &packaged.files,
            &packaged.keys,
        )
        .await?;

        info!(
            folder = %job.names.folder,
            category = ?job.names.category,
            files = packaged.files.len(),
            encrypted_cid = %cid,
            "Encrypted artifact uploaded"
        );
        Ok(cid)
    }
}

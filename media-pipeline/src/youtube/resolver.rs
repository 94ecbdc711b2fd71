//! Video metadata and stream URL resolution

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::YoutubeError;
use crate::tools::ToolRunner;

/// One downloadable rendition of a video
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VideoFormat {
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    /// `"none"` for audio-only formats
    #[serde(default)]
    pub vcodec: Option<String>,
    /// `"none"` for video-only formats
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Audio bitrate in kbps
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
}

impl VideoFormat {
    fn codec_present(codec: &Option<String>) -> bool {
        codec.as_deref().is_some_and(|c| !c.is_empty() && c != "none")
    }

    pub fn has_video(&self) -> bool {
        Self::codec_present(&self.vcodec)
    }

    pub fn has_audio(&self) -> bool {
        Self::codec_present(&self.acodec)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl Thumbnail {
    pub fn area(&self) -> u64 {
        u64::from(self.width.unwrap_or(0)) * u64::from(self.height.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub formats: Vec<VideoFormat>,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
}

#[async_trait]
pub trait YoutubeResolver: Send + Sync {
    async fn get_video(&self, video_id: &str) -> Result<VideoInfo, YoutubeError>;

    /// Direct URL of one format's stream
    async fn stream_url(&self, video: &VideoInfo, format: &VideoFormat) -> Result<String, YoutubeError>;
}

/// Resolves videos by asking yt-dlp for the JSON description
pub struct YtDlpResolver {
    runner: Arc<dyn ToolRunner>,
    program: String,
}

impl YtDlpResolver {
    pub fn new(runner: Arc<dyn ToolRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

#[async_trait]
impl YoutubeResolver for YtDlpResolver {
    async fn get_video(&self, video_id: &str) -> Result<VideoInfo, YoutubeError> {
        let args = crate::args!["-J", "--no-warnings", "--skip-download", watch_url(video_id)];
        let output = self
            .runner
            .run(&self.program, &args, &CancellationToken::new())
            .await
            .map_err(|e| YoutubeError::Resolve(e.to_string()))?;

        let info: VideoInfo = serde_json::from_str(&output.stdout)
            .map_err(|e| YoutubeError::Resolve(format!("unreadable video description: {}", e)))?;
        debug!(
            video_id,
            formats = info.formats.len(),
            thumbnails = info.thumbnails.len(),
            "Resolved video"
        );
        Ok(info)
    }

    async fn stream_url(&self, video: &VideoInfo, format: &VideoFormat) -> Result<String, YoutubeError> {
        format.url.clone().ok_or_else(|| {
            YoutubeError::Resolve(format!(
                "format {} of {} has no stream URL",
                format.format_id, video.id
            ))
        })
    }
}

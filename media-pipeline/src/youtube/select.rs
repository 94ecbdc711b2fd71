//! Track selection
//!
//! Video tracks are video-only MP4 renditions, audio is AAC in an MP4/M4A
//! container. The original is the tallest video track; the preview is the
//! tallest one at or below [`PREVIEW_MAX_HEIGHT`].

use super::resolver::{Thumbnail, VideoFormat, VideoInfo};
use crate::error::YoutubeError;

pub const PREVIEW_MAX_HEIGHT: u32 = 480;

fn is_mp4_video(format: &VideoFormat) -> bool {
    format.ext == "mp4" && format.has_video() && !format.has_audio()
}

fn is_aac_audio(format: &VideoFormat) -> bool {
    matches!(format.ext.as_str(), "m4a" | "mp4")
        && !format.has_video()
        && format
            .acodec
            .as_deref()
            .is_some_and(|codec| codec.starts_with("mp4a"))
}

pub fn original_video(info: &VideoInfo) -> Result<&VideoFormat, YoutubeError> {
    info.formats
        .iter()
        .filter(|f| is_mp4_video(f))
        .max_by_key(|f| f.height.unwrap_or(0))
        .ok_or(YoutubeError::OriginalNotFound)
}

pub fn preview_video(info: &VideoInfo) -> Result<&VideoFormat, YoutubeError> {
    info.formats
        .iter()
        .filter(|f| is_mp4_video(f))
        .filter(|f| f.height.is_some_and(|h| h > 0 && h <= PREVIEW_MAX_HEIGHT))
        .max_by_key(|f| f.height.unwrap_or(0))
        .ok_or(YoutubeError::PreviewNotFound)
}

pub fn audio(info: &VideoInfo) -> Result<&VideoFormat, YoutubeError> {
    info.formats
        .iter()
        .filter(|f| is_aac_audio(f))
        .max_by(|a, b| a.abr.unwrap_or(0.0).total_cmp(&b.abr.unwrap_or(0.0)))
        .ok_or(YoutubeError::AudioNotFound)
}

pub fn thumbnail(info: &VideoInfo) -> Result<&Thumbnail, YoutubeError> {
    info.thumbnails
        .iter()
        .max_by_key(|t| t.area())
        .ok_or(YoutubeError::ThumbnailNotFound)
}

//! Checks run before a job is accepted

use crate::error::{PipelineError, Result};

const YOUTUBE_ID_LEN: usize = 11;

/// Lower-cased MIME type without parameters
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Accept only content types on the allow-list
pub fn pre_upload_validate(content_type: &str, allowed: &[String]) -> Result<()> {
    let normalized = normalize_content_type(content_type);
    if !normalized.is_empty() && allowed.iter().any(|a| a.eq_ignore_ascii_case(&normalized)) {
        Ok(())
    } else {
        Err(PipelineError::UnsupportedContentType(content_type.to_string()))
    }
}

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == YOUTUBE_ID_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract the video id from a bare id or a YouTube URL
pub fn parse_youtube_reference(reference: &str) -> Result<String> {
    let reference = reference.trim();
    if is_video_id(reference) {
        return Ok(reference.to_string());
    }

    let invalid = || PipelineError::Validation(format!("not a YouTube video reference: {}", reference));

    let url = reqwest::Url::parse(reference).map_err(|_| invalid())?;
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let candidate = match host {
        "youtu.be" => url.path_segments().and_then(|mut s| s.next()).map(str::to_string),
        "youtube.com" | "m.youtube.com" | "music.youtube.com" => {
            let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
            match segments.as_slice() {
                ["watch"] => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                ["shorts", id, ..] | ["embed", id, ..] | ["live", id, ..] => Some(id.to_string()),
                _ => None,
            }
        }
        _ => None,
    };

    candidate.filter(|id| is_video_id(id)).ok_or_else(invalid)
}

//! YouTube ingestion path
//!
//! Resolves the streams of a referenced video, remuxes the original and
//! preview renditions with ffmpeg and fetches the largest thumbnail.

mod ingest;
mod resolver;
pub mod select;

pub use ingest::{YoutubeArtifacts, YoutubeIngest};
pub use resolver::{watch_url, Thumbnail, VideoFormat, VideoInfo, YoutubeResolver, YtDlpResolver};

//! Remote transcoding
//!
//! Produces the preview rendition on an external transcoding service. Inert
//! unless enabled in configuration.

mod client;
mod job;
mod manager;

pub use client::{HttpTranscoderClient, JobStatus, TranscoderClient};
pub use job::{ElementaryStream, JobSpec, MuxStream, PREVIEW_MUX_KEY};
pub use manager::{Completion, TranscodeManager, TranscodeLocations};

//! In-memory unit of work

use mediavault_types::Asset;

use crate::naming::ArtifactNames;

/// Where the job's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    /// Staged upload: local path, `s3://` location or http(s) URL
    Upload { location: String },
    Youtube { video_id: String },
}

#[derive(Debug, Clone)]
pub struct JobMeta {
    pub original_name: String,
    pub content_type: String,
    pub names: ArtifactNames,
    pub source: JobSource,
}

/// An asset paired with what the pipeline needs to process it. Never
/// persisted; a restart loses queued jobs.
#[derive(Debug, Clone)]
pub struct Job {
    pub asset: Asset,
    pub meta: JobMeta,
}

impl Job {
    pub fn is_youtube(&self) -> bool {
        matches!(self.meta.source, JobSource::Youtube { .. })
    }
}

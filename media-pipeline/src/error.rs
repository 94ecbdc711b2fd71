//! Error types for the media pipeline

use std::fmt;
use thiserror::Error;

/// An external executable could not be run to completion
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: String,
        status: String,
        /// Combined stdout and stderr
        output: String,
    },

    #[error("{program} was cancelled")]
    Cancelled { program: String },
}

/// Object storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage request failed: {0}")]
    Request(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Mismatched upload: {files} files for {keys} keys")]
    Mismatch { files: usize, keys: usize },
}

/// Datastore errors
#[derive(Error, Debug)]
pub enum DatastoreError {
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Asset already exists: {0}")]
    Duplicate(uuid::Uuid),

    #[error(transparent)]
    Transition(#[from] mediavault_types::TypesError),

    #[error("Datastore backend error: {0}")]
    Backend(String),
}

/// Remote transcoder errors
#[derive(Error, Debug)]
pub enum TranscoderError {
    #[error("Transcoder request failed: {0}")]
    Request(String),

    #[error("Transcoder returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Transcoder job failed: {0}")]
    JobFailed(String),

    #[error("Unknown transcoder job state: {0}")]
    UnknownState(String),

    #[error("Timed out waiting for transcoder job {0}")]
    Timeout(String),

    #[error("No asset for transcoder job {0}")]
    UnknownJob(String),
}

/// YouTube resolution errors
#[derive(Error, Debug)]
pub enum YoutubeError {
    #[error("original not found")]
    OriginalNotFound,

    #[error("preview not found")]
    PreviewNotFound,

    #[error("audio not found")]
    AudioNotFound,

    #[error("thumbnail not found")]
    ThumbnailNotFound,

    #[error("Invalid YouTube reference: {0}")]
    InvalidReference(String),

    #[error("Failed to resolve video: {0}")]
    Resolve(String),
}

/// Both branches of a streaming transfer, either of which may have failed
#[derive(Debug, Default)]
pub struct TransferError {
    pub remote: Option<StorageError>,
    pub local: Option<std::io::Error>,
}

impl TransferError {
    pub fn is_empty(&self) -> bool {
        self.remote.is_none() && self.local.is_none()
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.remote, &self.local) {
            (Some(remote), Some(local)) => {
                write!(f, "remote upload failed: {}; local copy failed: {}", remote, local)
            }
            (Some(remote), None) => write!(f, "remote upload failed: {}", remote),
            (None, Some(local)) => write!(f, "local copy failed: {}", local),
            (None, None) => f.write_str("transfer failed"),
        }
    }
}

impl std::error::Error for TransferError {}

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),

    #[error("Transcoder error: {0}")]
    Transcoder(#[from] TranscoderError),

    #[error("YouTube error: {0}")]
    Youtube(#[from] YoutubeError),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Key error: {0}")]
    Key(#[from] mediavault_keys::KeyError),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job queue is full")]
    QueueFull,

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

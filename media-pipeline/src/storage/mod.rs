//! Object storage
//!
//! Every successful write returns the content identifier of what was stored:
//! the hex SHA-256 of the bytes.

mod memory;
mod s3;

pub use memory::MemoryStorage;
pub use s3::S3Storage;

use async_trait::async_trait;
use mediavault_types::Cid;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::error::StorageError;

/// Readable object body
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stream `reader` to `key` until EOF
    async fn push_path(&self, key: &str, reader: ObjectReader) -> Result<Cid, StorageError>;

    /// Read an object
    async fn obj_reader(&self, key: &str) -> Result<ObjectReader, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Upload a local file
    async fn upload(&self, local: &Path, key: &str) -> Result<Cid, StorageError> {
        let file = tokio::fs::File::open(local).await?;
        self.push_path(key, Box::pin(file)).await
    }

    /// Upload several files as one artifact; the first file is the entry
    /// point (e.g. a DASH manifest) and its CID is returned
    async fn multi_upload(&self, locals: &[PathBuf], keys: &[String]) -> Result<Cid, StorageError> {
        if locals.len() != keys.len() || locals.is_empty() {
            return Err(StorageError::Mismatch {
                files: locals.len(),
                keys: keys.len(),
            });
        }

        let mut entry = None;
        for (local, key) in locals.iter().zip(keys) {
            let cid = self.upload(local, key).await?;
            entry.get_or_insert(cid);
        }
        entry.ok_or(StorageError::Mismatch { files: 0, keys: 0 })
    }
}

/// Incremental CID computation
#[derive(Default)]
pub struct CidHasher(Sha256);

impl CidHasher {
    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finish(self) -> Cid {
        Cid::new(hex::encode(self.0.finalize()))
    }
}

pub fn cid_of(bytes: &[u8]) -> Cid {
    let mut hasher = CidHasher::default();
    hasher.update(bytes);
    hasher.finish()
}

//! DRM key preparation and content encryption
//!
//! Each asset gets a fresh content key. The key is wrapped for the owner's
//! public key and stored on the record; the content itself is encrypted by
//! one of three branches picked from its category:
//!
//! - file: the whole file under AES-128-CBC
//! - audio: AAC in MP4, CENC-encrypted, DASH packaged as one segment
//! - video: elementary streams split, each CENC-encrypted, DASH multiplexed
//!
//! Video and audio can instead be handed to a cloud streaming service.

mod cloud;
pub mod file_cipher;
mod local;

pub use cloud::{CloudEncryptor, StreamState};
pub use local::{packaged_keys, LocalEncryptor};

use async_trait::async_trait;
use mediavault_keys::{
    generate_drm_metadata, wrap_content_key, DrmMetadata, OwnerIdentity, WrappedKey,
};
use mediavault_types::{Account, AssetUpdate, Cid};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::naming::ArtifactNames;

/// Everything an encryptor needs for one asset
pub struct EncryptionJob<'a> {
    pub names: &'a ArtifactNames,
    pub metadata: &'a DrmMetadata,
    /// Local copy of the original
    pub source: &'a Path,
    /// Storage key of the original
    pub original_key: &'a str,
}

#[async_trait]
pub trait ContentEncryptor: Send + Sync {
    /// Encrypt and upload; returns the CID of the entry artifact
    async fn encrypt(&self, job: &EncryptionJob<'_>, cancel: &CancellationToken) -> Result<Cid>;
}

/// Key material generated for one asset and owner
pub struct DrmKeys {
    pub metadata: DrmMetadata,
    pub wrapped: WrappedKey,
}

impl DrmKeys {
    /// Fresh content key, wrapped for `owner`
    pub fn for_owner(owner: &Account) -> Result<Self> {
        let metadata = generate_drm_metadata(&OwnerIdentity {
            owner_id: owner.id,
            created_at: owner.created_at,
            public_key: &owner.public_key,
        });
        let wrapped = wrap_content_key(&metadata.key, &metadata.key_id, &owner.public_key)?;
        Ok(Self { metadata, wrapped })
    }

    /// Key, wrapped key and key id as a single write
    pub fn to_update(&self) -> AssetUpdate {
        AssetUpdate {
            encryption_key: Some(self.metadata.key.to_hex()),
            drm_key: Some(self.wrapped.to_hex()),
            drm_key_id: Some(self.metadata.key_id.to_hex()),
            ..Default::default()
        }
    }
}

/// Chooses the cloud service for streamable content when configured and the
/// local tools otherwise
#[derive(Clone)]
pub struct Encryption {
    local: Arc<dyn ContentEncryptor>,
    cloud: Option<Arc<dyn ContentEncryptor>>,
}

impl Encryption {
    pub fn new(local: Arc<dyn ContentEncryptor>, cloud: Option<Arc<dyn ContentEncryptor>>) -> Self {
        Self { local, cloud }
    }

    pub async fn encrypt(&self, job: &EncryptionJob<'_>, cancel: &CancellationToken) -> Result<Cid> {
        match &self.cloud {
            Some(cloud) if job.names.category.is_streamable() => cloud.encrypt(job, cancel).await,
            _ => self.local.encrypt(job, cancel).await,
        }
    }
}

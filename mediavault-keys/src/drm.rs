//! Per-asset DRM metadata generation

use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::key_types::{ContentKey, DrmMetadata, Iv, KeyId};

/// The owner fields the key id is derived from
#[derive(Debug, Clone)]
pub struct OwnerIdentity<'a> {
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Hex encoded public key, exactly as stored on the account
    pub public_key: &'a str,
}

/// Derive the key id from the owner's id, account creation time and public
/// key. The same owner always gets the same id.
pub fn derive_key_id(owner: &OwnerIdentity<'_>) -> KeyId {
    let mut hasher = Sha256::new();
    hasher.update(owner.owner_id.to_string().as_bytes());
    hasher.update(owner.created_at.timestamp().to_string().as_bytes());
    hasher.update(owner.public_key.as_bytes());
    let digest = hasher.finalize();

    let mut kid = [0u8; KeyId::LEN];
    kid.copy_from_slice(&digest[..KeyId::LEN]);
    KeyId::from_bytes(kid)
}

/// Fresh random content key and first IV for an asset owned by `owner`
pub fn generate_drm_metadata(owner: &OwnerIdentity<'_>) -> DrmMetadata {
    let mut rng = rand::thread_rng();

    let mut key = [0u8; ContentKey::LEN];
    rng.fill_bytes(&mut key);
    let mut iv = [0u8; Iv::LEN];
    rng.fill_bytes(&mut iv);

    DrmMetadata {
        first_iv: Iv::from_bytes(iv),
        key: ContentKey::from_bytes(key),
        key_id: derive_key_id(owner),
    }
}

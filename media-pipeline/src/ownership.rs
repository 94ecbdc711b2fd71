//! Re-encryption of a ready asset for a new owner
//!
//! `ready -> transferring -> transferred -> ready`; any error leaves the
//! record `failed`. The re-encrypted artifacts go to a fresh subfolder of the
//! asset's folder. The new content key, its wrap for the new owner, the owner
//! change and the new artifact location are written in one update; the old
//! artifacts are deleted only after that update lands.

use mediavault_types::{Account, Asset, AssetStatus, ContentCategory};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::datastore::Datastore;
use crate::drm::{packaged_keys, DrmKeys, Encryption, EncryptionJob};
use crate::error::{PipelineError, Result};
use crate::naming::ArtifactNames;
use crate::storage::ObjectStorage;

pub struct OwnershipTransfer {
    datastore: Arc<dyn Datastore>,
    storage: Arc<dyn ObjectStorage>,
    encryption: Encryption,
    temp_root: PathBuf,
}

impl OwnershipTransfer {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        storage: Arc<dyn ObjectStorage>,
        encryption: Encryption,
        temp_root: PathBuf,
    ) -> Self {
        Self {
            datastore,
            storage,
            encryption,
            temp_root,
        }
    }

    /// Hand `asset_id` to `new_owner_id`, re-encrypting it under a fresh key
    pub async fn transfer(
        &self,
        asset_id: Uuid,
        new_owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Asset> {
        let asset = self.datastore.get_asset(asset_id).await?;
        if asset.status != AssetStatus::Ready {
            return Err(PipelineError::Validation(format!(
                "asset {} is {}, only ready assets can change owner",
                asset_id, asset.status
            )));
        }

        self.datastore
            .mark_asset_status(asset_id, AssetStatus::Transferring)
            .await?;

        match self.reencrypt(&asset, new_owner_id, cancel).await {
            Ok(()) => {
                self.datastore
                    .mark_asset_status(asset_id, AssetStatus::Transferred)
                    .await?;
                self.datastore
                    .mark_asset_status(asset_id, AssetStatus::Ready)
                    .await?;
                info!(asset_id = %asset_id, new_owner_id = %new_owner_id, "Ownership transferred");
                Ok(self.datastore.get_asset(asset_id).await?)
            }
            Err(e) => {
                error!(asset_id = %asset_id, error = %e, "Ownership transfer failed");
                if let Err(mark_err) = self
                    .datastore
                    .mark_asset_status(asset_id, AssetStatus::Failed)
                    .await
                {
                    error!(asset_id = %asset_id, error = %mark_err, "Failed to mark asset failed");
                }
                Err(e)
            }
        }
    }

    async fn reencrypt(&self, asset: &Asset, new_owner_id: Uuid, cancel: &CancellationToken) -> Result<()> {
        let owner = self.datastore.get_account_by_id(new_owner_id).await?;
        let original_key = asset
            .original_key
            .as_deref()
            .ok_or_else(|| PipelineError::Validation(format!("asset {} has no original", asset.id)))?;
        let (folder, file) = original_key
            .split_once('/')
            .ok_or_else(|| PipelineError::Validation(format!("malformed original key: {}", original_key)))?;

        let names = ArtifactNames::with_folder(
            &self.temp_root,
            format!("{}/{}", folder, Uuid::new_v4().simple()),
            file,
            &asset.content_type,
            new_owner_id,
        );
        tokio::fs::create_dir_all(&names.work_dir).await?;

        let result = self.encrypt_for(&names, original_key, &owner, asset.id, cancel).await;
        if let Err(e) = tokio::fs::remove_dir_all(&names.work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!(asset_id = %asset.id, error = %e, "Failed to remove transfer work dir");
            }
        }
        // Whichever set of artifacts the record does not point at is dropped
        let unused = match (&result, &asset.encrypted_key) {
            (Ok(()), Some(old)) => old.as_str(),
            (Ok(()), None) => return Ok(()),
            (Err(_), _) => names.encrypted_key.as_str(),
        };
        self.delete_artifacts(asset.id, unused, names.category).await;
        result
    }

    async fn delete_artifacts(&self, asset_id: Uuid, encrypted_key: &str, category: ContentCategory) {
        for key in packaged_keys(encrypted_key, category) {
            debug!(asset_id = %asset_id, key = %key, "Deleting unused artifact");
            if let Err(e) = self.storage.delete(&key).await {
                warn!(asset_id = %asset_id, key = %key, error = %e, "Failed to delete unused artifact");
            }
        }
    }

    async fn encrypt_for(
        &self,
        names: &ArtifactNames,
        original_key: &str,
        owner: &Account,
        asset_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut reader = self.storage.obj_reader(original_key).await?;
        let mut local = tokio::fs::File::create(&names.original_path).await?;
        tokio::io::copy(&mut reader, &mut local).await?;
        local.flush().await?;

        let keys = DrmKeys::for_owner(owner)?;
        let job = EncryptionJob {
            names,
            metadata: &keys.metadata,
            source: &names.original_path,
            original_key,
        };
        let encrypted_cid = self.encryption.encrypt(&job, cancel).await?;

        let mut update = keys.to_update();
        update.owner_id = Some(owner.id);
        update.encrypted_key = Some(names.encrypted_key.clone());
        update.encrypted_cid = Some(encrypted_cid);
        self.datastore.update_asset(asset_id, update).await?;
        Ok(())
    }
}

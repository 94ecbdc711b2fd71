//! Persistence seam for asset and account records
//!
//! The relational store lives with the marketplace API. The pipeline only
//! needs the operations below, each of which is a single transaction.

use async_trait::async_trait;
use mediavault_types::{Account, Asset, AssetStatus, AssetUpdate, RemoteJobState};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::DatastoreError;

pub type DatastoreResult<T> = std::result::Result<T, DatastoreError>;

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get_asset(&self, id: Uuid) -> DatastoreResult<Asset>;

    async fn get_asset_by_job_id(&self, job_id: &str) -> DatastoreResult<Asset>;

    /// Create a record; fails if the id is taken
    async fn insert_asset(&self, asset: Asset) -> DatastoreResult<()>;

    /// Write the set fields of `update`, leaving the rest untouched
    async fn update_asset(&self, id: Uuid, update: AssetUpdate) -> DatastoreResult<Asset>;

    /// Move the record to `status`. The current status is re-read inside the
    /// transaction and illegal transitions are rejected, so a `Failed` record
    /// is never overwritten.
    async fn mark_asset_status(&self, id: Uuid, status: AssetStatus) -> DatastoreResult<AssetStatus>;

    /// Mirror a remote job state onto the record unless a terminal state is
    /// already recorded. Returns whether the state was written, so for a
    /// terminal `state` exactly one caller per job gets `true`.
    async fn record_job_state(&self, job_id: &str, state: RemoteJobState) -> DatastoreResult<bool>;

    async fn list_assets_by_status(&self, status: AssetStatus) -> DatastoreResult<Vec<Asset>>;

    async fn get_account_by_id(&self, id: Uuid) -> DatastoreResult<Account>;

    /// Insert or replace an account
    async fn upsert_account(&self, account: Account) -> DatastoreResult<()>;

    async fn get_account_by_address(&self, address: &str) -> DatastoreResult<Account>;
}

#[derive(Default)]
struct Tables {
    assets: HashMap<Uuid, Asset>,
    history: HashMap<Uuid, Vec<AssetStatus>>,
    accounts: HashMap<Uuid, Account>,
}

/// In-memory datastore for tests and single-node runs
#[derive(Default)]
pub struct MemoryDatastore {
    tables: RwLock<Tables>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status the record has held, oldest first
    pub async fn status_history(&self, id: Uuid) -> Vec<AssetStatus> {
        self.tables
            .read()
            .await
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get_asset(&self, id: Uuid) -> DatastoreResult<Asset> {
        self.tables
            .read()
            .await
            .assets
            .get(&id)
            .cloned()
            .ok_or_else(|| DatastoreError::AssetNotFound(id.to_string()))
    }

    async fn get_asset_by_job_id(&self, job_id: &str) -> DatastoreResult<Asset> {
        self.tables
            .read()
            .await
            .assets
            .values()
            .find(|a| a.job_id.as_deref() == Some(job_id))
            .cloned()
            .ok_or_else(|| DatastoreError::AssetNotFound(format!("job {}", job_id)))
    }

    async fn insert_asset(&self, asset: Asset) -> DatastoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.assets.contains_key(&asset.id) {
            return Err(DatastoreError::Duplicate(asset.id));
        }
        tables.history.insert(asset.id, vec![asset.status]);
        tables.assets.insert(asset.id, asset);
        Ok(())
    }

    async fn update_asset(&self, id: Uuid, update: AssetUpdate) -> DatastoreResult<Asset> {
        let mut tables = self.tables.write().await;
        let asset = tables
            .assets
            .get_mut(&id)
            .ok_or_else(|| DatastoreError::AssetNotFound(id.to_string()))?;
        update.apply(asset);
        Ok(asset.clone())
    }

    async fn mark_asset_status(&self, id: Uuid, status: AssetStatus) -> DatastoreResult<AssetStatus> {
        let mut tables = self.tables.write().await;
        let asset = tables
            .assets
            .get_mut(&id)
            .ok_or_else(|| DatastoreError::AssetNotFound(id.to_string()))?;

        let previous = asset.status;
        asset.status = previous.transition(status)?;
        asset.updated_at = chrono::Utc::now();

        if previous != status {
            tables.history.entry(id).or_default().push(status);
            debug!(asset_id = %id, from = %previous, to = %status, "Asset status changed");
        }
        Ok(status)
    }

    async fn record_job_state(&self, job_id: &str, state: RemoteJobState) -> DatastoreResult<bool> {
        let mut tables = self.tables.write().await;
        let asset = tables
            .assets
            .values_mut()
            .find(|a| a.job_id.as_deref() == Some(job_id))
            .ok_or_else(|| DatastoreError::AssetNotFound(format!("job {}", job_id)))?;

        if asset.job_status.as_ref().is_some_and(RemoteJobState::is_terminal) {
            return Ok(false);
        }
        asset.job_status = Some(state);
        asset.updated_at = chrono::Utc::now();
        Ok(true)
    }

    async fn list_assets_by_status(&self, status: AssetStatus) -> DatastoreResult<Vec<Asset>> {
        Ok(self
            .tables
            .read()
            .await
            .assets
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    async fn get_account_by_id(&self, id: Uuid) -> DatastoreResult<Account> {
        self.tables
            .read()
            .await
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| DatastoreError::AccountNotFound(id.to_string()))
    }

    async fn upsert_account(&self, account: Account) -> DatastoreResult<()> {
        self.tables.write().await.accounts.insert(account.id, account);
        Ok(())
    }

    async fn get_account_by_address(&self, address: &str) -> DatastoreResult<Account> {
        self.tables
            .read()
            .await
            .accounts
            .values()
            .find(|a| a.address.eq_ignore_ascii_case(address))
            .cloned()
            .ok_or_else(|| DatastoreError::AccountNotFound(address.to_string()))
    }
}

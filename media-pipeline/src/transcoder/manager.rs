//! Remote transcode job lifecycle
//!
//! A job is submitted once per asset. Its completion is observed by polling
//! and by push notifications, and both paths end in [`TranscodeManager::complete`].
//! Whichever path first records the terminal state on the asset does the
//! follow-up work (preview collection, object cleanup, job deletion); the
//! other sees the state already recorded and does nothing. A notification
//! that arrives while its job is still being recorded is held and replayed
//! once the record exists.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use mediavault_config::TranscoderConfig;
use mediavault_types::{
    Asset, AssetStatus, AssetUpdate, Cid, RemoteJobState, TranscodeJobCompletedPayload,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::client::TranscoderClient;
use super::job::JobSpec;
use crate::datastore::Datastore;
use crate::error::{PipelineError, Result, TranscoderError};
use crate::naming::remote_key;
use crate::retry::{upload_with_retry, RetryConfig};
use crate::storage::ObjectStorage;
use crate::transfer::transfer;

/// Outcome of handling a job state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Succeeded { preview_cid: Cid },
    Failed { reason: Option<String> },
    /// Another observer already recorded the terminal state
    AlreadyHandled,
    /// The job has not finished yet
    InProgress,
    /// The job is not on any asset yet; applied once its submission records it
    Deferred,
}

/// Terminal states reported for jobs that no asset carries yet
#[derive(Default)]
struct EarlyStates {
    /// Submissions between creating a job and recording it
    submitting: usize,
    states: HashMap<String, (RemoteJobState, Option<String>)>,
}

/// Marks a submission in flight for as long as it lives
struct Submitting<'a>(&'a Mutex<EarlyStates>);

impl<'a> Submitting<'a> {
    fn begin(early: &'a Mutex<EarlyStates>) -> Self {
        if let Ok(mut early) = early.lock() {
            early.submitting += 1;
        }
        Submitting(early)
    }
}

impl Drop for Submitting<'_> {
    fn drop(&mut self) {
        if let Ok(mut early) = self.0.lock() {
            early.submitting = early.submitting.saturating_sub(1);
            if early.submitting == 0 {
                // Whatever is left belongs to jobs this process never created
                early.states.clear();
            }
        }
    }
}

/// Storage keys the service reads from and writes to for one asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeLocations {
    pub input_key: String,
    pub output_dir: String,
    pub output_key: String,
    pub preview_key: String,
}

impl TranscodeLocations {
    /// Locations for an asset whose original is stored at `original_key`
    /// (`{folder}/{file}`)
    pub fn for_original(config: &TranscoderConfig, original_key: &str) -> Self {
        let folder = original_key.split('/').next().unwrap_or(original_key);
        let output_dir = format!("{}/{}", config.output_prefix.trim_end_matches('/'), folder);
        Self {
            input_key: format!("{}/{}", config.input_prefix.trim_end_matches('/'), original_key),
            output_key: format!("{}/{}", output_dir, JobSpec::output_file_name()),
            preview_key: remote_key(folder, "preview.mp4"),
            output_dir,
        }
    }
}

pub struct TranscodeManager {
    client: Arc<dyn TranscoderClient>,
    storage: Arc<dyn ObjectStorage>,
    datastore: Arc<dyn Datastore>,
    config: TranscoderConfig,
    retry: RetryConfig,
    temp_root: PathBuf,
    waiters: Mutex<HashMap<String, watch::Sender<Option<RemoteJobState>>>>,
    early: Mutex<EarlyStates>,
}

impl TranscodeManager {
    pub fn new(
        client: Arc<dyn TranscoderClient>,
        storage: Arc<dyn ObjectStorage>,
        datastore: Arc<dyn Datastore>,
        config: TranscoderConfig,
        retry: RetryConfig,
        temp_root: PathBuf,
    ) -> Self {
        Self {
            client,
            storage,
            datastore,
            config,
            retry,
            temp_root,
            waiters: Mutex::new(HashMap::new()),
            early: Mutex::new(EarlyStates::default()),
        }
    }

    fn storage_uri(&self, key: &str) -> String {
        format!("{}/{}", self.config.storage_uri.trim_end_matches('/'), key)
    }

    /// Upload the original to the service's input location, create the job
    /// and record it on the asset. Returns the job name.
    pub async fn submit(
        &self,
        asset: &Asset,
        original_local: &Path,
        original_key: &str,
        has_audio: bool,
    ) -> Result<String> {
        let locations = TranscodeLocations::for_original(&self.config, original_key);
        let _submitting = Submitting::begin(&self.early);

        upload_with_retry(
            self.storage.as_ref(),
            &self.retry,
            original_local,
            &locations.input_key,
        )
        .await?;

        let spec = JobSpec::preview(
            &self.config,
            self.storage_uri(&locations.input_key),
            self.storage_uri(&locations.output_dir),
            has_audio,
        );
        let created = self.client.create_job(&spec).await?;

        self.register(&created.name);
        let recorded = self
            .datastore
            .update_asset(
                asset.id,
                AssetUpdate {
                    job_id: Some(created.name.clone()),
                    job_status: Some(created.state.clone()),
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = recorded {
            // Nothing could find the job later, so drop it now
            self.forget(&created.name);
            self.release(&created.name, &locations).await;
            return Err(e.into());
        }

        info!(
            asset_id = %asset.id,
            job_name = %created.name,
            state = %created.state,
            has_audio,
            "Transcode job submitted"
        );

        if let Some((state, failure_reason)) = self.take_early(&created.name) {
            debug!(asset_id = %asset.id, job_name = %created.name, state = %state, "Replaying early notification");
            if let Err(e) = self.complete(&created.name, state, failure_reason).await {
                warn!(asset_id = %asset.id, job_name = %created.name, error = %e, "Early notification failed");
            }
        }
        Ok(created.name)
    }

    /// Hold a terminal state for a job that a submission may be about to
    /// record. Returns false when no submission is in flight.
    fn defer(&self, job_name: &str, state: &RemoteJobState, failure_reason: &Option<String>) -> bool {
        match self.early.lock() {
            Ok(mut early) if early.submitting > 0 => {
                early
                    .states
                    .insert(job_name.to_string(), (state.clone(), failure_reason.clone()));
                true
            }
            _ => false,
        }
    }

    fn take_early(&self, job_name: &str) -> Option<(RemoteJobState, Option<String>)> {
        self.early.lock().ok()?.states.remove(job_name)
    }

    /// Stop tracking a submitted job whose asset failed before the job
    /// finished: the remote job and the service's objects are deleted. A job
    /// that already reached a terminal state was cleaned up when it did.
    pub async fn abandon(&self, asset_id: Uuid, job_name: &str, original_key: &str) {
        self.forget(job_name);
        match self
            .datastore
            .record_job_state(job_name, RemoteJobState::Failed)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(asset_id = %asset_id, job_name, "Abandoned job had already finished");
                return;
            }
            Err(e) => warn!(asset_id = %asset_id, job_name, error = %e, "Could not record abandoned job"),
        }

        let locations = TranscodeLocations::for_original(&self.config, original_key);
        self.release(job_name, &locations).await;
        info!(asset_id = %asset_id, job_name, "Transcode job abandoned");
    }

    /// Delete the remote job and its input and output objects
    async fn release(&self, job_name: &str, locations: &TranscodeLocations) {
        if let Err(e) = self.client.delete_job(job_name).await {
            warn!(job_name, error = %e, "Failed to delete transcode job");
        }
        for key in [&locations.output_key, &locations.input_key] {
            if let Err(e) = self.storage.delete(key).await {
                warn!(job_name, key = %key, error = %e, "Failed to delete transcoder object");
            }
        }
    }

    fn register(&self, job_name: &str) -> watch::Receiver<Option<RemoteJobState>> {
        let mut waiters = match self.waiters.lock() {
            Ok(waiters) => waiters,
            Err(poisoned) => poisoned.into_inner(),
        };
        waiters
            .entry(job_name.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    fn notify(&self, job_name: &str, state: &RemoteJobState) {
        if let Ok(waiters) = self.waiters.lock() {
            if let Some(tx) = waiters.get(job_name) {
                tx.send_replace(Some(state.clone()));
            }
        }
    }

    fn forget(&self, job_name: &str) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(job_name);
        }
    }

    /// Number of jobs some pipeline is currently waiting on
    pub fn waiting(&self) -> usize {
        self.waiters.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Wait until the job reaches a terminal state, by polling when enabled
    /// and by push notification in any case
    pub async fn await_completion(
        &self,
        asset_id: Uuid,
        job_name: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteJobState> {
        let mut rx = self.register(job_name);
        let result = self.wait_loop(asset_id, job_name, &mut rx, cancel).await;
        self.forget(job_name);
        result
    }

    async fn wait_loop(
        &self,
        asset_id: Uuid,
        job_name: &str,
        rx: &mut watch::Receiver<Option<RemoteJobState>>,
        cancel: &CancellationToken,
    ) -> Result<RemoteJobState> {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let deadline = self
            .config
            .poll_timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let timeout = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(state) = current.filter(RemoteJobState::is_terminal) {
                return Ok(state);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = &mut timeout => {
                    warn!(asset_id = %asset_id, job_name, "Gave up waiting for transcode job");
                    return Err(TranscoderError::Timeout(job_name.to_string()).into());
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(TranscoderError::UnknownJob(job_name.to_string()).into());
                    }
                }
                _ = tokio::time::sleep(interval), if self.config.poll_enabled => {
                    if let Some(state) = self.poll_once(asset_id, job_name).await? {
                        return Ok(state);
                    }
                }
            }
        }
    }

    /// One poll. Returns the terminal state once the job is done.
    pub async fn poll_once(&self, asset_id: Uuid, job_name: &str) -> Result<Option<RemoteJobState>> {
        let status = match self.client.get_job(job_name).await {
            Ok(status) => status,
            Err(e) => {
                // Transient; the next tick tries again
                warn!(asset_id = %asset_id, job_name, error = %e, "Transcode job poll failed");
                return Ok(None);
            }
        };

        match &status.state {
            RemoteJobState::Unknown(raw) => {
                error!(asset_id = %asset_id, job_name, state = %raw, "Transcoder reported an unknown job state");
                Ok(None)
            }
            state if state.is_terminal() => {
                debug!(asset_id = %asset_id, job_name, state = %state, "Poll observed terminal state");
                match self
                    .complete(job_name, state.clone(), status.failure_reason.clone())
                    .await?
                {
                    // The observer that won notifies once its follow-up work is done
                    Completion::AlreadyHandled | Completion::Deferred => Ok(None),
                    _ => Ok(Some(status.state)),
                }
            }
            state => {
                self.datastore.record_job_state(job_name, state.clone()).await?;
                Ok(None)
            }
        }
    }

    /// Handle a push notification from the service
    pub async fn handle_notification(&self, payload: &TranscodeJobCompletedPayload) -> Result<Completion> {
        match RemoteJobState::parse(&payload.state) {
            RemoteJobState::Unknown(raw) => {
                error!(job_name = %payload.job_name, state = %raw, "Notification with unknown job state");
                Err(TranscoderError::UnknownState(raw).into())
            }
            state if state.is_terminal() => {
                self.complete(&payload.job_name, state, payload.failure_reason.clone())
                    .await
            }
            state => {
                self.datastore.record_job_state(&payload.job_name, state).await?;
                Ok(Completion::InProgress)
            }
        }
    }

    /// Apply a terminal job state. Only the first caller per job acts.
    pub async fn complete(
        &self,
        job_name: &str,
        state: RemoteJobState,
        failure_reason: Option<String>,
    ) -> Result<Completion> {
        if !state.is_terminal() {
            return Err(TranscoderError::UnknownState(state.as_str().to_string()).into());
        }

        let asset = match self.datastore.get_asset_by_job_id(job_name).await {
            Ok(asset) => asset,
            Err(_) if self.defer(job_name, &state, &failure_reason) => {
                // The submission may have recorded the job between the lookup and the hold
                match self.datastore.get_asset_by_job_id(job_name).await {
                    Ok(asset) if self.take_early(job_name).is_some() => asset,
                    _ => {
                        debug!(job_name, state = %state, "Job not recorded yet, holding its state");
                        return Ok(Completion::Deferred);
                    }
                }
            }
            Err(_) => return Err(TranscoderError::UnknownJob(job_name.to_string()).into()),
        };

        if !self.datastore.record_job_state(job_name, state.clone()).await? {
            debug!(asset_id = %asset.id, job_name, "Terminal job state already handled");
            return Ok(Completion::AlreadyHandled);
        }

        let outcome = match state {
            RemoteJobState::Succeeded => self
                .collect_preview(&asset)
                .await
                .map(|preview_cid| Completion::Succeeded { preview_cid }),
            _ => {
                warn!(asset_id = %asset.id, job_name, reason = ?failure_reason, "Transcode job failed");
                Err(TranscoderError::JobFailed(
                    failure_reason.clone().unwrap_or_else(|| "no reason given".to_string()),
                )
                .into())
            }
        };

        if let Err(e) = &outcome {
            error!(asset_id = %asset.id, job_name, error = %e, "Marking asset failed after transcode");
            if let Err(mark_err) = self
                .datastore
                .mark_asset_status(asset.id, AssetStatus::Failed)
                .await
            {
                warn!(asset_id = %asset.id, error = %mark_err, "Could not mark asset failed");
            }
        }

        if let Err(e) = self.client.delete_job(job_name).await {
            warn!(job_name, error = %e, "Failed to delete transcode job");
        }
        self.notify(job_name, &state);

        match outcome {
            Ok(done) => Ok(done),
            Err(PipelineError::Transcoder(TranscoderError::JobFailed(reason))) => {
                Ok(Completion::Failed { reason: Some(reason) })
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the transcoded preview into the asset's folder and drop the
    /// service's input and output objects
    async fn collect_preview(&self, asset: &Asset) -> Result<Cid> {
        let original_key = asset
            .original_key
            .as_deref()
            .ok_or_else(|| PipelineError::Validation(format!("asset {} has no original", asset.id)))?;
        let locations = TranscodeLocations::for_original(&self.config, original_key);

        tokio::fs::create_dir_all(&self.temp_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("preview-")
            .tempdir_in(&self.temp_root)?;

        let reader = self.storage.obj_reader(&locations.output_key).await?;
        let preview_cid = transfer(
            self.storage.as_ref(),
            reader,
            &locations.preview_key,
            &scratch.path().join("preview.mp4"),
        )
        .await?;

        self.datastore
            .update_asset(
                asset.id,
                AssetUpdate {
                    preview_key: Some(locations.preview_key.clone()),
                    preview_cid: Some(preview_cid.clone()),
                    ..Default::default()
                },
            )
            .await?;

        for key in [&locations.output_key, &locations.input_key] {
            if let Err(e) = self.storage.delete(key).await {
                warn!(asset_id = %asset.id, key = %key, error = %e, "Failed to delete transcoder object");
            }
        }

        info!(asset_id = %asset.id, preview_cid = %preview_cid, "Preview collected");
        Ok(preview_cid)
    }
}

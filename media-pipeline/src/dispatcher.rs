//! Job intake and the bounded worker pool
//!
//! Intake validates a request, creates the record in `processing` and queues
//! the job on a fixed-size channel. A full channel is reported back to the
//! caller rather than waited on. The dispatcher drains the channel and runs
//! at most `workers` jobs at a time.
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


use mediavault_types::{Account, Asset, AssetStatus, MediaUploadedPayload, YoutubeReferencedPayload};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::datastore::Datastore;
use crate::error::{PipelineError, Result};
use crate::job::{Job, JobMeta, JobSource};
use crate::naming::ArtifactNames;
use crate::pipeline::{JobOutcome, Pipeline};
use crate::validate::{normalize_content_type, parse_youtube_reference, pre_upload_validate};

const YOUTUBE_CONTENT_TYPE: &str = "video/mp4";

/// Counters shared with the health endpoint
#[derive(Debug, Default)]
pub struct DispatcherStats {
    active: AtomicUsize,
    ready: AtomicUsize,
    failed: AtomicUsize,
}

impl DispatcherStats {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn ready(&self) -> usize {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Create a connected intake and receiver
pub fn channel(
    capacity: usize,
    datastore: Arc<dyn Datastore>,
    temp_root: PathBuf,
    allowed_content_types: Vec<String>,
) -> (JobIntake, mpsc::Receiver<Job>) {
    let (tx, rx) = mpsc::channel(capacity);
    let intake = JobIntake {
        tx,
        datastore,
        temp_root,
        allowed_content_types: Arc::new(allowed_content_types),
    };
    (intake, rx)
}

/// Submitting side of the job queue
#[derive(Clone)]
pub struct JobIntake {
    tx: mpsc::Sender<Job>,
    datastore: Arc<dyn Datastore>,
    temp_root: PathBuf,
    allowed_content_types: Arc<Vec<String>>,
}

impl JobIntake {
    /// Queue an already recorded job without waiting
    pub fn submit(&self, job: Job) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PipelineError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PipelineError::QueueClosed,
        })
    }

    /// Jobs waiting for a worker
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Validate an upload, record it and queue it. A full queue rejects the
    /// upload before any record is created. An owner profile carried by the
    /// request is stored as the owner's account.
    pub async fn accept_upload(&self, payload: MediaUploadedPayload) -> Result<Uuid> {
        pre_upload_validate(&payload.content_type, &self.allowed_content_types)?;
        let content_type = normalize_content_type(&payload.content_type);

        let names = ArtifactNames::derive(
            &self.temp_root,
            &payload.original_name,
            &content_type,
            payload.owner_id,
        );
        let asset = Asset::new(payload.asset_id, payload.kind, payload.owner_id, &content_type);
        let owner = payload.owner.map(|profile| profile.into_account(payload.owner_id));
        let meta = JobMeta {
            original_name: payload.original_name,
            content_type,
            names,
            source: JobSource::Upload {
                location: payload.file_path,
            },
        };
        self.enqueue(Job { asset, meta }, owner).await
    }

    /// Validate a YouTube reference, record it and queue it
    pub async fn accept_youtube(&self, payload: YoutubeReferencedPayload) -> Result<Uuid> {
        let video_id = parse_youtube_reference(&payload.reference)?;
        let original_name = format!("{}.mp4", video_id);

        let names = ArtifactNames::derive(
            &self.temp_root,
            &original_name,
            YOUTUBE_CONTENT_TYPE,
            payload.owner_id,
        );
        let asset = Asset::new(payload.asset_id, payload.kind, payload.owner_id, YOUTUBE_CONTENT_TYPE);
        let owner = payload.owner.map(|profile| profile.into_account(payload.owner_id));
        let meta = JobMeta {
            original_name,
            content_type: YOUTUBE_CONTENT_TYPE.to_string(),
            names,
            source: JobSource::Youtube { video_id },
        };
        self.enqueue(Job { asset, meta }, owner).await
    }

    async fn enqueue(&self, job: Job, owner: Option<Account>) -> Result<Uuid> {
        let permit = self.tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => PipelineError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => PipelineError::QueueClosed,
        })?;

        let asset_id = job.asset.id;
        if let Some(account) = owner {
            debug!(asset_id = %asset_id, owner_id = %account.id, "Recording owner account");
            self.datastore.upsert_account(account).await?;
        }
        self.datastore.insert_asset(job.asset.clone()).await?;
        permit.send(job);

        debug!(asset_id = %asset_id, depth = self.depth(), "Job queued");
        Ok(asset_id)
    }
}

/// Fail records a previous run left in `processing`. Their jobs lived only
/// in memory and cannot be resumed.
pub async fn fail_stale(datastore: &dyn Datastore) -> Result<usize> {
    let stale = datastore.list_assets_by_status(AssetStatus::Processing).await?;
    for asset in &stale {
        warn!(asset_id = %asset.id, "Failing asset left processing by a previous run");
        datastore.mark_asset_status(asset.id, AssetStatus::Failed).await?;
    }
    Ok(stale.len())
}

/// Consuming side of the job queue
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    workers: usize,
    stats: Arc<DispatcherStats>,
    outcomes: Option<mpsc::UnboundedSender<JobOutcome>>,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<Pipeline>, workers: usize) -> Self {
        Self {
            pipeline,
            workers: workers.max(1),
            stats: Arc::new(DispatcherStats::default()),
            outcomes: None,
        }
    }

    /// Report every finished job on `outcomes`
    pub fn with_outcomes(mut self, outcomes: mpsc::UnboundedSender<JobOutcome>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.stats.clone()
    }

    /// Run jobs until the queue closes or `shutdown` fires. In-flight jobs
    /// are cancelled on shutdown and still end `failed`.
    pub async fn run(self, mut rx: mpsc::Receiver<Job>, shutdown: CancellationToken) {
        let slots = Arc::new(Semaphore::new(self.workers));
        let mut running = JoinSet::new();
        info!(workers = self.workers, "Dispatcher started");

        loop {
            let permit = tokio::select! {
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let job = tokio::select! {
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let pipeline = self.pipeline.clone();
            let stats = self.stats.clone();
            let outcomes = self.outcomes.clone();
            let cancel = shutdown.child_token();

            stats.active.fetch_add(1, Ordering::Relaxed);
            running.spawn(async move {
                let outcome = pipeline.process(job, &cancel).await;
                stats.active.fetch_sub(1, Ordering::Relaxed);
                match outcome.status() {
                    AssetStatus::Ready => stats.ready.fetch_add(1, Ordering::Relaxed),
                    _ => stats.failed.fetch_add(1, Ordering::Relaxed),
                };
                if let Some(outcomes) = outcomes {
                    if outcomes.send(outcome).is_err() {
                        debug!("Outcome receiver gone");
                    }
                }
                drop(permit);
            });

            // Reap finished tasks so the set does not grow
            while let Some(result) = running.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "Job task panicked");
                }
            }
        }

        if !running.is_empty() {
            warn!(in_flight = running.len(), "Dispatcher stopping, waiting for in-flight jobs");
        }
        while let Some(result) = running.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Job task panicked");
            }
        }
        info!("Dispatcher stopped");
    }
}

//! Media Pipeline
//!
//! Consumes `media.uploaded`, `youtube.referenced` and
//! `transcoder.job_completed` events from the message bus and processes each
//! asset:
//! - Streams the original to object storage and local scratch
//! - Submits a remote preview transcode and waits for it
//! - Generates a thumbnail
//! - Wraps a fresh content key for the owner and encrypts the content
//! - Publishes `asset.ready` / `asset.failed` events
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


use anyhow::Result;
use media_pipeline::datastore::{Datastore, MemoryDatastore};
use media_pipeline::dispatcher::{self, Dispatcher};
use media_pipeline::downloader::SourceOpener;
use media_pipeline::drm::{CloudEncryptor, ContentEncryptor, Encryption, LocalEncryptor};
use media_pipeline::health::HealthServer;
use media_pipeline::pipeline::Pipeline;
use media_pipeline::retry::RetryConfig;
use media_pipeline::storage::{MemoryStorage, ObjectStorage, S3Storage};
use media_pipeline::tools::{ProcessRunner, ToolRunner};
use media_pipeline::transcoder::{HttpTranscoderClient, TranscodeManager};
use media_pipeline::worker::{publish_outcomes, EventWorker};
use media_pipeline::youtube::{YoutubeIngest, YtDlpResolver};
use mediavault_config::AppConfig;
use mediavault_logging::init_logging;
use message_bus_client::{MessageBusClient, NatsClient};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize logging
    init_logging("media-pipeline", &config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting Media Pipeline");

    let storage: Arc<dyn ObjectStorage> = match &config.object_storage {
        Some(storage_config) => Arc::new(
            S3Storage::new(storage_config)
                .map_err(|e| anyhow::anyhow!("Failed to create object storage client: {}", e))?,
        ),
        None => {
            warn!("No object storage configured, artifacts are kept in memory");
            Arc::new(MemoryStorage::new())
        }
    };

    // Records are owned by the marketplace API; this process keeps its own view,
    // with owner accounts taken from the intake events
    let datastore: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
    let runner: Arc<dyn ToolRunner> = Arc::new(ProcessRunner::new());
    let retry = RetryConfig::from(&config.retry);
    let temp_root = config.pipeline.temp_dir.clone();
    tokio::fs::create_dir_all(&temp_root).await?;

    info!(
        message_bus_url = config.message_bus_url(),
        workers = config.pipeline.workers,
        queue_capacity = config.pipeline.queue_capacity,
        transcoder = config.active_transcoder().is_some(),
        cloud_encryption = config.cloud_encryption.is_some(),
        "Configuration loaded"
    );

    if config.pipeline.fail_stale_on_startup {
        let failed = dispatcher::fail_stale(datastore.as_ref()).await?;
        if failed > 0 {
            warn!(failed, "Failed assets left processing by a previous run");
        }
    }

    let opener = SourceOpener::new(storage.clone())?;

    let transcoder = match config.active_transcoder() {
        Some(transcoder_config) => {
            let client = HttpTranscoderClient::new(transcoder_config)?;
            Some(Arc::new(TranscodeManager::new(
                Arc::new(client),
                storage.clone(),
                datastore.clone(),
                transcoder_config.clone(),
                retry.clone(),
                temp_root.clone(),
            )))
        }
        None => {
            info!("Remote transcoding disabled, uploads get no preview");
            None
        }
    };

    let resolver = Arc::new(YtDlpResolver::new(runner.clone(), config.tools.ytdlp.clone()));
    let youtube = YoutubeIngest::new(
        resolver,
        runner.clone(),
        storage.clone(),
        opener.clone(),
        config.tools.ffmpeg.clone(),
        retry.clone(),
    );

    let local: Arc<dyn ContentEncryptor> = Arc::new(LocalEncryptor::new(
        runner.clone(),
        storage.clone(),
        config.tools.clone(),
        retry.clone(),
    ));
    let cloud: Option<Arc<dyn ContentEncryptor>> = match &config.cloud_encryption {
        Some(cloud_config) => Some(Arc::new(CloudEncryptor::new(cloud_config.clone(), storage.clone())?)),
        None => None,
    };

    let pipeline = Arc::new(Pipeline::new(
        datastore.clone(),
        storage.clone(),
        runner.clone(),
        opener,
        transcoder.clone(),
        youtube,
        Encryption::new(local, cloud),
        config.tools.clone(),
        retry,
    ));

    // Connect to message bus
    let message_bus: Arc<dyn MessageBusClient> = Arc::new(
        NatsClient::new(&config.message_bus)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to message bus: {}", e))?,
    );
    info!("Connected to message bus");

    let shutdown = CancellationToken::new();
    let (intake, rx) = dispatcher::channel(
        config.pipeline.queue_capacity,
        datastore.clone(),
        temp_root,
        config.pipeline.allowed_content_types.clone(),
    );
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(pipeline, config.pipeline.workers).with_outcomes(outcome_tx);

    // Start health check server in background
    let health_server = HealthServer::new(
        config.health_port,
        dispatcher.stats(),
        intake.clone(),
        config.pipeline.workers,
    );
    let health_shutdown = shutdown.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.start(health_shutdown).await {
            error!(error = %e, "Health check server error");
        }
    });

    let dispatcher_handle = tokio::spawn(dispatcher.run(rx, shutdown.clone()));
    let publisher_handle = tokio::spawn(publish_outcomes(message_bus.clone(), outcome_rx));

    let worker = EventWorker::new(message_bus, intake, transcoder);
    let worker_shutdown = shutdown.clone();
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(worker_shutdown).await {
            error!(error = %e, "Worker error");
        }
    });

    // Wait for shutdown signal
    info!("Media Pipeline running. Press Ctrl+C to stop.");
    wait_for_signal().await;
    shutdown.cancel();

    // In-flight jobs observe the cancellation and end failed
    info!("Waiting for in-flight operations to complete...");
    tokio::select! {
        _ = tokio::time::sleep(tokio::time::Duration::from_secs(30)) => {
            warn!("Shutdown timeout reached, forcing shutdown");
        }
        _ = async {
            let _ = worker_handle.await;
            let _ = dispatcher_handle.await;
            // The dispatcher held the last outcome sender
            let _ = publisher_handle.await;
        } => {
            info!("Workers completed gracefully");
        }
    }

    let _ = health_handle.await;
    info!("Media Pipeline stopped");

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Unable to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal (Ctrl+C) received, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Shutdown signal (SIGTERM) received, initiating graceful shutdown");
        },
    }
}

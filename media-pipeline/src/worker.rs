//! Event worker: feeds bus events into the pipeline and reports outcomes
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


use mediavault_types::{
    AssetFailedPayload, AssetReadyPayload, Event, EventType, MediaUploadedPayload,
    TranscodeJobCompletedPayload, TypesError, YoutubeReferencedPayload,
};
use message_bus_client::MessageBusClient;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatcher::JobIntake;
use crate::error::PipelineError;
use crate::pipeline::JobOutcome;
use crate::transcoder::TranscodeManager;

const SOURCE: &str = "media-pipeline";

/// Consumes intake and transcoder events from the message bus
pub struct EventWorker {
    message_bus: Arc<dyn MessageBusClient>,
    intake: JobIntake,
    transcoder: Option<Arc<TranscodeManager>>,
}

impl EventWorker {
    pub fn new(
        message_bus: Arc<dyn MessageBusClient>,
        intake: JobIntake,
        transcoder: Option<Arc<TranscodeManager>>,
    ) -> Self {
        Self {
            message_bus,
            intake,
            transcoder,
        }
    }

    /// Run the worker - consume events until every stream ends or `shutdown`
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut subjects = vec![EventType::MediaUploaded, EventType::YoutubeReferenced];
        if self.transcoder.is_some() {
            subjects.push(EventType::TranscodeJobCompleted);
        }

        let mut events = tokio_stream::StreamMap::new();
        for event_type in subjects {
            info!(event_type = event_type.as_str(), "Subscribing");
            events.insert(event_type, self.message_bus.subscribe(event_type.as_str()));
        }

        info!("Waiting for events...");
        loop {
            let next = tokio::select! {
                next = events.next() => next,
                _ = shutdown.cancelled() => break,
            };

            match next {
                Some((_, Ok(event))) => self.handle(event).await,
                Some((event_type, Err(e))) => {
                    error!(event_type = event_type.as_str(), error = %e, "Error receiving event from message bus");
                    // Continue processing - don't crash on individual event errors
                }
                None => {
                    warn!("Event streams ended");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle(&self, event: Event) {
        info!(
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            "Received event"
        );

        let result = match event.event_type {
            EventType::MediaUploaded => match event.payload_as::<MediaUploadedPayload>() {
                Ok(payload) => self.intake.accept_upload(payload).await.map(|_| ()),
                Err(e) => Err(invalid_payload(e)),
            },
            EventType::YoutubeReferenced => match event.payload_as::<YoutubeReferencedPayload>() {
                Ok(payload) => self.intake.accept_youtube(payload).await.map(|_| ()),
                Err(e) => Err(invalid_payload(e)),
            },
            EventType::TranscodeJobCompleted => {
                match (event.payload_as::<TranscodeJobCompletedPayload>(), &self.transcoder) {
                    (Ok(payload), Some(transcoder)) => {
                        // Collecting the preview can take a while; keep intake moving
                        let transcoder = transcoder.clone();
                        tokio::spawn(async move {
                            if let Err(e) = transcoder.handle_notification(&payload).await {
                                error!(job_name = %payload.job_name, error = %e, "Transcoder notification failed");
                            }
                        });
                        Ok(())
                    }
                    (Ok(_), None) => Ok(()),
                    (Err(e), _) => Err(invalid_payload(e)),
                }
            }
            EventType::AssetReady | EventType::AssetFailed => Ok(()),
        };

        if let Err(e) = result {
            error!(
                event_id = %event.event_id,
                event_type = event.event_type.as_str(),
                error = %e,
                "Event rejected"
            );
        }
    }
}

fn invalid_payload(e: TypesError) -> PipelineError {
    PipelineError::Validation(e.to_string())
}

/// Event announcing how a job ended
pub fn outcome_event(outcome: &JobOutcome) -> Result<Event, TypesError> {
    match outcome {
        JobOutcome::Ready(asset) => Event::new(
            EventType::AssetReady,
            SOURCE,
            AssetReadyPayload {
                asset_id: asset.id,
                original_cid: asset.original_cid.clone(),
                preview_cid: asset.preview_cid.clone(),
                thumbnail_cid: asset.thumbnail_cid.clone(),
                encrypted_cid: asset.encrypted_cid.clone(),
                drm_key_id: asset.drm_key_id.clone(),
            },
        ),
        JobOutcome::Failed {
            asset_id,
            stage,
            error,
        } => Event::new(
            EventType::AssetFailed,
            SOURCE,
            AssetFailedPayload {
                asset_id: *asset_id,
                stage: stage.clone(),
                error: error.clone(),
            },
        ),
    }
}

/// Publish `asset.ready` / `asset.failed` for every outcome received
pub async fn publish_outcomes(
    message_bus: Arc<dyn MessageBusClient>,
    mut outcomes: mpsc::UnboundedReceiver<JobOutcome>,
) {
    while let Some(outcome) = outcomes.recv().await {
        let event = match outcome_event(&outcome) {
            Ok(event) => event,
            Err(e) => {
                error!(asset_id = %outcome.asset_id(), error = %e, "Failed to create event");
                continue;
            }
        };

        if let Err(e) = message_bus.publish(&event).await {
            error!(asset_id = %outcome.asset_id(), error = %e, "Failed to publish outcome");
        } else {
            info!(
                asset_id = %outcome.asset_id(),
                status = %outcome.status(),
                "Outcome published"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_bus_client::InMemoryBus;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_failed_outcome_is_published() {
        let bus = Arc::new(InMemoryBus::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let asset_id = Uuid::new_v4();
        tx.send(JobOutcome::Failed {
            asset_id,
            stage: "transcode".to_string(),
            error: "Transcoder job failed: bad input".to_string(),
        })
        .unwrap();
        drop(tx);

        publish_outcomes(bus.clone(), rx).await;

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, EventType::AssetFailed);
        let payload: AssetFailedPayload = published[0].payload_as().unwrap();
        assert_eq!(payload.asset_id, asset_id);
        assert_eq!(payload.stage, "transcode");
    }
}

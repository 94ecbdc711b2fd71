//! NATS JetStream implementation of the message bus client
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


use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use mediavault_config::MessageBusConfig;
use mediavault_types::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{error, info, warn};

use crate::error::{MessageBusError, Result};
use crate::traits::{subject_for, EventStream, MessageBusClient};

const DEFAULT_STREAM: &str = "mediavault-events";
const DEFAULT_PREFIX: &str = "mediavault";

/// NATS JetStream message bus client
pub struct NatsClient {
    client: Arc<async_nats::Client>,
    jetstream: Arc<Context>,
    subject_prefix: String,
}

impl NatsClient {
    /// Connect and make sure the event stream exists
    pub async fn new(config: &MessageBusConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| MessageBusError::Connection(e.to_string()))?;

        let client_arc = Arc::new(client.clone());
        let jetstream = jetstream::new(client);

        let stream_name = config
            .stream_name
            .clone()
            .unwrap_or_else(|| DEFAULT_STREAM.to_string());
        let subject_prefix = config
            .subject_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        // Publishing still works through core NATS if this fails
        if let Err(e) = Self::ensure_stream(&jetstream, &stream_name, &subject_prefix).await {
            warn!(stream = %stream_name, error = %e, "Could not ensure JetStream stream");
        }

        info!(stream = %stream_name, prefix = %subject_prefix, "NATS client initialized");

        Ok(Self {
            client: client_arc,
            jetstream: Arc::new(jetstream),
            subject_prefix,
        })
    }

    /// Ensure the JetStream stream exists
    async fn ensure_stream(
        jetstream: &Context,
        stream_name: &str,
        subject_prefix: &str,
    ) -> Result<()> {
        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name.to_string(),
                subjects: vec![format!("{}.>", subject_prefix)],
                max_age: Duration::from_secs(86400 * 7),
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| MessageBusError::Connection(format!("Failed to create stream: {}", e)))?;

        info!(stream = stream_name, "Stream ensured");
        Ok(())
    }
}

#[async_trait]
impl MessageBusClient for NatsClient {
    async fn publish(&self, event: &Event) -> Result<()> {
        let subject = subject_for(&self.subject_prefix, event.event_type.as_str());
        let payload = serde_json::to_vec(event).map_err(MessageBusError::Serialization)?;

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| MessageBusError::Publish(e.to_string()))?
            .await
            .map_err(|e| MessageBusError::Publish(e.to_string()))?;

        info!(
            event_type = event.event_type.as_str(),
            event_id = %event.event_id,
            subject = %subject,
            "Event published"
        );

        Ok(())
    }

    fn subscribe(&self, event_type: &str) -> EventStream<'_> {
        let subject = subject_for(&self.subject_prefix, event_type);

        info!(subject = %subject, event_type = event_type, "Subscribing to events");

        let (tx, rx) = tokio::sync::mpsc::channel::<std::result::Result<Event, MessageBusError>>(100);
        let client = Arc::clone(&self.client);

        tokio::spawn(async move {
            match client.subscribe(subject.clone()).await {
                Ok(mut subscriber) => {
                    info!(subject = %subject, "Subscription created, waiting for messages");

                    while let Some(message) = subscriber.next().await {
                        let item = serde_json::from_slice::<Event>(&message.payload).map_err(|e| {
                            error!(subject = %subject, error = %e, "Failed to deserialize event");
                            MessageBusError::Serialization(e)
                        });

                        if tx.send(item).await.is_err() {
                            info!(subject = %subject, "Receiver dropped, stopping subscription");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to create subscription");
                    let _ = tx.send(Err(MessageBusError::Subscribe(e.to_string()))).await;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn is_connected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }

    fn client_type(&self) -> &str {
        "nats"
    }
}

//! In-process message bus
//!
//! Delivers published events to live subscribers of the same event type and
//! keeps a copy of everything published so callers can inspect it.

use async_trait::async_trait;
use mediavault_types::Event;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::{MessageBusError, Result};
use crate::traits::{EventStream, MessageBusClient};

type Subscriber = (String, mpsc::Sender<Result<Event>>);

#[derive(Default)]
pub struct InMemoryBus {
    subscribers: Mutex<Vec<Subscriber>>,
    published: Mutex<Vec<Event>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far, oldest first
    pub fn published(&self) -> Vec<Event> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBusClient for InMemoryBus {
    async fn publish(&self, event: &Event) -> Result<()> {
        let event_type = event.event_type.as_str();

        let targets: Vec<mpsc::Sender<Result<Event>>> = {
            let mut subscribers = self
                .subscribers
                .lock()
                .map_err(|_| MessageBusError::Publish("subscriber list poisoned".to_string()))?;
            subscribers.retain(|(_, tx)| !tx.is_closed());
            subscribers
                .iter()
                .filter(|(subject, _)| subject == event_type)
                .map(|(_, tx)| tx.clone())
                .collect()
        };

        if let Ok(mut published) = self.published.lock() {
            published.push(event.clone());
        }

        for tx in targets {
            let _ = tx.send(Ok(event.clone())).await;
        }

        debug!(event_type, event_id = %event.event_id, "Event published in-process");
        Ok(())
    }

    fn subscribe(&self, event_type: &str) -> EventStream<'_> {
        let (tx, rx) = mpsc::channel(100);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push((event_type.to_string(), tx));
        }
        Box::pin(ReceiverStream::new(rx))
    }

    async fn is_connected(&self) -> bool {
        true
    }

    fn client_type(&self) -> &str {
        "memory"
    }
}

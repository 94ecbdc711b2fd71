//! Traits for message bus operations

use async_trait::async_trait;
use futures::Stream;
use mediavault_types::Event;
use std::pin::Pin;

/// Stream of events delivered by a subscription
pub type EventStream<'a> =
    Pin<Box<dyn Stream<Item = std::result::Result<Event, crate::error::MessageBusError>> + Send + 'a>>;

/// Trait for message bus clients
#[async_trait]
pub trait MessageBusClient: Send + Sync {
    /// Publish an event to the message bus
    async fn publish(&self, event: &Event) -> Result<(), crate::error::MessageBusError>;

    /// Subscribe to events of a specific type, given by its dotted name
    /// (e.g. `media.uploaded`)
    fn subscribe(&self, event_type: &str) -> EventStream<'_>;

    /// Check if the client is connected
    async fn is_connected(&self) -> bool;

    /// Get the client type name
    fn client_type(&self) -> &str;
}

/// Subject an event type is published on
pub fn subject_for(prefix: &str, event_type: &str) -> String {
    format!("{}.{}", prefix, event_type.replace('.', "_"))
}

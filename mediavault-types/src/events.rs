//! Event type definitions for the message bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schemas::*;
use crate::error::{Result, TypesError};

/// Event type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Intake events
    #[serde(rename = "media.uploaded")]
    MediaUploaded,
    #[serde(rename = "youtube.referenced")]
    YoutubeReferenced,

    // Remote transcoder notifications
    #[serde(rename = "transcoder.job_completed")]
    TranscodeJobCompleted,

    // Pipeline outcome events
    #[serde(rename = "asset.ready")]
    AssetReady,
    #[serde(rename = "asset.failed")]
    AssetFailed,
}

impl EventType {
    /// Dotted name, also used to derive the bus subject
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MediaUploaded => "media.uploaded",
            EventType::YoutubeReferenced => "youtube.referenced",
            EventType::TranscodeJobCompleted => "transcoder.job_completed",
            EventType::AssetReady => "asset.ready",
            EventType::AssetFailed => "asset.failed",
        }
    }
}

/// Base event structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type identifier
    pub event_type: EventType,

    /// Unique event identifier
    pub event_id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Source service that published the event
    pub source: String,

    /// Event payload (type depends on event_type)
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a new event
    pub fn new(
        event_type: EventType,
        source: impl Into<String>,
        payload: impl Serialize,
    ) -> Result<Self> {
        let payload_value = serde_json::to_value(payload)?;

        Ok(Self {
            event_type,
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload: payload_value,
        })
    }

    /// Deserialize the payload into a specific type
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| TypesError::InvalidPayload(e.to_string()))
    }

    /// Validate the event structure
    pub fn validate(&self) -> Result<()> {
        match self.event_type {
            EventType::MediaUploaded => {
                let _: MediaUploadedPayload = self.payload_as()?;
            }
            EventType::YoutubeReferenced => {
                let _: YoutubeReferencedPayload = self.payload_as()?;
            }
            EventType::TranscodeJobCompleted => {
                let _: TranscodeJobCompletedPayload = self.payload_as()?;
            }
            EventType::AssetReady => {
                let _: AssetReadyPayload = self.payload_as()?;
            }
            EventType::AssetFailed => {
                let _: AssetFailedPayload = self.payload_as()?;
            }
        }
        Ok(())
    }
}

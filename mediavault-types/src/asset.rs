//! Asset and media records and the status state machine that drives them
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


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, TypesError};

// ============================================================================
// Status state machine
// ============================================================================

/// Processing status of an asset or media record.
///
/// ```text
/// Processing -> Ready
/// Processing -> Transferring -> Transferred -> Ready
/// Ready -> Transferring                (ownership transfer re-encryption)
/// Processing | Transferring | Transferred -> Failed
/// ```
///
/// `Ready` and `Failed` are terminal for ingestion. `Failed` is final;
/// `Ready` is reopened only by an ownership transfer, and a failed transfer
/// fails the record from `Transferring` or `Transferred`, never from `Ready`.
/// Writing the current status again is accepted as a no-op so that retried
/// writes stay idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Processing,
    Transferring,
    Transferred,
    Ready,
    Failed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Processing => "processing",
            AssetStatus::Transferring => "transferring",
            AssetStatus::Transferred => "transferred",
            AssetStatus::Ready => "ready",
            AssetStatus::Failed => "failed",
        }
    }

    /// Terminal for the ingestion pipeline
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssetStatus::Ready | AssetStatus::Failed)
    }

    pub fn can_transition_to(&self, next: AssetStatus) -> bool {
        use AssetStatus::*;

        if *self == next {
            return true;
        }

        match (self, next) {
            (Failed, _) | (Ready, Failed) => false,
            (_, Failed) => true,
            (Processing, Ready) | (Processing, Transferring) => true,
            (Transferring, Transferred) => true,
            (Transferred, Ready) => true,
            (Ready, Transferring) => true,
            _ => false,
        }
    }

    /// Validate a transition and return the new status
    pub fn transition(self, next: AssetStatus) -> Result<AssetStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TypesError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "processing" => Ok(AssetStatus::Processing),
            "transferring" => Ok(AssetStatus::Transferring),
            "transferred" => Ok(AssetStatus::Transferred),
            "ready" => Ok(AssetStatus::Ready),
            "failed" => Ok(AssetStatus::Failed),
            other => Err(TypesError::UnknownStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Remote transcode job state
// ============================================================================

/// State of a job on the remote transcoding service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteJobState {
    Unspecified,
    Pending,
    Running,
    Succeeded,
    Failed,
    /// A state string the service returned that we do not know about
    Unknown(String),
}

impl RemoteJobState {
    /// Parse the service's state string. Accepts both the bare names and the
    /// `PROCESSING_STATE_` prefixed form.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        let name = upper
            .strip_prefix("PROCESSING_STATE_")
            .or_else(|| upper.strip_prefix("STATE_"))
            .unwrap_or(&upper);

        match name {
            "UNSPECIFIED" => RemoteJobState::Unspecified,
            "PENDING" => RemoteJobState::Pending,
            "RUNNING" => RemoteJobState::Running,
            "SUCCEEDED" => RemoteJobState::Succeeded,
            "FAILED" => RemoteJobState::Failed,
            _ => RemoteJobState::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RemoteJobState::Unspecified => "UNSPECIFIED",
            RemoteJobState::Pending => "PENDING",
            RemoteJobState::Running => "RUNNING",
            RemoteJobState::Succeeded => "SUCCEEDED",
            RemoteJobState::Failed => "FAILED",
            RemoteJobState::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteJobState::Succeeded | RemoteJobState::Failed)
    }
}

impl fmt::Display for RemoteJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Content classification
// ============================================================================

/// Content category, which decides the encryption branch and the name of the
/// encrypted artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    Video,
    Audio,
    /// Images, documents and anything else encrypted as a single file
    File,
}

impl ContentCategory {
    pub fn from_content_type(content_type: &str) -> Self {
        let lower = content_type.trim().to_ascii_lowercase();
        if lower.starts_with("video/") {
            ContentCategory::Video
        } else if lower.starts_with("audio/") {
            ContentCategory::Audio
        } else {
            ContentCategory::File
        }
    }

    /// Video and audio are packaged as segmented DASH
    pub fn is_streamable(&self) -> bool {
        matches!(self, ContentCategory::Video | ContentCategory::Audio)
    }
}

/// Which table a record belongs to. Assets are listed for sale, media are
/// account attachments; both go through the same pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    Asset,
    Media,
}

/// Content identifier returned by object storage after a successful push
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Records
// ============================================================================

/// One uploaded or referenced piece of content and its derived artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub kind: RecordKind,
    pub owner_id: Uuid,
    pub content_type: String,
    pub status: AssetStatus,

    // Storage keys
    pub original_key: Option<String>,
    pub preview_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub encrypted_key: Option<String>,

    // Content identifiers, set once the artifact is uploaded
    pub original_cid: Option<Cid>,
    pub preview_cid: Option<Cid>,
    pub thumbnail_cid: Option<Cid>,
    pub encrypted_cid: Option<Cid>,

    /// Hex encoded symmetric content key (EK)
    pub encryption_key: Option<String>,
    /// Content key wrapped for the owner's public key, hex encoded
    pub drm_key: Option<String>,
    pub drm_key_id: Option<String>,

    /// Remote transcoder job name and its last observed state
    pub job_id: Option<String>,
    pub job_status: Option<RemoteJobState>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    /// New record in `Processing`
    pub fn new(id: Uuid, kind: RecordKind, owner_id: Uuid, content_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            owner_id,
            content_type: content_type.into(),
            status: AssetStatus::Processing,
            original_key: None,
            preview_key: None,
            thumbnail_key: None,
            encrypted_key: None,
            original_cid: None,
            preview_cid: None,
            thumbnail_cid: None,
            encrypted_cid: None,
            encryption_key: None,
            drm_key: None,
            drm_key_id: None,
            job_id: None,
            job_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn category(&self) -> ContentCategory {
        ContentCategory::from_content_type(&self.content_type)
    }
}

/// Partial update applied to an asset in a single write. Fields left `None`
/// are untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetUpdate {
    pub owner_id: Option<Uuid>,
    pub original_key: Option<String>,
    pub preview_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub encrypted_key: Option<String>,
    pub original_cid: Option<Cid>,
    pub preview_cid: Option<Cid>,
    pub thumbnail_cid: Option<Cid>,
    pub encrypted_cid: Option<Cid>,
    pub encryption_key: Option<String>,
    pub drm_key: Option<String>,
    pub drm_key_id: Option<String>,
    pub job_id: Option<String>,
    pub job_status: Option<RemoteJobState>,
}

impl AssetUpdate {
    pub fn is_empty(&self) -> bool {
        *self == AssetUpdate::default()
    }

    pub fn apply(self, asset: &mut Asset) {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field { asset.$field = Some(value); })*
            };
        }

        if let Some(owner_id) = self.owner_id {
            asset.owner_id = owner_id;
        }
        set!(
            original_key,
            preview_key,
            thumbnail_key,
            encrypted_key,
            original_cid,
            preview_cid,
            thumbnail_cid,
            encrypted_cid,
            encryption_key,
            drm_key,
            drm_key_id,
            job_id,
            job_status,
        );
        asset.updated_at = Utc::now();
    }
}

/// Account that owns assets; its public key is the DRM recipient key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    /// Wallet address
    pub address: String,
    /// Hex encoded X25519 public key
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingestion_transitions() {
        assert!(AssetStatus::Processing.can_transition_to(AssetStatus::Ready));
        assert!(AssetStatus::Processing.can_transition_to(AssetStatus::Failed));
        assert!(!AssetStatus::Ready.can_transition_to(AssetStatus::Processing));
    }

    #[test]
    fn test_ready_reopens_only_for_transfer() {
        assert!(AssetStatus::Ready.can_transition_to(AssetStatus::Transferring));
        for next in [AssetStatus::Processing, AssetStatus::Transferred, AssetStatus::Failed] {
            assert!(AssetStatus::Ready.transition(next).is_err(), "ready -> {}", next);
        }
        assert!(AssetStatus::Transferring.can_transition_to(AssetStatus::Failed));
        assert!(AssetStatus::Transferred.can_transition_to(AssetStatus::Failed));
    }

    #[test]
    fn test_failed_is_final() {
        for next in [
            AssetStatus::Processing,
            AssetStatus::Transferring,
            AssetStatus::Transferred,
            AssetStatus::Ready,
        ] {
            assert!(AssetStatus::Failed.transition(next).is_err());
        }
        assert_eq!(
            AssetStatus::Failed.transition(AssetStatus::Failed).unwrap(),
            AssetStatus::Failed
        );
    }

    #[test]
    fn test_ownership_transfer_cycle() {
        let status = AssetStatus::Ready
            .transition(AssetStatus::Transferring)
            .and_then(|s| s.transition(AssetStatus::Transferred))
            .and_then(|s| s.transition(AssetStatus::Ready))
            .unwrap();
        assert_eq!(status, AssetStatus::Ready);

        assert!(AssetStatus::Transferring.transition(AssetStatus::Ready).is_err());
    }

    #[test]
    fn test_remote_job_state_parse() {
        assert_eq!(RemoteJobState::parse("SUCCEEDED"), RemoteJobState::Succeeded);
        assert_eq!(
            RemoteJobState::parse("PROCESSING_STATE_UNSPECIFIED"),
            RemoteJobState::Unspecified
        );
        assert_eq!(RemoteJobState::parse("running"), RemoteJobState::Running);
        assert_eq!(
            RemoteJobState::parse("ARCHIVED"),
            RemoteJobState::Unknown("ARCHIVED".to_string())
        );
        assert!(!RemoteJobState::parse("ARCHIVED").is_terminal());
    }

    #[test]
    fn test_content_category() {
        assert_eq!(ContentCategory::from_content_type("video/mp4"), ContentCategory::Video);
        assert_eq!(ContentCategory::from_content_type("Audio/MPEG"), ContentCategory::Audio);
        assert_eq!(ContentCategory::from_content_type("image/png"), ContentCategory::File);
        assert_eq!(ContentCategory::from_content_type("application/pdf"), ContentCategory::File);
    }

    #[test]
    fn test_update_leaves_unset_fields() {
        let mut asset = Asset::new(Uuid::new_v4(), RecordKind::Asset, Uuid::new_v4(), "video/mp4");
        asset.original_cid = Some(Cid::new("orig"));

        AssetUpdate {
            preview_cid: Some(Cid::new("prev")),
            ..Default::default()
        }
        .apply(&mut asset);

        assert_eq!(asset.original_cid, Some(Cid::new("orig")));
        assert_eq!(asset.preview_cid, Some(Cid::new("prev")));
    }
}

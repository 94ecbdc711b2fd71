//! Event payload schemas
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
use uuid::Uuid;

use crate::asset::{Account, Cid, RecordKind};

// ============================================================================
// Intake Event Payloads
// ============================================================================

/// Owner account as known to the marketplace when the request was made
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerProfile {
    /// Wallet address
    pub address: String,
    /// Hex encoded X25519 public key
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

impl OwnerProfile {
    pub fn into_account(self, id: Uuid) -> Account {
        Account {
            id,
            address: self.address,
            public_key: self.public_key,
            created_at: self.created_at,
        }
    }
}

/// Payload for `media.uploaded` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaUploadedPayload {
    pub asset_id: Uuid,
    pub owner_id: Uuid,
    #[serde(default)]
    pub kind: RecordKind,
    /// Where the staged upload can be read from: a local path, an
    /// `s3://bucket/key` location or an http(s) URL
    pub file_path: String,
    pub original_name: String,
    pub content_type: String,
    #[serde(default)]
    pub file_size: u64,
    /// Recorded as the owner's account when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerProfile>,
}

/// Payload for `youtube.referenced` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoutubeReferencedPayload {
    pub asset_id: Uuid,
    pub owner_id: Uuid,
    #[serde(default)]
    pub kind: RecordKind,
    /// Video id or watch URL
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerProfile>,
}

// ============================================================================
// Transcoder Event Payloads
// ============================================================================

/// Payload for `transcoder.job_completed` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeJobCompletedPayload {
    pub job_name: String,
    pub state: String,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

// ============================================================================
// Outcome Event Payloads
// ============================================================================

/// Payload for `asset.ready` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetReadyPayload {
    pub asset_id: Uuid,
    pub original_cid: Option<Cid>,
    pub preview_cid: Option<Cid>,
    pub thumbnail_cid: Option<Cid>,
    pub encrypted_cid: Option<Cid>,
    pub drm_key_id: Option<String>,
}

/// Payload for `asset.failed` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetFailedPayload {
    pub asset_id: Uuid,
    /// Pipeline step that failed
    pub stage: String,
    pub error: String,
}

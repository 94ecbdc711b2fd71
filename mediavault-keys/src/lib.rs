//! DRM key management for Mediavault
//!
//! Generates per-asset content keys, derives key identifiers, wraps content
//! keys for a recipient's X25519 public key and renders the DRM descriptor
//! consumed by the packaging tool.
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


pub mod descriptor;
pub mod drm;
pub mod error;
pub mod key_types;
pub mod wrap;

pub use descriptor::render_cenc_descriptor;
pub use drm::{derive_key_id, generate_drm_metadata, OwnerIdentity};
pub use error::{KeyError, KeyResult};
pub use key_types::{ContentKey, DrmMetadata, Iv, KeyId, WrappedKey};
pub use wrap::{wrap_content_key, RecipientKeyPair};

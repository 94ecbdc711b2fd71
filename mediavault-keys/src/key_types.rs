//! Key type definitions
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


use crate::error::{KeyError, KeyResult};
use std::fmt;

macro_rules! hex_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> KeyResult<Self> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| {
                    KeyError::InvalidFormat(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(array))
            }

            pub fn from_hex(value: &str) -> KeyResult<Self> {
                let bytes = hex::decode(value.trim().trim_start_matches("0x"))
                    .map_err(|e| KeyError::InvalidFormat(format!("{}: {}", stringify!($name), e)))?;
                Self::from_slice(&bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }
    };
}

hex_bytes!(
    /// Symmetric content key (AES-128)
    ContentKey,
    16
);

hex_bytes!(
    /// Key identifier carried in the DASH manifest and stored with the asset
    KeyId,
    16
);

hex_bytes!(
    /// Initialization vector
    Iv,
    16
);

// Content keys never end up in logs
impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.to_hex())
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv({})", self.to_hex())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// First IV, content key and key id, generated once per asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmMetadata {
    pub first_iv: Iv,
    pub key: ContentKey,
    pub key_id: KeyId,
}

/// Content key sealed for one recipient.
///
/// Serialized layout: `version(1) || ephemeral_public(32) || nonce(12) || ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub ephemeral_public: [u8; 32],
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

impl WrappedKey {
    pub const VERSION: u8 = 1;
    const HEADER_LEN: usize = 1 + 32 + 12;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.ciphertext.len());
        out.push(Self::VERSION);
        out.extend_from_slice(&self.ephemeral_public);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> KeyResult<Self> {
        if bytes.len() <= Self::HEADER_LEN {
            return Err(KeyError::InvalidFormat("Wrapped key too short".to_string()));
        }
        if bytes[0] != Self::VERSION {
            return Err(KeyError::InvalidFormat(format!(
                "Unsupported wrapped key version {}",
                bytes[0]
            )));
        }

        let mut ephemeral_public = [0u8; 32];
        ephemeral_public.copy_from_slice(&bytes[1..33]);
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&bytes[33..45]);

        Ok(Self {
            ephemeral_public,
            nonce,
            ciphertext: bytes[Self::HEADER_LEN..].to_vec(),
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(value: &str) -> KeyResult<Self> {
        let bytes = hex::decode(value.trim())
            .map_err(|e| KeyError::InvalidFormat(format!("Wrapped key: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

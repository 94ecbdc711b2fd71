//! Content key wrapping for a recipient public key
//!
//! An ephemeral X25519 keypair is generated per wrap. The shared secret with
//! the recipient's public key goes through HKDF-SHA256 (salted with both
//! public keys) to an AES-256-GCM key that seals the content key. The key id
//! is bound as associated data, so a wrapped key cannot be replayed under a
//! different id.
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


use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey, X25519};
use ring::rand::SystemRandom;
use sha2::Sha256;
use tracing::debug;

use crate::error::{KeyError, KeyResult};
use crate::key_types::{ContentKey, KeyId, WrappedKey};

const WRAP_INFO: &[u8] = b"mediavault drm key wrap v1";

fn derive_wrapping_key(
    shared_secret: &[u8],
    ephemeral_public: &[u8],
    recipient_public: &[u8],
) -> KeyResult<[u8; 32]> {
    let mut salt = Vec::with_capacity(ephemeral_public.len() + recipient_public.len());
    salt.extend_from_slice(ephemeral_public);
    salt.extend_from_slice(recipient_public);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut okm = [0u8; 32];
    hkdf.expand(WRAP_INFO, &mut okm)
        .map_err(|e| KeyError::Derivation(e.to_string()))?;
    Ok(okm)
}

fn parse_public_key(hex_key: &str) -> KeyResult<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim().trim_start_matches("0x"))
        .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidPublicKey(format!("expected 32 bytes, got {}", bytes.len())))
}

/// Seal `key` for the holder of `recipient_public_key` (hex encoded X25519)
pub fn wrap_content_key(
    key: &ContentKey,
    key_id: &KeyId,
    recipient_public_key: &str,
) -> KeyResult<WrappedKey> {
    let recipient_public = parse_public_key(recipient_public_key)?;
    let rng = SystemRandom::new();

    let ephemeral = EphemeralPrivateKey::generate(&X25519, &rng).map_err(|_| KeyError::Random)?;
    let ephemeral_public: [u8; 32] = ephemeral
        .compute_public_key()
        .map_err(|_| KeyError::Agreement)?
        .as_ref()
        .try_into()
        .map_err(|_| KeyError::Agreement)?;

    let peer = UnparsedPublicKey::new(&X25519, recipient_public);
    let wrapping_key = agreement::agree_ephemeral(ephemeral, &peer, |shared| {
        derive_wrapping_key(shared, &ephemeral_public, &recipient_public)
    })
    .map_err(|_| KeyError::Agreement)??;

    let cipher = Aes256Gcm::new(&wrapping_key.into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: key.as_bytes(),
                aad: key_id.as_bytes(),
            },
        )
        .map_err(|e| KeyError::Encryption(e.to_string()))?;

    debug!(key_id = %key_id, "Content key wrapped for recipient");

    let mut nonce_bytes = [0u8; 12];
    nonce_bytes.copy_from_slice(nonce.as_slice());

    Ok(WrappedKey {
        ephemeral_public,
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Recipient-side keypair.
///
/// The private half is single use: unwrapping consumes it. Players keep their
/// own long-lived key material; this type exists for tooling and tests.
pub struct RecipientKeyPair {
    private: EphemeralPrivateKey,
    public: [u8; 32],
}

impl RecipientKeyPair {
    pub fn generate() -> KeyResult<Self> {
        let rng = SystemRandom::new();
        let private = EphemeralPrivateKey::generate(&X25519, &rng).map_err(|_| KeyError::Random)?;
        let public: [u8; 32] = private
            .compute_public_key()
            .map_err(|_| KeyError::Agreement)?
            .as_ref()
            .try_into()
            .map_err(|_| KeyError::Agreement)?;
        Ok(Self { private, public })
    }

    /// Hex encoded public key, the format stored on accounts
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public)
    }

    /// Recover the content key from `wrapped`
    pub fn unwrap_key(self, wrapped: &WrappedKey, key_id: &KeyId) -> KeyResult<ContentKey> {
        let peer = UnparsedPublicKey::new(&X25519, wrapped.ephemeral_public);
        let public = self.public;
        let wrapping_key = agreement::agree_ephemeral(self.private, &peer, |shared| {
            derive_wrapping_key(shared, &wrapped.ephemeral_public, &public)
        })
        .map_err(|_| KeyError::Agreement)??;

        let cipher = Aes256Gcm::new(&wrapping_key.into());
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&wrapped.nonce),
                Payload {
                    msg: &wrapped.ciphertext,
                    aad: key_id.as_bytes(),
                },
            )
            .map_err(|e| KeyError::Decryption(e.to_string()))?;

        ContentKey::from_slice(&plaintext)
    }
}

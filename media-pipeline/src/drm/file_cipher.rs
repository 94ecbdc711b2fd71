//! Whole-file content encryption: AES-128-CBC with PKCS#7 padding, keyed by
//! the asset's DRM metadata

use aes::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use mediavault_keys::DrmMetadata;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{PipelineError, Result};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const BLOCK: usize = 16;
/// Read size; a multiple of the block size
const CHUNK: usize = 64 * 1024;

fn encryptor(metadata: &DrmMetadata) -> Aes128CbcEnc {
    Aes128CbcEnc::new(
        GenericArray::from_slice(metadata.key.as_bytes()),
        GenericArray::from_slice(metadata.first_iv.as_bytes()),
    )
}

/// Encrypt `src` into `dst` without holding the whole file in memory.
/// Returns the ciphertext length.
pub async fn encrypt_file(src: &Path, dst: &Path, metadata: &DrmMetadata) -> Result<u64> {
    let mut cipher = encryptor(metadata);
    let mut input = tokio::fs::File::open(src).await?;
    let mut output = tokio::fs::File::create(dst).await?;

    // Room for the final padding block
    let mut buf = vec![0u8; CHUNK + BLOCK];
    let mut filled = 0;
    let mut written = 0u64;

    loop {
        let n = input.read(&mut buf[filled..CHUNK]).await?;
        if n == 0 {
            break;
        }
        filled += n;

        if filled == CHUNK {
            for block in buf[..CHUNK].chunks_exact_mut(BLOCK) {
                cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            output.write_all(&buf[..CHUNK]).await?;
            written += CHUNK as u64;
            filled = 0;
        }
    }

    let tail = cipher
        .encrypt_padded_mut::<Pkcs7>(&mut buf, filled)
        .map_err(|e| PipelineError::Encryption(format!("padding: {}", e)))?;
    output.write_all(tail).await?;
    written += tail.len() as u64;

    output.flush().await?;
    output.sync_all().await?;
    Ok(written)
}

pub fn encrypt_bytes(plaintext: &[u8], metadata: &DrmMetadata) -> Vec<u8> {
    encryptor(metadata).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub fn decrypt_bytes(ciphertext: &[u8], metadata: &DrmMetadata) -> Result<Vec<u8>> {
    Aes128CbcDec::new(
        GenericArray::from_slice(metadata.key.as_bytes()),
        GenericArray::from_slice(metadata.first_iv.as_bytes()),
    )
    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    .map_err(|e| PipelineError::Encryption(format!("decryption failed: {}", e)))
}

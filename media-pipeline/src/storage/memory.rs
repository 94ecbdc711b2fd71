//! In-memory object storage for tests and local runs

use async_trait::async_trait;
use mediavault_types::Cid;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncReadExt;

use super::{cid_of, ObjectReader, ObjectStorage};
use crate::error::StorageError;

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    deletions: Mutex<Vec<String>>,
    pushed: Mutex<Vec<String>>,
    pushes: AtomicUsize,
    /// Fail every push once this many bytes have been read from its source
    fail_after: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose pushes fail after reading `bytes` from the source
    pub fn failing_after(bytes: usize) -> Self {
        Self {
            fail_after: Some(bytes),
            ..Self::default()
        }
    }

    pub fn put(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.to_string(), bytes.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Keys passed to `delete`, in call order
    pub fn deletions(&self) -> Vec<String> {
        self.deletions.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// How many pushes targeted `key`
    pub fn pushes_to(&self, key: &str) -> usize {
        self.pushed
            .lock()
            .map(|pushed| pushed.iter().filter(|k| *k == key).count())
            .unwrap_or(0)
    }

    fn lock_error() -> StorageError {
        StorageError::Request("memory storage lock poisoned".to_string())
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn push_path(&self, key: &str, mut reader: ObjectReader) -> Result<Cid, StorageError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.pushed
            .lock()
            .map_err(|_| Self::lock_error())?
            .push(key.to_string());

        let mut body = Vec::new();
        match self.fail_after {
            Some(limit) => {
                let mut chunk = [0u8; 8192];
                loop {
                    let n = reader.read(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    body.extend_from_slice(&chunk[..n]);
                    if body.len() >= limit {
                        return Err(StorageError::Request(format!(
                            "injected failure after {} bytes for {}",
                            body.len(),
                            key
                        )));
                    }
                }
            }
            None => {
                reader.read_to_end(&mut body).await?;
            }
        }

        let cid = cid_of(&body);
        self.objects
            .lock()
            .map_err(|_| Self::lock_error())?
            .insert(key.to_string(), body);
        Ok(cid)
    }

    async fn obj_reader(&self, key: &str) -> Result<ObjectReader, StorageError> {
        let body = self
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(Box::pin(Cursor::new(body)))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.deletions
            .lock()
            .map_err(|_| Self::lock_error())?
            .push(key.to_string());
        self.objects
            .lock()
            .map_err(|_| Self::lock_error())?
            .remove(key);
        Ok(())
    }
}

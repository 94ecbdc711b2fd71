//! Retry with exponential backoff for whole-file uploads
//!
//! Only uploads from local files are retried: every attempt re-opens the
//! files. Streaming pushes consume their source and are never retried.
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


use mediavault_config::RetrySettings;
use mediavault_types::Cid;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage::ObjectStorage;

/// Retry configuration for upload operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Cap for exponential backoff
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Get delay for a specific retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // initial_delay * (multiplier ^ (attempt - 1))
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi((attempt - 1) as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Retry a function with exponential backoff
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(total_attempts = attempt + 1, "Upload succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if attempt < config.max_retries && is_retryable(&e.to_string()) => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Upload failed, retrying with exponential backoff"
                );
                sleep(delay).await;
            }
            Err(e) => {
                warn!(
                    attempts = attempt + 1,
                    max_retries = config.max_retries,
                    error = %e,
                    "Upload failed, giving up"
                );
                return Err(e);
            }
        }
    }
}

/// Upload one local file, re-opening it on every attempt
pub async fn upload_with_retry(
    storage: &dyn ObjectStorage,
    config: &RetryConfig,
    local: &Path,
    key: &str,
) -> Result<Cid, StorageError> {
    retry_with_backoff(config, || storage.upload(local, key)).await
}

/// Upload a set of local files as one artifact. A failed attempt re-uploads
/// the whole set.
pub async fn multi_upload_with_retry(
    storage: &dyn ObjectStorage,
    config: &RetryConfig,
    locals: &[PathBuf],
    keys: &[String],
) -> Result<Cid, StorageError> {
    retry_with_backoff(config, || storage.multi_upload(locals, keys)).await
}

/// Check if an upload error is retryable (transient)
pub fn is_retryable(message: &str) -> bool {
    let error_str = message.to_lowercase();

    // Authentication, authorization and missing input are permanent
    if error_str.contains("unauthorized")
        || error_str.contains("forbidden")
        || error_str.contains("401")
        || error_str.contains("403")
        || error_str.contains("invalid")
        || error_str.contains("malformed")
        || error_str.contains("not found")
        || error_str.contains("404")
        || error_str.contains("no such file")
        || error_str.contains("mismatched upload")
    {
        return false;
    }

    // Default: assume retryable for unknown errors (network issues are common)
    true
}

//! Media Pipeline Library
//!
//! Ingests uploaded media and YouTube references, produces previews and
//! thumbnails, encrypts content under per-asset DRM keys and drives every
//! asset record to `ready` or `failed`:
//! - Concurrent streaming transfer to object storage and local scratch
//! - Remote transcode jobs completed by polling or push notification
//! - Three-way YouTube ingest under one cancellation scope
//! - File, audio and video encryption branches with a cloud alternative
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


pub mod datastore;
pub mod dispatcher;
pub mod downloader;
pub mod drm;
pub mod error;
pub mod health;
pub mod job;
pub mod naming;
pub mod ownership;
pub mod pipeline;
pub mod retry;
pub mod storage;
pub mod tools;
pub mod transcoder;
pub mod transfer;
pub mod validate;
pub mod worker;
pub mod youtube;

// Re-export the types most callers need
pub use datastore::{Datastore, MemoryDatastore};
pub use dispatcher::{Dispatcher, DispatcherStats, JobIntake};
pub use error::{PipelineError, Result};
pub use job::{Job, JobMeta, JobSource};
pub use pipeline::{JobOutcome, Pipeline};
pub use storage::{MemoryStorage, ObjectStorage, S3Storage};
pub use tools::{ProcessRunner, ToolRunner};

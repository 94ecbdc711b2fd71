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

// Publishes a single intake or transcoder event for manual pipeline runs.
//
//   publish_test_event upload [url] [content_type]
//   publish_test_event youtube <video id or url>
//   publish_test_event job-completed <job name> <SUCCEEDED|FAILED>
//
// TEST_OWNER_ID picks the owner. With TEST_OWNER_PUBLIC_KEY set, the intake
// events also carry the owner's profile so the pipeline can wrap keys for it.
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use mediavault_config::AppConfig;
use mediavault_types::{
    Event, EventType, MediaUploadedPayload, OwnerProfile, RecordKind,
    TranscodeJobCompletedPayload, YoutubeReferencedPayload,
};
use message_bus_client::{MessageBusClient, NatsClient};
use uuid::Uuid;

const SAMPLE_VIDEO: &str =
    "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/BigBuckBunny.mp4";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = AppConfig::from_env().context("loading configuration")?;

    let owner_id = std::env::var("TEST_OWNER_ID")
        .ok()
        .and_then(|id| Uuid::parse_str(&id).ok())
        .unwrap_or_else(Uuid::nil);
    let owner = std::env::var("TEST_OWNER_PUBLIC_KEY").ok().map(|public_key| OwnerProfile {
        address: std::env::var("TEST_OWNER_ADDRESS").unwrap_or_else(|_| format!("0x{}", owner_id.simple())),
        public_key,
        // Fixed, so repeated runs derive the same key id
        created_at: DateTime::<Utc>::default(),
    });

    let event = match args.first().map(String::as_str).unwrap_or("upload") {
        "upload" => {
            let url = args.get(1).cloned().unwrap_or_else(|| SAMPLE_VIDEO.to_string());
            let content_type = args.get(2).cloned().unwrap_or_else(|| "video/mp4".to_string());
            let original_name = url.rsplit('/').next().unwrap_or("upload.bin").to_string();
            let asset_id = Uuid::new_v4();
            println!("   Asset ID: {}", asset_id);
            Event::new(
                EventType::MediaUploaded,
                "publish_test_event",
                MediaUploadedPayload {
                    asset_id,
                    owner_id,
                    kind: RecordKind::Asset,
                    file_path: url,
                    original_name,
                    content_type,
                    file_size: 0,
                    owner,
                },
            )?
        }
        "youtube" => {
            let Some(reference) = args.get(1).cloned() else {
                bail!("usage: publish_test_event youtube <video id or url>");
            };
            let asset_id = Uuid::new_v4();
            println!("   Asset ID: {}", asset_id);
            Event::new(
                EventType::YoutubeReferenced,
                "publish_test_event",
                YoutubeReferencedPayload {
                    asset_id,
                    owner_id,
                    kind: RecordKind::Asset,
                    reference,
                    owner,
                },
            )?
        }
        "job-completed" => {
            let (Some(job_name), Some(state)) = (args.get(1).cloned(), args.get(2).cloned()) else {
                bail!("usage: publish_test_event job-completed <job name> <state>");
            };
            Event::new(
                EventType::TranscodeJobCompleted,
                "publish_test_event",
                TranscodeJobCompletedPayload {
                    job_name,
                    state,
                    failure_reason: None,
                },
            )?
        }
        other => bail!("unknown event kind: {}", other),
    };

    println!("🔌 Connecting to NATS: {}", config.message_bus_url());
    let client = NatsClient::new(&config.message_bus).await?;

    println!("📤 Publishing {} event...", event.event_type.as_str());
    client.publish(&event).await?;

    println!("✅ Event published successfully!");
    println!("   Follow progress in the media-pipeline logs or on the asset's status.");

    Ok(())
}

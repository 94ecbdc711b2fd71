//! End-to-end pipeline tests against in-memory storage, scripted tools and a
//! scripted transcoder

mod common;

use axum::routing::get;
use axum::Router;
use chrono::Utc;
use common::{payload, FakeCloud, Harness, HarnessBuilder, ScriptedTools};
use media_pipeline::datastore::Datastore;
use media_pipeline::dispatcher::{self, Dispatcher};
use media_pipeline::drm::{Encryption, LocalEncryptor};
use media_pipeline::job::Job;
use media_pipeline::ownership::OwnershipTransfer;
use media_pipeline::pipeline::JobOutcome;
use media_pipeline::retry::RetryConfig;
use media_pipeline::storage::{cid_of, MemoryStorage};
use media_pipeline::transcoder::{Completion, TranscodeLocations};
use media_pipeline::youtube::{Thumbnail, VideoFormat, VideoInfo};
use mediavault_config::ToolsConfig;
use mediavault_keys::{KeyId, RecipientKeyPair, WrappedKey};
use mediavault_types::{
    AssetStatus, MediaUploadedPayload, OwnerProfile, RecordKind, RemoteJobState, TranscodeJobCompletedPayload,
    YoutubeReferencedPayload,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const ALL_TYPES: &[&str] = &["video/mp4", "audio/mpeg", "image/png", "application/pdf"];

fn allowed() -> Vec<String> {
    ALL_TYPES.iter().map(|s| s.to_string()).collect()
}

async fn upload_job(harness: &Harness, owner_id: Uuid, name: &str, content_type: &str, bytes: &[u8]) -> Job {
    let (intake, mut rx) = dispatcher::channel(1, harness.datastore.clone(), harness.temp_root(), allowed());
    let file_path = harness.stage(name, bytes).await;
    intake
        .accept_upload(MediaUploadedPayload {
            asset_id: Uuid::new_v4(),
            owner_id,
            kind: RecordKind::Asset,
            file_path,
            original_name: name.to_string(),
            content_type: content_type.to_string(),
            file_size: bytes.len() as u64,
            owner: None,
        })
        .await
        .unwrap();
    rx.recv().await.unwrap()
}

fn failure(outcome: &JobOutcome) -> (&str, &str) {
    match outcome {
        JobOutcome::Failed { stage, error, .. } => (stage.as_str(), error.as_str()),
        JobOutcome::Ready(asset) => panic!("expected failure, asset {} is ready", asset.id),
    }
}

#[tokio::test]
async fn test_large_mp4_without_transcoding_is_encrypted_and_ready() {
    let harness = HarnessBuilder::new().build();
    let (owner_id, _pair) = harness.owner().await;
    let body = payload(10 * 1024 * 1024);

    let job = upload_job(&harness, owner_id, "holiday.mp4", "video/mp4", &body).await;
    let names = job.meta.names.clone();
    let outcome = harness.pipeline.process(job, &CancellationToken::new()).await;

    let asset = match outcome {
        JobOutcome::Ready(asset) => asset,
        other => panic!("expected ready, got {:?}", other),
    };
    assert_eq!(asset.status, AssetStatus::Ready);
    assert_eq!(asset.original_cid, Some(cid_of(&body)));
    assert_eq!(harness.storage.get(&names.original_key).unwrap().len(), body.len());
    assert!(asset.encrypted_cid.is_some());
    assert_eq!(asset.encrypted_key.as_deref(), Some(names.encrypted_key.as_str()));
    assert!(harness.storage.contains(&names.key_for("video_enc_dashinit.mp4")));
    assert!(harness.storage.contains(&names.key_for("audio_enc_dashinit.mp4")));
    assert!(asset.thumbnail_cid.is_some());
    assert!(asset.preview_cid.is_none());
    assert!(asset.job_id.is_none());

    assert_eq!(
        harness.status_history(asset.id).await,
        vec![AssetStatus::Processing, AssetStatus::Ready]
    );
    // Scratch space is gone once the job ends
    assert!(!names.work_dir.exists());
}

#[tokio::test]
async fn test_ready_asset_key_unwraps_for_owner() {
    let harness = HarnessBuilder::new().build();
    let (owner_id, pair) = harness.owner().await;

    let job = upload_job(&harness, owner_id, "report.pdf", "application/pdf", b"%PDF-1.7 body").await;
    let asset = match harness.pipeline.process(job, &CancellationToken::new()).await {
        JobOutcome::Ready(asset) => asset,
        other => panic!("expected ready, got {:?}", other),
    };

    let key_id = KeyId::from_hex(asset.drm_key_id.as_deref().unwrap()).unwrap();
    let wrapped = WrappedKey::from_hex(asset.drm_key.as_deref().unwrap()).unwrap();
    let key = pair.unwrap_key(&wrapped, &key_id).unwrap();
    assert_eq!(Some(key.to_hex()), asset.encryption_key);

    // PDFs get no thumbnail and are encrypted as one file
    assert!(asset.thumbnail_cid.is_none());
    let encrypted_key = asset.encrypted_key.as_deref().unwrap();
    assert!(encrypted_key.ends_with("encrypted.pdf"));
    assert_ne!(harness.storage.get(encrypted_key).unwrap(), b"%PDF-1.7 body");
    assert!(!harness.tools.programs().contains(&"ffmpeg".to_string()));
}

#[tokio::test]
async fn test_audio_is_packaged_as_dash() {
    let harness = HarnessBuilder::new().tools(ScriptedTools::silent()).build();
    let (owner_id, _pair) = harness.owner().await;

    let job = upload_job(&harness, owner_id, "song.mp3", "audio/mpeg", &payload(4096)).await;
    let names = job.meta.names.clone();
    let outcome = harness.pipeline.process(job, &CancellationToken::new()).await;

    assert_eq!(outcome.status(), AssetStatus::Ready);
    assert!(names.encrypted_key.ends_with("encrypted.mpd"));
    assert!(harness.storage.contains(&names.encrypted_key));
    assert!(harness.storage.contains(&names.key_for("audio_enc_dashinit.mp4")));

    let dash = harness
        .tools
        .calls()
        .into_iter()
        .find(|(_, args)| args.iter().any(|a| a == "-dash"))
        .unwrap();
    assert_eq!(dash.0, "MP4Box");
    assert!(dash.1.iter().any(|a| a.ends_with("audio_enc.mp4#audio")));
}

#[tokio::test]
async fn test_storage_failure_mid_transfer_fails_asset() {
    let harness = HarnessBuilder::new()
        .storage(MemoryStorage::failing_after(16 * 1024))
        .build();
    let (owner_id, _pair) = harness.owner().await;

    let job = upload_job(&harness, owner_id, "clip.mp4", "video/mp4", &payload(256 * 1024)).await;
    let asset_id = job.asset.id;
    let outcome = harness.pipeline.process(job, &CancellationToken::new()).await;

    let (stage, _) = failure(&outcome);
    assert_eq!(stage, "transfer");

    let asset = harness.asset(asset_id).await;
    assert_eq!(asset.status, AssetStatus::Failed);
    assert!(asset.original_cid.is_none());
    assert!(asset.encrypted_cid.is_none());
    assert_eq!(
        harness.status_history(asset_id).await,
        vec![AssetStatus::Processing, AssetStatus::Failed]
    );
}

#[tokio::test]
async fn test_unknown_owner_fails_at_drm() {
    let harness = HarnessBuilder::new().build();

    let job = upload_job(&harness, Uuid::new_v4(), "cover.png", "image/png", b"png").await;
    let asset_id = job.asset.id;
    let outcome = harness.pipeline.process(job, &CancellationToken::new()).await;

    assert_eq!(failure(&outcome).0, "drm");
    let asset = harness.asset(asset_id).await;
    assert_eq!(asset.status, AssetStatus::Failed);
    // Steps before the failure stay recorded
    assert!(asset.original_cid.is_some());
    assert!(asset.thumbnail_cid.is_some());
}

#[tokio::test]
async fn test_failed_transcode_fails_asset_without_preview() {
    let harness = HarnessBuilder::new()
        .transcoding(RemoteJobState::Failed, true)
        .build();
    let (owner_id, _pair) = harness.owner().await;

    let job = upload_job(&harness, owner_id, "clip.mp4", "video/mp4", &payload(8192)).await;
    let asset_id = job.asset.id;
    let outcome = harness.pipeline.process(job, &CancellationToken::new()).await;

    let (stage, error) = failure(&outcome);
    assert_eq!(stage, "transcode");
    assert!(error.contains("Transcoder job failed"), "{}", error);

    let asset = harness.asset(asset_id).await;
    assert_eq!(asset.status, AssetStatus::Failed);
    assert!(asset.preview_cid.is_none());
    assert_eq!(asset.job_status, Some(RemoteJobState::Failed));

    let (client, manager) = harness.transcoder.as_ref().unwrap();
    assert_eq!(client.deletes(), 1);
    assert_eq!(manager.waiting(), 0);
}

#[tokio::test]
async fn test_poll_and_push_complete_the_job_once() {
    let harness = HarnessBuilder::new()
        .transcoding(RemoteJobState::Succeeded, true)
        .build();
    let (owner_id, _pair) = harness.owner().await;
    let (client, manager) = harness.transcoder.clone().unwrap();

    let job = upload_job(&harness, owner_id, "clip.mp4", "video/mp4", &payload(8192)).await;
    let asset_id = job.asset.id;
    let names = job.meta.names.clone();
    let pipeline = harness.pipeline.clone();
    let processing = tokio::spawn(async move { pipeline.process(job, &CancellationToken::new()).await });

    let job_name = loop {
        if let Some(name) = harness.asset(asset_id).await.job_id {
            break name;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    // The service may deliver the same notification more than once
    let notification = TranscodeJobCompletedPayload {
        job_name: job_name.clone(),
        state: "SUCCEEDED".to_string(),
        failure_reason: None,
    };
    let (first, second) = tokio::join!(
        manager.handle_notification(&notification),
        manager.handle_notification(&notification),
    );
    let mut completions = vec![first.unwrap(), second.unwrap()];
    completions.sort_by_key(|c| matches!(c, Completion::AlreadyHandled));
    assert!(matches!(completions[0], Completion::Succeeded { .. }));
    assert_eq!(completions[1], Completion::AlreadyHandled);

    let outcome = processing.await.unwrap();
    let asset = match outcome {
        JobOutcome::Ready(asset) => asset,
        other => panic!("expected ready, got {:?}", other),
    };

    assert_eq!(client.created(), 1);
    assert_eq!(client.deletes(), 1);
    assert_eq!(asset.preview_key.as_deref(), Some(names.preview_key.as_str()));
    assert_eq!(asset.preview_cid, Some(cid_of(b"preview bytes")));
    assert_eq!(asset.job_status, Some(RemoteJobState::Succeeded));

    let locations = TranscodeLocations::for_original(&common::transcoder_config(true), &names.original_key);
    assert!(!harness.storage.contains(&locations.input_key));
    assert!(!harness.storage.contains(&locations.output_key));
    assert!(harness.storage.contains(&names.preview_key));

    // A late poll or duplicate push changes nothing
    let late = manager.handle_notification(&notification).await.unwrap();
    assert_eq!(late, Completion::AlreadyHandled);
    assert_eq!(client.deletes(), 1);
    assert_eq!(harness.asset(asset_id).await.status, AssetStatus::Ready);
}

#[tokio::test]
async fn test_polling_alone_completes_the_job() {
    let harness = HarnessBuilder::new()
        .transcoding(RemoteJobState::Succeeded, true)
        .tools(ScriptedTools::silent())
        .build();
    let (owner_id, _pair) = harness.owner().await;

    let job = upload_job(&harness, owner_id, "silent.mp4", "video/mp4", &payload(2048)).await;
    let outcome = harness.pipeline.process(job, &CancellationToken::new()).await;

    let asset = match outcome {
        JobOutcome::Ready(asset) => asset,
        other => panic!("expected ready, got {:?}", other),
    };
    assert!(asset.preview_cid.is_some());
    assert_eq!(harness.transcoder.as_ref().unwrap().0.deletes(), 1);
}

#[tokio::test]
async fn test_youtube_without_preview_format_fails() {
    let video = VideoInfo {
        id: "dQw4w9WgXcQ".to_string(),
        title: "clip".to_string(),
        formats: vec![
            VideoFormat {
                format_id: "137".to_string(),
                ext: "mp4".to_string(),
                vcodec: Some("avc1.640028".to_string()),
                acodec: Some("none".to_string()),
                height: Some(1080),
                url: Some("https://video.test/137".to_string()),
                ..Default::default()
            },
            VideoFormat {
                format_id: "140".to_string(),
                ext: "m4a".to_string(),
                vcodec: Some("none".to_string()),
                acodec: Some("mp4a.40.2".to_string()),
                abr: Some(128.0),
                url: Some("https://video.test/140".to_string()),
                ..Default::default()
            },
        ],
        thumbnails: vec![Thumbnail {
            url: "http://127.0.0.1:9/maxres.jpg".to_string(),
            width: Some(1280),
            height: Some(720),
        }],
    };
    let harness = HarnessBuilder::new().youtube(video).build();
    let (owner_id, _pair) = harness.owner().await;

    let (intake, mut rx) = dispatcher::channel(1, harness.datastore.clone(), harness.temp_root(), Vec::new());
    let asset_id = intake
        .accept_youtube(YoutubeReferencedPayload {
            asset_id: Uuid::new_v4(),
            owner_id,
            kind: RecordKind::Asset,
            reference: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            owner: None,
        })
        .await
        .unwrap();
    let job = rx.recv().await.unwrap();
    let outcome = harness.pipeline.process(job, &CancellationToken::new()).await;

    let (stage, error) = failure(&outcome);
    assert_eq!(stage, "youtube");
    assert_eq!(error, "YouTube error: preview not found");

    let asset = harness.asset(asset_id).await;
    assert_eq!(asset.status, AssetStatus::Failed);
    assert!(asset.original_cid.is_none());
    assert!(asset.preview_cid.is_none());
    assert!(asset.encrypted_cid.is_none());
}

#[tokio::test]
async fn test_cancelled_job_ends_failed() {
    let harness = HarnessBuilder::new().build();
    let (owner_id, _pair) = harness.owner().await;

    let job = upload_job(&harness, owner_id, "clip.mp4", "video/mp4", &payload(1024)).await;
    let asset_id = job.asset.id;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = harness.pipeline.process(job, &cancel).await;
    assert_eq!(outcome.status(), AssetStatus::Failed);
    assert_eq!(harness.asset(asset_id).await.status, AssetStatus::Failed);
}

#[tokio::test]
async fn test_dispatcher_runs_allowed_uploads_only() {
    let harness = HarnessBuilder::new().build();
    let (owner_id, _pair) = harness.owner().await;
    let (intake, rx) = dispatcher::channel(
        4,
        harness.datastore.clone(),
        harness.temp_root(),
        vec!["image/png".to_string()],
    );
    let (outcome_tx, mut outcomes) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(harness.pipeline.clone(), 2).with_outcomes(outcome_tx);
    let stats = dispatcher.stats();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(dispatcher.run(rx, shutdown.clone()));

    let upload = |name: &str, content_type: &str, file_path: String| MediaUploadedPayload {
        asset_id: Uuid::new_v4(),
        owner_id,
        kind: RecordKind::Media,
        file_path,
        original_name: name.to_string(),
        content_type: content_type.to_string(),
        file_size: 3,
        owner: None,
    };

    let rejected = upload("setup.exe", "application/x-msdownload", harness.stage("setup.exe", b"MZ!").await);
    let rejected_id = rejected.asset_id;
    tokio_test::assert_err!(intake.accept_upload(rejected).await);

    let accepted_id = tokio_test::assert_ok!(
        intake
            .accept_upload(upload("cover.png", "Image/PNG", harness.stage("cover.png", b"png").await))
            .await
    );

    let outcome = outcomes.recv().await.unwrap();
    assert_eq!(outcome.asset_id(), accepted_id);
    assert_eq!(outcome.status(), AssetStatus::Ready);
    assert!(harness.datastore.get_asset(rejected_id).await.is_err());

    shutdown.cancel();
    running.await.unwrap();
    assert_eq!(stats.ready(), 1);
    assert_eq!(stats.active(), 0);
}

#[tokio::test]
async fn test_ownership_transfer_rekeys_ready_asset() {
    let harness = HarnessBuilder::new().build();
    let (owner_id, _old_pair) = harness.owner().await;
    let (new_owner_id, new_pair) = harness.owner().await;

    let job = upload_job(&harness, owner_id, "cover.png", "image/png", &payload(3000)).await;
    let before = match harness.pipeline.process(job, &CancellationToken::new()).await {
        JobOutcome::Ready(asset) => asset,
        other => panic!("expected ready, got {:?}", other),
    };
    let encrypted_key = before.encrypted_key.clone().unwrap();
    let ciphertext_before = harness.storage.get(&encrypted_key).unwrap();

    let local = Arc::new(LocalEncryptor::new(
        harness.tools.clone(),
        harness.storage.clone(),
        ToolsConfig::default(),
        RetryConfig::none(),
    ));
    let transfer = OwnershipTransfer::new(
        harness.datastore.clone(),
        harness.storage.clone(),
        Encryption::new(local, None),
        harness.temp_root(),
    );
    let after = transfer
        .transfer(before.id, new_owner_id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(after.status, AssetStatus::Ready);
    assert_eq!(after.owner_id, new_owner_id);
    assert_eq!(after.original_cid, before.original_cid);
    assert_ne!(after.encryption_key, before.encryption_key);
    let folder = encrypted_key.rsplit_once('/').unwrap().0;
    let new_key = after.encrypted_key.clone().unwrap();
    assert!(new_key.starts_with(&format!("{}/", folder)), "{}", new_key);
    assert_ne!(new_key, encrypted_key);
    assert_ne!(harness.storage.get(&new_key).unwrap(), ciphertext_before);
    assert!(!harness.storage.contains(&encrypted_key));

    let key_id = KeyId::from_hex(after.drm_key_id.as_deref().unwrap()).unwrap();
    let wrapped = WrappedKey::from_hex(after.drm_key.as_deref().unwrap()).unwrap();
    let key = new_pair.unwrap_key(&wrapped, &key_id).unwrap();
    assert_eq!(Some(key.to_hex()), after.encryption_key);

    assert_eq!(
        harness.status_history(before.id).await,
        vec![
            AssetStatus::Processing,
            AssetStatus::Ready,
            AssetStatus::Transferring,
            AssetStatus::Transferred,
            AssetStatus::Ready,
        ]
    );
}

#[tokio::test]
async fn test_failed_asset_is_never_marked_ready() {
    let harness = HarnessBuilder::new().build();
    let (owner_id, _pair) = harness.owner().await;
    let job = upload_job(&harness, owner_id, "cover.png", "image/png", b"png").await;
    let asset_id = job.asset.id;

    harness
        .datastore
        .mark_asset_status(asset_id, AssetStatus::Failed)
        .await
        .unwrap();

    // The job itself would succeed; the stored failure still wins
    let outcome = harness.pipeline.process(job, &CancellationToken::new()).await;
    assert_eq!(outcome.status(), AssetStatus::Failed);
    assert_eq!(failure(&outcome).0, "finalize");
    assert_eq!(harness.asset(asset_id).await.status, AssetStatus::Failed);
    assert!(harness
        .datastore
        .mark_asset_status(asset_id, AssetStatus::Processing)
        .await
        .is_err());
}

async fn wait_for_job_id(harness: &Harness, asset_id: Uuid) -> String {
    loop {
        if let Some(name) = harness.asset(asset_id).await.job_id {
            return name;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_stage_failure_after_submit_drops_transcode_job() {
    // Polling is off and nothing pushes, so the job would never finish on its own
    let harness = HarnessBuilder::new()
        .transcoding(RemoteJobState::Succeeded, false)
        .build();

    // No account for this owner, so the drm stage fails after the job is submitted
    let job = upload_job(&harness, Uuid::new_v4(), "clip.mp4", "video/mp4", &payload(4096)).await;
    let asset_id = job.asset.id;
    let names = job.meta.names.clone();
    let outcome = harness.pipeline.process(job, &CancellationToken::new()).await;

    assert_eq!(failure(&outcome).0, "drm");
    let asset = harness.asset(asset_id).await;
    assert_eq!(asset.status, AssetStatus::Failed);
    assert_eq!(asset.job_status, Some(RemoteJobState::Failed));

    let (client, manager) = harness.transcoder.as_ref().unwrap();
    assert_eq!(client.created(), 1);
    assert_eq!(client.deletes(), 1);
    assert_eq!(manager.waiting(), 0);

    let locations = TranscodeLocations::for_original(&common::transcoder_config(false), &names.original_key);
    assert!(!harness.storage.contains(&locations.input_key));
    assert!(!harness.storage.contains(&locations.output_key));

    // A notification arriving afterwards finds the job settled
    let late = manager
        .handle_notification(&TranscodeJobCompletedPayload {
            job_name: asset.job_id.clone().unwrap(),
            state: "SUCCEEDED".to_string(),
            failure_reason: None,
        })
        .await
        .unwrap();
    assert_eq!(late, Completion::AlreadyHandled);
    assert_eq!(client.deletes(), 1);
}

#[tokio::test]
async fn test_poll_racing_push_completes_once() {
    let harness = HarnessBuilder::new()
        .transcoding(RemoteJobState::Succeeded, false)
        .build();
    let (owner_id, _pair) = harness.owner().await;
    let (client, manager) = harness.transcoder.clone().unwrap();

    let job = upload_job(&harness, owner_id, "clip.mp4", "video/mp4", &payload(8192)).await;
    let asset_id = job.asset.id;
    let names = job.meta.names.clone();
    let pipeline = harness.pipeline.clone();
    let processing = tokio::spawn(async move { pipeline.process(job, &CancellationToken::new()).await });

    let job_name = wait_for_job_id(&harness, asset_id).await;
    let notification = TranscodeJobCompletedPayload {
        job_name: job_name.clone(),
        state: "SUCCEEDED".to_string(),
        failure_reason: None,
    };
    let (polled, pushed) = tokio::join!(
        manager.poll_once(asset_id, &job_name),
        manager.handle_notification(&notification),
    );

    // Exactly one observer does the follow-up work
    let poll_won = polled.unwrap() == Some(RemoteJobState::Succeeded);
    let push_won = matches!(pushed.unwrap(), Completion::Succeeded { .. });
    assert!(poll_won != push_won, "poll won: {}, push won: {}", poll_won, push_won);

    assert_eq!(processing.await.unwrap().status(), AssetStatus::Ready);
    assert_eq!(client.deletes(), 1);
    assert_eq!(harness.storage.pushes_to(&names.preview_key), 1);
    assert_eq!(manager.waiting(), 0);
}

#[tokio::test]
async fn test_owner_profile_in_event_is_enough_to_encrypt() {
    let harness = HarnessBuilder::new().build();
    let pair = RecipientKeyPair::generate().unwrap();
    let owner_id = Uuid::new_v4();

    let (intake, mut rx) = dispatcher::channel(1, harness.datastore.clone(), harness.temp_root(), allowed());
    let file_path = harness.stage("cover.png", b"png").await;
    intake
        .accept_upload(MediaUploadedPayload {
            asset_id: Uuid::new_v4(),
            owner_id,
            kind: RecordKind::Asset,
            file_path,
            original_name: "cover.png".to_string(),
            content_type: "image/png".to_string(),
            file_size: 3,
            owner: Some(OwnerProfile {
                address: "0xfeed".to_string(),
                public_key: pair.public_key_hex(),
                created_at: Utc::now(),
            }),
        })
        .await
        .unwrap();
    let job = rx.recv().await.unwrap();

    let asset = match harness.pipeline.process(job, &CancellationToken::new()).await {
        JobOutcome::Ready(asset) => asset,
        other => panic!("expected ready, got {:?}", other),
    };
    let key_id = KeyId::from_hex(asset.drm_key_id.as_deref().unwrap()).unwrap();
    let wrapped = WrappedKey::from_hex(asset.drm_key.as_deref().unwrap()).unwrap();
    let key = pair.unwrap_key(&wrapped, &key_id).unwrap();
    assert_eq!(Some(key.to_hex()), asset.encryption_key);
}

fn full_video(thumbnail_url: String) -> VideoInfo {
    let video = |id: &str, height: u32| VideoFormat {
        format_id: id.to_string(),
        ext: "mp4".to_string(),
        vcodec: Some("avc1.640028".to_string()),
        acodec: Some("none".to_string()),
        height: Some(height),
        url: Some(format!("https://video.test/{}", id)),
        ..Default::default()
    };
    VideoInfo {
        id: "dQw4w9WgXcQ".to_string(),
        title: "clip".to_string(),
        formats: vec![
            video("137", 1080),
            video("135", 480),
            VideoFormat {
                format_id: "140".to_string(),
                ext: "m4a".to_string(),
                vcodec: Some("none".to_string()),
                acodec: Some("mp4a.40.2".to_string()),
                abr: Some(128.0),
                url: Some("https://video.test/140".to_string()),
                ..Default::default()
            },
        ],
        thumbnails: vec![Thumbnail {
            url: thumbnail_url,
            width: Some(1280),
            height: Some(720),
        }],
    }
}

#[tokio::test]
async fn test_youtube_reference_becomes_ready_with_all_artifacts() {
    let images = common::serve(Router::new().route("/maxres.jpg", get(|| async { "thumbnail bytes" }))).await;
    let harness = HarnessBuilder::new()
        .youtube(full_video(format!("{}/maxres.jpg", images)))
        .build();
    let (owner_id, pair) = harness.owner().await;

    let (intake, mut rx) = dispatcher::channel(1, harness.datastore.clone(), harness.temp_root(), Vec::new());
    intake
        .accept_youtube(YoutubeReferencedPayload {
            asset_id: Uuid::new_v4(),
            owner_id,
            kind: RecordKind::Asset,
            reference: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            owner: None,
        })
        .await
        .unwrap();
    let job = rx.recv().await.unwrap();
    let names = job.meta.names.clone();

    let asset = match harness.pipeline.process(job, &CancellationToken::new()).await {
        JobOutcome::Ready(asset) => asset,
        other => panic!("expected ready, got {:?}", other),
    };

    assert_eq!(asset.original_key.as_deref(), Some(names.original_key.as_str()));
    assert_eq!(asset.preview_key.as_deref(), Some(names.preview_key.as_str()));
    assert_eq!(asset.thumbnail_cid, Some(cid_of(b"thumbnail bytes")));
    assert_eq!(harness.storage.get(&names.thumbnail_key).unwrap(), b"thumbnail bytes");
    assert!(asset.original_cid.is_some());
    assert!(asset.preview_cid.is_some());
    assert_eq!(asset.encrypted_key.as_deref(), Some(names.encrypted_key.as_str()));
    assert!(asset.encrypted_cid.is_some());
    assert!(harness.storage.contains(&names.encrypted_key));

    // Original and preview each mux the chosen video track with the audio track
    let muxes: Vec<Vec<String>> = harness
        .tools
        .calls()
        .into_iter()
        .filter(|(program, args)| program == "ffmpeg" && args.iter().any(|a| a == "+faststart"))
        .map(|(_, args)| args)
        .collect();
    assert_eq!(muxes.len(), 2);
    assert!(muxes.iter().any(|args| args.contains(&"https://video.test/137".to_string())));
    assert!(muxes.iter().any(|args| args.contains(&"https://video.test/135".to_string())));
    assert!(muxes.iter().all(|args| args.contains(&"https://video.test/140".to_string())));

    let key_id = KeyId::from_hex(asset.drm_key_id.as_deref().unwrap()).unwrap();
    let wrapped = WrappedKey::from_hex(asset.drm_key.as_deref().unwrap()).unwrap();
    assert_eq!(Some(pair.unwrap_key(&wrapped, &key_id).unwrap().to_hex()), asset.encryption_key);
    assert_eq!(
        harness.status_history(asset.id).await,
        vec![AssetStatus::Processing, AssetStatus::Ready]
    );
}

#[tokio::test]
async fn test_cloud_stream_completion_makes_video_ready() {
    let storage = Arc::new(MemoryStorage::new());
    let cloud = FakeCloud::start(storage.clone(), &["PREPARED", "COMPLETED"]).await;
    let harness = HarnessBuilder::new().storage(storage).cloud(cloud.config()).build();
    let (owner_id, _pair) = harness.owner().await;

    let job = upload_job(&harness, owner_id, "clip.mp4", "video/mp4", &payload(4096)).await;
    let names = job.meta.names.clone();
    let asset = match harness.pipeline.process(job, &CancellationToken::new()).await {
        JobOutcome::Ready(asset) => asset,
        other => panic!("expected ready, got {:?}", other),
    };

    assert_eq!(cloud.created(), 1);
    assert_eq!(asset.encrypted_key.as_deref(), Some(names.encrypted_key.as_str()));
    assert_eq!(asset.encrypted_cid, Some(cid_of(b"<MPD/>")));
    // Packaging happened remotely
    assert!(!harness.tools.programs().contains(&"MP4Box".to_string()));
}

#[tokio::test]
async fn test_cloud_stream_input_error_fails_asset() {
    let storage = Arc::new(MemoryStorage::new());
    let cloud = FakeCloud::start(storage.clone(), &["PREPARED", "INPUT_ERROR"]).await;
    let harness = HarnessBuilder::new().storage(storage).cloud(cloud.config()).build();
    let (owner_id, _pair) = harness.owner().await;

    let job = upload_job(&harness, owner_id, "song.mp3", "audio/mpeg", &payload(2048)).await;
    let asset_id = job.asset.id;
    let outcome = harness.pipeline.process(job, &CancellationToken::new()).await;

    let (stage, error) = failure(&outcome);
    assert_eq!(stage, "encrypt");
    assert!(error.contains("INPUT_ERROR"), "{}", error);
    assert!(error.contains("input unreadable"), "{}", error);

    let asset = harness.asset(asset_id).await;
    assert_eq!(asset.status, AssetStatus::Failed);
    assert!(asset.encrypted_cid.is_none());
    assert_eq!(cloud.created(), 1);
}

#[tokio::test]
async fn test_files_use_local_cipher_with_cloud_configured() {
    let storage = Arc::new(MemoryStorage::new());
    let cloud = FakeCloud::start(storage.clone(), &[]).await;
    let harness = HarnessBuilder::new().storage(storage).cloud(cloud.config()).build();
    let (owner_id, _pair) = harness.owner().await;

    let job = upload_job(&harness, owner_id, "report.pdf", "application/pdf", b"%PDF-1.7 body").await;
    let asset = match harness.pipeline.process(job, &CancellationToken::new()).await {
        JobOutcome::Ready(asset) => asset,
        other => panic!("expected ready, got {:?}", other),
    };

    assert_eq!(cloud.created(), 0);
    let encrypted_key = asset.encrypted_key.as_deref().unwrap();
    assert!(encrypted_key.ends_with("encrypted.pdf"));
    assert_ne!(harness.storage.get(encrypted_key).unwrap(), b"%PDF-1.7 body");
}

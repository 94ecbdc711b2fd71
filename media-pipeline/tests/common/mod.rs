//! Fakes shared by the pipeline integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use media_pipeline::datastore::{Datastore, MemoryDatastore};
use media_pipeline::downloader::SourceOpener;
use media_pipeline::drm::{CloudEncryptor, ContentEncryptor, Encryption, LocalEncryptor};
use media_pipeline::error::{ToolError, TranscoderError, YoutubeError};
use media_pipeline::pipeline::Pipeline;
use media_pipeline::retry::RetryConfig;
use media_pipeline::storage::MemoryStorage;
use media_pipeline::tools::{ToolOutput, ToolRunner};
use media_pipeline::transcoder::{JobSpec, JobStatus, TranscodeManager, TranscoderClient};
use media_pipeline::youtube::{VideoFormat, VideoInfo, YoutubeIngest, YoutubeResolver};
use mediavault_config::{CloudEncryptionConfig, ToolsConfig, TranscoderConfig};
use mediavault_keys::RecipientKeyPair;
use mediavault_types::{Account, RemoteJobState};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const STORAGE_URI: &str = "gs://mediavault-test";

/// Stands in for ffmpeg, ffprobe and MP4Box: writes every output file the
/// real tool would produce and reports an audio stream when asked
#[derive(Default)]
pub struct ScriptedTools {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    silent: bool,
}

impl ScriptedTools {
    /// Sources have no audio stream
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|(program, _)| program).collect()
    }

    fn outputs(args: &[String]) -> Vec<PathBuf> {
        let mut outputs = Vec::new();
        match args.iter().position(|a| a == "-out") {
            Some(i) => outputs.extend(args.get(i + 1).map(PathBuf::from)),
            None => outputs.extend(args.last().map(PathBuf::from)),
        }
        if args.iter().any(|a| a == "-dash") {
            for input in args.iter().filter_map(|a| a.split_once('#').map(|(path, _)| path)) {
                let input = Path::new(input);
                let stem = input.file_stem().unwrap().to_string_lossy();
                outputs.push(input.with_file_name(format!("{}_dashinit.mp4", stem)));
            }
        }
        outputs
    }
}

#[async_trait]
impl ToolRunner for ScriptedTools {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled {
                program: program.to_string(),
            });
        }
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        if program == "ffprobe" {
            let stdout = if self.silent { "" } else { "1\n" };
            return Ok(ToolOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
            });
        }

        for output in Self::outputs(args) {
            tokio::fs::write(&output, format!("{} output", program))
                .await
                .map_err(|source| ToolError::Spawn {
                    program: program.to_string(),
                    source,
                })?;
        }
        Ok(ToolOutput::default())
    }
}

/// Remote transcoder that finishes every job in `final_state` and writes
/// the preview into the shared storage when it succeeds
pub struct ScriptedTranscoder {
    storage: Arc<MemoryStorage>,
    final_state: RemoteJobState,
    created: AtomicUsize,
    deletes: AtomicUsize,
}

impl ScriptedTranscoder {
    pub fn new(storage: Arc<MemoryStorage>, final_state: RemoteJobState) -> Self {
        Self {
            storage,
            final_state,
            created: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscoderClient for ScriptedTranscoder {
    async fn create_job(&self, spec: &JobSpec) -> Result<JobStatus, TranscoderError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        if self.final_state == RemoteJobState::Succeeded {
            let output_dir = spec
                .output_uri
                .strip_prefix(&format!("{}/", STORAGE_URI))
                .ok_or_else(|| TranscoderError::Request(format!("unexpected output {}", spec.output_uri)))?;
            self.storage
                .put(&format!("{}{}", output_dir, JobSpec::output_file_name()), b"preview bytes".to_vec());
        }
        Ok(JobStatus {
            name: format!("projects/p/locations/l/jobs/{}", n),
            state: RemoteJobState::Pending,
            failure_reason: None,
        })
    }

    async fn get_job(&self, name: &str) -> Result<JobStatus, TranscoderError> {
        Ok(JobStatus {
            name: name.to_string(),
            state: self.final_state.clone(),
            failure_reason: (self.final_state == RemoteJobState::Failed)
                .then(|| "unsupported codec".to_string()),
        })
    }

    async fn delete_job(&self, _name: &str) -> Result<(), TranscoderError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct StaticResolver(pub VideoInfo);

#[async_trait]
impl YoutubeResolver for StaticResolver {
    async fn get_video(&self, _video_id: &str) -> Result<VideoInfo, YoutubeError> {
        Ok(self.0.clone())
    }

    async fn stream_url(&self, _video: &VideoInfo, format: &VideoFormat) -> Result<String, YoutubeError> {
        Ok(format.url.clone().unwrap_or_default())
    }
}

/// Serve `router` on a free local port and return its base URL
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Default)]
struct CloudStreams {
    states: Mutex<VecDeque<&'static str>>,
    manifest_key: Mutex<Option<String>>,
    created: AtomicUsize,
}

/// Streaming-encryption service that walks each stream through scripted
/// states and writes the manifest into the shared storage on completion
pub struct FakeCloud {
    pub endpoint: String,
    streams: Arc<CloudStreams>,
}

type CloudState = (Arc<CloudStreams>, Arc<MemoryStorage>);

impl FakeCloud {
    pub async fn start(storage: Arc<MemoryStorage>, states: &[&'static str]) -> Self {
        let streams = Arc::new(CloudStreams {
            states: Mutex::new(states.iter().copied().collect()),
            ..Default::default()
        });
        let router = Router::new()
            .route("/v1/streams", post(create_stream))
            .route("/v1/streams/:id", get(get_stream))
            .with_state((streams.clone(), storage));
        Self {
            endpoint: serve(router).await,
            streams,
        }
    }

    pub fn created(&self) -> usize {
        self.streams.created.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> CloudEncryptionConfig {
        serde_json::from_value(serde_json::json!({
            "endpoint": self.endpoint,
            "storage_uri": STORAGE_URI,
            "poll_interval_secs": 1,
        }))
        .unwrap()
    }
}

async fn create_stream(
    State((streams, _)): State<CloudState>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let n = streams.created.fetch_add(1, Ordering::SeqCst) + 1;
    let output = body["outputUri"].as_str().unwrap_or_default();
    let folder = output
        .strip_prefix(&format!("{}/", STORAGE_URI))
        .unwrap_or(output);
    let manifest = format!("{}{}", folder, body["manifestName"].as_str().unwrap_or_default());
    *streams.manifest_key.lock().unwrap() = Some(manifest);
    Json(serde_json::json!({ "name": format!("streams/{}", n), "state": "CREATING" }))
}

async fn get_stream(
    State((streams, storage)): State<CloudState>,
    UrlPath(id): UrlPath<String>,
) -> Json<serde_json::Value> {
    let state = streams.states.lock().unwrap().pop_front().unwrap_or("RUNNING");
    if state == "COMPLETED" {
        if let Some(key) = streams.manifest_key.lock().unwrap().clone() {
            storage.put(&key, b"<MPD/>".to_vec());
        }
    }
    let error = (state == "INPUT_ERROR").then_some("input unreadable");
    Json(serde_json::json!({
        "name": format!("streams/{}", id),
        "state": state,
        "errorMessage": error,
    }))
}

pub fn transcoder_config(poll_enabled: bool) -> TranscoderConfig {
    serde_json::from_value(serde_json::json!({
        "enabled": true,
        "endpoint": "https://transcoder.test",
        "project": "p",
        "location": "l",
        "storage_uri": STORAGE_URI,
        "poll_enabled": poll_enabled,
        "poll_interval_secs": 1,
        "poll_timeout_secs": 30,
    }))
    .unwrap()
}

pub struct Harness {
    pub dir: TempDir,
    pub datastore: Arc<MemoryDatastore>,
    pub storage: Arc<MemoryStorage>,
    pub tools: Arc<ScriptedTools>,
    pub transcoder: Option<(Arc<ScriptedTranscoder>, Arc<TranscodeManager>)>,
    pub pipeline: Arc<Pipeline>,
}

pub struct HarnessBuilder {
    storage: Arc<MemoryStorage>,
    tools: ScriptedTools,
    transcode: Option<(RemoteJobState, bool)>,
    video: VideoInfo,
    cloud: Option<CloudEncryptionConfig>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
            tools: ScriptedTools::default(),
            transcode: None,
            video: VideoInfo::default(),
            cloud: None,
        }
    }

    pub fn storage(mut self, storage: impl Into<Arc<MemoryStorage>>) -> Self {
        self.storage = storage.into();
        self
    }

    pub fn tools(mut self, tools: ScriptedTools) -> Self {
        self.tools = tools;
        self
    }

    /// Enable remote transcoding; every job ends in `final_state`
    pub fn transcoding(mut self, final_state: RemoteJobState, poll_enabled: bool) -> Self {
        self.transcode = Some((final_state, poll_enabled));
        self
    }

    pub fn youtube(mut self, video: VideoInfo) -> Self {
        self.video = video;
        self
    }

    /// Encrypt streamable content through a cloud service
    pub fn cloud(mut self, config: CloudEncryptionConfig) -> Self {
        self.cloud = Some(config);
        self
    }

    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let datastore = Arc::new(MemoryDatastore::new());
        let storage = self.storage;
        let tools = Arc::new(self.tools);
        let retry = RetryConfig::none();
        let opener = SourceOpener::new(storage.clone()).unwrap();

        let transcoder = self.transcode.map(|(final_state, poll_enabled)| {
            let client = Arc::new(ScriptedTranscoder::new(storage.clone(), final_state));
            let manager = Arc::new(TranscodeManager::new(
                client.clone(),
                storage.clone(),
                datastore.clone(),
                transcoder_config(poll_enabled),
                retry.clone(),
                dir.path().to_path_buf(),
            ));
            (client, manager)
        });

        let youtube = YoutubeIngest::new(
            Arc::new(StaticResolver(self.video)),
            tools.clone(),
            storage.clone(),
            opener.clone(),
            "ffmpeg",
            retry.clone(),
        );
        let local = Arc::new(LocalEncryptor::new(
            tools.clone(),
            storage.clone(),
            ToolsConfig::default(),
            retry.clone(),
        ));

        let cloud = self.cloud.map(|config| {
            Arc::new(CloudEncryptor::new(config, storage.clone()).unwrap()) as Arc<dyn ContentEncryptor>
        });

        let pipeline = Arc::new(Pipeline::new(
            datastore.clone(),
            storage.clone(),
            tools.clone(),
            opener,
            transcoder.as_ref().map(|(_, manager)| manager.clone()),
            youtube,
            Encryption::new(local, cloud),
            ToolsConfig::default(),
            retry,
        ));

        Harness {
            dir,
            datastore,
            storage,
            tools,
            transcoder,
            pipeline,
        }
    }
}

impl Harness {
    pub fn temp_root(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    /// Register an owner and return the keypair that can unwrap its keys
    pub async fn owner(&self) -> (Uuid, RecipientKeyPair) {
        let pair = RecipientKeyPair::generate().unwrap();
        let account = Account {
            id: Uuid::new_v4(),
            address: format!("0x{}", Uuid::new_v4().simple()),
            public_key: pair.public_key_hex(),
            created_at: Utc::now(),
        };
        let id = account.id;
        self.datastore.upsert_account(account).await.unwrap();
        (id, pair)
    }

    /// Stage `bytes` as a local upload and return its path
    pub async fn stage(&self, name: &str, bytes: &[u8]) -> String {
        let staged = self.dir.path().join("staged");
        tokio::fs::create_dir_all(&staged).await.unwrap();
        let path = staged.join(name);
        tokio::fs::write(&path, bytes).await.unwrap();
        path.display().to_string()
    }

    pub async fn status_history(&self, id: Uuid) -> Vec<mediavault_types::AssetStatus> {
        self.datastore.status_history(id).await
    }

    pub async fn asset(&self, id: Uuid) -> mediavault_types::Asset {
        self.datastore.get_asset(id).await.unwrap()
    }
}

/// Deterministic test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 253) as u8).collect()
}

//! Configuration management for Mediavault services
//!
//! Values come from `MEDIAVAULT_*` environment variables (nested with `__`,
//! e.g. `MEDIAVAULT_PIPELINE__WORKERS=4`), optionally loaded from a `.env`
//! file. The unprefixed variables used by earlier deployments
//! (`MESSAGE_BUS_URL`, `OBJECT_STORAGE_*`, `HEALTH_CHECK_PORT`, `LOG_LEVEL`)
//! are still honoured when the prefixed form is absent.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Message bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MessageBusConfig {
    pub url: String,
    pub stream_name: Option<String>,
    pub subject_prefix: Option<String>,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: Option<String>,
}

/// Worker pool and intake settings
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of jobs processed in parallel
    pub workers: usize,
    /// Capacity of the intake channel; submissions beyond it are rejected
    pub queue_capacity: usize,
    /// Root for per-job temp directories
    pub temp_dir: PathBuf,
    /// Content types accepted by pre-upload validation
    pub allowed_content_types: Vec<String>,
    /// Mark records left in `processing` by a previous run as failed on startup
    pub fail_stale_on_startup: bool,
}

/// External executables
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub mp4box: String,
    pub ytdlp: String,
    /// Seek offset for the thumbnail frame, ffmpeg time syntax
    pub thumbnail_offset: String,
    /// Output width of the thumbnail; height keeps the aspect ratio
    pub thumbnail_width: u32,
}

/// Remote transcoding service
#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderConfig {
    #[serde(default)]
    pub enabled: bool,
    pub endpoint: String,
    pub project: String,
    pub location: String,
    pub access_token: Option<String>,
    /// URI prefix the service reads inputs from, e.g. `gs://bucket`
    pub storage_uri: String,
    #[serde(default = "default_input_prefix")]
    pub input_prefix: String,
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    #[serde(default = "default_true")]
    pub poll_enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound on polling; unset means wait until a terminal state
    pub poll_timeout_secs: Option<u64>,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate_bps: u64,
    #[serde(default = "default_video_width")]
    pub video_width: u32,
    #[serde(default = "default_video_height")]
    pub video_height: u32,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_bps: u64,
}

fn default_input_prefix() -> String {
    "transcoder/input".to_string()
}

fn default_output_prefix() -> String {
    "transcoder/output".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    10
}

fn default_video_bitrate() -> u64 {
    2_500_000
}

fn default_video_width() -> u32 {
    1280
}

fn default_video_height() -> u32 {
    720
}

fn default_audio_bitrate() -> u64 {
    64_000
}

/// Cloud streaming-encryption service, used instead of local tools when set
#[derive(Debug, Clone, Deserialize)]
pub struct CloudEncryptionConfig {
    pub endpoint: String,
    pub access_token: Option<String>,
    /// URI prefix under which the service finds originals and writes output
    pub storage_uri: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

/// Upload retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

/// Log output settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `console`
    pub format: String,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub message_bus: MessageBusConfig,
    pub object_storage: Option<ObjectStorageConfig>,
    pub pipeline: PipelineConfig,
    pub tools: ToolsConfig,
    pub transcoder: Option<TranscoderConfig>,
    pub cloud_encryption: Option<CloudEncryptionConfig>,
    pub retry: RetrySettings,
    pub logging: LoggingConfig,
    pub health_port: u16,
}

const DEFAULT_CONTENT_TYPES: &[&str] = &[
    "video/mp4",
    "video/quicktime",
    "video/webm",
    "audio/mpeg",
    "audio/mp4",
    "audio/wav",
    "audio/flac",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "application/pdf",
    "application/zip",
];

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let mut builder = Self::defaults()?.add_source(
            Environment::with_prefix("MEDIAVAULT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("pipeline.allowed_content_types"),
        );

        // Unprefixed variables from earlier deployments
        for (var, key) in [
            ("MESSAGE_BUS_URL", "message_bus.url"),
            ("MESSAGE_BUS_STREAM_NAME", "message_bus.stream_name"),
            ("LOG_LEVEL", "logging.level"),
            ("HEALTH_CHECK_PORT", "health_port"),
        ] {
            if let Ok(value) = env::var(var) {
                if env::var(format!("MEDIAVAULT_{}", key.to_uppercase().replace('.', "__"))).is_err() {
                    builder = builder.set_override(key, value)?;
                }
            }
        }

        let mut config: AppConfig = builder.build()?.try_deserialize()?;

        if config.object_storage.is_none() {
            config.object_storage = Self::legacy_object_storage();
        }

        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("message_bus.url", "nats://localhost:4222")?
            .set_default("message_bus.subject_prefix", "mediavault")?
            .set_default("pipeline.workers", 2)?
            .set_default("pipeline.queue_capacity", 64)?
            .set_default(
                "pipeline.temp_dir",
                env::temp_dir().join("mediavault").to_string_lossy().to_string(),
            )?
            .set_default(
                "pipeline.allowed_content_types",
                DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )?
            .set_default("pipeline.fail_stale_on_startup", true)?
            .set_default("tools.ffmpeg", "ffmpeg")?
            .set_default("tools.ffprobe", "ffprobe")?
            .set_default("tools.mp4box", "MP4Box")?
            .set_default("tools.ytdlp", "yt-dlp")?
            .set_default("tools.thumbnail_offset", "00:00:01")?
            .set_default("tools.thumbnail_width", 640)?
            .set_default("retry.max_retries", 3)?
            .set_default("retry.initial_delay_ms", 1000)?
            .set_default("retry.max_delay_ms", 60_000)?
            .set_default("retry.multiplier", 2.0)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "console")?
            .set_default("health_port", 8080)
    }

    fn legacy_object_storage() -> Option<ObjectStorageConfig> {
        // Build object storage config if all required vars are present
        if let (Ok(endpoint), Ok(access_key), Ok(secret_key), Ok(bucket)) = (
            env::var("OBJECT_STORAGE_ENDPOINT"),
            env::var("OBJECT_STORAGE_ACCESS_KEY"),
            env::var("OBJECT_STORAGE_SECRET_KEY"),
            env::var("OBJECT_STORAGE_BUCKET"),
        ) {
            Some(ObjectStorageConfig {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region: env::var("OBJECT_STORAGE_REGION").ok(),
            })
        } else {
            None
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Message("pipeline.workers must be at least 1".into()));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "pipeline.queue_capacity must be at least 1".into(),
            ));
        }
        if let Some(transcoder) = &self.transcoder {
            if transcoder.enabled && transcoder.poll_interval_secs == 0 {
                return Err(ConfigError::Message(
                    "transcoder.poll_interval_secs must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    /// Get message bus URL
    pub fn message_bus_url(&self) -> &str {
        &self.message_bus.url
    }

    /// Transcoder settings, only when the service is switched on
    pub fn active_transcoder(&self) -> Option<&TranscoderConfig> {
        self.transcoder.as_ref().filter(|t| t.enabled)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            mp4box: "MP4Box".to_string(),
            ytdlp: "yt-dlp".to_string(),
            thumbnail_offset: "00:00:01".to_string(),
            thumbnail_width: 640,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl PipelineConfig {
    pub fn with_defaults(temp_dir: PathBuf) -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
            temp_dir,
            allowed_content_types: DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
            fail_stale_on_startup: true,
        }
    }
}

//! Transcode job description

use mediavault_config::TranscoderConfig;
use serde::{Deserialize, Serialize};

pub const PREVIEW_MUX_KEY: &str = "preview";
const VIDEO_KEY: &str = "video-stream0";
const AUDIO_KEY: &str = "audio-stream0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub input_uri: String,
    /// Directory the service writes into; ends with `/`
    pub output_uri: String,
    pub config: JobConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub elementary_streams: Vec<ElementaryStream>,
    pub mux_streams: Vec<MuxStream>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementaryStream {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_stream: Option<VideoStream>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream: Option<AudioStream>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStream {
    pub h264: H264Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct H264Settings {
    pub width_pixels: u32,
    pub height_pixels: u32,
    pub bitrate_bps: u64,
    pub frame_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStream {
    pub codec: String,
    pub bitrate_bps: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MuxStream {
    pub key: String,
    pub container: String,
    pub elementary_streams: Vec<String>,
}

impl JobSpec {
    /// One H.264 video stream, one AAC stream when the source has audio, and
    /// a single MP4 mux of both
    pub fn preview(config: &TranscoderConfig, input_uri: String, output_uri: String, has_audio: bool) -> Self {
        let mut elementary_streams = vec![ElementaryStream {
            key: VIDEO_KEY.to_string(),
            video_stream: Some(VideoStream {
                h264: H264Settings {
                    width_pixels: config.video_width,
                    height_pixels: config.video_height,
                    bitrate_bps: config.video_bitrate_bps,
                    frame_rate: 30,
                },
            }),
            audio_stream: None,
        }];
        let mut muxed = vec![VIDEO_KEY.to_string()];

        if has_audio {
            elementary_streams.push(ElementaryStream {
                key: AUDIO_KEY.to_string(),
                video_stream: None,
                audio_stream: Some(AudioStream {
                    codec: "aac".to_string(),
                    bitrate_bps: config.audio_bitrate_bps,
                }),
            });
            muxed.push(AUDIO_KEY.to_string());
        }

        let output_uri = if output_uri.ends_with('/') {
            output_uri
        } else {
            format!("{}/", output_uri)
        };

        Self {
            input_uri,
            output_uri,
            config: JobConfig {
                elementary_streams,
                mux_streams: vec![MuxStream {
                    key: PREVIEW_MUX_KEY.to_string(),
                    container: "mp4".to_string(),
                    elementary_streams: muxed,
                }],
            },
        }
    }

    /// File name the service gives the muxed output
    pub fn output_file_name() -> String {
        format!("{}.mp4", PREVIEW_MUX_KEY)
    }
}

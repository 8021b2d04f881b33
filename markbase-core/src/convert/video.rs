use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use humansize::{format_size, DECIMAL};
use serde::Serialize;
use tokio::process::Command;

use markbase_model::ConversionType;

use crate::config::IngestConfig;

use super::exec::{run_with_timeout, stderr_snippet};
use super::hash::sha256_of_file;
use super::{title_for, ConversionResult, Converter};

/// Videos are not transcribed; the document is YAML front matter with the
/// container metadata reported by ffprobe plus a placeholder heading.
pub struct VideoConverter {
    config: Arc<IngestConfig>,
}

impl std::fmt::Debug for VideoConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoConverter").finish()
    }
}

#[derive(Debug, Serialize)]
struct VideoFrontMatter {
    source_file: String,
    provider: &'static str,
    hash_sha256: String,
    file_size_bytes: u64,
    file_size_human: String,
    modified_time: String,
    video: VideoStreams,
}

#[derive(Debug, Default, Serialize)]
struct VideoStreams {
    #[serde(skip_serializing_if = "Option::is_none")]
    format_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bit_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avg_frame_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nb_streams: Option<u64>,
}

impl VideoConverter {
    pub fn new(config: Arc<IngestConfig>) -> Self {
        Self { config }
    }

    async fn ffprobe(&self, path: &Path) -> std::result::Result<serde_json::Value, String> {
        let mut command = Command::new(&self.config.ffprobe_bin);
        command
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path);

        let timeout = Duration::from_secs(self.config.probe_timeout_secs);
        let output = run_with_timeout(command, timeout, "ffprobe").await?;
        if !output.status.success() {
            return Err(format!("ffprobe failed: {}", stderr_snippet(&output)));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| format!("ffprobe output JSON parse error: {e}"))
    }
}

#[async_trait]
impl Converter for VideoConverter {
    async fn handle(&self, path: &Path, file_type: &str) -> ConversionResult {
        let stat = match tokio::fs::metadata(path).await {
            Ok(stat) => stat,
            Err(e) => {
                return ConversionResult::failed(
                    path,
                    file_type,
                    format!("Video metadata extraction failed: stat: {e}"),
                )
            }
        };
        let hash = match sha256_of_file(path).await {
            Ok(hash) => hash,
            Err(e) => {
                return ConversionResult::failed(
                    path,
                    file_type,
                    format!("Video metadata extraction failed: hash: {e}"),
                )
            }
        };
        let info = match self.ffprobe(path).await {
            Ok(info) => info,
            Err(message) => {
                return ConversionResult::failed(
                    path,
                    file_type,
                    format!("Video metadata extraction failed: {message}"),
                )
            }
        };

        let modified = stat
            .modified()
            .map(DateTime::<Utc>::from)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();

        let front = VideoFrontMatter {
            source_file: title_for(path),
            provider: "video-metadata",
            hash_sha256: hash,
            file_size_bytes: stat.len(),
            file_size_human: format_size(stat.len(), DECIMAL),
            modified_time: modified,
            video: streams_of(&info),
        };

        let yaml = match serde_yaml::to_string(&front) {
            Ok(yaml) => yaml,
            Err(e) => {
                return ConversionResult::failed(
                    path,
                    file_type,
                    format!("Video front matter serialization failed: {e}"),
                )
            }
        };

        let content = format!(
            "---\n{yaml}---\n\n# {}\n\n(video metadata only; no transcript generated)\n",
            title_for(path)
        );
        ConversionResult::ok(path, file_type, content, ConversionType::VideoMetadata)
    }
}

fn streams_of(info: &serde_json::Value) -> VideoStreams {
    let format = info.get("format");
    let streams = info
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let stream_of = |kind: &str| -> Option<serde_json::Value> {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(|c| c.as_str()) == Some(kind))
            .cloned()
    };
    let video = stream_of("video");
    let audio = stream_of("audio");

    let str_field = |value: Option<&serde_json::Value>, key: &str| -> Option<String> {
        value
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    let u64_field = |value: Option<&serde_json::Value>, key: &str| -> Option<u64> {
        value.and_then(|v| v.get(key)).and_then(|v| v.as_u64())
    };

    let duration_seconds = str_field(format, "duration").and_then(|d| d.parse::<f64>().ok());

    VideoStreams {
        format_name: str_field(format, "format_name"),
        duration_human: duration_seconds.map(format_duration),
        duration_seconds,
        bit_rate: str_field(format, "bit_rate"),
        video_codec: str_field(video.as_ref(), "codec_name"),
        audio_codec: str_field(audio.as_ref(), "codec_name"),
        width: u64_field(video.as_ref(), "width"),
        height: u64_field(video.as_ref(), "height"),
        avg_frame_rate: str_field(video.as_ref(), "avg_frame_rate"),
        nb_streams: u64_field(format, "nb_streams"),
    }
}

/// `HH:MM:SS.mmm`, hours omitted when zero.
fn format_duration(seconds: f64) -> String {
    let whole = seconds as u64;
    let millis = ((seconds - whole as f64) * 1000.0) as u64;
    let hours = whole / 3600;
    let minutes = (whole % 3600) / 60;
    let secs = whole % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
    } else {
        format!("{minutes:02}:{secs:02}.{millis:03}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn duration_formatting_covers_hours_and_minutes() {
        assert_eq!(format_duration(61.5), "01:01.500");
        assert_eq!(format_duration(3661.25), "01:01:01.250");
        assert_eq!(format_duration(0.0), "00:00.000");
    }

    #[test]
    fn streams_are_picked_by_codec_type() {
        let info = serde_json::json!({
            "format": {
                "format_name": "matroska",
                "duration": "12.480",
                "bit_rate": "128000",
                "nb_streams": 2
            },
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
                 "avg_frame_rate": "30/1"}
            ]
        });
        let streams = streams_of(&info);
        assert_eq!(streams.video_codec.as_deref(), Some("h264"));
        assert_eq!(streams.audio_codec.as_deref(), Some("aac"));
        assert_eq!(streams.width, Some(1920));
        assert_eq!(streams.duration_seconds, Some(12.48));
        assert_eq!(streams.duration_human.as_deref(), Some("00:12.480"));
    }

    #[tokio::test]
    async fn missing_ffprobe_is_a_failure_value() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("clip.mp4");
        fs::write(&file, b"not a video").unwrap();

        let config = IngestConfig {
            ffprobe_bin: "markbase-test-no-ffprobe".to_string(),
            ..IngestConfig::default()
        };
        let converter = VideoConverter::new(Arc::new(config));
        let result = converter.handle(&file, "mp4").await;
        assert!(!result.success);
        assert!(result
            .error
            .unwrap()
            .starts_with("Video metadata extraction failed:"));
    }
}

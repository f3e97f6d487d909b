//! FFmpeg Runner Module
//!
//! Executes FFmpeg commands and parses FFprobe output.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::{
    EngineCommand, EngineEvent, EngineOutcome, FFmpegError, FFmpegInfo, FFmpegResult,
    ProcessingEngine,
};
use crate::TimeMs;

/// Number of stderr lines kept as the failure diagnostic
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Media information extracted by FFprobe
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Duration in seconds, if reported
    pub duration_sec: Option<f64>,
    /// Video stream info (if present)
    pub video: Option<VideoStreamInfo>,
    /// Audio stream info (if present)
    pub audio: Option<AudioStreamInfo>,
    /// Container format
    pub format: String,
    /// File size in bytes
    pub size_bytes: u64,
}

impl MediaInfo {
    /// Duration in milliseconds, if finite and non-negative
    pub fn duration_ms(&self) -> Option<TimeMs> {
        self.duration_sec
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| (d * 1000.0).round() as TimeMs)
    }
}

/// Video stream information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    /// Frame rate (frames per second)
    pub fps: f64,
    /// Codec name (e.g., "h264", "hevc")
    pub codec: String,
}

/// Audio stream information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    pub sample_rate: u32,
    pub channels: u8,
    /// Codec name (e.g., "aac", "mp3")
    pub codec: String,
}

/// FFmpeg Runner for executing conversion commands
#[derive(Clone)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
}

impl FFmpegRunner {
    /// Create a new FFmpegRunner from detected FFmpeg installation
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    /// Get the FFmpeg info
    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }
}

#[async_trait]
impl ProcessingEngine for FFmpegRunner {
    async fn probe(&self, input: &Path) -> FFmpegResult<MediaInfo> {
        if !input.exists() {
            return Err(FFmpegError::InvalidInput(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }

        let output = tokio::process::Command::new(&self.info.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                &input.to_string_lossy(),
            ])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(FFmpegError::ProcessError)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ProbeError(format!("FFprobe failed: {}", stderr)));
        }

        let json_str = String::from_utf8_lossy(&output.stdout);
        parse_probe_output(&json_str)
    }

    async fn execute(
        &self,
        command: &EngineCommand,
        events: mpsc::Sender<EngineEvent>,
    ) -> FFmpegResult<EngineOutcome> {
        tracing::debug!("ffmpeg {}", command);

        let mut cmd = tokio::process::Command::new(&self.info.ffmpeg_path);
        cmd.args(["-hide_banner", "-nostats", "-progress", "pipe:1"])
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future (cancellation) must not leave ffmpeg running.
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(FFmpegError::ProcessError)?;

        let progress_task = child.stdout.take().map(|stdout| {
            let tx = events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut current: Option<TimeMs> = None;

                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(elapsed) = parse_progress_line(&line) {
                        current = Some(elapsed);
                    } else if line.starts_with("progress=") {
                        // Keep draining even without a listener so ffmpeg never blocks on the pipe.
                        if let Some(elapsed_ms) = current {
                            let _ = tx.send(EngineEvent::Progress { elapsed_ms }).await;
                        }
                    }
                }
            })
        });

        let log_task = child.stderr.take().map(|stderr| {
            let tx = events;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);

                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == DIAGNOSTIC_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());
                    let _ = tx.send(EngineEvent::Log(line)).await;
                }

                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let status = child.wait().await.map_err(FFmpegError::ProcessError)?;

        if let Some(task) = progress_task {
            let _ = task.await;
        }
        let diagnostics = match log_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        Ok(EngineOutcome {
            exit_code: status.code(),
            diagnostics,
        })
    }
}

/// Parses one `-progress` key, returning the elapsed output time.
///
/// `out_time_ms` is reported in microseconds by ffmpeg, same as `out_time_us`.
pub fn parse_progress_line(line: &str) -> Option<TimeMs> {
    let (key, value) = line.split_once('=')?;
    match key.trim() {
        "out_time_us" | "out_time_ms" => {
            let micros: i64 = value.trim().parse().ok()?;
            Some(micros / 1000)
        }
        _ => None,
    }
}

/// Parse FFprobe JSON output
fn parse_probe_output(json_str: &str) -> FFmpegResult<MediaInfo> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| FFmpegError::ParseError(format!("Failed to parse FFprobe output: {}", e)))?;

    let format = json
        .get("format")
        .ok_or_else(|| FFmpegError::ParseError("Missing format info".to_string()))?;

    let duration_sec = format
        .get("duration")
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok());

    let size_bytes = format
        .get("size")
        .and_then(|s| s.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let format_name = format
        .get("format_name")
        .and_then(|f| f.as_str())
        .unwrap_or("unknown")
        .to_string();

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let mut video = None;
    let mut audio = None;

    for stream in &streams {
        match stream.get("codec_type").and_then(|c| c.as_str()) {
            Some("video") if video.is_none() => video = Some(parse_video_stream(stream)),
            Some("audio") if audio.is_none() => audio = Some(parse_audio_stream(stream)),
            _ => {}
        }
    }

    Ok(MediaInfo {
        duration_sec,
        video,
        audio,
        format: format_name,
        size_bytes,
    })
}

fn codec_name(stream: &serde_json::Value) -> String {
    stream
        .get("codec_name")
        .and_then(|c| c.as_str())
        .unwrap_or("unknown")
        .to_string()
}

fn parse_video_stream(stream: &serde_json::Value) -> VideoStreamInfo {
    let width = stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;
    let height = stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;

    // r_frame_rate is "30/1" or "30000/1001"
    let fps = stream
        .get("r_frame_rate")
        .and_then(|f| f.as_str())
        .and_then(|s| match s.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.parse().ok()?;
                let den: f64 = den.parse().ok()?;
                (den > 0.0).then(|| num / den)
            }
            None => s.parse().ok(),
        })
        .unwrap_or(30.0);

    VideoStreamInfo {
        width,
        height,
        fps,
        codec: codec_name(stream),
    }
}

fn parse_audio_stream(stream: &serde_json::Value) -> AudioStreamInfo {
    let sample_rate = stream
        .get("sample_rate")
        .and_then(|s| s.as_str())
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(44100);

    let channels = stream.get("channels").and_then(|c| c.as_u64()).unwrap_or(2) as u8;

    AudioStreamInfo {
        sample_rate,
        channels,
        codec: codec_name(stream),
    }
}

//! Source descriptor builder.
//!
//! Probes the input with ffprobe and normalizes the raw stream metadata
//! (rotation, fractional frame rates, bit depth, bitrate) into a single
//! immutable [`SourceDescriptor`] the rest of the pipeline reads.

use crate::classify::{classify_source, SourceQualityTier};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The input carries no video stream.
    #[error("No video stream found in input")]
    NoVideoStream,

    /// The first video stream reports unusable dimensions.
    #[error("Invalid video dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Canonical description of the source video, built once per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDescriptor {
    /// Width in pixels, corrected for rotation.
    pub width: u32,
    /// Height in pixels, corrected for rotation.
    pub height: u32,
    /// Display aspect ratio (width / height).
    pub aspect_ratio: f32,
    /// Duration in seconds.
    pub duration_secs: f64,
    /// Frames per second.
    pub frame_rate: f32,
    /// Video bitrate in kbps, when the container reports one.
    pub bitrate_kbps: Option<f32>,
    /// Pixel format tag, e.g. "yuv420p10le".
    pub pixel_format: String,
    /// Codec name, e.g. "h264".
    pub codec_name: String,
    /// Derived quality classification.
    pub quality_tier: SourceQualityTier,
}

impl SourceDescriptor {
    /// Bit depth derived from the pixel format tag.
    pub fn bit_depth(&self) -> u32 {
        let fmt = self.pixel_format.to_lowercase();
        if fmt.contains("p16") {
            16
        } else if fmt.contains("p12") {
            12
        } else if fmt.contains("p10") {
            10
        } else {
            8
        }
    }
}

/// Conservative descriptor used when analysis is skipped or unavailable.
///
/// Deliberately modest: an unprobed source never fabricates a deep ladder.
pub fn fallback_descriptor() -> SourceDescriptor {
    SourceDescriptor {
        width: 1280,
        height: 720,
        aspect_ratio: 16.0 / 9.0,
        duration_secs: 0.0,
        frame_rate: 30.0,
        bitrate_kbps: None,
        pixel_format: "yuv420p".to_string(),
        codec_name: "unknown".to_string(),
        quality_tier: SourceQualityTier::Unknown,
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub pix_fmt: Option<String>,
        pub bit_rate: Option<String>,
        pub avg_frame_rate: Option<String>,
        pub r_frame_rate: Option<String>,
        pub side_data_list: Option<Vec<SideData>>,
        pub tags: Option<StreamTags>,
    }

    #[derive(Debug, Deserialize)]
    pub struct SideData {
        pub rotation: Option<f64>,
    }

    #[derive(Debug, Deserialize)]
    pub struct StreamTags {
        pub rotate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub bit_rate: Option<String>,
    }
}

/// Probes a video file using ffprobe to build the source descriptor.
///
/// Runs `ffprobe -v quiet -print_format json -show_streams -show_format <path>`
/// and normalizes the JSON output.
pub fn probe_file(path: &Path) -> Result<SourceDescriptor, ProbeError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(&stdout)
}

/// Parses ffprobe JSON output into a normalized SourceDescriptor.
pub fn parse_probe_output(json_str: &str) -> Result<SourceDescriptor, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;

    let mut width = video.width.unwrap_or(0);
    let mut height = video.height.unwrap_or(0);

    // A quarter-turn rotation swaps the display dimensions.
    if rotation_degrees(video) % 180 != 0 {
        std::mem::swap(&mut width, &mut height);
    }

    if width == 0 || height == 0 {
        return Err(ProbeError::InvalidDimensions { width, height });
    }

    let frame_rate = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(30.0);

    let stream_bitrate = video
        .bit_rate
        .as_ref()
        .and_then(|br| br.parse::<f64>().ok())
        .filter(|bps| *bps > 0.0);
    let format_bitrate = ffprobe
        .format
        .as_ref()
        .and_then(|f| f.bit_rate.as_ref())
        .and_then(|br| br.parse::<f64>().ok())
        .filter(|bps| *bps > 0.0);
    let bitrate_kbps = stream_bitrate
        .or(format_bitrate)
        .map(|bps| (bps / 1000.0) as f32);

    let duration_secs = ffprobe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(SourceDescriptor {
        width,
        height,
        aspect_ratio: width as f32 / height as f32,
        duration_secs,
        frame_rate,
        bitrate_kbps,
        pixel_format: video.pix_fmt.clone().unwrap_or_else(|| "yuv420p".to_string()),
        codec_name: video.codec_name.clone().unwrap_or_default(),
        quality_tier: classify_source(bitrate_kbps, height),
    })
}

/// Effective rotation in degrees, normalized to [0, 360).
///
/// Prefers the modern side-data field, falling back to the legacy
/// `rotate` stream tag.
fn rotation_degrees(stream: &ffprobe_json::Stream) -> i64 {
    let raw = stream
        .side_data_list
        .as_ref()
        .and_then(|list| list.iter().find_map(|sd| sd.rotation))
        .or_else(|| {
            stream
                .tags
                .as_ref()
                .and_then(|t| t.rotate.as_ref())
                .and_then(|r| r.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    (raw.round() as i64).rem_euclid(360)
}

/// Parses an ffprobe frame-rate fraction such as "30000/1001".
fn parse_frame_rate(raw: &str) -> Option<f32> {
    let (num, den) = raw.split_once('/')?;
    let num = num.trim().parse::<f64>().ok()?;
    let den = den.trim().parse::<f64>().ok()?;
    if num > 0.0 && den > 0.0 {
        Some((num / den) as f32)
    } else {
        None
    }
}

//! ffmpeg encoder module.
//!
//! Builds and executes one ffmpeg HLS invocation per rendition. The
//! command scales to the rendition's resolution, encodes with libx264
//! (or NVENC when hardware encoding is enabled), caps the rate at the
//! computed bitrate, and writes label-prefixed segments plus the
//! rendition playlist into the shared output directory.

use crate::manifest::ManifestFragment;
use crate::orchestrator::{EncodeJob, EncodeRunner, JobError};
use std::future::Future;
use std::process::Command;
use thiserror::Error;

/// Audio parameters shared by every rendition.
const AUDIO_BITRATE: &str = "128k";

/// Error type for encoding operations.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// ffmpeg exited with non-zero status.
    #[error("ffmpeg failed with exit code {code}: {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    /// ffmpeg was terminated by a signal.
    #[error("ffmpeg process was terminated by signal")]
    Terminated,

    /// IO error during encoding.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Segment sizing mode for the HLS muxer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segmenting {
    /// Cut segments every this many seconds.
    Duration(f32),
    /// Aim for segments of roughly this many kilobytes.
    SizeKb(u64),
}

impl Segmenting {
    /// Effective segment duration in seconds for a rendition bitrate.
    ///
    /// The muxer cuts on time, so a size target maps to the seconds that
    /// amount of data lasts at the rendition's bitrate.
    pub fn duration_for(&self, bitrate_kbps: u32) -> f32 {
        match self {
            Segmenting::Duration(secs) => *secs,
            Segmenting::SizeKb(kb) => {
                let secs = (*kb as f32 * 8.0) / bitrate_kbps.max(1) as f32;
                secs.clamp(1.0, 30.0)
            }
        }
    }
}

/// ffmpeg-backed encode runner.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    /// Encoder speed preset.
    pub preset: String,
    /// Use the hardware encoder instead of libx264.
    pub use_gpu: bool,
    /// Segment sizing shared by every rendition.
    pub segmenting: Segmenting,
}

/// Build the ffmpeg command for one encode job.
pub fn build_ffmpeg_command(job: &EncodeJob, encoder: &FfmpegEncoder) -> Command {
    let params = &job.params;
    let mut cmd = Command::new("ffmpeg");

    cmd.args(["-y", "-hide_banner", "-nostats", "-loglevel", "error"]);

    if encoder.use_gpu {
        cmd.args(["-hwaccel", "auto"]);
    }

    cmd.arg("-i").arg(&job.input_path);

    // First video stream, first audio stream when the source has one.
    cmd.args(["-map", "0:v:0", "-map", "0:a:0?"]);

    cmd.arg("-vf")
        .arg(format!("scale={}:{}", params.width, params.height));

    if encoder.use_gpu {
        cmd.args(["-c:v", "h264_nvenc"]);
        cmd.arg("-preset").arg(&encoder.preset);
        cmd.args(["-rc", "vbr"]);
        cmd.arg("-cq").arg(params.compression_quality.to_string());
        cmd.arg("-b:v").arg(format!("{}k", params.bitrate_kbps));
    } else {
        cmd.args(["-c:v", "libx264"]);
        cmd.arg("-preset").arg(&encoder.preset);
        cmd.arg("-crf").arg(params.compression_quality.to_string());
    }

    cmd.arg("-maxrate").arg(format!("{}k", params.bitrate_kbps));
    cmd.arg("-bufsize").arg(format!("{}k", params.bitrate_kbps * 2));

    // Fixed keyframe cadence so segment boundaries line up across renditions.
    cmd.arg("-g").arg(params.keyframe_interval.to_string());
    cmd.arg("-keyint_min").arg(params.keyframe_interval.to_string());
    cmd.args(["-sc_threshold", "0"]);

    cmd.args(["-c:a", "aac", "-b:a", AUDIO_BITRATE, "-ac", "2"]);

    let segment_secs = encoder.segmenting.duration_for(params.bitrate_kbps);
    cmd.args(["-f", "hls"]);
    cmd.arg("-hls_time").arg(format!("{:.2}", segment_secs));
    cmd.args(["-hls_playlist_type", "vod"]);
    cmd.arg("-hls_segment_filename")
        .arg(job.output_dir.join(job.segment_pattern()));
    cmd.arg(job.output_dir.join(job.playlist_name()));

    cmd
}

/// Execute a built ffmpeg command.
///
/// Captures stderr so a failure surfaces the encoder's own message.
pub fn run_ffmpeg(mut cmd: Command) -> Result<(), EncodeError> {
    let output = cmd.output()?;

    if output.status.success() {
        Ok(())
    } else {
        match output.status.code() {
            Some(code) => Err(EncodeError::FfmpegFailed {
                code,
                stderr: stderr_tail(&output.stderr),
            }),
            None => Err(EncodeError::Terminated),
        }
    }
}

/// Last few stderr lines; ffmpeg front-loads noise and ends with the cause.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    lines[start..].join(" | ")
}

impl EncodeRunner for FfmpegEncoder {
    fn run(
        &self,
        job: &EncodeJob,
    ) -> impl Future<Output = Result<ManifestFragment, JobError>> + Send {
        let cmd = build_ffmpeg_command(job, self);
        let height = job.rendition.target_height;
        let fragment = job.fragment();

        async move {
            let encode_result = tokio::task::spawn_blocking(move || run_ffmpeg(cmd)).await;

            match encode_result {
                Ok(Ok(())) => Ok(fragment),
                Ok(Err(e)) => Err(JobError::EncodeFailed {
                    height,
                    message: e.to_string(),
                }),
                Err(join_err) => Err(JobError::TaskPanicked {
                    height,
                    message: join_err.to_string(),
                }),
            }
        }
    }
}

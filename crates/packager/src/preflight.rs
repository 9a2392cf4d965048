//! Preflight checks.
//!
//! Verifies the external tools exist before any download, probe or encode
//! work starts, so a missing ffmpeg fails the run immediately instead of
//! after the first batch is scheduled.

use std::process::Command;
use thiserror::Error;

/// Error types for preflight checks.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("ffprobe not available: {0}")]
    FfprobeUnavailable(String),
}

/// Check that a tool responds to `-version`.
fn tool_responds(tool: &str) -> Result<(), String> {
    match Command::new(tool).arg("-version").output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => Err(format!(
            "{} -version exited with status {}",
            tool, output.status
        )),
        Err(e) => Err(format!("failed to run {}: {}", tool, e)),
    }
}

/// Run all preflight checks in order: ffmpeg, then ffprobe.
pub fn run_preflight() -> Result<(), PreflightError> {
    tool_responds("ffmpeg").map_err(PreflightError::FfmpegUnavailable)?;
    tool_responds("ffprobe").map_err(PreflightError::FfprobeUnavailable)?;
    Ok(())
}

//! External encoder invocation.

pub mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_command, run_ffmpeg, EncodeError, FfmpegEncoder, Segmenting};

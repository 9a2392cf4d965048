//! ladderpack
//!
//! Turns one source video into an adaptive-bitrate HLS package: a ladder
//! of renditions sized from the source's own characteristics, encoded by
//! an external ffmpeg under a selectable concurrency policy, and described
//! by a deterministic master manifest.

pub mod classify;
pub mod encode;
pub mod fetch;
pub mod ladder;
pub mod manifest;
pub mod orchestrator;
pub mod params;
pub mod pipeline;
pub mod preflight;
pub mod probe;

pub use ladderpack_config as config;
pub use ladderpack_config::{PackagingConfig, PolicyKind};

pub use classify::{classify_source, expected_bitrate_kbps, SourceQualityTier};
pub use encode::{build_ffmpeg_command, run_ffmpeg, EncodeError, FfmpegEncoder, Segmenting};
pub use fetch::{download_source, is_remote, FetchError, TempDownload};
pub use ladder::{select_ladder, RenditionSpec, RENDITION_CATALOG};
pub use manifest::{assemble, write_master, ManifestFragment, MASTER_PLAYLIST_NAME};
pub use orchestrator::{
    derive_cap, run_jobs, ConcurrencyPolicy, EncodeJob, EncodeRunner, JobError, JobState,
};
pub use params::{
    compute_parameters, keyframe_interval, EncodingParameters, ParamsError, KEYFRAME_RANGE,
    QUALITY_RANGE,
};
pub use pipeline::{run, run_with_runner, PackageSummary, PipelineError};
pub use preflight::{run_preflight, PreflightError};
pub use probe::{
    fallback_descriptor, parse_probe_output, probe_file, ProbeError, SourceDescriptor,
};

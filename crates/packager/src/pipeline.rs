//! End-to-end packaging run.
//!
//! Wires the stages together: output-directory gate, optional remote
//! fetch, source analysis (or the conservative fallback), ladder
//! selection, per-rendition parameter computation, orchestrated encoding,
//! and finally the master manifest. The run is generic over the encode
//! runner so everything up to the encoder boundary is testable without
//! ffmpeg.

use crate::encode::{FfmpegEncoder, Segmenting};
use crate::fetch::{self, FetchError};
use crate::ladder::select_ladder;
use crate::manifest::{self, ManifestFragment};
use crate::orchestrator::{
    run_jobs, ConcurrencyPolicy, EncodeJob, EncodeRunner, JobError,
};
use crate::params::{compute_parameters, ParamsError};
use crate::preflight::{run_preflight, PreflightError};
use crate::probe::{fallback_descriptor, probe_file, ProbeError, SourceDescriptor};
use ladderpack_config::{ConfigError, PackagingConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Segment duration used when the configuration picks neither mode.
const DEFAULT_SEGMENT_SECS: f32 = 6.0;

/// Error type for a packaging run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration rejected at the boundary.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Missing or unusable input.
    #[error("Input error: {0}")]
    Input(String),

    /// Output directory could not be created or written.
    #[error("Output directory not usable: {0}")]
    OutputDir(String),

    /// A required external tool is missing.
    #[error("Preflight check failed: {0}")]
    Preflight(#[from] PreflightError),

    /// Source probing failed and analysis was not skipped.
    #[error("Source analysis failed: {0}")]
    Analysis(#[from] ProbeError),

    /// Remote source download failed.
    #[error("Source download failed: {0}")]
    Fetch(#[from] FetchError),

    /// Parameter computation rejected its inputs.
    #[error("Parameter computation failed: {0}")]
    Params(#[from] ParamsError),

    /// An encode job failed; the run was aborted.
    #[error(transparent)]
    Job(#[from] JobError),

    /// All jobs succeeded but the master manifest could not be written.
    #[error("Failed to write master manifest: {0}")]
    Manifest(std::io::Error),
}

/// Summary of a completed packaging run.
#[derive(Debug)]
pub struct PackageSummary {
    /// Path of the written master playlist.
    pub master_path: PathBuf,
    /// The analyzed (or fallback) source descriptor.
    pub source: SourceDescriptor,
    /// Per-rendition fragments, in ladder order.
    pub fragments: Vec<ManifestFragment>,
}

/// Run the full pipeline against the real ffmpeg encoder.
pub async fn run(
    config: &PackagingConfig,
    input: &str,
    output_dir: &Path,
) -> Result<PackageSummary, PipelineError> {
    let encoder = FfmpegEncoder {
        preset: config.encoding.preset.clone(),
        use_gpu: config.encoding.use_gpu,
        segmenting: segmenting_from(config),
    };
    run_with_runner(config, input, output_dir, Arc::new(encoder)).await
}

/// Run the full pipeline with a caller-supplied encode runner.
pub async fn run_with_runner<R>(
    config: &PackagingConfig,
    input: &str,
    output_dir: &Path,
    runner: Arc<R>,
) -> Result<PackageSummary, PipelineError>
where
    R: EncodeRunner + 'static,
{
    config.validate()?;

    if !config.analysis.skip_tool_checks {
        run_preflight()?;
    }

    // Nothing is downloaded, probed or scheduled until the output
    // directory is confirmed writable.
    ensure_writable(output_dir)?;

    let (downloaded, input_path) = if fetch::is_remote(input) {
        let download = fetch::download_source(input, output_dir).await?;
        let path = download.path().to_path_buf();
        (Some(download), path)
    } else {
        let path = PathBuf::from(input);
        if !path.is_file() {
            return Err(PipelineError::Input(format!(
                "input file not found: {}",
                path.display()
            )));
        }
        (None, path)
    };

    let source = if config.analysis.skip_analysis {
        tracing::warn!("source analysis skipped, using the conservative default descriptor");
        fallback_descriptor()
    } else {
        let probe_path = input_path.clone();
        tokio::task::spawn_blocking(move || probe_file(&probe_path))
            .await
            .map_err(|e| PipelineError::Input(format!("probe task failed: {}", e)))??
    };

    tracing::info!(
        width = source.width,
        height = source.height,
        codec = %source.codec_name,
        tier = %source.quality_tier,
        "source analyzed"
    );

    let ladder = select_ladder(source.height, config.ladder.min_quality_height);
    let mut jobs = Vec::with_capacity(ladder.len());
    for rendition in ladder {
        let params = compute_parameters(
            &rendition,
            &source,
            config.encoding.bandwidth_ratio,
            config.encoding.quality_offset,
        )?;
        tracing::info!(
            rendition = %rendition.label,
            width = params.width,
            height = params.height,
            bitrate_kbps = params.bitrate_kbps,
            quality = params.compression_quality,
            keyframe_interval = params.keyframe_interval,
            "rendition planned"
        );
        jobs.push(EncodeJob::new(
            rendition,
            params,
            input_path.clone(),
            output_dir.to_path_buf(),
        ));
    }

    let policy = ConcurrencyPolicy::from_config(
        config.concurrency.policy,
        config.concurrency.max_concurrent,
    );
    let fragments = run_jobs(jobs, policy, runner).await?;

    // Only reached once every fragment is known.
    let master_path =
        manifest::write_master(output_dir, &fragments).map_err(PipelineError::Manifest)?;
    tracing::info!(
        path = %master_path.display(),
        renditions = fragments.len(),
        "master manifest written"
    );

    // The temp download is only removed once the jobs are done with it.
    drop(downloaded);

    Ok(PackageSummary {
        master_path,
        source,
        fragments,
    })
}

/// Map the validated segmentation options onto a muxer mode.
fn segmenting_from(config: &PackagingConfig) -> Segmenting {
    match (
        config.segmentation.duration_secs,
        config.segmentation.size_kb,
    ) {
        (Some(secs), _) => Segmenting::Duration(secs),
        (None, Some(kb)) => Segmenting::SizeKb(kb),
        (None, None) => Segmenting::Duration(DEFAULT_SEGMENT_SECS),
    }
}

/// Fail fast when the output directory cannot be created or written.
fn ensure_writable(dir: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| PipelineError::OutputDir(format!("{}: {}", dir.display(), e)))?;

    let probe_path = dir.join(".ladderpack-write-check");
    std::fs::write(&probe_path, b"ok")
        .map_err(|e| PipelineError::OutputDir(format!("{}: {}", dir.display(), e)))?;
    let _ = std::fs::remove_file(&probe_path);

    Ok(())
}

//! CLI entry point for ladderpack
//!
//! Parses command line arguments, layers them over file and environment
//! configuration, and runs the packaging pipeline.

use clap::Parser;
use ladderpack_config::{ConfigError, PackagingConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// ladderpack - adaptive-bitrate packaging sized from the source itself
#[derive(Parser, Debug)]
#[command(name = "ladderpack")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source video: a local path or an http(s) URL
    #[arg(short, long)]
    input: String,

    /// Directory receiving segments, rendition playlists and the master manifest
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Multiplier applied to every computed bitrate (0.1-2.0)
    #[arg(long)]
    bandwidth_ratio: Option<f32>,

    /// Adjustment added to the computed compression quality (-5..=5)
    #[arg(long, allow_hyphen_values = true)]
    quality_offset: Option<i32>,

    /// Encoder speed preset
    #[arg(long)]
    preset: Option<String>,

    /// Lowest rendition height worth producing
    #[arg(long)]
    min_quality: Option<u32>,

    /// Segment duration in seconds
    #[arg(long, conflicts_with = "segment_size")]
    segment_duration: Option<f32>,

    /// Segment size in kilobytes
    #[arg(long)]
    segment_size: Option<u64>,

    /// Concurrency policy: parallel, capped or sequential
    #[arg(long)]
    policy: Option<String>,

    /// Batch size for the capped policy (0 = derive from CPU count)
    #[arg(long)]
    max_concurrent: Option<u32>,

    /// Use the hardware encoder
    #[arg(long, default_value = "false")]
    gpu: bool,

    /// Skip source probing and use the conservative default descriptor
    #[arg(long, default_value = "false")]
    skip_analysis: bool,

    /// Skip the ffmpeg/ffprobe availability checks. For testing only.
    #[arg(long, default_value = "false")]
    skip_tool_checks: bool,
}

/// Layer configuration sources: TOML file, then environment, then flags.
///
/// Validation runs once here, after the last layer, so every later stage
/// sees only vetted values.
fn build_config(args: &Args) -> Result<PackagingConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => PackagingConfig::load(path)?,
        None => {
            let mut config = PackagingConfig::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Some(ratio) = args.bandwidth_ratio {
        config.encoding.bandwidth_ratio = ratio;
    }
    if let Some(offset) = args.quality_offset {
        config.encoding.quality_offset = offset;
    }
    if let Some(preset) = &args.preset {
        config.encoding.preset = preset.clone();
    }
    if let Some(height) = args.min_quality {
        config.ladder.min_quality_height = height;
    }
    if let Some(secs) = args.segment_duration {
        config.segmentation.duration_secs = Some(secs);
        config.segmentation.size_kb = None;
    }
    if let Some(kb) = args.segment_size {
        config.segmentation.size_kb = Some(kb);
        config.segmentation.duration_secs = None;
    }
    if let Some(policy) = &args.policy {
        config.concurrency.policy = policy.parse().map_err(ConfigError::Invalid)?;
    }
    if let Some(cap) = args.max_concurrent {
        config.concurrency.max_concurrent = cap;
    }
    if args.gpu {
        config.encoding.use_gpu = true;
    }
    if args.skip_analysis {
        config.analysis.skip_analysis = true;
    }
    if args.skip_tool_checks {
        config.analysis.skip_tool_checks = true;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ladderpack: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        input = %args.input,
        output_dir = %args.output_dir.display(),
        policy = %config.concurrency.policy,
        "starting packaging run"
    );

    match ladderpack::pipeline::run(&config, &args.input, &args.output_dir).await {
        Ok(summary) => {
            tracing::info!(
                master = %summary.master_path.display(),
                renditions = summary.fragments.len(),
                "packaging complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("ladderpack: {}", e);
            ExitCode::FAILURE
        }
    }
}

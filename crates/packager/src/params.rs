//! Rendition parameter calculator.
//!
//! Computes the encoding parameters for one rendition from the source
//! descriptor and the user knobs. Resolution, bitrate, compression
//! quality and keyframe interval are four independent pure functions so
//! each can be tested in isolation.

use crate::classify::expected_bitrate_kbps;
use crate::ladder::RenditionSpec;
use crate::probe::SourceDescriptor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Valid range for the compression quality factor.
pub const QUALITY_RANGE: std::ops::RangeInclusive<i32> = 10..=40;

/// Valid range for the keyframe interval in frames.
pub const KEYFRAME_RANGE: std::ops::RangeInclusive<i64> = 24..=480;

/// Error type for parameter computation.
#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    /// Target or source height is unusable.
    #[error("Invalid height: {0}")]
    InvalidHeight(u32),

    /// Source aspect ratio is not a finite number.
    #[error("Non-finite source aspect ratio")]
    InvalidAspectRatio,
}

/// Derived encoding parameters for one rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingParameters {
    /// Output width, even and at least 16.
    pub width: u32,
    /// Output height, even and at least 16.
    pub height: u32,
    /// Target video bitrate in kbps.
    pub bitrate_kbps: u32,
    /// Compression quality factor (lower is finer), within 10..=40.
    pub compression_quality: u8,
    /// Keyframe interval in frames, within 24..=480.
    pub keyframe_interval: u32,
}

/// Compute the full parameter set for one rendition.
///
/// Pure: identical inputs always yield identical output. Fails only on
/// unusable inputs; every valid source yields a value.
pub fn compute_parameters(
    rendition: &RenditionSpec,
    source: &SourceDescriptor,
    bandwidth_ratio: f32,
    quality_offset: i32,
) -> Result<EncodingParameters, ParamsError> {
    if rendition.target_height == 0 {
        return Err(ParamsError::InvalidHeight(rendition.target_height));
    }
    if source.height == 0 {
        return Err(ParamsError::InvalidHeight(source.height));
    }
    if !source.aspect_ratio.is_finite() {
        return Err(ParamsError::InvalidAspectRatio);
    }

    let (width, height) = scaled_resolution(rendition.target_height, source.aspect_ratio);

    Ok(EncodingParameters {
        width,
        height,
        bitrate_kbps: target_bitrate_kbps(rendition.target_height, source, bandwidth_ratio),
        compression_quality: compression_quality(rendition.target_height, source, quality_offset),
        keyframe_interval: keyframe_interval(source.frame_rate),
    })
}

/// Aspect-preserving output resolution for a target height.
///
/// The source aspect ratio is clamped to [0.5, 3.0], both dimensions are
/// rounded up to the next even integer, and neither drops below 16.
pub fn scaled_resolution(target_height: u32, aspect_ratio: f32) -> (u32, u32) {
    let aspect = aspect_ratio.clamp(0.5, 3.0);
    let width = (target_height as f64 * aspect as f64).round() as u32;
    (even_at_least_16(width), even_at_least_16(target_height))
}

fn even_at_least_16(dim: u32) -> u32 {
    (dim + (dim & 1)).max(16)
}

/// Target bitrate in kbps for one rendition.
///
/// With a known source bitrate the target scales with the squared height
/// ratio (area-proportional), discounted by the downscale multiplier:
/// deep downscales need proportionally less bitrate than area scaling
/// alone implies. Without one, an empirical quadratic in the target
/// height stands in. Both paths apply the bandwidth ratio and a
/// resolution-tiered floor and ceiling.
pub fn target_bitrate_kbps(
    target_height: u32,
    source: &SourceDescriptor,
    bandwidth_ratio: f32,
) -> u32 {
    let floor = tier_min_kbps(target_height);

    let kbps = match source.bitrate_kbps {
        Some(src_kbps) if src_kbps > 0.0 => {
            let height_ratio = target_height as f32 / source.height as f32;
            let area_scaled = src_kbps * height_ratio * height_ratio;
            let discounted = area_scaled * downscale_multiplier(height_ratio) * bandwidth_ratio;
            let ceiling = src_kbps * source_cap_multiple(target_height);
            discounted.min(ceiling).max(floor)
        }
        _ => {
            let h = target_height as f32;
            let empirical = (0.004 * h * h + 0.9 * h) * bandwidth_ratio;
            empirical.min(tier_max_kbps(target_height)).max(floor)
        }
    };

    (kbps.round() as u32).max(1)
}

/// Downscale compression multiplier, keyed on target/source height ratio.
fn downscale_multiplier(height_ratio: f32) -> f32 {
    if height_ratio > 0.9 {
        1.0
    } else if height_ratio > 0.7 {
        0.85
    } else if height_ratio > 0.5 {
        0.7
    } else if height_ratio > 0.3 {
        0.55
    } else {
        0.4
    }
}

/// Lower bitrate bound for a rendition height.
fn tier_min_kbps(height: u32) -> f32 {
    (0.2 * height as f32).max(50.0)
}

/// Upper bitrate bound for a rendition height when the source bitrate is unknown.
fn tier_max_kbps(height: u32) -> f32 {
    match height {
        h if h <= 240 => 1000.0,
        h if h <= 360 => 2000.0,
        h if h <= 480 => 3500.0,
        h if h <= 720 => 10000.0,
        h if h <= 1080 => 16000.0,
        h if h <= 1440 => 24000.0,
        h if h <= 2160 => 40000.0,
        _ => 80000.0,
    }
}

/// Ceiling multiple of the source bitrate for a rendition height.
fn source_cap_multiple(height: u32) -> f32 {
    match height {
        h if h >= 2160 => 1.5,
        h if h >= 1080 => 1.2,
        h if h >= 720 => 1.0,
        _ => 0.9,
    }
}

/// Compression quality factor for one rendition.
///
/// Base value by resolution tier, tightened for rich or high-bit-depth
/// sources and loosened for starved ones, then offset by the user knob
/// and clamped to the valid range.
pub fn compression_quality(target_height: u32, source: &SourceDescriptor, offset: i32) -> u8 {
    let base = match target_height {
        h if h >= 2160 => 22,
        h if h >= 1080 => 24,
        h if h >= 480 => 27,
        _ => 30,
    };

    let quality = base + source_quality_delta(source) + bit_depth_delta(source.bit_depth()) + offset;
    quality.clamp(*QUALITY_RANGE.start(), *QUALITY_RANGE.end()) as u8
}

/// Adjustment from the source's actual-to-expected bitrate ratio.
///
/// A richer source carries detail worth keeping (finer quality, negative
/// delta); a starved source has none left to preserve.
fn source_quality_delta(source: &SourceDescriptor) -> i32 {
    let actual = match source.bitrate_kbps {
        Some(kbps) if kbps > 0.0 => kbps,
        _ => return 0,
    };

    let ratio = actual / expected_bitrate_kbps(source.height);
    if ratio >= 2.0 {
        -3
    } else if ratio >= 1.5 {
        -2
    } else if ratio >= 1.1 {
        -1
    } else if ratio <= 0.4 {
        3
    } else if ratio <= 0.6 {
        2
    } else if ratio <= 0.9 {
        1
    } else {
        0
    }
}

/// Adjustment for high-bit-depth sources.
fn bit_depth_delta(bit_depth: u32) -> i32 {
    match bit_depth {
        d if d >= 16 => -3,
        d if d >= 12 => -2,
        d if d >= 10 => -1,
        _ => 0,
    }
}

/// Standard frame rates and their keyframe intervals.
const KEYFRAME_TABLE: &[(f32, u32)] = &[
    (23.976, 48),
    (24.0, 48),
    (25.0, 50),
    (29.97, 60),
    (30.0, 60),
    (50.0, 100),
    (59.94, 120),
    (60.0, 120),
];

/// Keyframe interval in frames for a source frame rate.
///
/// Standard rates come from the table; anything else gets two seconds
/// worth of frames. Always within [`KEYFRAME_RANGE`].
pub fn keyframe_interval(frame_rate: f32) -> u32 {
    let interval = KEYFRAME_TABLE
        .iter()
        .find(|(rate, _)| (frame_rate - rate).abs() < 0.01)
        .map(|(_, interval)| *interval as i64)
        .unwrap_or_else(|| (frame_rate * 2.0).round() as i64);

    interval.clamp(*KEYFRAME_RANGE.start(), *KEYFRAME_RANGE.end()) as u32
}

//! Classifier for source quality.
//!
//! Relates a source's actual bitrate to the bitrate expected for its
//! resolution class. The resulting tier is carried on the source
//! descriptor, and the same ratio drives the compression-quality
//! adjustment in the parameter calculator.

use serde::{Deserialize, Serialize};

/// Classification of how richly a source is encoded for its resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceQualityTier {
    /// Well above the expected bitrate for its resolution.
    Rich,
    /// Around the expected bitrate.
    Standard,
    /// Well below the expected bitrate; already heavily compressed.
    Poor,
    /// Bitrate unavailable; tier could not be determined.
    Unknown,
}

impl Default for SourceQualityTier {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for SourceQualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceQualityTier::Rich => write!(f, "rich"),
            SourceQualityTier::Standard => write!(f, "standard"),
            SourceQualityTier::Poor => write!(f, "poor"),
            SourceQualityTier::Unknown => write!(f, "unknown"),
        }
    }
}

/// Expected bitrate in kbps for a source of the given height.
///
/// Reference values for typical long-GOP H.264 content; sources are judged
/// rich or poor relative to this scale.
pub fn expected_bitrate_kbps(height: u32) -> f32 {
    match height {
        h if h >= 4320 => 40000.0,
        h if h >= 2160 => 16000.0,
        h if h >= 1440 => 10000.0,
        h if h >= 1080 => 6000.0,
        h if h >= 720 => 3000.0,
        h if h >= 540 => 2200.0,
        h if h >= 480 => 1800.0,
        h if h >= 360 => 1000.0,
        _ => 700.0,
    }
}

/// Ratio of actual to expected bitrate, when the actual bitrate is known.
pub fn bitrate_ratio(bitrate_kbps: Option<f32>, height: u32) -> Option<f32> {
    match bitrate_kbps {
        Some(actual) if actual > 0.0 && height > 0 => {
            Some(actual / expected_bitrate_kbps(height))
        }
        _ => None,
    }
}

/// Classify a source into a quality tier from its bitrate and height.
pub fn classify_source(bitrate_kbps: Option<f32>, height: u32) -> SourceQualityTier {
    match bitrate_ratio(bitrate_kbps, height) {
        Some(ratio) if ratio >= 1.5 => SourceQualityTier::Rich,
        Some(ratio) if ratio <= 0.6 => SourceQualityTier::Poor,
        Some(_) => SourceQualityTier::Standard,
        None => SourceQualityTier::Unknown,
    }
}

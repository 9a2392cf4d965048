//! Quality ladder selection.
//!
//! Derives the ordered set of renditions to produce for a source, from a
//! fixed catalog of canonical heights. The selector never upscales and
//! never returns an empty ladder.

use serde::{Deserialize, Serialize};

/// Canonical rendition heights, ascending.
pub const RENDITION_CATALOG: &[u32] = &[144, 240, 360, 480, 540, 720, 1080, 1440, 2160, 4320, 8640];

/// One target quality level in the ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionSpec {
    /// Target height in pixels, one of [`RENDITION_CATALOG`].
    pub target_height: u32,
    /// Human-readable name, e.g. "720p".
    pub label: String,
}

impl RenditionSpec {
    /// Create a rendition spec for a canonical height.
    pub fn new(target_height: u32) -> Self {
        Self {
            target_height,
            label: format!("{}p", target_height),
        }
    }
}

impl std::fmt::Display for RenditionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Select the ladder of renditions for a source.
///
/// Catalog entries above `source_height` are never produced. Of the
/// remainder, entries below `min_quality_height` are dropped; if that
/// leaves nothing, the selector falls back to the catalog entry equal to
/// the floor (when it exists below the source) or the single lowest
/// height available for this source. A source shorter than every catalog
/// entry still yields the lowest catalog rendition rather than nothing.
///
/// The result is sorted by descending height and is deterministic for
/// identical inputs.
pub fn select_ladder(source_height: u32, min_quality_height: u32) -> Vec<RenditionSpec> {
    let available: Vec<u32> = RENDITION_CATALOG
        .iter()
        .copied()
        .filter(|&h| h <= source_height)
        .collect();

    if available.is_empty() {
        return vec![RenditionSpec::new(RENDITION_CATALOG[0])];
    }

    let mut selected: Vec<u32> = available
        .iter()
        .copied()
        .filter(|&h| h >= min_quality_height)
        .collect();

    if selected.is_empty() {
        let floor_entry = available
            .iter()
            .copied()
            .find(|&h| h == min_quality_height)
            .unwrap_or(available[0]);
        selected = vec![floor_entry];
    }

    selected.sort_unstable_by(|a, b| b.cmp(a));
    selected.into_iter().map(RenditionSpec::new).collect()
}

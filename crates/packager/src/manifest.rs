//! Master manifest assembly.
//!
//! Merges the per-rendition fragments into the master playlist. Fragments
//! arrive in whatever order jobs finish; the assembler orders them by
//! descending rendition height so the written manifest is identical for
//! every completion order.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the master playlist within the output directory.
pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";

/// Per-rendition entry merged into the master manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFragment {
    /// Canonical rendition height used for ordering.
    pub target_height: u32,
    /// Encoded frame width.
    pub width: u32,
    /// Encoded frame height.
    pub height: u32,
    /// Peak bandwidth in bits per second.
    pub bandwidth_bits: u64,
    /// Rendition name, e.g. "720p".
    pub label: String,
    /// Path of the rendition playlist, relative to the master.
    pub playlist_path: String,
}

/// Render the master playlist text from the collected fragments.
///
/// Deterministic for any permutation of the input: fragments are sorted
/// by descending height (label as tie-breaker) before being written.
pub fn assemble(fragments: &[ManifestFragment]) -> String {
    let mut ordered: Vec<&ManifestFragment> = fragments.iter().collect();
    ordered.sort_by(|a, b| {
        b.target_height
            .cmp(&a.target_height)
            .then_with(|| a.label.cmp(&b.label))
    });

    let mut playlist = String::new();
    playlist.push_str("#EXTM3U\n");
    playlist.push_str("#EXT-X-VERSION:6\n");
    playlist.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");

    for fragment in ordered {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},CODECS=\"{}\",NAME=\"{}\"\n",
            fragment.bandwidth_bits,
            fragment.width,
            fragment.height,
            codecs_attr(fragment.target_height),
            fragment.label
        ));
        playlist.push_str(&fragment.playlist_path);
        playlist.push('\n');
    }

    playlist
}

/// Write the master playlist atomically under the output directory.
///
/// The content lands in a temp file first and is renamed into place, so a
/// reader never observes a half-written manifest.
pub fn write_master(
    output_dir: &Path,
    fragments: &[ManifestFragment],
) -> std::io::Result<PathBuf> {
    let content = assemble(fragments);
    let final_path = output_dir.join(MASTER_PLAYLIST_NAME);
    let temp_path = output_dir.join(format!("{}.tmp", MASTER_PLAYLIST_NAME));

    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, &final_path)?;

    Ok(final_path)
}

/// CODECS attribute for a rendition height: H.264 level rises with the
/// frame size, audio is always AAC-LC.
fn codecs_attr(height: u32) -> &'static str {
    match height {
        h if h >= 2160 => "avc1.640033,mp4a.40.2",
        h if h >= 1080 => "avc1.640028,mp4a.40.2",
        h if h >= 720 => "avc1.64001f,mp4a.40.2",
        _ => "avc1.64001e,mp4a.40.2",
    }
}

//! Remote source download.
//!
//! Sources given as http(s) URLs are pulled into the output directory
//! before probing. The download lives in a guard that removes the file
//! when it goes out of scope, so temp sources never outlive the run,
//! whether it succeeds or fails.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Error type for source downloads.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP request failed or returned an error status.
    #[error("download failed: {0}")]
    Request(#[from] reqwest::Error),

    /// IO error writing the downloaded data.
    #[error("IO error writing download: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether an input names a remote source rather than a local file.
pub fn is_remote(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A downloaded source file, removed from disk on drop.
#[derive(Debug)]
pub struct TempDownload {
    path: PathBuf,
}

impl TempDownload {
    /// Local path of the downloaded source.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Download a remote source into the given directory.
///
/// Streams the body chunk by chunk rather than buffering the whole video
/// in memory. The guard is created before the first byte lands so a
/// half-written file is removed on any failure.
pub async fn download_source(url: &str, dir: &Path) -> Result<TempDownload, FetchError> {
    tracing::info!(url, "downloading remote source");

    let mut response = reqwest::get(url).await?.error_for_status()?;

    let download = TempDownload {
        path: dir.join(format!("source-{}.download", Uuid::new_v4())),
    };
    let mut file = tokio::fs::File::create(download.path()).await?;

    let mut bytes_written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;

    tracing::info!(
        url,
        path = %download.path().display(),
        bytes = bytes_written,
        "source downloaded"
    );

    Ok(download)
}

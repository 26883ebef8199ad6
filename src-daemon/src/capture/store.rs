/// Managed screenshot directory.
///
/// Portal screenshots are copied here under a timestamped name before OCR.
/// Filesystem trouble never aborts a capture: the pipeline keeps going on the
/// portal's own file instead.
use chrono::{DateTime, Local};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("portal returned an invalid URI '{0}'")]
    InvalidUri(String),
    #[error("portal returned unsupported URI scheme '{0}' (expected file://)")]
    UnsupportedScheme(String),
}

/// An image the pipeline works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub path: PathBuf,
    pub retain: bool,
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    retain: bool,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>, retain: bool) -> Self {
        Self {
            dir: dir.into(),
            retain,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.screenshot_dir(), settings.capture.save_screenshots)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the managed directory. Failure is logged and reported as `false`.
    pub fn ensure_dir(&self) -> bool {
        match std::fs::create_dir_all(&self.dir) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to create {}: {e}", self.dir.display());
                false
            }
        }
    }

    /// Copy the portal image into the managed directory.
    ///
    /// Falls back to the source path when the copy cannot be made. Only a URI
    /// that does not name a local file is an error.
    pub fn persist(&self, source_uri: &str) -> Result<StoredImage, StoreError> {
        let source = source_path(source_uri)?;
        let path = match self.copy_in(&source, Local::now()) {
            Ok(dest) => {
                info!("stored screenshot at {}", dest.display());
                dest
            }
            Err(e) => {
                warn!(
                    "failed to copy screenshot into {}: {e}; using {}",
                    self.dir.display(),
                    source.display()
                );
                source
            }
        };
        Ok(StoredImage {
            path,
            retain: self.retain,
        })
    }

    fn copy_in(&self, source: &Path, now: DateTime<Local>) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let dest = self.dir.join(capture_filename(now));

        // Write next to the target and rename over it: a same-second capture
        // replaces the older file whole, never leaves a truncated one.
        let mut tmp = tempfile::Builder::new()
            .prefix(".text-extract-")
            .suffix(".part")
            .tempfile_in(&self.dir)?;
        let mut src = File::open(source)?;
        std::io::copy(&mut src, tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| e.error)?;
        Ok(dest)
    }

    /// Delete the image unless it is meant to be kept.
    pub fn cleanup(image: &StoredImage) {
        if image.retain || !image.path.exists() {
            return;
        }
        match std::fs::remove_file(&image.path) {
            Ok(()) => debug!("removed {}", image.path.display()),
            Err(e) => warn!("failed to delete {}: {e}", image.path.display()),
        }
    }
}

/// `text-extract-2026-10-19T14-03-05.png`
pub fn capture_filename(now: DateTime<Local>) -> String {
    format!("text-extract-{}.png", now.format("%Y-%m-%dT%H-%M-%S"))
}

/// Local path behind a portal `file://` URI.
pub fn source_path(uri: &str) -> Result<PathBuf, StoreError> {
    let url = Url::parse(uri).map_err(|_| StoreError::InvalidUri(uri.to_string()))?;
    if url.scheme() != "file" {
        return Err(StoreError::UnsupportedScheme(url.scheme().to_string()));
    }
    url.to_file_path()
        .map_err(|_| StoreError::InvalidUri(uri.to_string()))
}

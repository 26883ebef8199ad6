/// Runs the OCR helper as a child process.
///
/// The child lives exactly as long as the request that spawned it: on
/// cancellation it is killed and reaped before `recognize` returns.
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{parse_helper_output, OcrOutcome};
use crate::config::OcrSettings;

pub const HELPER_NAME: &str = "text-extractor-ocr";

/// Install-time locations checked before `PATH`.
pub const KNOWN_LOCATIONS: [&str; 2] = [
    "/usr/libexec/text-extractor/text-extractor-ocr",
    "/usr/local/libexec/text-extractor/text-extractor-ocr",
];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(
        &self,
        image: &Path,
        settings: &OcrSettings,
        cancel: &CancellationToken,
    ) -> Result<OcrOutcome, Cancelled>;
}

/// Production recognizer. Stateless: the helper is resolved per request so
/// a config change takes effect on the next capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct OcrInvoker;

impl OcrInvoker {
    pub fn new() -> Self {
        Self
    }
}

/// First usable helper: override, known locations, then `PATH`.
pub fn resolve_helper(helper_override: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = helper_override {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!("configured OCR helper {} does not exist", path.display());
    }
    KNOWN_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
        .or_else(|| which::which(HELPER_NAME).ok())
}

struct RawOutput {
    stdout: String,
    stderr: String,
    status: ExitStatus,
}

/// Drain both pipes together (a full stderr pipe must not stall stdout),
/// then reap the child.
async fn collect_output(child: &mut Child) -> std::io::Result<RawOutput> {
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let read_stdout = async {
        match stdout_pipe.as_mut() {
            Some(pipe) => pipe.read_to_end(&mut stdout).await.map(|_| ()),
            None => Ok(()),
        }
    };
    let read_stderr = async {
        match stderr_pipe.as_mut() {
            Some(pipe) => pipe.read_to_end(&mut stderr).await.map(|_| ()),
            None => Ok(()),
        }
    };
    let (out, err) = tokio::join!(read_stdout, read_stderr);
    out?;
    err?;

    let status = child.wait().await?;
    Ok(RawOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        status,
    })
}

#[async_trait]
impl TextRecognizer for OcrInvoker {
    async fn recognize(
        &self,
        image: &Path,
        settings: &OcrSettings,
        cancel: &CancellationToken,
    ) -> Result<OcrOutcome, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let language = settings.language.as_str();
        let Some(helper) = resolve_helper(settings.helper_path().as_deref()) else {
            return Ok(OcrOutcome::Failure(format!(
                "{HELPER_NAME} not found. Please install the OCR helper."
            )));
        };

        info!("running {} on {} ({language})", helper.display(), image.display());
        let spawned = Command::new(&helper)
            .arg(image)
            .arg(language)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return Ok(OcrOutcome::Failure(format!(
                    "Failed to start {}: {e}",
                    helper.display()
                )))
            }
        };

        tokio::select! {
            output = collect_output(&mut child) => match output {
                Ok(raw) => {
                    debug!("OCR helper exited with {}", raw.status);
                    if !raw.status.success() {
                        debug!("OCR helper stderr: {}", raw.stderr.trim());
                    }
                    Ok(parse_helper_output(&raw.stdout, &raw.stderr))
                }
                Err(e) => {
                    let _ = child.kill().await;
                    Ok(OcrOutcome::Failure(format!("OCR helper I/O error: {e}")))
                }
            },
            _ = cancel.cancelled() => {
                match child.kill().await {
                    Ok(()) => info!("OCR helper terminated"),
                    Err(e) => warn!("failed to terminate OCR helper: {e}"),
                }
                Err(Cancelled)
            }
        }
    }
}

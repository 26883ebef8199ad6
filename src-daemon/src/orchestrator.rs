/// Capture pipeline: screenshot, store, OCR, clipboard, notify.
///
/// At most one request is in flight. A trigger while busy is dropped, not
/// queued. Whatever way a request ends (delivered, failed, cancelled or a
/// panic inside a collaborator) the progress indicator is hidden and the
/// busy slot is released.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::portal::{PortalError, ScreenshotSource};
use crate::capture::store::{ImageStore, StoreError};
use crate::capture::{CaptureRequest, PipelineState, ScreenshotResult};
use crate::config::{Settings, SettingsStore};
use crate::desktop::{Clipboard, Notifier, ProgressIndicator};
use crate::ocr::invoker::{Cancelled, TextRecognizer};
use crate::ocr::{joined_text, text_stats, OcrOutcome};

pub const PROGRESS_MESSAGE: &str = "Extracting text...";

/// Everything the pipeline talks to outside its own state.
#[derive(Clone)]
pub struct Collaborators {
    pub screenshots: Arc<dyn ScreenshotSource>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub clipboard: Arc<dyn Clipboard>,
    pub notifier: Arc<dyn Notifier>,
    pub progress: Arc<dyn ProgressIndicator>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Portal(#[from] PortalError),
    #[error("{0}")]
    Screenshot(String),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0:#}")]
    Clipboard(anyhow::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Notification title for this failure.
    pub fn title(&self) -> &'static str {
        match self {
            PipelineError::Clipboard(_) => "Clipboard Error",
            PipelineError::Task(_) => "Text Extractor Error",
            _ => "Screenshot Error",
        }
    }
}

struct ActiveCapture {
    request: CaptureRequest,
    state: PipelineState,
    cancel: CancellationToken,
}

struct Inner {
    parts: Collaborators,
    settings: SettingsStore,
    active: Mutex<Option<ActiveCapture>>,
    /// Woken whenever the active slot is cleared.
    idle: Notify,
    next_id: AtomicU64,
}

/// Cheap to clone; all clones drive the same pipeline.
#[derive(Clone)]
pub struct CaptureOrchestrator {
    inner: Arc<Inner>,
}

impl CaptureOrchestrator {
    pub fn new(parts: Collaborators, settings: SettingsStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                parts,
                settings,
                active: Mutex::new(None),
                idle: Notify::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Start a capture unless one is already running.
    ///
    /// Returns the pipeline task, or `None` when the trigger was ignored.
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self) -> Option<JoinHandle<PipelineState>> {
        if let Some(current) = self.inner.lock_active().as_ref() {
            debug!(
                request = current.request.id,
                state = %current.state,
                "capture already in progress, ignoring trigger"
            );
            return None;
        }

        // Settings are read once per request; edits apply to the next one.
        // The file read happens outside the lock.
        let settings = self.inner.settings.load();

        let mut active = self.inner.lock_active();
        if active.is_some() {
            debug!("capture started concurrently, ignoring trigger");
            return None;
        }
        let request = CaptureRequest::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let cancel = CancellationToken::new();
        *active = Some(ActiveCapture {
            request: request.clone(),
            state: PipelineState::AwaitingScreenshot,
            cancel: cancel.clone(),
        });
        drop(active);

        info!(request = request.id, "capture started");
        let release = Release {
            inner: self.inner.clone(),
            id: request.id,
        };
        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            let _release = release;
            inner.run(request, settings, cancel).await
        }))
    }

    /// Cancel the in-flight request. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        match self.inner.lock_active().as_ref() {
            Some(current) => {
                info!(request = current.request.id, "cancelling capture");
                current.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the in-flight request and wait up to `limit` for it to finish
    /// its cleanup. Returns whether there was a request to cancel.
    pub async fn cancel_and_wait(&self, limit: Duration) -> bool {
        let cancelled = self.cancel();
        if tokio::time::timeout(limit, self.wait_idle()).await.is_err() {
            warn!("capture still running after {limit:?}, giving up on it");
        }
        cancelled
    }

    /// Resolves once no request is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.lock_active().is_some()
    }

    /// State of the in-flight request, `Idle` when there is none.
    pub fn state(&self) -> PipelineState {
        self.inner
            .lock_active()
            .as_ref()
            .map_or(PipelineState::Idle, |current| current.state)
    }
}

impl Inner {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveCapture>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, id: u64, state: PipelineState) {
        if let Some(current) = self.lock_active().as_mut() {
            if current.request.id == id {
                debug!(request = id, "{} -> {state}", current.state);
                current.state = state;
            }
        }
    }

    /// Terminal transition. Progress goes away and the slot is freed in the
    /// same step, so a trigger right after sees an idle pipeline.
    fn finish(&self, id: u64, state: PipelineState) {
        debug_assert!(state.is_terminal());
        self.parts.progress.hide();
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|current| current.request.id == id) {
            *active = None;
        }
        drop(active);
        self.idle.notify_waiters();
        info!(request = id, "capture finished: {state}");
    }

    async fn run(
        &self,
        request: CaptureRequest,
        settings: Settings,
        cancel: CancellationToken,
    ) -> PipelineState {
        let terminal = match self.drive(&request, &settings, &cancel).await {
            Ok(()) => PipelineState::Done,
            Err(e) => {
                error!(request = request.id, "capture failed: {e}");
                self.parts.progress.hide();
                self.notify(&settings, e.title(), &e.to_string()).await;
                PipelineState::Failed
            }
        };
        self.finish(request.id, terminal);
        terminal
    }

    async fn drive(
        &self,
        request: &CaptureRequest,
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let id = request.id;
        let uri = match self
            .parts
            .screenshots
            .request_interactive_screenshot(cancel)
            .await?
        {
            ScreenshotResult::Success(uri) => uri,
            ScreenshotResult::Cancelled => {
                info!(request = id, "screenshot cancelled");
                return Ok(());
            }
            ScreenshotResult::Failed(reason) => return Err(PipelineError::Screenshot(reason)),
        };
        if cancel.is_cancelled() {
            info!(request = id, "cancelled after screenshot");
            return Ok(());
        }

        self.set_state(id, PipelineState::CopyingImage);
        self.parts.progress.show(PROGRESS_MESSAGE);
        let store = ImageStore::from_settings(settings);
        let stored = tokio::task::spawn_blocking(move || store.persist(&uri)).await??;

        let delivered = if cancel.is_cancelled() {
            info!(request = id, "cancelled while storing the image");
            Ok(())
        } else {
            self.set_state(id, PipelineState::RunningOcr);
            match self
                .parts
                .recognizer
                .recognize(&stored.path, &settings.ocr, cancel)
                .await
            {
                Ok(outcome) => {
                    self.set_state(id, PipelineState::Delivering);
                    self.parts.progress.hide();
                    self.deliver(id, outcome, settings).await
                }
                Err(Cancelled) => {
                    info!(request = id, "OCR cancelled");
                    Ok(())
                }
            }
        };

        let image = stored.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || ImageStore::cleanup(&image)).await {
            warn!(request = id, "cleanup of {} failed: {e}", stored.path.display());
        }
        delivered
    }

    async fn deliver(
        &self,
        id: u64,
        outcome: OcrOutcome,
        settings: &Settings,
    ) -> Result<(), PipelineError> {
        let lines = match outcome {
            OcrOutcome::Success(lines) => lines,
            OcrOutcome::Failure(message) => {
                warn!(request = id, "OCR failed: {message}");
                self.notify(settings, "OCR Error", &message).await;
                return Ok(());
            }
        };

        let text = joined_text(&lines);
        if text.trim().is_empty() {
            info!(request = id, "no text recognised");
            self.notify(settings, "No Text Found", "No text detected in the selected area")
                .await;
            return Ok(());
        }

        self.parts
            .clipboard
            .set_text(&text)
            .map_err(PipelineError::Clipboard)?;
        let (line_count, char_count) = text_stats(&lines);
        info!(request = id, line_count, char_count, "text copied to clipboard");
        self.notify(
            settings,
            "Text Extracted",
            &format!("{line_count} line(s), {char_count} characters copied to clipboard"),
        )
        .await;
        Ok(())
    }

    async fn notify(&self, settings: &Settings, title: &str, body: &str) {
        if !settings.ui.show_notifications {
            debug!("notification suppressed: {title}: {body}");
            return;
        }
        if let Err(e) = self.parts.notifier.notify(title, body).await {
            warn!("failed to show notification: {e:#}");
        }
    }
}

/// Held by the pipeline task. Runs on every exit, unwinding included.
struct Release {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.inner.parts.progress.hide();
        let mut active = self.inner.lock_active();
        if active
            .as_ref()
            .is_some_and(|current| current.request.id == self.id)
        {
            warn!(request = self.id, "capture ended abnormally, releasing");
            *active = None;
        }
        drop(active);
        self.inner.idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrSettings;
    use crate::ocr::OcrLine;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    // ── Fakes ────────────────────────────────────────────────────────

    struct FakeScreens {
        result: Result<ScreenshotResult, ()>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl ScreenshotSource for FakeScreens {
        async fn request_interactive_screenshot(
            &self,
            cancel: &CancellationToken,
        ) -> Result<ScreenshotResult, PortalError> {
            if let Some(gate) = &self.gate {
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = cancel.cancelled() => return Ok(ScreenshotResult::Cancelled),
                }
            }
            self.result.clone().map_err(|()| PortalError::StreamClosed)
        }
    }

    enum OcrBehaviour {
        Outcome(OcrOutcome),
        WaitForCancel,
        Panic,
    }

    struct FakeOcr {
        behaviour: OcrBehaviour,
        seen: Mutex<Vec<(PathBuf, bool)>>,
    }

    impl FakeOcr {
        fn new(behaviour: OcrBehaviour) -> Self {
            Self {
                behaviour,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(PathBuf, bool)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextRecognizer for FakeOcr {
        async fn recognize(
            &self,
            image: &Path,
            _settings: &OcrSettings,
            cancel: &CancellationToken,
        ) -> Result<OcrOutcome, Cancelled> {
            self.seen
                .lock()
                .unwrap()
                .push((image.to_path_buf(), image.exists()));
            match &self.behaviour {
                OcrBehaviour::Outcome(outcome) => Ok(outcome.clone()),
                OcrBehaviour::WaitForCancel => {
                    cancel.cancelled().await;
                    Err(Cancelled)
                }
                OcrBehaviour::Panic => panic!("recognizer blew up"),
            }
        }
    }

    #[derive(Default)]
    struct RecordingClipboard {
        fail: bool,
        texts: Mutex<Vec<String>>,
    }

    impl Clipboard for RecordingClipboard {
        fn set_text(&self, text: &str) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow!("no display"));
            }
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, title: &str, body: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        shown: AtomicUsize,
        visible: AtomicBool,
        /// Cancel this pipeline as soon as progress appears, i.e. while the
        /// image is being stored.
        cancel_on_show: Mutex<Option<CaptureOrchestrator>>,
    }

    impl ProgressIndicator for RecordingProgress {
        fn show(&self, _message: &str) {
            self.shown.fetch_add(1, Ordering::SeqCst);
            self.visible.store(true, Ordering::SeqCst);
            if let Some(orchestrator) = self.cancel_on_show.lock().unwrap().take() {
                orchestrator.cancel();
            }
        }

        fn hide(&self) {
            self.visible.store(false, Ordering::SeqCst);
        }
    }

    // ── Harness ──────────────────────────────────────────────────────

    struct Harness {
        orchestrator: CaptureOrchestrator,
        ocr: Arc<FakeOcr>,
        clipboard: Arc<RecordingClipboard>,
        notifier: Arc<RecordingNotifier>,
        progress: Arc<RecordingProgress>,
        out_dir: PathBuf,
        _dir: TempDir,
    }

    impl Harness {
        fn notifications(&self) -> Vec<(String, String)> {
            self.notifier.sent.lock().unwrap().clone()
        }

        fn clipboard_texts(&self) -> Vec<String> {
            self.clipboard.texts.lock().unwrap().clone()
        }

        fn stored_files(&self) -> Vec<PathBuf> {
            match std::fs::read_dir(&self.out_dir) {
                Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
                Err(_) => Vec::new(),
            }
        }

        async fn wait_for(&self, state: PipelineState) {
            for _ in 0..400 {
                if self.orchestrator.state() == state {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("pipeline never reached {state}");
        }
    }

    struct Setup {
        screens: Box<dyn FnOnce(String) -> FakeScreens>,
        ocr: OcrBehaviour,
        clipboard_fails: bool,
        configure: Box<dyn FnOnce(&mut Settings)>,
    }

    impl Setup {
        fn new(screens: impl FnOnce(String) -> FakeScreens + 'static, ocr: OcrBehaviour) -> Self {
            Self {
                screens: Box::new(screens),
                ocr,
                clipboard_fails: false,
                configure: Box::new(|_| {}),
            }
        }

        fn configure(mut self, configure: impl FnOnce(&mut Settings) + 'static) -> Self {
            self.configure = Box::new(configure);
            self
        }

        fn build(self) -> Harness {
            let dir = tempfile::tempdir().unwrap();
            let source = dir.path().join("portal-shot.png");
            std::fs::write(&source, b"\x89PNG fake").unwrap();
            let uri = url::Url::from_file_path(&source).unwrap().to_string();
            let out_dir = dir.path().join("captures");

            let mut settings = Settings::default();
            settings.capture.screenshot_directory = out_dir.display().to_string();
            (self.configure)(&mut settings);
            let store = SettingsStore::new(dir.path().join("config.toml"));
            store.save(&settings).unwrap();

            let ocr = Arc::new(FakeOcr::new(self.ocr));
            let clipboard = Arc::new(RecordingClipboard {
                fail: self.clipboard_fails,
                ..Default::default()
            });
            let notifier = Arc::new(RecordingNotifier::default());
            let progress = Arc::new(RecordingProgress::default());
            let parts = Collaborators {
                screenshots: Arc::new((self.screens)(uri)),
                recognizer: ocr.clone(),
                clipboard: clipboard.clone(),
                notifier: notifier.clone(),
                progress: progress.clone(),
            };

            Harness {
                orchestrator: CaptureOrchestrator::new(parts, store),
                ocr,
                clipboard,
                notifier,
                progress,
                out_dir,
                _dir: dir,
            }
        }
    }

    fn portal_ok(uri: String) -> FakeScreens {
        FakeScreens {
            result: Ok(ScreenshotResult::Success(uri)),
            gate: None,
        }
    }

    fn recognized(texts: &[&str]) -> OcrBehaviour {
        OcrBehaviour::Outcome(OcrOutcome::Success(
            texts
                .iter()
                .map(|text| OcrLine {
                    text: text.to_string(),
                })
                .collect(),
        ))
    }

    // ── Delivery ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn recognised_text_lands_on_clipboard() {
        let h = Setup::new(portal_ok, recognized(&["Hello", "World"])).build();

        let state = h.orchestrator.trigger().unwrap().await.unwrap();

        assert_eq!(state, PipelineState::Done);
        assert_eq!(h.clipboard_texts(), vec!["Hello\nWorld".to_string()]);
        assert_eq!(
            h.notifications(),
            vec![(
                "Text Extracted".to_string(),
                "2 line(s), 10 characters copied to clipboard".to_string()
            )]
        );
        assert!(!h.orchestrator.is_busy());
        assert_eq!(h.orchestrator.state(), PipelineState::Idle);
        assert_eq!(h.progress.shown.load(Ordering::SeqCst), 1);
        assert!(!h.progress.visible.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_result_leaves_clipboard_alone() {
        let h = Setup::new(portal_ok, recognized(&[])).build();

        let state = h.orchestrator.trigger().unwrap().await.unwrap();

        assert_eq!(state, PipelineState::Done);
        assert!(h.clipboard_texts().is_empty());
        assert_eq!(
            h.notifications(),
            vec![(
                "No Text Found".to_string(),
                "No text detected in the selected area".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn whitespace_only_lines_count_as_no_text() {
        let h = Setup::new(portal_ok, recognized(&["  ", ""])).build();
        h.orchestrator.trigger().unwrap().await.unwrap();
        assert!(h.clipboard_texts().is_empty());
        assert_eq!(h.notifications()[0].0, "No Text Found");
    }

    #[tokio::test]
    async fn ocr_failure_is_reported_not_fatal() {
        let h = Setup::new(
            portal_ok,
            OcrBehaviour::Outcome(OcrOutcome::Failure("Tesseract OCR is not installed".into())),
        )
        .build();

        let state = h.orchestrator.trigger().unwrap().await.unwrap();

        assert_eq!(state, PipelineState::Done);
        assert!(h.clipboard_texts().is_empty());
        assert_eq!(
            h.notifications(),
            vec![(
                "OCR Error".to_string(),
                "Tesseract OCR is not installed".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn clipboard_failure_fails_the_request() {
        let mut setup = Setup::new(portal_ok, recognized(&["Hi"]));
        setup.clipboard_fails = true;
        let h = setup.build();

        let state = h.orchestrator.trigger().unwrap().await.unwrap();

        assert_eq!(state, PipelineState::Failed);
        let sent = h.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Clipboard Error");
        assert!(sent[0].1.contains("no display"));
        assert!(h.stored_files().is_empty(), "stored image still cleaned up");
        assert!(!h.orchestrator.is_busy());
    }

    #[tokio::test]
    async fn disabled_notifications_are_suppressed() {
        let h = Setup::new(portal_ok, recognized(&["Hello"]))
            .configure(|s| s.ui.show_notifications = false)
            .build();

        h.orchestrator.trigger().unwrap().await.unwrap();

        assert_eq!(h.clipboard_texts(), vec!["Hello".to_string()]);
        assert!(h.notifications().is_empty());
    }

    // ── Image retention ──────────────────────────────────────────────

    #[tokio::test]
    async fn stored_image_is_removed_after_ocr() {
        let h = Setup::new(portal_ok, recognized(&["x"])).build();

        h.orchestrator.trigger().unwrap().await.unwrap();

        let calls = h.ocr.calls();
        assert_eq!(calls.len(), 1);
        let (path, existed) = &calls[0];
        assert!(path.starts_with(&h.out_dir));
        assert!(*existed, "image present while OCR ran");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn retained_image_survives() {
        let h = Setup::new(portal_ok, recognized(&["x"]))
            .configure(|s| s.capture.save_screenshots = true)
            .build();

        h.orchestrator.trigger().unwrap().await.unwrap();

        let files = h.stored_files();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("text-extract-") && name.ends_with(".png"));
    }

    // ── Screenshot outcomes ──────────────────────────────────────────

    #[tokio::test]
    async fn user_cancel_in_picker_is_silent() {
        let h = Setup::new(
            |_| FakeScreens {
                result: Ok(ScreenshotResult::Cancelled),
                gate: None,
            },
            recognized(&["never"]),
        )
        .build();

        let state = h.orchestrator.trigger().unwrap().await.unwrap();

        assert_eq!(state, PipelineState::Done);
        assert!(h.notifications().is_empty());
        assert!(h.ocr.calls().is_empty());
        assert_eq!(h.progress.shown.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn portal_failure_is_notified() {
        let h = Setup::new(
            |_| FakeScreens {
                result: Ok(ScreenshotResult::Failed("timed out".into())),
                gate: None,
            },
            recognized(&["never"]),
        )
        .build();

        let state = h.orchestrator.trigger().unwrap().await.unwrap();

        assert_eq!(state, PipelineState::Failed);
        assert_eq!(
            h.notifications(),
            vec![("Screenshot Error".to_string(), "timed out".to_string())]
        );
        assert!(h.ocr.calls().is_empty());
        assert!(!h.orchestrator.is_busy());
    }

    #[tokio::test]
    async fn bus_error_fails_the_request() {
        let h = Setup::new(
            |_| FakeScreens {
                result: Err(()),
                gate: None,
            },
            recognized(&["never"]),
        )
        .build();

        let state = h.orchestrator.trigger().unwrap().await.unwrap();

        assert_eq!(state, PipelineState::Failed);
        assert_eq!(h.notifications()[0].0, "Screenshot Error");
    }

    #[tokio::test]
    async fn non_file_uri_fails_the_request() {
        let h = Setup::new(
            |_| FakeScreens {
                result: Ok(ScreenshotResult::Success("https://example.com/a.png".into())),
                gate: None,
            },
            recognized(&["never"]),
        )
        .build();

        let state = h.orchestrator.trigger().unwrap().await.unwrap();

        assert_eq!(state, PipelineState::Failed);
        assert!(h.ocr.calls().is_empty());
        assert!(!h.progress.visible.load(Ordering::SeqCst));
    }

    // ── Concurrency and cancellation ─────────────────────────────────

    #[tokio::test]
    async fn trigger_while_busy_is_ignored() {
        let gate = Arc::new(Notify::new());
        let portal_gate = gate.clone();
        let h = Setup::new(
            move |uri| FakeScreens {
                result: Ok(ScreenshotResult::Success(uri)),
                gate: Some(portal_gate),
            },
            recognized(&["once"]),
        )
        .build();

        let first = h.orchestrator.trigger().unwrap();
        assert!(h.orchestrator.is_busy());
        assert_eq!(h.orchestrator.state(), PipelineState::AwaitingScreenshot);
        assert!(h.orchestrator.trigger().is_none());
        assert!(h.orchestrator.clone().trigger().is_none());

        gate.notify_one();
        assert_eq!(first.await.unwrap(), PipelineState::Done);
        assert!(!h.orchestrator.is_busy());
        assert_eq!(h.clipboard_texts().len(), 1);

        // Idle again: the next trigger is accepted.
        gate.notify_one();
        let second = h.orchestrator.trigger().expect("accepted once idle");
        assert_eq!(second.await.unwrap(), PipelineState::Done);
        assert_eq!(h.clipboard_texts().len(), 2);
    }

    #[tokio::test]
    async fn cancel_while_picking_region() {
        let h = Setup::new(
            |uri| FakeScreens {
                result: Ok(ScreenshotResult::Success(uri)),
                gate: Some(Arc::new(Notify::new())),
            },
            recognized(&["never"]),
        )
        .build();

        let handle = h.orchestrator.trigger().unwrap();
        assert!(h.orchestrator.cancel());

        assert_eq!(handle.await.unwrap(), PipelineState::Done);
        assert!(h.notifications().is_empty());
        assert!(!h.orchestrator.cancel(), "nothing left to cancel");
    }

    #[tokio::test]
    async fn cancel_during_ocr_cleans_up() {
        let h = Setup::new(portal_ok, OcrBehaviour::WaitForCancel).build();

        let handle = h.orchestrator.trigger().unwrap();
        h.wait_for(PipelineState::RunningOcr).await;
        assert!(h.progress.visible.load(Ordering::SeqCst));
        assert!(h.orchestrator.cancel());

        let state = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state, PipelineState::Done);
        assert!(h.notifications().is_empty());
        assert!(h.clipboard_texts().is_empty());
        assert!(!h.progress.visible.load(Ordering::SeqCst));
        assert!(h.stored_files().is_empty());
        assert!(!h.orchestrator.is_busy());
    }

    #[tokio::test]
    async fn cancel_while_storing_image_skips_ocr() {
        let h = Setup::new(portal_ok, recognized(&["never"])).build();
        *h.progress.cancel_on_show.lock().unwrap() = Some(h.orchestrator.clone());

        let state = h.orchestrator.trigger().unwrap().await.unwrap();

        assert_eq!(state, PipelineState::Done);
        assert!(h.ocr.calls().is_empty());
        assert!(h.notifications().is_empty());
        assert!(h.clipboard_texts().is_empty());
        assert!(h.stored_files().is_empty(), "stored image cleaned up");
        assert!(!h.progress.visible.load(Ordering::SeqCst));
        assert!(!h.orchestrator.is_busy());
    }

    #[tokio::test]
    async fn cancel_and_wait_finishes_cleanup_before_returning() {
        let h = Setup::new(portal_ok, OcrBehaviour::WaitForCancel).build();

        let _handle = h.orchestrator.trigger().unwrap();
        h.wait_for(PipelineState::RunningOcr).await;
        assert_eq!(h.stored_files().len(), 1);

        assert!(h.orchestrator.cancel_and_wait(Duration::from_secs(5)).await);

        // No await on the task handle: returning is enough.
        assert!(!h.orchestrator.is_busy());
        assert!(h.stored_files().is_empty());
        assert!(h.notifications().is_empty());
    }

    #[tokio::test]
    async fn cancel_and_wait_when_idle_returns_at_once() {
        let h = Setup::new(portal_ok, recognized(&["x"])).build();
        let waited = tokio::time::timeout(
            Duration::from_secs(1),
            h.orchestrator.cancel_and_wait(Duration::from_secs(30)),
        )
        .await
        .unwrap();
        assert!(!waited);
    }

    #[tokio::test]
    async fn panicking_collaborator_still_releases() {
        let h = Setup::new(portal_ok, OcrBehaviour::Panic).build();

        let result = h.orchestrator.trigger().unwrap().await;

        assert!(result.unwrap_err().is_panic());
        assert!(!h.orchestrator.is_busy());
        assert!(!h.progress.visible.load(Ordering::SeqCst));
        assert!(h.orchestrator.trigger().is_some());
    }

    #[test]
    fn error_titles() {
        assert_eq!(
            PipelineError::Screenshot("timed out".into()).title(),
            "Screenshot Error"
        );
        assert_eq!(
            PipelineError::Clipboard(anyhow!("x")).title(),
            "Clipboard Error"
        );
        assert_eq!(
            PipelineError::Store(StoreError::UnsupportedScheme("https".into())).title(),
            "Screenshot Error"
        );
    }
}

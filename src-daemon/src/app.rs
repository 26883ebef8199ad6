/// Daemon lifecycle.
///
/// `Daemon::new` does no I/O. `start` connects to the session bus, builds
/// the pipeline, exports the control object and claims the bus name;
/// `stop` undoes each of those exactly once.
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::object_server::SignalEmitter;
use zbus::Connection;

use crate::capture::portal::{ScreenshotRequester, ZbusPortal};
use crate::capture::store::ImageStore;
use crate::config::SettingsStore;
use crate::dbus::{TextExtractorService, BUS_NAME, OBJECT_PATH};
use crate::desktop::{DesktopNotifier, Progress, SignalProgress, SystemClipboard};
use crate::ocr::invoker::OcrInvoker;
use crate::orchestrator::{CaptureOrchestrator, Collaborators};

/// How long `stop` waits for an in-flight capture to clean up.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Running {
    conn: Connection,
    orchestrator: CaptureOrchestrator,
    forwarder: JoinHandle<()>,
}

pub struct Daemon {
    settings: SettingsStore,
    running: Option<Running>,
}

impl Daemon {
    pub fn new(settings: SettingsStore) -> Self {
        Self {
            settings,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The live pipeline, once started.
    pub fn orchestrator(&self) -> Option<&CaptureOrchestrator> {
        self.running.as_ref().map(|running| &running.orchestrator)
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("daemon already started");
        }

        info!("using config {}", self.settings.path().display());
        let store = ImageStore::from_settings(&self.settings.load());
        if store.ensure_dir() {
            debug!("screenshot directory {}", store.dir().display());
        }

        let conn = Connection::session()
            .await
            .context("Failed to connect to the session bus")?;

        let (progress, progress_rx) = SignalProgress::channel();
        let parts = Collaborators {
            screenshots: Arc::new(ScreenshotRequester::new(ZbusPortal::new(conn.clone()))),
            recognizer: Arc::new(OcrInvoker::new()),
            clipboard: Arc::new(SystemClipboard::new()),
            notifier: Arc::new(DesktopNotifier::new(conn.clone())),
            progress: Arc::new(progress),
        };
        let orchestrator = CaptureOrchestrator::new(parts, self.settings.clone());

        conn.object_server()
            .at(OBJECT_PATH, TextExtractorService::new(orchestrator.clone()))
            .await
            .context("Failed to export the control object")?;
        if let Err(e) = conn.request_name(BUS_NAME).await {
            remove_object(&conn).await;
            return Err(e).with_context(|| format!("Failed to acquire bus name {BUS_NAME}"));
        }
        info!("serving {BUS_NAME} at {OBJECT_PATH}");

        let forwarder = tokio::spawn(forward_progress(conn.clone(), progress_rx));
        self.running = Some(Running {
            conn,
            orchestrator,
            forwarder,
        });
        Ok(())
    }

    /// Cancel any active request and release everything `start` acquired.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        // Waiting keeps the runtime alive until the pipeline has reaped the
        // helper and applied the cleanup policy.
        if running.orchestrator.cancel_and_wait(SHUTDOWN_GRACE).await {
            info!("cancelled in-flight capture on shutdown");
        }
        running.forwarder.abort();
        if let Err(e) = running.conn.release_name(BUS_NAME).await {
            warn!("failed to release {BUS_NAME}: {e}");
        }
        remove_object(&running.conn).await;
        info!("daemon stopped");
    }
}

async fn remove_object(conn: &Connection) {
    if let Err(e) = conn
        .object_server()
        .remove::<TextExtractorService, _>(OBJECT_PATH)
        .await
    {
        debug!("failed to remove {OBJECT_PATH}: {e}");
    }
}

/// Re-broadcast progress changes as the `ProgressChanged` signal.
async fn forward_progress(conn: Connection, mut rx: watch::Receiver<Progress>) {
    let emitter = match SignalEmitter::new(&conn, OBJECT_PATH) {
        Ok(emitter) => emitter,
        Err(e) => {
            warn!("progress signal unavailable: {e}");
            return;
        }
    };
    while rx.changed().await.is_ok() {
        let progress = rx.borrow_and_update().clone();
        if let Err(e) =
            TextExtractorService::progress_changed(&emitter, progress.visible, &progress.message)
                .await
        {
            warn!("failed to emit ProgressChanged: {e}");
        }
    }
}

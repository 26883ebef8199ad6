use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use super::ProgressIndicator;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub visible: bool,
    pub message: String,
}

/// Publishes progress on a watch channel; the D-Bus service forwards it as
/// the `ProgressChanged` signal.
pub struct SignalProgress {
    tx: watch::Sender<Progress>,
}

impl SignalProgress {
    pub fn channel() -> (Self, watch::Receiver<Progress>) {
        let (tx, rx) = watch::channel(Progress::default());
        (Self { tx }, rx)
    }
}

impl ProgressIndicator for SignalProgress {
    fn show(&self, message: &str) {
        debug!("progress: {message}");
        self.tx.send_replace(Progress {
            visible: true,
            message: message.to_string(),
        });
    }

    fn hide(&self) {
        self.tx.send_if_modified(|progress| {
            if !progress.visible {
                return false;
            }
            *progress = Progress::default();
            true
        });
    }
}

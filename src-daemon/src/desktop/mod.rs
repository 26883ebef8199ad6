/// Desktop collaborators the pipeline hands its results to.
pub mod clipboard;
pub mod notify;
pub mod progress;

use anyhow::Result;
use async_trait::async_trait;

pub use clipboard::SystemClipboard;
pub use notify::DesktopNotifier;
pub use progress::{Progress, SignalProgress};

pub trait Clipboard: Send + Sync {
    fn set_text(&self, text: &str) -> Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<()>;
}

/// Busy indication shown while OCR runs. `hide` must be idempotent.
pub trait ProgressIndicator: Send + Sync {
    fn show(&self, message: &str);
    fn hide(&self);
}

use anyhow::{Context, Result};
use std::sync::Mutex;

use super::Clipboard;

/// System clipboard via arboard.
///
/// On Linux the selection is served by this process, so the handle is kept
/// for the daemon's lifetime instead of being recreated per copy.
#[derive(Default)]
pub struct SystemClipboard {
    inner: Mutex<Option<arboard::Clipboard>>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clipboard for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(arboard::Clipboard::new().context("Failed to access system clipboard")?);
        }
        let clipboard = guard.as_mut().context("Clipboard unavailable")?;
        clipboard
            .set_text(text.to_owned())
            .context("Failed to copy text to clipboard")?;
        Ok(())
    }
}

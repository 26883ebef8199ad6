/// Persisted user settings.
///
/// Read from `<XDG config>/text-extractor/config.toml`. Every key is optional;
/// a missing file yields defaults and a broken one is logged and ignored, so
/// a capture never fails because of configuration.
use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Subdirectory of the Pictures directory that holds stored captures.
pub const SCREENSHOT_SUBDIR: [&str; 2] = ["Screenshots", "TextExtractor"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Keep the stored image after OCR.
    pub save_screenshots: bool,
    /// Empty means the default under the Pictures directory.
    pub screenshot_directory: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            save_screenshots: false,
            screenshot_directory: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub language: String,
    /// Explicit helper executable; empty means resolve it.
    pub helper: String,
}

impl OcrSettings {
    pub fn helper_path(&self) -> Option<PathBuf> {
        let helper = self.helper.trim();
        (!helper.is_empty()).then(|| expand_tilde(helper))
    }
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            helper: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// GTK accelerator used by `text-extractor-ctl install-shortcut`.
    pub shortcut: String,
    pub show_notifications: bool,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            shortcut: "<Super><Shift>t".to_string(),
            show_notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub ocr: OcrSettings,
    pub ui: UiSettings,
}

impl Settings {
    /// Directory captures are copied into.
    pub fn screenshot_dir(&self) -> PathBuf {
        let custom = self.capture.screenshot_directory.trim();
        if !custom.is_empty() {
            return expand_tilde(custom);
        }
        let pictures = UserDirs::new()
            .and_then(|dirs| dirs.picture_dir().map(Path::to_path_buf))
            .or_else(|| UserDirs::new().map(|dirs| dirs.home_dir().join("Pictures")))
            .unwrap_or_else(std::env::temp_dir);
        SCREENSHOT_SUBDIR
            .iter()
            .fold(pictures, |path, part| path.join(part))
    }
}

/// Location of the settings file plus load/save.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the XDG default location.
    pub fn default_location() -> Result<Self> {
        let dirs = ProjectDirs::from("io.github", "TextExtractor", "text-extractor")
            .context("Could not determine the configuration directory")?;
        Ok(Self::new(dirs.config_dir().join("config.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings. Never fails: problems are logged and defaults used.
    pub fn load(&self) -> Settings {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("ignoring invalid config {}: {e}", self.path.display());
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                warn!("could not read config {}: {e}", self.path.display());
                Settings::default()
            }
        }
    }

    /// Write settings via temp file + rename so readers never see half a file.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        let dir = self
            .path
            .parent()
            .context("Config path has no parent directory")?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let contents = toml::to_string_pretty(settings).context("Failed to serialize settings")?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = UserDirs::new().map(|dirs| dirs.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// GNOME custom keybinding for `text-extractor-ctl extract`.
///
/// Custom keybindings live in two places: a list of relocatable schema
/// paths under `media-keys`, and one `custom-keybinding` object per path
/// holding name, command and binding.
use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

const MEDIA_KEYS_SCHEMA: &str = "org.gnome.settings-daemon.plugins.media-keys";
const CUSTOM_SCHEMA: &str = "org.gnome.settings-daemon.plugins.media-keys.custom-keybinding";
const LIST_KEY: &str = "custom-keybindings";
pub const ENTRY_PATH: &str =
    "/org/gnome/settings-daemon/plugins/media-keys/custom-keybindings/text-extractor/";

const ENTRY_NAME: &str = "Text Extractor";

/// Parse a GVariant string array as printed by `gsettings get`.
///
/// Accepts `@as []`, `[]` and `['a', 'b']`. Paths never contain quotes, so
/// no escape handling is needed.
pub fn parse_path_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("@as").unwrap_or(raw).trim();
    let inner = raw
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or("");
    inner
        .split(',')
        .map(|item| item.trim().trim_matches('\'').trim_matches('"'))
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn format_path_list(paths: &[String]) -> String {
    let quoted: Vec<String> = paths.iter().map(|path| format!("'{path}'")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Existing entries with ours appended once.
pub fn with_entry(mut paths: Vec<String>, entry: &str) -> Vec<String> {
    if !paths.iter().any(|path| path == entry) {
        paths.push(entry.to_string());
    }
    paths
}

async fn gsettings(args: &[&str]) -> Result<String> {
    debug!("gsettings {}", args.join(" "));
    let output = Command::new("gsettings")
        .args(args)
        .output()
        .await
        .context("Failed to run gsettings (is it installed?)")?;
    if !output.status.success() {
        bail!(
            "gsettings {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Register (or update) the keybinding. Other custom keybindings are kept.
pub async fn install(binding: &str, command: &str) -> Result<()> {
    let current = gsettings(&["get", MEDIA_KEYS_SCHEMA, LIST_KEY]).await?;
    let paths = with_entry(parse_path_list(&current), ENTRY_PATH);
    gsettings(&["set", MEDIA_KEYS_SCHEMA, LIST_KEY, &format_path_list(&paths)]).await?;

    let relocatable = format!("{CUSTOM_SCHEMA}:{ENTRY_PATH}");
    gsettings(&["set", &relocatable, "name", ENTRY_NAME]).await?;
    gsettings(&["set", &relocatable, "command", command]).await?;
    gsettings(&["set", &relocatable, "binding", binding]).await?;

    info!("installed shortcut {binding} -> {command}");
    Ok(())
}

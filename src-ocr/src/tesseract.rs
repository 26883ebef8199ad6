/// Tesseract command line wrapper.
///
/// Runs `tesseract ... tsv` and groups the word rows into text lines with
/// bounding boxes, the shape the daemon puts on the clipboard.
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

pub const FALLBACK_LANGUAGE: &str = "eng";

/// Page segmentation mode: a single uniform block of text.
const PAGE_SEG_MODE: &str = "6";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrRegion {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub confidence: f32,
}

/// Word boxes in reading order plus the lines they form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub words: Vec<OcrRegion>,
    pub lines: Vec<OcrRegion>,
}

pub fn find_tesseract() -> Option<PathBuf> {
    which::which("tesseract").ok()
}

/// Languages from `tesseract --list-langs`. The first line is a header.
pub fn parse_langs(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.starts_with("List of available languages"))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn installed_languages(tesseract: &Path) -> Vec<String> {
    match Command::new(tesseract).arg("--list-langs").output() {
        // Older releases print the list on stderr.
        Ok(out) => {
            let mut langs = parse_langs(&String::from_utf8_lossy(&out.stdout));
            if langs.is_empty() {
                langs = parse_langs(&String::from_utf8_lossy(&out.stderr));
            }
            langs
        }
        Err(e) => {
            warn!("could not list tesseract languages: {e}");
            Vec::new()
        }
    }
}

/// Requested language if every `+` component is installed, else `eng`,
/// else the first installed language. An empty list means "unknown": the
/// request is passed through unchanged.
pub fn resolve_language(requested: &str, installed: &[String]) -> String {
    if installed.is_empty() {
        return requested.to_string();
    }
    let available = |lang: &str| installed.iter().any(|l| l == lang);
    if !requested.is_empty() && requested.split('+').all(available) {
        return requested.to_string();
    }
    let fallback = if available(FALLBACK_LANGUAGE) {
        FALLBACK_LANGUAGE.to_string()
    } else {
        installed[0].clone()
    };
    warn!("language '{requested}' not installed, using '{fallback}'");
    fallback
}

struct Word {
    text: String,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    conf: f32,
}

impl Word {
    fn region(&self) -> OcrRegion {
        OcrRegion {
            text: self.text.clone(),
            x: self.left,
            y: self.top,
            w: self.width,
            h: self.height,
            confidence: self.conf,
        }
    }
}

/// Group TSV word rows into lines by `(block, paragraph, line)`.
///
/// Columns: level page block par line word left top width height conf text.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut words: Vec<OcrRegion> = Vec::new();
    let mut order: Vec<(u32, u32, u32)> = Vec::new();
    let mut groups: HashMap<(u32, u32, u32), Vec<Word>> = HashMap::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().ok();
        let (Some(block), Some(par), Some(line)) = (num(2), num(3), num(4)) else {
            continue;
        };
        let (Some(left), Some(top), Some(width), Some(height)) = (num(6), num(7), num(8), num(9))
        else {
            continue;
        };
        let conf: f32 = match cols[10].trim().parse() {
            Ok(conf) if conf >= 0.0 => conf,
            _ => continue,
        };
        let text = cols[11..].join("\t").trim().to_string();
        if text.is_empty() {
            continue;
        }

        let word = Word {
            text,
            left,
            top,
            width,
            height,
            conf,
        };
        words.push(word.region());

        let key = (block, par, line);
        if !groups.contains_key(&key) {
            order.push(key);
        }
        groups.entry(key).or_default().push(word);
    }

    let lines = order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(merge_line)
        .collect();
    Recognition { words, lines }
}

fn merge_line(mut words: Vec<Word>) -> OcrRegion {
    words.sort_by_key(|word| word.left);
    let x = words.iter().map(|w| w.left).min().unwrap_or(0);
    let y = words.iter().map(|w| w.top).min().unwrap_or(0);
    let right = words
        .iter()
        .map(|w| w.left.saturating_add(w.width))
        .max()
        .unwrap_or(x);
    let bottom = words
        .iter()
        .map(|w| w.top.saturating_add(w.height))
        .max()
        .unwrap_or(y);
    let confidence = words.iter().map(|w| w.conf).sum::<f32>() / words.len().max(1) as f32;
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    OcrRegion {
        text,
        x,
        y,
        w: right - x,
        h: bottom - y,
        confidence,
    }
}

/// Run recognition on one image.
pub fn recognize(tesseract: &Path, image: &Path, language: &str) -> Result<Recognition> {
    debug!("tesseract {} -l {language}", image.display());
    let output = Command::new(tesseract)
        .arg(image)
        .arg("stdout")
        .args(["-l", language, "--psm", PAGE_SEG_MODE, "tsv"])
        .output()
        .with_context(|| format!("Failed to run {}", tesseract.display()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("Tesseract failed: {}", stderr.trim());
    }
    Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
}

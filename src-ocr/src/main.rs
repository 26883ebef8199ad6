mod tesseract;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

use tesseract::{OcrRegion, FALLBACK_LANGUAGE};

const USAGE: &str = "Usage: text-extractor-ocr <image-path> [language]";

#[derive(Debug, Serialize)]
struct Report {
    success: bool,
    error: Option<String>,
    text: String,
    /// Word boxes.
    regions: Vec<OcrRegion>,
    lines: Vec<OcrRegion>,
    image_width: u32,
    image_height: u32,
    language: String,
}

impl Report {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            text: String::new(),
            regions: Vec::new(),
            lines: Vec::new(),
            image_width: 0,
            image_height: 0,
            language: String::new(),
        }
    }
}

fn run(args: &[String]) -> Result<Report> {
    let Some(image) = args.first() else {
        bail!(USAGE);
    };
    let requested = args.get(1).map_or(FALLBACK_LANGUAGE, String::as_str);
    let image = Path::new(image);

    let tesseract = tesseract::find_tesseract().context("Tesseract OCR is not installed")?;
    if !image.exists() {
        bail!("Image file not found: {}", image.display());
    }
    let (image_width, image_height) = image::image_dimensions(image)
        .with_context(|| format!("Failed to read image {}", image.display()))?;

    let installed = tesseract::installed_languages(&tesseract);
    let language = tesseract::resolve_language(requested, &installed);
    let tesseract::Recognition { words, lines } =
        tesseract::recognize(&tesseract, image, &language)?;
    tracing::info!(
        "recognised {} line(s) in {image_width}x{image_height} image",
        lines.len()
    );

    let text = lines
        .iter()
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    Ok(Report {
        success: true,
        error: None,
        text,
        regions: words,
        lines,
        image_width,
        image_height,
        language,
    })
}

fn main() -> ExitCode {
    // stdout is reserved for the JSON report.
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (report, code) = match run(&args) {
        Ok(report) => (report, ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!("{e:#}");
            (Report::failure(format!("{e:#}")), ExitCode::FAILURE)
        }
    };

    match serde_json::to_string(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("failed to encode report: {e}");
            return ExitCode::FAILURE;
        }
    }
    code
}

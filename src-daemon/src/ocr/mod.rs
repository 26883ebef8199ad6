/// OCR results as the pipeline sees them.
///
/// The helper prints a JSON report on stdout; everything here is about
/// turning that (possibly noisy) output into an [`OcrOutcome`].
pub mod invoker;

use serde::Deserialize;

pub const NO_OUTPUT: &str = "OCR produced no output";
pub const PARSE_FAILED: &str = "Failed to parse OCR results";
pub const GENERIC_FAILURE: &str = "OCR processing failed";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OcrLine {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrOutcome {
    Success(Vec<OcrLine>),
    Failure(String),
}

/// Shape of the helper's JSON report. Extra fields are ignored.
#[derive(Deserialize)]
struct HelperReport {
    success: bool,
    #[serde(default)]
    lines: Option<Vec<OcrLine>>,
    #[serde(default)]
    error: Option<String>,
}

/// Interpret captured helper output.
pub fn parse_helper_output(stdout: &str, stderr: &str) -> OcrOutcome {
    let stderr = stderr.trim();
    let or_stderr = |fallback: &str| {
        if stderr.is_empty() {
            fallback.to_string()
        } else {
            stderr.to_string()
        }
    };

    if stdout.trim().is_empty() {
        return OcrOutcome::Failure(or_stderr(NO_OUTPUT));
    }

    // Anything before the first brace is preamble (warnings, progress).
    let Some(start) = stdout.find('{') else {
        return OcrOutcome::Failure(or_stderr(PARSE_FAILED));
    };
    let mut values = serde_json::Deserializer::from_str(&stdout[start..]).into_iter::<HelperReport>();
    match values.next() {
        Some(Ok(report)) if report.success => {
            OcrOutcome::Success(report.lines.unwrap_or_default())
        }
        Some(Ok(report)) => OcrOutcome::Failure(
            report
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
        ),
        Some(Err(_)) | None => OcrOutcome::Failure(or_stderr(PARSE_FAILED)),
    }
}

/// Line texts in order, one per line.
pub fn joined_text(lines: &[OcrLine]) -> String {
    lines
        .iter()
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `(line count, character count)` for the success notification.
/// Separators are not counted as characters.
pub fn text_stats(lines: &[OcrLine]) -> (usize, usize) {
    let chars = lines.iter().map(|line| line.text.chars().count()).sum();
    (lines.len(), chars)
}

pub mod portal;
pub mod store;

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

/// One user trigger. Owned by the orchestrator for the lifetime of its pipeline.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub id: u64,
    pub created_at: DateTime<Local>,
}

impl CaptureRequest {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            created_at: Local::now(),
        }
    }
}

/// What the screenshot portal handed back for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenshotResult {
    Success(String),
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    AwaitingScreenshot,
    CopyingImage,
    RunningOcr,
    Delivering,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// Run artifact struct definitions
//
// This module contains the struct definitions for artifacts that are persisted
// as JSON files within a video's output directory.

use crate::run_context::GeotagConfig;
use crate::telemetry::Detection;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "report.json";

/// Outcome of one input file.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Processed,
    /// No decoder recognised the telemetry
    Unrecognized,
    /// Telemetry decoded but too sparse to reconstruct
    InsufficientTelemetry,
    Failed,
}

/// Contents of `report.json`
#[derive(Serialize, Debug, Clone)]
pub struct FileReport {
    pub file: PathBuf,
    pub status: FileStatus,
    pub detection: Option<Detection>,
    pub points_decoded: usize,
    /// Percent of expected seconds carrying a fix
    pub coverage_pct: Option<f64>,
    pub frames_extracted: usize,
    pub frames_skipped: usize,
    pub unresolved_at: Option<usize>,
    pub message: Option<String>,
    pub config: GeotagConfig,
    pub processed_at: DateTime<Utc>,
}

impl FileReport {
    pub fn new(file: &Path, config: &GeotagConfig) -> Self {
        Self {
            file: file.to_path_buf(),
            status: FileStatus::Processed,
            detection: None,
            points_decoded: 0,
            coverage_pct: None,
            frames_extracted: 0,
            frames_skipped: 0,
            unresolved_at: None,
            message: None,
            config: config.clone(),
            processed_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: FileStatus, message: impl Into<String>) -> Self {
        self.status = status;
        self.message = Some(message.into());
        self
    }

    pub fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(REPORT_FILE);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// One-line outcome for the batch summary.
    pub fn summary(&self) -> String {
        let name = self
            .file
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.display().to_string());
        let vendor = self
            .detection
            .as_ref()
            .map(|d| format!("{} {}", d.make, d.model))
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!(
            "{}: {:?} [{}] points={} frames={} skipped={}",
            name, self.status, vendor, self.points_decoded, self.frames_extracted, self.frames_skipped
        );
        if let Some(frame) = self.unresolved_at {
            line.push_str(&format!(" stopped_at_frame={}", frame));
        }
        if let Some(message) = &self.message {
            line.push_str(&format!(" ({})", message));
        }
        line
    }
}

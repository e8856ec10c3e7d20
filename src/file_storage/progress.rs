// Worker progress snapshot (.research-progress.json), read-only

use super::read_json_with_retry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const PROGRESS_FILE: &str = ".research-progress.json";

/// Snapshot the worker publishes while it runs. Every field is optional on
/// read because the worker writes whatever it knows at the time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub current_task_description: Option<String>,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub estimated_completion: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Progress {
    /// Percentage clamped to 0..=100, zero when not reported
    pub fn percent_complete(&self) -> f64 {
        self.percentage
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0))
            .unwrap_or(0.0)
    }
}

pub fn progress_path(project_dir: &Path) -> PathBuf {
    project_dir.join(PROGRESS_FILE)
}

/// Current progress, or `None` if the worker has not published any yet.
/// A file that keeps failing to parse is logged and reported as `None`.
pub fn read_progress(project_dir: &Path) -> Option<Progress> {
    match read_json_with_retry::<Progress>(&progress_path(project_dir)) {
        Ok(progress) => progress,
        Err(e) => {
            log::warn!("[Progress] {}", e);
            None
        }
    }
}

// Launch settings of a Research (.research-settings.json)
//
// Written once by start so a resumed worker runs with the same depth, style
// and model. Credentials are never written here.

use super::{read_json_with_retry, write_json, FileResult};
use crate::models::{ResearchDepth, ResearchStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE: &str = ".research-settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSettings {
    #[serde(default)]
    pub depth: ResearchDepth,
    #[serde(default)]
    pub style: ResearchStyle,
    #[serde(default)]
    pub focus: Option<String>,
    pub provider: String,
    pub model: String,
}

pub fn settings_path(project_dir: &Path) -> PathBuf {
    project_dir.join(SETTINGS_FILE)
}

pub fn write_settings(project_dir: &Path, settings: &LaunchSettings) -> FileResult<()> {
    write_json(&settings_path(project_dir), settings)
}

/// Saved settings, or `None` if missing or unreadable
pub fn read_settings(project_dir: &Path) -> Option<LaunchSettings> {
    match read_json_with_retry(&settings_path(project_dir)) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("[Settings] {}", e);
            None
        }
    }
}

// Worker activity journal (.activities.json), read-only
//
// The worker appends every thought, tool call and tool result it emits to a
// JSON array in the project directory and trims it to its most recent
// entries. Each entry carries a worker-assigned `id`; the portal uses it to
// ingest every entry exactly once.

use super::read_json_with_retry;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const ACTIVITIES_FILE: &str = ".activities.json";

/// One journal entry: the worker's id plus the event object without it
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub id: String,
    pub event: Value,
}

pub fn activities_path(project_dir: &Path) -> PathBuf {
    project_dir.join(ACTIVITIES_FILE)
}

/// Journal entries in file order. A missing or unreadable journal is empty,
/// and entries without a string `id` are skipped.
pub fn read_journal(project_dir: &Path) -> Vec<JournalEntry> {
    let path = activities_path(project_dir);
    let entries = match read_json_with_retry::<Value>(&path) {
        Ok(Some(Value::Array(entries))) => entries,
        Ok(Some(_)) => {
            log::warn!("[Journal] {:?} is not a JSON array, ignoring it", path);
            return Vec::new();
        }
        Ok(None) => return Vec::new(),
        Err(e) => {
            log::warn!("[Journal] {}", e);
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let Value::Object(mut event) = entry else {
                return None;
            };
            match event.remove("id") {
                Some(Value::String(id)) if !id.is_empty() => Some(JournalEntry {
                    id,
                    event: Value::Object(event),
                }),
                _ => {
                    log::debug!("[Journal] Skipping entry without an id in {:?}", path);
                    None
                }
            }
        })
        .collect()
}

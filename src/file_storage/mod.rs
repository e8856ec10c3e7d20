//! File-based IPC with the research worker
//!
//! Everything here lives inside a Research's project directory:
//! - `.messages.json` - user messages waiting for the worker (see [`messages`])
//! - `.activities.json` - worker-authored activity journal (see [`activities`])
//! - `.research-progress.json` - worker-authored progress snapshot (see [`progress`])
//! - `.kill` / `.conversation-context.md` - control files (see [`control`])
//! - `.research-settings.json` - launch settings reused on resume (see [`settings`])
//!
//! The worker runs outside our supervision, so every read tolerates a file that
//! is missing or caught halfway through a write.

pub mod activities;
pub mod control;
pub mod messages;
pub mod progress;
pub mod settings;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Common file operations result type
pub type FileResult<T> = Result<T, String>;

/// Attempts made before a file that keeps failing to parse is given up on
pub const PARSE_RETRY_ATTEMPTS: u32 = 3;

const PARSE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Get the global `~/.research-portal` directory
pub fn get_global_portal_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".research-portal")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Write data to a file atomically (temp file + rename)
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| format!("Not a file path: {:?}", path))?;
    // Unique temp name so concurrent writers never share a temp file
    let temp_path = path.with_file_name(format!(
        "{}.{}.tmp",
        file_name,
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    ));

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    fs::write(&temp_path, content)
        .map_err(|e| format!("Failed to write temp file {:?}: {}", temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        format!("Failed to rename {:?} to {:?}: {}", temp_path, path, e)
    })?;

    Ok(())
}

/// Read a JSON file and deserialize it
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read file {:?}: {}", path, e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse JSON from {:?}: {}", path, e))
}

/// Read a JSON file that another process may be rewriting.
///
/// Returns `Ok(None)` when the file does not exist. A parse failure is retried
/// a few times with a short pause, since the writer may be mid-write; the last
/// error is returned if it never parses.
pub fn read_json_with_retry<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> FileResult<Option<T>> {
    let mut last_error = String::new();
    for attempt in 1..=PARSE_RETRY_ATTEMPTS {
        if !path.exists() {
            return Ok(None);
        }
        match read_json(path) {
            Ok(value) => return Ok(Some(value)),
            Err(e) => {
                log::debug!(
                    "[FileStorage] Attempt {}/{} to read {:?} failed: {}",
                    attempt,
                    PARSE_RETRY_ATTEMPTS,
                    path,
                    e
                );
                last_error = e;
            }
        }
        if attempt < PARSE_RETRY_ATTEMPTS {
            thread::sleep(PARSE_RETRY_DELAY);
        }
    }
    Err(last_error)
}

/// Write data as pretty-printed JSON atomically
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;

    atomic_write(path, &content)
}

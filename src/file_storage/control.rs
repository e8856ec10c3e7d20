// Control files the worker watches in its project directory

use super::{atomic_write, FileResult};
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Presence of this file tells the worker's message loop to exit
pub const KILL_FILE: &str = ".kill";

/// Conversation history handed to a resumed worker
pub const CONTEXT_FILE: &str = ".conversation-context.md";

pub fn kill_file_path(project_dir: &Path) -> PathBuf {
    project_dir.join(KILL_FILE)
}

pub fn write_kill_file(project_dir: &Path) -> FileResult<()> {
    atomic_write(&kill_file_path(project_dir), &Utc::now().to_rfc3339())
}

/// Remove a stale kill file so a new worker does not exit at once
pub fn clear_kill_file(project_dir: &Path) -> FileResult<bool> {
    match fs::remove_file(kill_file_path(project_dir)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(format!("Failed to remove kill file in {:?}: {}", project_dir, e)),
    }
}

pub fn context_file_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONTEXT_FILE)
}

pub fn write_context_file(project_dir: &Path, content: &str) -> FileResult<PathBuf> {
    let path = context_file_path(project_dir);
    atomic_write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_kill_file_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(clear_kill_file(temp_dir.path()), Ok(false));

        write_kill_file(temp_dir.path()).unwrap();
        assert!(kill_file_path(temp_dir.path()).exists());

        assert_eq!(clear_kill_file(temp_dir.path()), Ok(true));
        assert!(!kill_file_path(temp_dir.path()).exists());
    }

    #[test]
    fn test_write_context_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_context_file(temp_dir.path(), "USER: hi\n").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "USER: hi\n");
    }
}

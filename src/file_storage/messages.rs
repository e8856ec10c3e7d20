// Message queue file shared with the worker (.messages.json)

use super::{atomic_write, read_json_with_retry, FileResult};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub const MESSAGES_FILE: &str = ".messages.json";
const MESSAGES_LOCK_FILE: &str = ".messages.json.lock";

/// Who wrote a queued message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One entry in the message queue.
///
/// The worker marks entries processed and adds its own fields (`response`,
/// `processed_at`); those are carried in `extra` so a rewrite never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub processed: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl QueuedMessage {
    pub fn new(role: MessageRole, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            role,
            content: content.to_string(),
            processed: false,
            extra: serde_json::Map::new(),
        }
    }

    /// Worker reply, once the message has been processed
    pub fn response(&self) -> Option<&str> {
        self.extra.get("response").and_then(Value::as_str)
    }
}

pub fn messages_path(project_dir: &Path) -> PathBuf {
    project_dir.join(MESSAGES_FILE)
}

/// Load the raw queue entries. A missing file is an empty queue, and so is one
/// that still fails to parse after retries (it is set aside, never fatal).
fn load_entries(path: &Path) -> Vec<Value> {
    match read_json_with_retry::<Value>(path) {
        Ok(None) => Vec::new(),
        Ok(Some(Value::Array(entries))) => entries,
        Ok(Some(other)) => {
            log::warn!(
                "[MessageRelay] {:?} is not a JSON array ({}), treating queue as empty",
                path,
                json_kind(&other)
            );
            set_aside(path);
            Vec::new()
        }
        Err(e) => {
            log::warn!("[MessageRelay] {}; treating queue as empty", e);
            set_aside(path);
            Vec::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Keep an unreadable queue file around for inspection before it is replaced
fn set_aside(path: &Path) {
    let backup = path.with_file_name(format!(
        "{}.corrupt-{}",
        MESSAGES_FILE,
        Utc::now().format("%Y%m%d%H%M%S")
    ));
    if let Err(e) = fs::copy(path, &backup) {
        log::warn!("[MessageRelay] Could not back up {:?}: {}", path, e);
    } else {
        log::info!("[MessageRelay] Unreadable queue saved to {:?}", backup);
    }
}

/// Append a message to the queue.
///
/// Read-whole, append, write-whole-back under an exclusive lock on a sidecar
/// lock file, so concurrent appends from this process or another portal
/// instance never lose entries. The write itself is temp-file-then-rename.
pub fn append_message(
    project_dir: &Path,
    role: MessageRole,
    content: &str,
) -> FileResult<QueuedMessage> {
    if !project_dir.is_dir() {
        return Err(format!("Project directory does not exist: {:?}", project_dir));
    }

    let lock_path = project_dir.join(MESSAGES_LOCK_FILE);
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| format!("Failed to open lock file {:?}: {}", lock_path, e))?;
    lock_file
        .lock_exclusive()
        .map_err(|e| format!("Failed to lock {:?}: {}", lock_path, e))?;

    let path = messages_path(project_dir);
    let message = QueuedMessage::new(role, content);

    let result = (|| {
        let mut entries = load_entries(&path);
        let entry = serde_json::to_value(&message)
            .map_err(|e| format!("Failed to serialize message: {}", e))?;
        entries.push(entry);
        let body = serde_json::to_string_pretty(&entries)
            .map_err(|e| format!("Failed to serialize message queue: {}", e))?;
        atomic_write(&path, &body)
    })();

    if let Err(e) = FileExt::unlock(&lock_file) {
        log::warn!("[MessageRelay] Failed to unlock {:?}: {}", lock_path, e);
    }
    result?;

    log::debug!(
        "[MessageRelay] Queued message {} in {:?}",
        message.id,
        project_dir
    );
    Ok(message)
}

/// All decodable messages in queue order. Entries that do not match the
/// message shape are skipped.
pub fn read_messages(project_dir: &Path) -> Vec<QueuedMessage> {
    let path = messages_path(project_dir);
    let entries = match read_json_with_retry::<Value>(&path) {
        Ok(Some(Value::Array(entries))) => entries,
        Ok(_) => return Vec::new(),
        Err(e) => {
            log::warn!("[MessageRelay] {}", e);
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<QueuedMessage>(entry) {
            Ok(message) => Some(message),
            Err(e) => {
                log::debug!("[MessageRelay] Skipping malformed queue entry: {}", e);
                None
            }
        })
        .collect()
}

/// Messages the worker has not picked up yet
pub fn pending_messages(project_dir: &Path) -> Vec<QueuedMessage> {
    read_messages(project_dir)
        .into_iter()
        .filter(|m| !m.processed)
        .collect()
}

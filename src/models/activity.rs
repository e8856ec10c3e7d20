// Activity timeline models

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Kind of an Activity entry.
///
/// The first five kinds are produced by the orchestrator and the worker event
/// vocabulary; anything else is a free-form status event kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityAction {
    UserMessage,
    AssistantResponse,
    Thought,
    ToolCall,
    ToolResult,
    Event(String),
}

impl ActivityAction {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityAction::UserMessage => "user_message",
            ActivityAction::AssistantResponse => "assistant_response",
            ActivityAction::Thought => "thought",
            ActivityAction::ToolCall => "tool_call",
            ActivityAction::ToolResult => "tool_result",
            ActivityAction::Event(kind) => kind,
        }
    }

    pub fn event(kind: impl Into<String>) -> Self {
        ActivityAction::from(kind.into())
    }
}

impl From<String> for ActivityAction {
    fn from(s: String) -> Self {
        match s.as_str() {
            "user_message" => ActivityAction::UserMessage,
            "assistant_response" => ActivityAction::AssistantResponse,
            "thought" => ActivityAction::Thought,
            "tool_call" => ActivityAction::ToolCall,
            "tool_result" => ActivityAction::ToolResult,
            _ => ActivityAction::Event(s),
        }
    }
}

impl From<ActivityAction> for String {
    fn from(action: ActivityAction) -> Self {
        match action {
            ActivityAction::Event(kind) => kind,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only event in a Research's narrative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Insertion id, also the tie-break for equal timestamps
    pub id: i64,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: ActivityAction,
    pub description: String,
    pub metadata: serde_json::Value,
}

impl Activity {
    /// Presentation category of this entry
    pub fn category(&self) -> ActivityCategory {
        ActivityCategory::classify(&self.action, &self.description)
    }
}

/// Activity row from the cross-research feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub research_id: String,
    #[serde(flatten)]
    pub activity: Activity,
}

// ============================================================================
// Presentation categories
// ============================================================================

/// Display grouping for the activity feed.
///
/// Keyword based and lossy. Only the UI layer looks at this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    Message,
    Thought,
    Tool,
    Search,
    Crawl,
    File,
    Error,
    Complete,
    Start,
    Other,
}

static ERROR_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static COMPLETE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static START_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static SEARCH_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static CRAWL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static FILE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, text: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .map_or(false, |re| re.is_match(text))
}

fn is_error(text: &str) -> bool {
    matches(&ERROR_PATTERN, r"(?i)\b(error|fail(ed|ure)?|exception)", text)
}

fn is_complete(text: &str) -> bool {
    matches(&COMPLETE_PATTERN, r"(?i)(complet|finish|\bdone\b)", text)
}

fn is_start(text: &str) -> bool {
    matches(&START_PATTERN, r"(?i)(start|\binit|begin|launch|resum)", text)
}

fn is_search(text: &str) -> bool {
    matches(&SEARCH_PATTERN, r"(?i)(search|searx|query)", text)
}

fn is_crawl(text: &str) -> bool {
    matches(&CRAWL_PATTERN, r"(?i)(crawl|fetch|scrap|https?://)", text)
}

fn is_file(text: &str) -> bool {
    matches(&FILE_PATTERN, r"(?i)(file|write|read_|save|directory)", text)
}

impl ActivityCategory {
    pub fn classify(action: &ActivityAction, description: &str) -> Self {
        match action {
            ActivityAction::UserMessage | ActivityAction::AssistantResponse => {
                ActivityCategory::Message
            }
            ActivityAction::Thought => ActivityCategory::Thought,
            ActivityAction::ToolCall | ActivityAction::ToolResult => {
                if is_search(description) {
                    ActivityCategory::Search
                } else if is_crawl(description) {
                    ActivityCategory::Crawl
                } else if is_file(description) {
                    ActivityCategory::File
                } else {
                    ActivityCategory::Tool
                }
            }
            ActivityAction::Event(kind) => {
                let text = format!("{} {}", kind, description);
                if is_error(&text) {
                    ActivityCategory::Error
                } else if is_complete(&text) {
                    ActivityCategory::Complete
                } else if is_start(&text) {
                    ActivityCategory::Start
                } else if is_search(&text) {
                    ActivityCategory::Search
                } else if is_crawl(&text) {
                    ActivityCategory::Crawl
                } else if is_file(&text) {
                    ActivityCategory::File
                } else {
                    ActivityCategory::Other
                }
            }
        }
    }
}

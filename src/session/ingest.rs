// Worker event vocabulary
//
// The worker emits JSON objects tagged by `type`. Events the
// portal understands get a typed variant; anything else is kept as a
// free-form status event so new worker event types never break ingestion.

use crate::models::{ActivityAction, ResearchStatus};
use crate::utils::truncate_chars;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Tool output longer than this is shortened in the description
pub const MAX_RESULT_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    Thought {
        content: String,
    },
    ToolCall {
        tool: String,
        #[serde(default, alias = "arguments")]
        args: Value,
    },
    ToolResult {
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        output: Value,
    },
    AssistantResponse {
        #[serde(default)]
        message_id: Option<String>,
        response: String,
    },
    UserMessageReceived {
        #[serde(default, alias = "content")]
        message: String,
    },
    Progress {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        percentage: Option<f64>,
    },
    Log {
        message: String,
    },
    Error {
        error: String,
    },
    #[serde(alias = "research_fully_completed")]
    ResearchCompleted {
        #[serde(default)]
        status: Option<String>,
    },
    ResearchFailed {
        #[serde(default)]
        error: Option<String>,
    },
    /// Any other `type`; the whole object is kept as metadata
    #[serde(skip)]
    Other { kind: String, payload: Map<String, Value> },
}

const KNOWN_TYPES: &[&str] = &[
    "thought",
    "tool_call",
    "tool_result",
    "assistant_response",
    "user_message_received",
    "progress",
    "log",
    "error",
    "research_completed",
    "research_fully_completed",
    "research_failed",
];

/// What an event writes to the Activity log
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub action: ActivityAction,
    pub description: String,
    pub metadata: Value,
}

impl WorkerEvent {
    /// Parse one worker event object
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(mut payload) = value else {
            return Err("worker event must be a JSON object".to_string());
        };
        let kind = match payload.get("type") {
            Some(Value::String(kind)) if !kind.trim().is_empty() => kind.clone(),
            _ => return Err("worker event is missing a string 'type'".to_string()),
        };

        if KNOWN_TYPES.contains(&kind.as_str()) {
            return serde_json::from_value(Value::Object(payload))
                .map_err(|e| format!("Invalid '{}' event: {}", kind, e));
        }

        payload.remove("type");
        Ok(WorkerEvent::Other { kind, payload })
    }

    pub fn kind(&self) -> &str {
        match self {
            WorkerEvent::Thought { .. } => "thought",
            WorkerEvent::ToolCall { .. } => "tool_call",
            WorkerEvent::ToolResult { .. } => "tool_result",
            WorkerEvent::AssistantResponse { .. } => "assistant_response",
            WorkerEvent::UserMessageReceived { .. } => "user_message_received",
            WorkerEvent::Progress { .. } => "progress",
            WorkerEvent::Log { .. } => "log",
            WorkerEvent::Error { .. } => "error",
            WorkerEvent::ResearchCompleted { .. } => "research_completed",
            WorkerEvent::ResearchFailed { .. } => "research_failed",
            WorkerEvent::Other { kind, .. } => kind,
        }
    }

    /// Terminal status this event settles the Research into, with an error text
    pub fn settlement(&self) -> Option<(ResearchStatus, Option<String>)> {
        match self {
            WorkerEvent::ResearchCompleted { .. } => Some((ResearchStatus::Completed, None)),
            WorkerEvent::ResearchFailed { error } => Some((
                ResearchStatus::Failed,
                Some(error.clone().unwrap_or_else(|| "research failed".to_string())),
            )),
            _ => None,
        }
    }

    /// Activity entry for this event. `last_tool` fills in tool results that
    /// do not name their tool.
    pub fn to_activity(&self, last_tool: Option<&str>) -> ActivityRecord {
        match self {
            WorkerEvent::Thought { content } => ActivityRecord {
                action: ActivityAction::Thought,
                description: content.clone(),
                metadata: json!({}),
            },
            WorkerEvent::ToolCall { tool, args } => ActivityRecord {
                action: ActivityAction::ToolCall,
                description: format!("Calling {}", tool),
                metadata: json!({ "tool": tool, "arguments": args }),
            },
            WorkerEvent::ToolResult { tool, output } => {
                let tool = tool
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .or(last_tool)
                    .unwrap_or("unknown");
                let text = match output {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                ActivityRecord {
                    action: ActivityAction::ToolResult,
                    description: truncate_chars(&text, MAX_RESULT_DESCRIPTION_CHARS),
                    metadata: json!({ "tool": tool, "output": text }),
                }
            }
            WorkerEvent::AssistantResponse {
                message_id,
                response,
            } => ActivityRecord {
                action: ActivityAction::AssistantResponse,
                description: response.clone(),
                metadata: match message_id {
                    Some(id) => json!({ "messageId": id }),
                    None => json!({}),
                },
            },
            WorkerEvent::UserMessageReceived { message } => ActivityRecord {
                action: ActivityAction::event("user_message_received"),
                description: format!(
                    "Worker picked up message: {}",
                    truncate_chars(message, 100)
                ),
                metadata: json!({}),
            },
            WorkerEvent::Progress {
                message,
                percentage,
            } => ActivityRecord {
                action: ActivityAction::event("progress"),
                description: message.clone().unwrap_or_else(|| "Progress update".to_string()),
                metadata: match percentage {
                    Some(p) => json!({ "percentage": p }),
                    None => json!({}),
                },
            },
            WorkerEvent::Log { message } => ActivityRecord {
                action: ActivityAction::event("log"),
                description: message.clone(),
                metadata: json!({}),
            },
            WorkerEvent::Error { error } => ActivityRecord {
                action: ActivityAction::event("error"),
                description: error.clone(),
                metadata: json!({}),
            },
            WorkerEvent::ResearchCompleted { status } => ActivityRecord {
                action: ActivityAction::event("research_completed"),
                description: "Research completed".to_string(),
                metadata: match status {
                    Some(s) => json!({ "status": s }),
                    None => json!({}),
                },
            },
            WorkerEvent::ResearchFailed { error } => ActivityRecord {
                action: ActivityAction::event("research_failed"),
                description: format!(
                    "Research failed: {}",
                    error.as_deref().unwrap_or("no details")
                ),
                metadata: json!({}),
            },
            WorkerEvent::Other { kind, payload } => {
                let description = payload
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| kind.replace('_', " "));
                ActivityRecord {
                    action: ActivityAction::event(kind.clone()),
                    description,
                    metadata: Value::Object(payload.clone()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_events() {
        let event = WorkerEvent::from_value(
            json!({"type": "tool_call", "tool": "web_search", "args": {"query": "rust"}, "timestamp": "x"}),
        )
        .unwrap();
        assert_eq!(
            event,
            WorkerEvent::ToolCall {
                tool: "web_search".to_string(),
                args: json!({"query": "rust"}),
            }
        );

        let event =
            WorkerEvent::from_value(json!({"type": "research_fully_completed", "status": "success"}))
                .unwrap();
        assert_eq!(event.kind(), "research_completed");
        assert_eq!(event.settlement(), Some((ResearchStatus::Completed, None)));
    }

    #[test]
    fn test_unknown_type_is_free_form() {
        let event =
            WorkerEvent::from_value(json!({"type": "tools_loaded", "message": "Loaded 12 tools", "count": 12}))
                .unwrap();
        assert_eq!(event.kind(), "tools_loaded");

        let record = event.to_activity(None);
        assert_eq!(record.action, ActivityAction::event("tools_loaded"));
        assert_eq!(record.description, "Loaded 12 tools");
        assert_eq!(record.metadata["count"], 12);
        assert!(record.metadata.get("type").is_none());
    }

    #[test]
    fn test_rejects_bad_events() {
        assert!(WorkerEvent::from_value(json!("not an object")).is_err());
        assert!(WorkerEvent::from_value(json!([1, 2])).is_err());
        assert!(WorkerEvent::from_value(json!({"tool": "x"})).is_err());
        assert!(WorkerEvent::from_value(json!({"type": "  "})).is_err());
        // Known type with a missing required field
        assert!(WorkerEvent::from_value(json!({"type": "thought"})).is_err());
    }

    #[test]
    fn test_tool_result_inherits_last_tool() {
        let event = WorkerEvent::from_value(json!({"type": "tool_result", "output": "3 results"})).unwrap();
        let record = event.to_activity(Some("web_search"));
        assert_eq!(record.metadata["tool"], "web_search");

        let record = event.to_activity(None);
        assert_eq!(record.metadata["tool"], "unknown");
    }

    #[test]
    fn test_long_tool_result_is_truncated_in_description() {
        let output = "x".repeat(800);
        let event = WorkerEvent::ToolResult {
            tool: Some("crawl".to_string()),
            output: Value::String(output.clone()),
        };
        let record = event.to_activity(None);
        assert!(record.description.chars().count() < 800);
        assert!(record.description.ends_with("..."));
        assert_eq!(record.metadata["output"], output);
    }

    #[test]
    fn test_research_failed_settlement() {
        let event =
            WorkerEvent::from_value(json!({"type": "research_failed", "error": "rate limited"})).unwrap();
        assert_eq!(
            event.settlement(),
            Some((ResearchStatus::Failed, Some("rate limited".to_string())))
        );
    }
}

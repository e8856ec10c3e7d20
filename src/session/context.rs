// Conversation context handed to a resumed worker

use crate::file_storage::messages::{MessageRole, QueuedMessage};
use crate::models::{Activity, ActivityAction, Research};
use std::collections::HashSet;

/// Render the conversation so far as markdown.
///
/// The Activity log is the primary source. Messages still waiting in the
/// queue are left out because the worker will read them from the queue
/// itself. A Research with no mirrored messages (older rows, or a worker that
/// only answered through the queue) falls back to the processed queue entries.
pub fn build_conversation_context(
    research: &Research,
    activities: &[Activity],
    queue: &[QueuedMessage],
) -> String {
    let pending: HashSet<&str> = queue
        .iter()
        .filter(|m| !m.processed)
        .map(|m| m.id.as_str())
        .collect();

    let mut turns: Vec<(&str, &str)> = activities
        .iter()
        .filter(|a| {
            let message_id = a.metadata.get("messageId").and_then(|v| v.as_str());
            !message_id.is_some_and(|id| pending.contains(id))
        })
        .filter_map(|a| match a.action {
            ActivityAction::UserMessage => Some(("USER", a.description.as_str())),
            ActivityAction::AssistantResponse => Some(("ASSISTANT", a.description.as_str())),
            _ => None,
        })
        .collect();

    if turns.is_empty() {
        for message in queue.iter().filter(|m| m.processed) {
            let role = match message.role {
                MessageRole::User => "USER",
                MessageRole::Assistant => "ASSISTANT",
                MessageRole::System => "SYSTEM",
            };
            turns.push((role, message.content.as_str()));
            if let Some(response) = message.response() {
                turns.push(("ASSISTANT", response));
            }
        }
    }

    let mut out = format!("# Conversation context\n\nResearch topic: {}\n", research.topic);
    if turns.is_empty() {
        out.push_str("\nNo previous conversation.\n");
        return out;
    }
    for (role, text) in turns {
        out.push_str(&format!("\n## {}\n\n{}\n", role, text.trim_end()));
    }
    out
}

//! Research command routing
//!
//! Handles: start_research, resume_research, stop_research, get_research_state,
//! list_researches, append_message, ingest_worker_event, get_recent_activities

use crate::models::ResearchStatus;
use crate::session::{StartParams, WorkerEvent};
use serde_json::{json, Value};

use super::{get_arg, get_opt_arg, with_orchestrator, RouteError, RouteResult, ServerAppState};

const DEFAULT_RECENT_LIMIT: usize = 50;

const RESEARCH_COMMANDS: &[&str] = &[
    "start_research",
    "resume_research",
    "stop_research",
    "get_research_state",
    "list_researches",
    "append_message",
    "ingest_worker_event",
    "get_recent_activities",
];

pub fn is_research_command(cmd: &str) -> bool {
    RESEARCH_COMMANDS.contains(&cmd)
}

/// Route research-related commands
pub async fn route_research_command(cmd: &str, args: Value, state: &ServerAppState) -> RouteResult {
    match cmd {
        "start_research" => {
            let params: StartParams = serde_json::from_value(args)
                .map_err(|e| RouteError::bad_request(format!("Invalid start parameters: {}", e)))?;
            let research_id =
                with_orchestrator(state, move |o| o.start(params)).await?;
            Ok(json!({ "researchId": research_id }))
        }

        "resume_research" => {
            let research_id: String = get_arg(&args, "researchId")?;
            with_orchestrator(state, move |o| o.resume(&research_id)).await
        }

        "stop_research" => {
            let research_id: String = get_arg(&args, "researchId")?;
            let outcome = match get_opt_arg::<String>(&args, "outcome")? {
                Some(raw) => raw.parse::<ResearchStatus>()?,
                None => ResearchStatus::Completed,
            };
            let status = with_orchestrator(state, move |o| o.stop(&research_id, outcome)).await?;
            Ok(json!({ "status": status }))
        }

        "get_research_state" => {
            let research_id: String = get_arg(&args, "researchId")?;
            with_orchestrator(state, move |o| o.get_state(&research_id)).await
        }

        "list_researches" => with_orchestrator(state, |o| o.list_all()).await,

        "append_message" => {
            let research_id: String = get_arg(&args, "researchId")?;
            let content: String = get_arg(&args, "content")?;
            with_orchestrator(state, move |o| o.append_message(&research_id, &content)).await
        }

        "ingest_worker_event" => {
            let research_id: String = get_arg(&args, "researchId")?;
            let raw: Value = get_arg(&args, "event")?;
            let event = WorkerEvent::from_value(raw)?;
            with_orchestrator(state, move |o| o.ingest_event(&research_id, event)).await
        }

        "get_recent_activities" => {
            let limit: usize = get_opt_arg(&args, "limit")?.unwrap_or(DEFAULT_RECENT_LIMIT);
            with_orchestrator(state, move |o| o.recent_activities(limit)).await
        }

        _ => Err(RouteError::bad_request(format!(
            "Unknown research command: {}",
            cmd
        ))),
    }
}

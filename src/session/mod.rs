//! Research session orchestration
//!
//! [`Orchestrator`] owns the Research lifecycle:
//!
//! ```text
//! pending ──spawn ok──▶ in_progress ──stop / exit / report──▶ completed | failed
//!    │                       ▲                                      │
//!    └──spawn failed──▶ failed└──────────── resume ─────────────────┘
//! ```
//!
//! Liveness comes from the in-memory process registry only. A Research
//! recorded as in_progress with no tracked worker (after a portal restart, for
//! instance) counts as idle and is resumed by the next message.
//!
//! Worker events reach the Activity log two ways: the worker's own journal
//! file, synced while it runs and once more when it exits, and explicit
//! [`Orchestrator::ingest_event`] calls.

mod context;
mod error;
pub mod ingest;
mod locks;
mod orchestrator;

pub use error::{OrchestratorError, OrchestratorResult};
pub use ingest::WorkerEvent;
pub use orchestrator::{
    AgentTimeline, MessageOutcome, Orchestrator, OrchestratorSettings, ResearchList,
    ResearchState, ResearchStats, StartParams, JOURNAL_ID_KEY, STOPPED_BY_USER,
    WORKER_EXITED_EARLY, WORKER_LOST,
};

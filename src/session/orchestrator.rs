// Research session orchestrator
//
// Composes the record store, the worker supervisor and the file channels into
// the session state machine. Every call is synchronous; the HTTP layer runs
// them on the blocking pool.

use super::context::build_conversation_context;
use super::error::{OrchestratorError, OrchestratorResult};
use super::ingest::WorkerEvent;
use super::locks::KeyedLocks;
use crate::agents::{
    Liveness, ProcessRegistry, Supervisor, WorkerExitEvent, WorkerLaunch, WorkerLauncher,
};
use crate::config::{providers, PortalConfig};
use crate::database::{ResearchRepository, StoreCounts};
use crate::file_storage::activities::read_journal;
use crate::file_storage::control;
use crate::file_storage::messages::{self, MessageRole};
use crate::file_storage::progress::{read_progress, Progress};
use crate::file_storage::settings::{read_settings, write_settings, LaunchSettings};
use crate::file_storage::ensure_dir;
use crate::models::state_machine::{can_transition, is_resumable, transition_state};
use crate::models::{
    Activity, ActivityAction, Agent, AgentStatus, RecentActivity, Research, ResearchDepth,
    ResearchStatus, ResearchStyle,
};
use crate::utils::{as_path, lock_mutex_recover, slugify};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Error recorded on an Agent whose worker went away without reporting
pub const WORKER_EXITED_EARLY: &str = "worker exited before reporting completion";

/// Error recorded on an Agent found running with no worker behind it
pub const WORKER_LOST: &str = "worker no longer running";

pub const STOPPED_BY_USER: &str = "stopped by user";

/// Upper bound for the recent activity feed
pub const MAX_RECENT_ACTIVITIES: usize = 500;

const SLUG_MAX_LEN: usize = 50;

/// Activity metadata key holding the worker's journal entry id
pub const JOURNAL_ID_KEY: &str = "journalId";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Parent of generated project directories and of manual Researches
    pub projects_root: PathBuf,
    pub default_provider: String,
    pub default_model: Option<String>,
    /// API keys indexed by provider ID
    pub api_keys: HashMap<String, String>,
    pub poll_interval: Duration,
}

impl OrchestratorSettings {
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
            default_provider: providers::DEFAULT_PROVIDER.to_string(),
            default_model: None,
            api_keys: HashMap::new(),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn from_config(config: &PortalConfig) -> Self {
        Self {
            projects_root: config.storage.projects_root(),
            default_provider: config.worker.default_provider.clone(),
            default_model: config.worker.default_model.clone(),
            api_keys: config.api_keys.clone(),
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
        }
    }

    fn model_for(&self, provider: &str) -> String {
        match &self.default_model {
            Some(model) if provider == self.default_provider => model.clone(),
            _ => providers::default_model(provider).to_string(),
        }
    }
}

/// Parameters of a new Research
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    pub topic: String,
    /// Explicit output directory; generated under the projects root if absent
    #[serde(default)]
    pub project_dir: Option<PathBuf>,
    #[serde(default)]
    pub depth: ResearchDepth,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub style: ResearchStyle,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "apiKey")]
    pub credentials: Option<String>,
}

impl StartParams {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }
}

/// One Agent with its activity timeline
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTimeline {
    #[serde(flatten)]
    pub agent: Agent,
    pub activities: Vec<Activity>,
}

/// Everything the dashboard polls for one Research
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchState {
    pub research: Research,
    pub agents: Vec<AgentTimeline>,
    pub progress: Option<Progress>,
    /// Reported progress clamped to 0..=100
    pub percent_complete: f64,
    /// A live worker is tracked for this Research
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchStats {
    pub total_researches: u64,
    pub pending_researches: u64,
    pub active_researches: u64,
    pub completed_researches: u64,
    pub failed_researches: u64,
    pub total_agents: u64,
    pub running_agents: u64,
    /// Counts completed Researches, not completed Agents. Dashboards have
    /// always shown this number, so it is kept as is.
    pub completed_agents: u64,
    pub total_activities: u64,
    /// Workers tracked by this portal process
    pub live_workers: u64,
}

impl ResearchStats {
    fn from_counts(counts: &StoreCounts, live_workers: usize) -> Self {
        Self {
            total_researches: counts.total_researches(),
            pending_researches: counts.pending_researches,
            active_researches: counts.in_progress_researches,
            completed_researches: counts.completed_researches,
            failed_researches: counts.failed_researches,
            total_agents: counts.total_agents,
            running_agents: counts.running_agents,
            completed_agents: counts.completed_researches,
            total_activities: counts.total_activities,
            live_workers: live_workers as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchList {
    pub researches: Vec<Research>,
    pub stats: ResearchStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOutcome {
    /// The message was mirrored into the Activity log
    pub logged: bool,
    /// Delivering the message started a new worker
    pub resumed: bool,
}

pub struct Orchestrator {
    store: Arc<dyn ResearchRepository>,
    supervisor: Supervisor,
    locks: KeyedLocks,
    settings: OrchestratorSettings,
    exit_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerExitEvent>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ResearchRepository>,
        launcher: Arc<dyn WorkerLauncher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self::with_registry(store, launcher, Arc::new(ProcessRegistry::new()), settings)
    }

    pub fn with_registry(
        store: Arc<dyn ResearchRepository>,
        launcher: Arc<dyn WorkerLauncher>,
        registry: Arc<ProcessRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        let mut supervisor = Supervisor::new(launcher, registry, settings.poll_interval);
        let (tx, rx) = mpsc::unbounded_channel();
        supervisor.set_exit_sender(tx);

        Self {
            store,
            supervisor,
            locks: KeyedLocks::new(),
            settings,
            exit_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Take the worker exit stream. Returns `None` after the first call.
    pub fn take_exit_events(&self) -> Option<mpsc::UnboundedReceiver<WorkerExitEvent>> {
        lock_mutex_recover(&self.exit_rx).take()
    }

    /// Settle worker exits as they arrive, until the channel closes
    pub async fn forward_exit_events(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<WorkerExitEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            let orchestrator = self.clone();
            let research_id = event.research_id.clone();
            match tokio::task::spawn_blocking(move || orchestrator.handle_worker_exit(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!(
                    "[Orchestrator] Failed to settle worker exit for research {}: {}",
                    research_id,
                    e
                ),
                Err(e) => log::error!("[Orchestrator] Exit handler panicked: {}", e),
            }
        }
        log::debug!("[Orchestrator] Exit event stream closed");
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a Research and launch its first worker. Returns the research ID.
    ///
    /// The Research is recorded as pending before the launch and only moves
    /// to in_progress once the worker is confirmed running. A failed launch
    /// leaves it failed.
    pub fn start(&self, params: StartParams) -> OrchestratorResult<String> {
        let topic = params.topic.trim();
        if topic.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "topic must not be empty".to_string(),
            ));
        }

        let provider = params
            .provider
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_provider.clone());
        let model = params
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.settings.model_for(&provider));

        let requested_dir = match &params.project_dir {
            Some(dir) => dir.clone(),
            None => self.settings.projects_root.join(format!(
                "{}-{}",
                slugify(topic, SLUG_MAX_LEN),
                short_id()
            )),
        };
        ensure_dir(&requested_dir).map_err(OrchestratorError::Io)?;
        // One spelling per directory, so the uniqueness check sees through
        // `.`, `..`, trailing separators and symlinks
        let project_dir = canonical_dir(&requested_dir)?;
        let project_dir_str = project_dir.to_string_lossy().to_string();

        if let Some(existing) = self.store.get_research_by_project_dir(&project_dir_str)? {
            return Err(OrchestratorError::Conflict {
                project_dir: project_dir_str,
                existing: existing.id,
            });
        }

        let research = self.store.create_research(topic, &project_dir_str, 0)?;
        log::info!(
            "[Orchestrator] Created research {} for '{}' in {}",
            research.id,
            topic,
            research.project_dir
        );

        let launch_settings = LaunchSettings {
            depth: params.depth,
            style: params.style,
            focus: params.focus.clone().filter(|f| !f.trim().is_empty()),
            provider,
            model,
        };
        if let Err(e) = write_settings(&project_dir, &launch_settings) {
            log::warn!("[Orchestrator] Could not save launch settings: {}", e);
        }

        let credentials = params
            .credentials
            .clone()
            .filter(|c| !c.is_empty())
            .or_else(|| self.credentials_for(&launch_settings.provider));

        let lock = self.locks.get(&research.id);
        let _guard = lock_mutex_recover(&lock);

        match self.spawn_worker(&research, &launch_settings, credentials, false, None) {
            Ok(agent) => {
                if let Err(e) = self.mirror_early_messages(&research, &agent) {
                    log::warn!(
                        "[Orchestrator] Could not log early messages for research {}: {}",
                        research.id,
                        e
                    );
                }
                Ok(research.id)
            }
            Err(e) => {
                self.fail_after_spawn_error(&research.id, &e);
                Err(e)
            }
        }
    }

    /// Log user messages queued while the Research was still pending and had
    /// no Agent to record them on. Caller holds the research lock.
    fn mirror_early_messages(&self, research: &Research, agent: &Agent) -> OrchestratorResult<()> {
        let since = research.created_at.timestamp_millis();
        for message in messages::pending_messages(as_path(&research.project_dir))
            .into_iter()
            .filter(|m| m.role == MessageRole::User && m.timestamp >= since)
        {
            self.store.log_activity(
                &agent.id,
                &ActivityAction::UserMessage,
                &message.content,
                json!({ "messageId": message.id }),
            )?;
        }
        Ok(())
    }

    /// Launch a new worker for an existing Research in its project directory
    pub fn resume(&self, research_id: &str) -> OrchestratorResult<Agent> {
        let lock = self.locks.get(research_id);
        let _guard = lock_mutex_recover(&lock);
        self.resume_locked(research_id)
    }

    fn resume_locked(&self, research_id: &str) -> OrchestratorResult<Agent> {
        let research = self.require_research(research_id)?;
        if !is_resumable(research.status) {
            return Err(OrchestratorError::InvalidState(format!(
                "Research {} is {} and cannot be resumed",
                research_id, research.status
            )));
        }

        match self.supervisor.poll(research_id) {
            Liveness::Running { agent_id } => {
                return Err(OrchestratorError::InvalidState(format!(
                    "Research {} already has a live worker (agent {})",
                    research_id, agent_id
                )));
            }
            Liveness::Exited {
                agent_id,
                exit_code,
            } => {
                self.settle_exit_locked(&WorkerExitEvent {
                    research_id: research_id.to_string(),
                    agent_id,
                    exit_code,
                })?;
            }
            Liveness::Idle => {}
        }

        // Entries left by the previous worker belong to its Agent
        self.sync_journal_or_warn(research_id);

        // Settlement above may have changed the status
        let research = self.require_research(research_id)?;

        for agent in self
            .store
            .get_research_agents(research_id)?
            .iter()
            .filter(|a| !a.status.is_terminal())
        {
            log::warn!(
                "[Orchestrator] Agent {} of research {} is recorded {} with no worker, marking failed",
                agent.id,
                research_id,
                agent.status
            );
            self.store
                .update_agent_status(&agent.id, AgentStatus::Failed, None, Some(WORKER_LOST))?;
        }

        let project_dir = PathBuf::from(&research.project_dir);
        if !project_dir.is_dir() {
            return Err(OrchestratorError::Io(format!(
                "Project directory does not exist: {}",
                research.project_dir
            )));
        }

        if control::clear_kill_file(&project_dir).map_err(OrchestratorError::Io)? {
            log::info!(
                "[Orchestrator] Cleared stale kill file for research {}",
                research_id
            );
        }

        let activities = self.store.get_research_activities(research_id)?;
        let queue = messages::read_messages(&project_dir);
        let context = build_conversation_context(&research, &activities, &queue);
        let context_file =
            control::write_context_file(&project_dir, &context).map_err(OrchestratorError::Io)?;

        let launch_settings = read_settings(&project_dir).unwrap_or_else(|| {
            log::warn!(
                "[Orchestrator] No launch settings for research {}, using defaults",
                research_id
            );
            self.default_launch_settings()
        });
        let credentials = self.credentials_for(&launch_settings.provider);

        match self.spawn_worker(
            &research,
            &launch_settings,
            credentials,
            true,
            Some(context_file),
        ) {
            Ok(agent) => Ok(agent),
            Err(e) => {
                self.fail_after_spawn_error(research_id, &e);
                Err(e)
            }
        }
    }

    /// Stop a Research, recording `outcome` (completed or failed) as its
    /// final status. Stopping a Research that already finished kills any
    /// leftover worker and returns the status it has.
    pub fn stop(&self, research_id: &str, outcome: ResearchStatus) -> OrchestratorResult<ResearchStatus> {
        if !outcome.is_terminal() {
            return Err(OrchestratorError::InvalidInput(format!(
                "stop outcome must be completed or failed, got {}",
                outcome
            )));
        }

        let lock = self.locks.get(research_id);
        let _guard = lock_mutex_recover(&lock);

        let research = self.require_research(research_id)?;
        if research.status == ResearchStatus::Pending {
            return Err(OrchestratorError::InvalidState(format!(
                "Research {} has not started yet",
                research_id
            )));
        }

        let killed = self.supervisor.stop(research_id);
        if killed.is_none() {
            log::info!(
                "[Orchestrator] No live worker for research {}, recording stop only",
                research_id
            );
        }
        self.sync_journal_or_warn(research_id);
        // The journal may have settled it
        let research = self.require_research(research_id)?;

        let project_dir = as_path(&research.project_dir);
        if project_dir.is_dir() {
            if let Err(e) = control::write_kill_file(project_dir) {
                log::warn!("[Orchestrator] Could not write kill file: {}", e);
            }
        }

        if research.status.is_terminal() {
            log::info!(
                "[Orchestrator] Research {} is already {}",
                research_id,
                research.status
            );
            return Ok(research.status);
        }

        let agent_status = match outcome {
            ResearchStatus::Completed => AgentStatus::Completed,
            _ => AgentStatus::Failed,
        };
        let error = (outcome == ResearchStatus::Failed).then_some(STOPPED_BY_USER);

        let agents = self.store.get_research_agents(research_id)?;
        for agent in agents.iter().filter(|a| !a.status.is_terminal()) {
            self.store
                .update_agent_status(&agent.id, agent_status, None, error)?;
        }

        self.set_research_status(&research, outcome)?;

        if let Some(latest) = agents.last() {
            self.store.log_activity(
                &latest.id,
                &ActivityAction::event("stopped"),
                &format!("Research stopped ({})", outcome),
                json!({ "outcome": outcome.as_str() }),
            )?;
        }

        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_state(&self, research_id: &str) -> OrchestratorResult<ResearchState> {
        self.require_research(research_id)?;

        let active = match self.supervisor.poll(research_id) {
            Liveness::Running { .. } => true,
            Liveness::Exited {
                agent_id,
                exit_code,
            } => {
                self.handle_worker_exit(&WorkerExitEvent {
                    research_id: research_id.to_string(),
                    agent_id,
                    exit_code,
                })?;
                false
            }
            Liveness::Idle => false,
        };
        if active {
            let lock = self.locks.get(research_id);
            let _guard = lock_mutex_recover(&lock);
            self.sync_journal_or_warn(research_id);
        }

        let research = self.require_research(research_id)?;
        let agents = self
            .store
            .get_research_agents(research_id)?
            .into_iter()
            .map(|agent| -> OrchestratorResult<AgentTimeline> {
                let activities = self.store.get_agent_activities(&agent.id)?;
                Ok(AgentTimeline { agent, activities })
            })
            .collect::<OrchestratorResult<Vec<_>>>()?;
        let progress = read_progress(as_path(&research.project_dir));
        let percent_complete = progress
            .as_ref()
            .map(Progress::percent_complete)
            .unwrap_or(0.0);

        Ok(ResearchState {
            research,
            agents,
            progress,
            percent_complete,
            active,
        })
    }

    pub fn list_all(&self) -> OrchestratorResult<ResearchList> {
        let researches = self.store.get_all_researches()?;
        let counts = self.store.aggregate_counts()?;
        Ok(ResearchList {
            researches,
            stats: ResearchStats::from_counts(&counts, self.supervisor.registry().len()),
        })
    }

    pub fn recent_activities(&self, limit: usize) -> OrchestratorResult<Vec<RecentActivity>> {
        Ok(self
            .store
            .get_recent_activities(limit.min(MAX_RECENT_ACTIVITIES))?)
    }

    /// Whether a live worker is tracked for the Research
    pub fn is_active(&self, research_id: &str) -> bool {
        matches!(self.supervisor.poll(research_id), Liveness::Running { .. })
    }

    /// Researches with a tracked worker
    pub fn live_research_ids(&self) -> Vec<String> {
        self.supervisor.registry().research_ids()
    }

    // ------------------------------------------------------------------
    // Messages and worker events
    // ------------------------------------------------------------------

    /// Deliver a user message, resuming the Research if no worker is live.
    ///
    /// The message is queued before any resume so the new worker finds it.
    /// A Research with no store row is treated as a manual project under the
    /// projects root and only gets the queue file.
    pub fn append_message(&self, research_id: &str, content: &str) -> OrchestratorResult<MessageOutcome> {
        if content.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }

        let lock = self.locks.get(research_id);
        let _guard = lock_mutex_recover(&lock);

        let Some(research) = self.store.get_research(research_id)? else {
            return self.append_manual_message(research_id, content);
        };

        let project_dir = as_path(&research.project_dir);
        let message = messages::append_message(project_dir, MessageRole::User, content)
            .map_err(OrchestratorError::Io)?;
        let metadata = json!({ "messageId": message.id });

        let latest = self.store.get_research_agents(research_id)?.pop();
        let mut logged = false;
        if let Some(agent) = &latest {
            self.store.log_activity(
                &agent.id,
                &ActivityAction::UserMessage,
                content,
                metadata.clone(),
            )?;
            logged = true;
        }

        match self.supervisor.poll(research_id) {
            Liveness::Running { .. } => {
                log::debug!(
                    "[Orchestrator] Message for research {} queued for live worker",
                    research_id
                );
                // A worker that reported completion keeps listening for messages
                if research.status.is_terminal() {
                    self.set_research_status(&research, ResearchStatus::InProgress)?;
                }
                return Ok(MessageOutcome {
                    logged,
                    resumed: false,
                });
            }
            Liveness::Exited {
                agent_id,
                exit_code,
            } => {
                self.settle_exit_locked(&WorkerExitEvent {
                    research_id: research_id.to_string(),
                    agent_id,
                    exit_code,
                })?;
            }
            Liveness::Idle => {}
        }

        if research.status == ResearchStatus::Pending {
            // Still launching; the worker finds the message in its queue and
            // start() logs it once the Agent exists
            return Ok(MessageOutcome {
                logged,
                resumed: false,
            });
        }

        log::info!(
            "[Orchestrator] Research {} is idle, resuming to deliver message",
            research_id
        );
        let agent = self.resume_locked(research_id)?;
        if !logged {
            self.store
                .log_activity(&agent.id, &ActivityAction::UserMessage, content, metadata)?;
            logged = true;
        }

        Ok(MessageOutcome {
            logged,
            resumed: true,
        })
    }

    fn append_manual_message(&self, research_id: &str, content: &str) -> OrchestratorResult<MessageOutcome> {
        if research_id.is_empty()
            || research_id.contains(['/', '\\'])
            || research_id == "."
            || research_id == ".."
        {
            return Err(OrchestratorError::InvalidInput(format!(
                "Invalid research id: {}",
                research_id
            )));
        }

        let project_dir = self.settings.projects_root.join(research_id);
        if !project_dir.is_dir() {
            return Err(OrchestratorError::not_found("Research", research_id));
        }

        messages::append_message(&project_dir, MessageRole::User, content)
            .map_err(OrchestratorError::Io)?;
        log::info!(
            "[Orchestrator] Queued message for manual research in {:?}",
            project_dir
        );
        Ok(MessageOutcome {
            logged: false,
            resumed: false,
        })
    }

    /// Record a worker event on the Research's current Agent.
    ///
    /// Completion and failure events settle the Agent and the Research the
    /// same way an exit would.
    pub fn ingest_event(&self, research_id: &str, event: WorkerEvent) -> OrchestratorResult<Activity> {
        let lock = self.locks.get(research_id);
        let _guard = lock_mutex_recover(&lock);
        self.ingest_event_locked(research_id, &event, None)
    }

    /// Ingest journal entries the worker wrote since the last sync. Returns
    /// how many new Activities were recorded.
    pub fn sync_worker_activities(&self, research_id: &str) -> OrchestratorResult<usize> {
        let lock = self.locks.get(research_id);
        let _guard = lock_mutex_recover(&lock);
        self.sync_worker_activities_locked(research_id)
    }

    fn sync_worker_activities_locked(&self, research_id: &str) -> OrchestratorResult<usize> {
        let research = self.require_research(research_id)?;
        let entries = read_journal(as_path(&research.project_dir));
        if entries.is_empty() || research.total_agents == 0 {
            return Ok(0);
        }

        let seen: HashSet<String> = self
            .store
            .get_research_activities(research_id)?
            .iter()
            .filter_map(|a| a.metadata.get(JOURNAL_ID_KEY).and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        let mut ingested = 0;
        for entry in entries.into_iter().filter(|e| !seen.contains(&e.id)) {
            match WorkerEvent::from_value(entry.event) {
                Ok(event) => {
                    self.ingest_event_locked(research_id, &event, Some(&entry.id))?;
                    ingested += 1;
                }
                Err(e) => log::debug!(
                    "[Orchestrator] Skipping journal entry {} of research {}: {}",
                    entry.id,
                    research_id,
                    e
                ),
            }
        }

        if ingested > 0 {
            log::debug!(
                "[Orchestrator] Ingested {} journal entries for research {}",
                ingested,
                research_id
            );
        }
        Ok(ingested)
    }

    /// Sync the journals of all live workers every `period`. Runs until the
    /// runtime shuts down.
    pub async fn sync_live_journals(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let orchestrator = self.clone();
            let result = tokio::task::spawn_blocking(move || {
                for research_id in orchestrator.live_research_ids() {
                    if let Err(e) = orchestrator.sync_worker_activities(&research_id) {
                        log::warn!(
                            "[Orchestrator] Journal sync failed for research {}: {}",
                            research_id,
                            e
                        );
                    }
                }
            })
            .await;
            if let Err(e) = result {
                log::error!("[Orchestrator] Journal sync panicked: {}", e);
            }
        }
    }

    fn ingest_event_locked(
        &self,
        research_id: &str,
        event: &WorkerEvent,
        journal_id: Option<&str>,
    ) -> OrchestratorResult<Activity> {
        let research = self.require_research(research_id)?;
        let agent = self
            .store
            .get_research_agents(research_id)?
            .pop()
            .ok_or_else(|| {
                OrchestratorError::InvalidState(format!(
                    "Research {} has no agent to record events on",
                    research_id
                ))
            })?;

        let last_tool = match event {
            WorkerEvent::ToolResult { tool: None, .. } => self.last_tool_called(&agent.id)?,
            _ => None,
        };
        let record = event.to_activity(last_tool.as_deref());
        let mut metadata = record.metadata;
        if let (Some(id), Value::Object(map)) = (journal_id, &mut metadata) {
            map.insert(JOURNAL_ID_KEY.to_string(), json!(id));
        }
        let activity =
            self.store
                .log_activity(&agent.id, &record.action, &record.description, metadata)?;

        if let Some((status, error)) = event.settlement() {
            self.settle_from_event(&research, &agent, status, error.as_deref())?;
        }

        Ok(activity)
    }

    /// Journal sync that never fails the caller. Caller holds the research lock.
    fn sync_journal_or_warn(&self, research_id: &str) {
        if let Err(e) = self.sync_worker_activities_locked(research_id) {
            log::warn!(
                "[Orchestrator] Journal sync failed for research {}: {}",
                research_id,
                e
            );
        }
    }

    fn last_tool_called(&self, agent_id: &str) -> OrchestratorResult<Option<String>> {
        Ok(self
            .store
            .get_agent_activities(agent_id)?
            .iter()
            .rev()
            .find(|a| a.action == ActivityAction::ToolCall)
            .and_then(|a| a.metadata.get("tool"))
            .and_then(|t| t.as_str())
            .map(str::to_string))
    }

    fn settle_from_event(
        &self,
        research: &Research,
        agent: &Agent,
        status: ResearchStatus,
        error: Option<&str>,
    ) -> OrchestratorResult<()> {
        let agent_status = match status {
            ResearchStatus::Completed => AgentStatus::Completed,
            _ => AgentStatus::Failed,
        };
        if !agent.status.is_terminal() {
            self.store
                .update_agent_status(&agent.id, agent_status, None, error)?;
        }

        if can_transition(research.status, status) {
            self.set_research_status(research, status)?;
        } else {
            log::warn!(
                "[Orchestrator] Ignoring {} report for research {} in state {}",
                status,
                research.id,
                research.status
            );
        }
        Ok(())
    }

    /// Settle an Agent whose worker exited on its own
    pub fn handle_worker_exit(&self, event: &WorkerExitEvent) -> OrchestratorResult<()> {
        let lock = self.locks.get(&event.research_id);
        let _guard = lock_mutex_recover(&lock);
        self.settle_exit_locked(event)
    }

    fn settle_exit_locked(&self, event: &WorkerExitEvent) -> OrchestratorResult<()> {
        log::info!(
            "[Orchestrator] Worker for research {} (agent {}) exited with code {:?}",
            event.research_id,
            event.agent_id,
            event.exit_code
        );

        // Pick up whatever the worker wrote before it went away
        self.sync_journal_or_warn(&event.research_id);

        let Some(agent) = self.store.get_agent(&event.agent_id)? else {
            log::warn!(
                "[Orchestrator] Exit for unknown agent {}",
                event.agent_id
            );
            return Ok(());
        };

        let outcome = match agent.status {
            AgentStatus::Running => {
                self.store.update_agent_status(
                    &agent.id,
                    AgentStatus::Failed,
                    None,
                    Some(WORKER_EXITED_EARLY),
                )?;
                ResearchStatus::Failed
            }
            // Reported completion earlier, then kept answering messages
            AgentStatus::Completed => ResearchStatus::Completed,
            AgentStatus::Failed => ResearchStatus::Failed,
            AgentStatus::Pending => {
                log::debug!("[Orchestrator] Agent {} exited while pending", agent.id);
                return Ok(());
            }
        };

        let research = self.require_research(&event.research_id)?;
        let latest = self.store.get_research_agents(&research.id)?.pop();
        if latest.is_some_and(|a| a.id == agent.id) && research.status == ResearchStatus::InProgress {
            self.set_research_status(&research, outcome)?;
        }
        Ok(())
    }

    /// Log Researches recorded in_progress with no live worker. Their status
    /// is left alone; the next message or resume picks them up.
    pub fn reconcile_on_startup(&self) -> OrchestratorResult<Vec<String>> {
        let orphaned: Vec<String> = self
            .store
            .get_all_researches()?
            .into_iter()
            .filter(|r| r.status == ResearchStatus::InProgress)
            .filter(|r| !self.supervisor.registry().contains(&r.id))
            .map(|r| r.id)
            .collect();

        for id in &orphaned {
            log::warn!(
                "[Orchestrator] Research {} is recorded in_progress but has no live worker",
                id
            );
        }
        if !orphaned.is_empty() {
            log::info!(
                "[Orchestrator] {} research(es) will resume on their next message",
                orphaned.len()
            );
        }
        Ok(orphaned)
    }

    /// Stop watching workers. They keep running and are not killed.
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn require_research(&self, research_id: &str) -> OrchestratorResult<Research> {
        self.store
            .get_research(research_id)?
            .ok_or_else(|| OrchestratorError::not_found("Research", research_id))
    }

    fn credentials_for(&self, provider: &str) -> Option<String> {
        self.settings
            .api_keys
            .get(provider)
            .filter(|k| !k.is_empty())
            .cloned()
    }

    fn default_launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            depth: ResearchDepth::default(),
            style: ResearchStyle::default(),
            focus: None,
            provider: self.settings.default_provider.clone(),
            model: self.settings.model_for(&self.settings.default_provider),
        }
    }

    fn set_research_status(&self, research: &Research, target: ResearchStatus) -> OrchestratorResult<()> {
        let next = transition_state(research.status, target)?;
        if next == research.status {
            return Ok(());
        }
        let completed_at = next.is_terminal().then(Utc::now);
        self.store
            .update_research_status(&research.id, next, completed_at)?;
        log::info!(
            "[Orchestrator] Research {}: {} -> {}",
            research.id,
            research.status,
            next
        );
        Ok(())
    }

    /// Launch, record and track one worker. Caller holds the research lock.
    fn spawn_worker(
        &self,
        research: &Research,
        launch_settings: &LaunchSettings,
        credentials: Option<String>,
        resume: bool,
        context_file: Option<PathBuf>,
    ) -> OrchestratorResult<Agent> {
        let launch = WorkerLaunch {
            research_id: research.id.clone(),
            project_dir: PathBuf::from(&research.project_dir),
            topic: research.topic.clone(),
            depth: launch_settings.depth,
            focus: launch_settings.focus.clone(),
            style: launch_settings.style,
            provider: launch_settings.provider.clone(),
            model: launch_settings.model.clone(),
            credentials,
            resume,
            context_file,
        };

        let mut process = self.supervisor.launch(&launch).map_err(|e| {
            log::error!(
                "[Orchestrator] Worker launch for research {} failed: {:#}",
                research.id,
                e
            );
            OrchestratorError::SpawnFailure(format!("{:#}", e))
        })?;
        let pid = process.pid();

        let name = format!("Research Agent #{}", research.total_agents + 1);
        let agent = match self.store.create_agent(&research.id, &name) {
            Ok(agent) => agent,
            Err(e) => {
                if let Err(kill_err) = process.kill() {
                    log::warn!(
                        "[Orchestrator] Failed to kill unrecorded worker: {}",
                        kill_err
                    );
                }
                return Err(e.into());
            }
        };

        self.supervisor.track(&research.id, &agent.id, process);
        let agent = self
            .store
            .update_agent_status(&agent.id, AgentStatus::Running, None, None)?;

        let current = self.require_research(&research.id)?;
        self.set_research_status(&current, ResearchStatus::InProgress)?;

        let (kind, description) = if resume {
            ("resume", "Worker resumed with conversation context".to_string())
        } else {
            ("start", format!("Research started: {}", research.topic))
        };
        self.store.log_activity(
            &agent.id,
            &ActivityAction::event(kind),
            &description,
            json!({
                "pid": pid,
                "provider": launch.provider,
                "model": launch.model,
                "depth": launch.depth.as_str(),
                "style": launch.style.as_str(),
            }),
        )?;

        Ok(agent)
    }

    fn fail_after_spawn_error(&self, research_id: &str, error: &OrchestratorError) {
        let research = match self.store.get_research(research_id) {
            Ok(Some(research)) => research,
            Ok(None) => return,
            Err(e) => {
                log::error!(
                    "[Orchestrator] Could not read research {} after spawn error: {}",
                    research_id,
                    e
                );
                return;
            }
        };
        if !can_transition(research.status, ResearchStatus::Failed) {
            return;
        }
        if let Err(e) = self.set_research_status(&research, ResearchStatus::Failed) {
            log::error!(
                "[Orchestrator] Could not mark research {} failed: {}",
                research_id,
                e
            );
        } else {
            log::info!(
                "[Orchestrator] Research {} marked failed: {}",
                research_id,
                error
            );
        }
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn canonical_dir(path: &Path) -> OrchestratorResult<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| {
        OrchestratorError::Io(format!("Failed to resolve project directory {:?}: {}", path, e))
    })
}

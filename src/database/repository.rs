// Typed repository seam over the record store

use super::{Database, StoreResult};
use crate::models::{
    Activity, ActivityAction, Agent, AgentStatus, RecentActivity, Research, ResearchStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw row counts used for dashboard statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub pending_researches: u64,
    pub in_progress_researches: u64,
    pub completed_researches: u64,
    pub failed_researches: u64,
    pub total_agents: u64,
    pub running_agents: u64,
    pub total_activities: u64,
}

impl StoreCounts {
    pub fn total_researches(&self) -> u64 {
        self.pending_researches
            + self.in_progress_researches
            + self.completed_researches
            + self.failed_researches
    }
}

/// Everything the orchestrator is allowed to do with durable state.
///
/// Each call runs in its own transaction.
pub trait ResearchRepository: Send + Sync {
    fn create_research(
        &self,
        topic: &str,
        project_dir: &str,
        total_agents: u32,
    ) -> StoreResult<Research>;

    fn get_research(&self, id: &str) -> StoreResult<Option<Research>>;

    fn get_research_by_project_dir(&self, project_dir: &str) -> StoreResult<Option<Research>>;

    fn get_all_researches(&self) -> StoreResult<Vec<Research>>;

    fn update_research_status(
        &self,
        id: &str,
        status: ResearchStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    fn create_agent(&self, research_id: &str, name: &str) -> StoreResult<Agent>;

    fn get_agent(&self, id: &str) -> StoreResult<Option<Agent>>;

    fn update_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        task_output: Option<&str>,
        error_message: Option<&str>,
    ) -> StoreResult<Agent>;

    fn get_research_agents(&self, research_id: &str) -> StoreResult<Vec<Agent>>;

    fn log_activity(
        &self,
        agent_id: &str,
        action: &ActivityAction,
        description: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<Activity>;

    fn get_agent_activities(&self, agent_id: &str) -> StoreResult<Vec<Activity>>;

    fn get_research_activities(&self, research_id: &str) -> StoreResult<Vec<Activity>>;

    fn get_recent_activities(&self, limit: usize) -> StoreResult<Vec<RecentActivity>>;

    fn aggregate_counts(&self) -> StoreResult<StoreCounts>;
}

impl Database {
    pub fn aggregate_counts(&self) -> StoreResult<StoreCounts> {
        self.read(|conn| {
            let mut counts = StoreCounts::default();

            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM researches GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            for (status, count) in rows {
                let count = count.max(0) as u64;
                match status.parse::<ResearchStatus>() {
                    Ok(ResearchStatus::Pending) => counts.pending_researches = count,
                    Ok(ResearchStatus::InProgress) => counts.in_progress_researches = count,
                    Ok(ResearchStatus::Completed) => counts.completed_researches = count,
                    Ok(ResearchStatus::Failed) => counts.failed_researches = count,
                    Err(e) => log::warn!("[Database] Skipping {} research rows: {}", count, e),
                }
            }

            let (total_agents, running_agents): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END), 0) FROM agents",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            counts.total_agents = total_agents.max(0) as u64;
            counts.running_agents = running_agents.max(0) as u64;

            let total_activities: i64 =
                conn.query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))?;
            counts.total_activities = total_activities.max(0) as u64;

            Ok(counts)
        })
    }
}

impl ResearchRepository for Database {
    fn create_research(
        &self,
        topic: &str,
        project_dir: &str,
        total_agents: u32,
    ) -> StoreResult<Research> {
        Database::create_research(self, topic, project_dir, total_agents)
    }

    fn get_research(&self, id: &str) -> StoreResult<Option<Research>> {
        Database::get_research(self, id)
    }

    fn get_research_by_project_dir(&self, project_dir: &str) -> StoreResult<Option<Research>> {
        Database::get_research_by_project_dir(self, project_dir)
    }

    fn get_all_researches(&self) -> StoreResult<Vec<Research>> {
        Database::get_all_researches(self)
    }

    fn update_research_status(
        &self,
        id: &str,
        status: ResearchStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        Database::update_research_status(self, id, status, completed_at)
    }

    fn create_agent(&self, research_id: &str, name: &str) -> StoreResult<Agent> {
        Database::create_agent(self, research_id, name)
    }

    fn get_agent(&self, id: &str) -> StoreResult<Option<Agent>> {
        Database::get_agent(self, id)
    }

    fn update_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        task_output: Option<&str>,
        error_message: Option<&str>,
    ) -> StoreResult<Agent> {
        Database::update_agent_status(self, id, status, task_output, error_message)
    }

    fn get_research_agents(&self, research_id: &str) -> StoreResult<Vec<Agent>> {
        Database::get_research_agents(self, research_id)
    }

    fn log_activity(
        &self,
        agent_id: &str,
        action: &ActivityAction,
        description: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<Activity> {
        Database::log_activity(self, agent_id, action, description, metadata)
    }

    fn get_agent_activities(&self, agent_id: &str) -> StoreResult<Vec<Activity>> {
        Database::get_agent_activities(self, agent_id)
    }

    fn get_research_activities(&self, research_id: &str) -> StoreResult<Vec<Activity>> {
        Database::get_research_activities(self, research_id)
    }

    fn get_recent_activities(&self, limit: usize) -> StoreResult<Vec<RecentActivity>> {
        Database::get_recent_activities(self, limit)
    }

    fn aggregate_counts(&self) -> StoreResult<StoreCounts> {
        Database::aggregate_counts(self)
    }
}

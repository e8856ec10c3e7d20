// Agent database operations

use super::researches::query_research;
use super::{
    decode_error, format_timestamp, parse_opt_timestamp, Database, StoreError, StoreResult,
};
use crate::models::{Agent, AgentStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

const AGENT_COLUMNS: &str =
    "id, research_id, name, status, started_at, completed_at, task_output, error_message";

/// Undecoded agent row
struct AgentRow {
    id: String,
    research_id: String,
    name: String,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    task_output: Option<String>,
    error_message: Option<String>,
}

impl AgentRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            research_id: row.get(1)?,
            name: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            task_output: row.get(6)?,
            error_message: row.get(7)?,
        })
    }

    fn decode(self) -> StoreResult<Agent> {
        let status: AgentStatus = self.status.parse().map_err(|e| {
            StoreError::Malformed(format!("agents row {} has bad status: {}", self.id, e))
        })?;
        Ok(Agent {
            started_at: parse_opt_timestamp(
                self.started_at.as_deref(),
                "agents",
                &self.id,
                "started_at",
            )?,
            completed_at: parse_opt_timestamp(
                self.completed_at.as_deref(),
                "agents",
                &self.id,
                "completed_at",
            )?,
            id: self.id,
            research_id: self.research_id,
            name: self.name,
            status,
            task_output: self.task_output,
            error_message: self.error_message,
        })
    }
}

pub(crate) fn query_agent(conn: &Connection, id: &str) -> StoreResult<Option<Agent>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS),
            params![id],
            AgentRow::from_row,
        )
        .optional()
        .map_err(|e| decode_error("agents", e))?;
    row.map(AgentRow::decode).transpose()
}

impl Database {
    /// Create a pending Agent and bump the Research's spawn counter in the same
    /// transaction.
    pub fn create_agent(&self, research_id: &str, name: &str) -> StoreResult<Agent> {
        let agent = self.write(|tx| {
            let research = query_research(tx, research_id)?
                .ok_or_else(|| StoreError::not_found("Research", research_id))?;

            let agent = Agent {
                id: uuid::Uuid::new_v4().to_string(),
                research_id: research_id.to_string(),
                name: name.to_string(),
                status: AgentStatus::Pending,
                started_at: None,
                completed_at: None,
                task_output: None,
                error_message: None,
            };

            tx.execute(
                "INSERT INTO agents (id, research_id, seq, name, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    agent.id,
                    agent.research_id,
                    research.total_agents + 1,
                    agent.name,
                    agent.status.as_str(),
                ],
            )?;
            tx.execute(
                "UPDATE researches SET total_agents = total_agents + 1 WHERE id = ?1",
                params![research_id],
            )?;
            Ok(agent)
        })?;

        log::info!(
            "[Database] Created agent {} ({}) for research {}",
            agent.id,
            agent.name,
            research_id
        );
        Ok(agent)
    }

    pub fn get_agent(&self, id: &str) -> StoreResult<Option<Agent>> {
        self.read(|conn| query_agent(conn, id))
    }

    /// Update an agent's status. `started_at` is stamped on the first move to
    /// running and `completed_at` on the first terminal status; neither is
    /// cleared afterwards. Output and error text are kept unless replaced.
    pub fn update_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        task_output: Option<&str>,
        error_message: Option<&str>,
    ) -> StoreResult<Agent> {
        let now = format_timestamp(&Utc::now());
        self.write(|tx| {
            let updated = tx.execute(
                "UPDATE agents SET
                    status = ?1,
                    started_at = CASE WHEN ?1 = 'running' THEN COALESCE(started_at, ?2) ELSE started_at END,
                    completed_at = CASE WHEN ?1 IN ('completed', 'failed') THEN COALESCE(completed_at, ?2) ELSE completed_at END,
                    task_output = COALESCE(?3, task_output),
                    error_message = COALESCE(?4, error_message)
                 WHERE id = ?5",
                params![status.as_str(), now, task_output, error_message, id],
            )?;
            if updated == 0 {
                return Err(StoreError::not_found("Agent", id));
            }
            query_agent(tx, id)?.ok_or_else(|| StoreError::not_found("Agent", id))
        })
    }

    /// Agents of a Research in spawn order.
    ///
    /// Every row must decode into a well-formed Agent; a row with an unknown
    /// status or an unparseable timestamp fails the whole call with
    /// `Malformed` instead of being skipped or coerced.
    pub fn get_research_agents(&self, research_id: &str) -> StoreResult<Vec<Agent>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM agents WHERE research_id = ?1 ORDER BY seq ASC, rowid ASC",
                AGENT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![research_id], AgentRow::from_row)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| decode_error("agents", e))?;
            rows.into_iter().map(AgentRow::decode).collect()
        })
    }
}

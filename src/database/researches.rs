// Research database operations

use super::{
    decode_error, format_timestamp, now_micros, parse_opt_timestamp, parse_timestamp, Database,
    StoreError, StoreResult,
};
use crate::models::{Research, ResearchStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const RESEARCH_COLUMNS: &str =
    "id, topic, status, created_at, completed_at, project_dir, total_agents";

/// Undecoded research row
struct ResearchRow {
    id: String,
    topic: String,
    status: String,
    created_at: String,
    completed_at: Option<String>,
    project_dir: String,
    total_agents: i64,
}

impl ResearchRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            topic: row.get(1)?,
            status: row.get(2)?,
            created_at: row.get(3)?,
            completed_at: row.get(4)?,
            project_dir: row.get(5)?,
            total_agents: row.get(6)?,
        })
    }

    fn decode(self) -> StoreResult<Research> {
        let status: ResearchStatus = self.status.parse().map_err(|e| {
            StoreError::Malformed(format!("researches row {} has bad status: {}", self.id, e))
        })?;
        let total_agents = u32::try_from(self.total_agents).map_err(|_| {
            StoreError::Malformed(format!(
                "researches row {} has negative total_agents {}",
                self.id, self.total_agents
            ))
        })?;
        Ok(Research {
            created_at: parse_timestamp(&self.created_at, "researches", &self.id, "created_at")?,
            completed_at: parse_opt_timestamp(
                self.completed_at.as_deref(),
                "researches",
                &self.id,
                "completed_at",
            )?,
            id: self.id,
            topic: self.topic,
            status,
            project_dir: self.project_dir,
            total_agents,
        })
    }
}

pub(crate) fn query_research(conn: &Connection, id: &str) -> StoreResult<Option<Research>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM researches WHERE id = ?1", RESEARCH_COLUMNS),
            params![id],
            ResearchRow::from_row,
        )
        .optional()
        .map_err(|e| decode_error("researches", e))?;
    row.map(ResearchRow::decode).transpose()
}

impl Database {
    /// Create a Research in `pending`. Fails with Conflict if the directory is taken.
    pub fn create_research(
        &self,
        topic: &str,
        project_dir: &str,
        total_agents: u32,
    ) -> StoreResult<Research> {
        if topic.trim().is_empty() {
            return Err(StoreError::InvalidInput("topic must not be empty".to_string()));
        }

        let research = Research {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            status: ResearchStatus::Pending,
            created_at: now_micros(),
            completed_at: None,
            project_dir: project_dir.to_string(),
            total_agents,
        };

        self.write(|tx| {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM researches WHERE project_dir = ?1",
                    params![project_dir],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = existing {
                return Err(StoreError::Conflict {
                    project_dir: project_dir.to_string(),
                    existing,
                });
            }

            tx.execute(
                "INSERT INTO researches (id, topic, status, created_at, completed_at, project_dir, total_agents)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
                params![
                    research.id,
                    research.topic,
                    research.status.as_str(),
                    format_timestamp(&research.created_at),
                    research.project_dir,
                    research.total_agents,
                ],
            )?;
            Ok(())
        })?;

        log::info!(
            "[Database] Created research {} for {:?} in {}",
            research.id,
            research.topic,
            research.project_dir
        );
        Ok(research)
    }

    pub fn get_research(&self, id: &str) -> StoreResult<Option<Research>> {
        self.read(|conn| query_research(conn, id))
    }

    pub fn get_research_by_project_dir(&self, project_dir: &str) -> StoreResult<Option<Research>> {
        self.read(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM researches WHERE project_dir = ?1",
                        RESEARCH_COLUMNS
                    ),
                    params![project_dir],
                    ResearchRow::from_row,
                )
                .optional()
                .map_err(|e| decode_error("researches", e))?;
            row.map(ResearchRow::decode).transpose()
        })
    }

    /// All researches, newest first
    pub fn get_all_researches(&self) -> StoreResult<Vec<Research>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM researches ORDER BY created_at DESC, id DESC",
                RESEARCH_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], ResearchRow::from_row)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| decode_error("researches", e))?;
            rows.into_iter().map(ResearchRow::decode).collect()
        })
    }

    /// Set the status. A `completed_at` that is already set is never cleared or
    /// overwritten, so repeating the call is harmless.
    pub fn update_research_status(
        &self,
        id: &str,
        status: ResearchStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let completed_at = completed_at.as_ref().map(format_timestamp);
        let updated = self.write(|tx| {
            Ok(tx.execute(
                "UPDATE researches
                 SET status = ?1, completed_at = COALESCE(completed_at, ?2)
                 WHERE id = ?3",
                params![status.as_str(), completed_at, id],
            )?)
        })?;

        if updated == 0 {
            return Err(StoreError::not_found("Research", id));
        }
        log::debug!("[Database] Research {} -> {}", id, status);
        Ok(())
    }
}

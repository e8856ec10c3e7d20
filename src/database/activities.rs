// Activity timeline database operations

use super::agents::query_agent;
use super::{
    decode_error, format_timestamp, now_micros, parse_timestamp, Database, StoreError, StoreResult,
};
use crate::models::{Activity, ActivityAction, RecentActivity};
use rusqlite::{params, OptionalExtension, Row};

/// Undecoded activity row
struct ActivityRow {
    id: i64,
    agent_id: String,
    timestamp: String,
    action: String,
    description: String,
    metadata: String,
}

impl ActivityRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            timestamp: row.get(2)?,
            action: row.get(3)?,
            description: row.get(4)?,
            metadata: row.get(5)?,
        })
    }

    fn decode(self) -> StoreResult<Activity> {
        let id = self.id.to_string();
        let metadata: serde_json::Value = serde_json::from_str(&self.metadata).map_err(|e| {
            StoreError::Malformed(format!("activities row {} has invalid metadata: {}", id, e))
        })?;
        Ok(Activity {
            timestamp: parse_timestamp(&self.timestamp, "activities", &id, "timestamp")?,
            id: self.id,
            agent_id: self.agent_id,
            action: ActivityAction::from(self.action),
            description: self.description,
            metadata,
        })
    }
}

impl Database {
    /// Append an Activity to an Agent's timeline.
    ///
    /// The stored timestamp never precedes the agent's previous entry, so the
    /// per-agent order holds even if the wall clock steps backwards.
    pub fn log_activity(
        &self,
        agent_id: &str,
        action: &ActivityAction,
        description: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<Activity> {
        let metadata = match metadata {
            serde_json::Value::Null => serde_json::json!({}),
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            other => {
                return Err(StoreError::InvalidInput(format!(
                    "activity metadata must be a JSON object, got {}",
                    other
                )))
            }
        };

        self.write(|tx| {
            if query_agent(tx, agent_id)?.is_none() {
                return Err(StoreError::not_found("Agent", agent_id));
            }

            let last: Option<String> = tx
                .query_row(
                    "SELECT MAX(timestamp) FROM activities WHERE agent_id = ?1",
                    params![agent_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            let mut timestamp = now_micros();
            if let Some(last) = last {
                let last = parse_timestamp(&last, "activities", agent_id, "timestamp")?;
                if last > timestamp {
                    timestamp = last;
                }
            }

            tx.execute(
                "INSERT INTO activities (agent_id, timestamp, action, description, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    agent_id,
                    format_timestamp(&timestamp),
                    action.as_str(),
                    description,
                    metadata.to_string(),
                ],
            )?;

            Ok(Activity {
                id: tx.last_insert_rowid(),
                agent_id: agent_id.to_string(),
                timestamp,
                action: action.clone(),
                description: description.to_string(),
                metadata,
            })
        })
    }

    /// An Agent's timeline, oldest first
    pub fn get_agent_activities(&self, agent_id: &str) -> StoreResult<Vec<Activity>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, agent_id, timestamp, action, description, metadata
                 FROM activities WHERE agent_id = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![agent_id], ActivityRow::from_row)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| decode_error("activities", e))?;
            rows.into_iter().map(ActivityRow::decode).collect()
        })
    }

    /// The whole timeline of a Research across all of its agents, oldest first
    pub fn get_research_activities(&self, research_id: &str) -> StoreResult<Vec<Activity>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.agent_id, a.timestamp, a.action, a.description, a.metadata
                 FROM activities a
                 JOIN agents g ON g.id = a.agent_id
                 WHERE g.research_id = ?1
                 ORDER BY a.timestamp ASC, a.id ASC",
            )?;
            let rows = stmt
                .query_map(params![research_id], ActivityRow::from_row)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| decode_error("activities", e))?;
            rows.into_iter().map(ActivityRow::decode).collect()
        })
    }

    /// Cross-research feed, newest first, at most `limit` rows
    pub fn get_recent_activities(&self, limit: usize) -> StoreResult<Vec<RecentActivity>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.agent_id, a.timestamp, a.action, a.description, a.metadata, g.research_id
                 FROM activities a
                 JOIN agents g ON g.id = a.agent_id
                 ORDER BY a.timestamp DESC, a.id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok((ActivityRow::from_row(row)?, row.get::<_, String>(6)?))
                })?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| decode_error("activities", e))?;
            rows.into_iter()
                .map(|(row, research_id)| {
                    Ok(RecentActivity {
                        research_id,
                        activity: row.decode()?,
                    })
                })
                .collect()
        })
    }
}

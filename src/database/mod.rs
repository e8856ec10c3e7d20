// SQLite record store for researches, agents and the activity timeline

pub mod activities;
pub mod agents;
pub mod repository;
pub mod researches;

pub use repository::{ResearchRepository, StoreCounts};

use crate::utils::lock_mutex_recover;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

const SCHEMA_VERSION: i32 = 1;

/// Idle read connections kept around for reuse
const MAX_IDLE_READERS: usize = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Project directory is already bound to research {existing}: {project_dir}")]
    Conflict {
        project_dir: String,
        existing: String,
    },

    #[error("Malformed store result: {0}")]
    Malformed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// SQLite-backed store.
///
/// Writes go through a single connection inside an IMMEDIATE transaction.
/// File-backed databases run in WAL mode and serve reads from separate pooled
/// connections, so dashboard polls never wait on a writer.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the database file and apply migrations
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::InvalidInput(format!(
                        "Failed to create database directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        let conn = Connection::open(&path)?;
        // WAL must be set before any reader connection is opened
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        configure_connection(&conn)?;

        let db = Self {
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
            path: Some(path),
        };
        db.init()?;
        log::info!("[Database] Opened record store at {:?}", db.path);
        Ok(db)
    }

    /// In-memory database; reads share the writer connection
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        configure_connection(&conn)?;
        let db = Self {
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
            path: None,
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init(&self) -> StoreResult<()> {
        let conn = lock_mutex_recover(&self.writer);
        create_metadata_table(&conn)?;
        let version = get_schema_version(&conn)?;

        // Refuse databases written by a newer build
        if version > SCHEMA_VERSION {
            return Err(StoreError::InvalidInput(format!(
                "Database schema version {} is newer than application version {}. Please upgrade the application.",
                version, SCHEMA_VERSION
            )));
        }

        if version < SCHEMA_VERSION {
            log::info!(
                "[Database] Migrating schema from version {} to {}",
                version,
                SCHEMA_VERSION
            );
            run_migrations(&conn, version)?;
            set_schema_version(&conn, SCHEMA_VERSION)?;
        }

        Ok(())
    }

    /// Run `f` inside an IMMEDIATE write transaction, committing on success
    pub(crate) fn write<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StoreResult<T>,
    {
        let mut conn = lock_mutex_recover(&self.writer);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` against a read connection
    pub(crate) fn read<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let Some(path) = &self.path else {
            let conn = lock_mutex_recover(&self.writer);
            return f(&conn);
        };

        let pooled = lock_mutex_recover(&self.readers).pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => open_reader(path)?,
        };

        let result = f(&conn);

        let mut idle = lock_mutex_recover(&self.readers);
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
        result
    }
}

fn configure_connection(conn: &Connection) -> StoreResult<()> {
    // Foreign key enforcement must be enabled on each connection
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

fn open_reader(path: &Path) -> StoreResult<Connection> {
    // Opened read-write so WAL shared memory can be mapped; writes are refused
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    configure_connection(&conn)?;
    conn.execute_batch("PRAGMA query_only = ON;")?;
    Ok(conn)
}

fn create_metadata_table(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> StoreResult<i32> {
    let version: rusqlite::Result<String> = conn.query_row(
        "SELECT value FROM schema_metadata WHERE key = 'version'",
        [],
        |row| row.get(0),
    );

    match version {
        Ok(v) => v.parse().map_err(|_| {
            StoreError::Malformed(format!("schema_metadata.version is not a number: {:?}", v))
        }),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            conn.execute(
                "INSERT INTO schema_metadata (key, value) VALUES ('version', '0')",
                [],
            )?;
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> StoreResult<()> {
    conn.execute(
        "UPDATE schema_metadata SET value = ?1 WHERE key = 'version'",
        params![version.to_string()],
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection, from_version: i32) -> StoreResult<()> {
    if from_version < 1 {
        migrate_to_v1(conn)?;
    }
    Ok(())
}

fn migrate_to_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS researches (
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            project_dir TEXT NOT NULL UNIQUE,
            total_agents INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            research_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            task_output TEXT,
            error_message TEXT,
            FOREIGN KEY (research_id) REFERENCES researches(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS activities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            action TEXT NOT NULL,
            description TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (agent_id) REFERENCES agents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_agents_research_id ON agents(research_id, seq);
        CREATE INDEX IF NOT EXISTS idx_activities_agent_id ON activities(agent_id, timestamp, id);
        CREATE INDEX IF NOT EXISTS idx_activities_timestamp ON activities(timestamp, id);",
    )?;
    Ok(())
}

// =============================================================================
// Row decoding helpers shared by the table modules
// =============================================================================

/// Current time at the precision the store keeps
pub(crate) fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-precision UTC text so lexical order equals chronological order
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(
    raw: &str,
    table: &str,
    id: &str,
    column: &str,
) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::Malformed(format!(
                "{} row {} has an invalid {} {:?}: {}",
                table, id, column, raw, e
            ))
        })
}

pub(crate) fn parse_opt_timestamp(
    raw: Option<&str>,
    table: &str,
    id: &str,
    column: &str,
) -> StoreResult<Option<DateTime<Utc>>> {
    raw.map(|r| parse_timestamp(r, table, id, column))
        .transpose()
}

/// Column type mismatches mean the stored data is not what we wrote
pub(crate) fn decode_error(table: &str, err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::InvalidColumnType(_, name, ty) => StoreError::Malformed(format!(
            "{} column {} holds a value of type {}",
            table, name, ty
        )),
        rusqlite::Error::FromSqlConversionFailure(idx, ty, e) => StoreError::Malformed(format!(
            "{} column #{} ({}) could not be decoded: {}",
            table, idx, ty, e
        )),
        other => StoreError::Sqlite(other),
    }
}

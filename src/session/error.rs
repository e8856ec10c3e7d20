use crate::database::StoreError;
use crate::models::state_machine::StateTransitionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailure(String),

    #[error("Malformed store result: {0}")]
    MalformedStoreResult(String),

    #[error("Project directory is already bound to research {existing}: {project_dir}")]
    Conflict {
        project_dir: String,
        existing: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(#[source] rusqlite::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        OrchestratorError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound { .. } => "not_found",
            OrchestratorError::InvalidState(_) => "invalid_state",
            OrchestratorError::Io(_) => "io",
            OrchestratorError::SpawnFailure(_) => "spawn_failure",
            OrchestratorError::MalformedStoreResult(_) => "malformed_store_result",
            OrchestratorError::Conflict { .. } => "conflict",
            OrchestratorError::InvalidInput(_) => "invalid_input",
            OrchestratorError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => OrchestratorError::NotFound { entity, id },
            StoreError::Conflict {
                project_dir,
                existing,
            } => OrchestratorError::Conflict {
                project_dir,
                existing,
            },
            StoreError::Malformed(msg) => OrchestratorError::MalformedStoreResult(msg),
            StoreError::InvalidInput(msg) => OrchestratorError::InvalidInput(msg),
            StoreError::Sqlite(e) => OrchestratorError::Store(e),
        }
    }
}

impl From<StateTransitionError> for OrchestratorError {
    fn from(err: StateTransitionError) -> Self {
        OrchestratorError::InvalidState(err.to_string())
    }
}

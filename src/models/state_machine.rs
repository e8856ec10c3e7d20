// Research status state machine with validation

use super::ResearchStatus;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateTransitionError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: ResearchStatus,
        to: ResearchStatus,
    },
}

/// Validates if a Research can transition from one status to another
pub fn can_transition(from: ResearchStatus, to: ResearchStatus) -> bool {
    match (from, to) {
        // Spawn confirmed, or spawn failed
        (ResearchStatus::Pending, ResearchStatus::InProgress) => true,
        (ResearchStatus::Pending, ResearchStatus::Failed) => true,

        // Worker finished, failed, or was stopped
        (ResearchStatus::InProgress, ResearchStatus::Completed) => true,
        (ResearchStatus::InProgress, ResearchStatus::Failed) => true,

        // Resume
        (ResearchStatus::Completed, ResearchStatus::InProgress) => true,
        (ResearchStatus::Failed, ResearchStatus::InProgress) => true,

        // Same state is always allowed (no-op)
        (a, b) if a == b => true,

        _ => false,
    }
}

/// Validates and performs a state transition
pub fn transition_state(
    current: ResearchStatus,
    target: ResearchStatus,
) -> Result<ResearchStatus, StateTransitionError> {
    if !can_transition(current, target) {
        return Err(StateTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

/// Whether a Research in this status may be resumed.
///
/// `InProgress` is accepted because the recorded status says nothing about
/// whether a worker is actually alive; the caller checks the process registry.
pub fn is_resumable(status: ResearchStatus) -> bool {
    !matches!(status, ResearchStatus::Pending)
}

//! Server application state shared across handlers

use crate::config::PortalConfig;
use crate::session::Orchestrator;
use crate::shutdown::ShutdownState;
use std::sync::Arc;

#[derive(Clone)]
pub struct ServerAppState {
    /// Session orchestrator; all research commands go through it
    pub orchestrator: Arc<Orchestrator>,

    /// Effective configuration, for read-only config commands
    pub config: Arc<PortalConfig>,

    /// Shutdown state
    pub shutdown_state: ShutdownState,
}

impl ServerAppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        config: PortalConfig,
        shutdown_state: ShutdownState,
    ) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
            shutdown_state,
        }
    }
}

// Clippy allows for reasonable defaults
#![allow(clippy::too_many_arguments)] // Spawn parameters are passed through several layers
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::derivable_impls)] // Explicit Default impls can be clearer
#![allow(clippy::collapsible_if)] // Separate ifs can be more readable

// Module declarations
pub mod agents;
pub mod config;
pub mod database;
pub mod file_storage;
pub mod models;
pub mod session;
pub mod shutdown;
mod utils;

// Server module (HTTP API)
pub mod server;

pub use models::*;
pub use session::{Orchestrator, OrchestratorError};
pub use utils::as_path;

// Research worker process management

pub mod launcher;
pub mod registry;
pub mod supervisor;

pub use launcher::{CommandLauncher, WorkerLaunch, WorkerLauncher, WorkerProcess};
pub use registry::{Liveness, ProcessRegistry, WorkerHandle};
pub use supervisor::{Supervisor, WorkerExitEvent};

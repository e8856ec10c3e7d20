// Worker supervision: launch, monitor, stop
//
// The supervisor owns process-side concerns only. Turning an exit or a stop
// into Agent/Research status is the orchestrator's job.

use super::launcher::{WorkerLaunch, WorkerLauncher, WorkerProcess};
use super::registry::{Liveness, ProcessRegistry, WorkerHandle};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

/// Emitted by a monitor thread when a tracked worker exits on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerExitEvent {
    pub research_id: String,
    pub agent_id: String,
    pub exit_code: Option<i32>,
}

pub struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
    registry: Arc<ProcessRegistry>,
    poll_interval: Duration,
    exit_tx: Option<mpsc::UnboundedSender<WorkerExitEvent>>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        registry: Arc<ProcessRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            launcher,
            registry,
            poll_interval,
            exit_tx: None,
        }
    }

    pub fn set_exit_sender(&mut self, tx: mpsc::UnboundedSender<WorkerExitEvent>) {
        self.exit_tx = Some(tx);
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Start a worker. The process is not tracked until [`track`](Self::track).
    pub fn launch(&self, launch: &WorkerLaunch) -> Result<Box<dyn WorkerProcess>> {
        log::info!(
            "[Supervisor] Launching worker for research {} (resume: {})",
            launch.research_id,
            launch.resume
        );
        self.launcher.launch(launch)
    }

    /// Register a launched worker under its Agent and start its exit monitor
    pub fn track(&self, research_id: &str, agent_id: &str, process: Box<dyn WorkerProcess>) {
        let handle = WorkerHandle::new(agent_id, process);
        let cancelled = handle.cancellation();
        let pid = handle.pid();

        if let Some(mut previous) = self.registry.insert(research_id, handle) {
            // Only reachable if a caller bypassed the resume lock
            log::warn!(
                "[Supervisor] Replacing live handle for research {} (agent {})",
                research_id,
                previous.agent_id
            );
            previous.cancel();
            if let Err(e) = previous.kill() {
                log::warn!("[Supervisor] Failed to kill replaced worker: {}", e);
            }
        }

        log::info!(
            "[Supervisor] Tracking worker {:?} for research {} as agent {}",
            pid,
            research_id,
            agent_id
        );

        let registry = self.registry.clone();
        let exit_tx = self.exit_tx.clone();
        let poll_interval = self.poll_interval;
        let research_id = research_id.to_string();
        let agent_id = agent_id.to_string();

        thread::spawn(move || {
            loop {
                if cancelled.load(Ordering::Relaxed) {
                    log::debug!("[Supervisor] Monitor for agent {} cancelled", agent_id);
                    break;
                }

                thread::sleep(poll_interval);

                if cancelled.load(Ordering::Relaxed) {
                    log::debug!(
                        "[Supervisor] Monitor for agent {} cancelled after sleep",
                        agent_id
                    );
                    break;
                }

                match registry.poll_agent(&research_id, &agent_id) {
                    Liveness::Running { .. } => continue,
                    Liveness::Exited { exit_code, .. } => {
                        log::info!(
                            "[Supervisor] Worker for research {} (agent {}) exited with code {:?}",
                            research_id,
                            agent_id,
                            exit_code
                        );
                        if let Some(tx) = &exit_tx {
                            let _ = tx.send(WorkerExitEvent {
                                research_id: research_id.clone(),
                                agent_id: agent_id.clone(),
                                exit_code,
                            });
                        }
                        break;
                    }
                    Liveness::Idle => {
                        log::debug!(
                            "[Supervisor] Agent {} no longer in registry",
                            agent_id
                        );
                        break;
                    }
                }
            }
            log::debug!("[Supervisor] Monitor for agent {} finished", agent_id);
        });
    }

    /// Liveness of a Research's worker. An exit observed here is not sent to
    /// the exit channel; the caller must settle it.
    pub fn poll(&self, research_id: &str) -> Liveness {
        self.registry.poll(research_id)
    }

    /// Kill the tracked worker, if any. Returns the agent it belonged to.
    pub fn stop(&self, research_id: &str) -> Option<String> {
        let mut handle = self.registry.remove(research_id)?;
        handle.cancel();

        match handle.kill() {
            Ok(()) => log::info!(
                "[Supervisor] Stopped worker for research {} (agent {})",
                research_id,
                handle.agent_id
            ),
            // Usually a worker that exited between the last poll and now
            Err(e) => log::warn!(
                "[Supervisor] Failed to kill worker for research {}: {}",
                research_id,
                e
            ),
        }
        Some(handle.agent_id)
    }

    /// Cancel all monitors on shutdown. Workers keep running.
    pub fn shutdown(&self) {
        let count = self.registry.len();
        self.registry.cancel_all();
        if count > 0 {
            log::info!(
                "[Supervisor] Detached from {} running worker(s) on shutdown",
                count
            );
        }
    }
}

// In-memory table of live worker handles, keyed by research ID
//
// This table is the only liveness signal the portal trusts. A Research recorded
// as in_progress with no entry here has no worker we can observe.

use super::launcher::WorkerProcess;
use crate::utils::lock_mutex_recover;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct WorkerHandle {
    pub agent_id: String,
    process: Box<dyn WorkerProcess>,
    /// Set when the handle is stopped or the portal shuts down
    cancelled: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn new(agent_id: impl Into<String>, process: Box<dyn WorkerProcess>) -> Self {
        Self {
            agent_id: agent_id.into(),
            process,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancellation(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub(crate) fn kill(&mut self) -> std::io::Result<()> {
        self.process.kill()
    }
}

/// What the registry knows about a Research's worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// No handle tracked
    Idle,
    Running { agent_id: String },
    /// The worker exited and its handle was just removed. Whoever observes
    /// this is responsible for settling the Agent.
    Exited {
        agent_id: String,
        exit_code: Option<i32>,
    },
}

pub struct ProcessRegistry {
    handles: Mutex<HashMap<String, WorkerHandle>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Track a worker. Returns the handle it replaced, if any.
    pub fn insert(&self, research_id: &str, handle: WorkerHandle) -> Option<WorkerHandle> {
        let mut handles = lock_mutex_recover(&self.handles);
        let previous = handles.insert(research_id.to_string(), handle);
        log::debug!("[Registry] Tracking {} worker(s)", handles.len());
        previous
    }

    pub fn remove(&self, research_id: &str) -> Option<WorkerHandle> {
        lock_mutex_recover(&self.handles).remove(research_id)
    }

    /// Check the worker for a Research, removing its handle if it has exited
    pub fn poll(&self, research_id: &str) -> Liveness {
        self.poll_inner(research_id, None)
    }

    /// Like [`poll`](Self::poll), but only for the handle of `agent_id`. A
    /// handle for a different agent reports `Idle`.
    pub fn poll_agent(&self, research_id: &str, agent_id: &str) -> Liveness {
        self.poll_inner(research_id, Some(agent_id))
    }

    fn poll_inner(&self, research_id: &str, expected_agent: Option<&str>) -> Liveness {
        let mut handles = lock_mutex_recover(&self.handles);
        let Some(handle) = handles.get_mut(research_id) else {
            return Liveness::Idle;
        };
        if let Some(expected) = expected_agent {
            if handle.agent_id != expected {
                return Liveness::Idle;
            }
        }

        match handle.process.try_wait() {
            Ok(None) => Liveness::Running {
                agent_id: handle.agent_id.clone(),
            },
            Ok(Some(code)) => {
                let agent_id = handle.agent_id.clone();
                handles.remove(research_id);
                Liveness::Exited {
                    agent_id,
                    exit_code: Some(code),
                }
            }
            Err(e) => {
                log::error!(
                    "[Registry] Error checking worker status for research {}: {}",
                    research_id,
                    e
                );
                Liveness::Running {
                    agent_id: handle.agent_id.clone(),
                }
            }
        }
    }

    pub fn contains(&self, research_id: &str) -> bool {
        lock_mutex_recover(&self.handles).contains_key(research_id)
    }

    pub fn len(&self) -> usize {
        lock_mutex_recover(&self.handles).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn research_ids(&self) -> Vec<String> {
        lock_mutex_recover(&self.handles).keys().cloned().collect()
    }

    /// Cancel every monitor. Workers themselves are left running.
    pub fn cancel_all(&self) {
        let handles = lock_mutex_recover(&self.handles);
        for handle in handles.values() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::AtomicI32;

    /// Process stub whose exit code is set from outside; `i32::MIN` means running
    pub(crate) struct StubProcess {
        pub exit: Arc<AtomicI32>,
        pub killed: Arc<AtomicBool>,
    }

    impl StubProcess {
        pub(crate) fn new() -> (Self, Arc<AtomicI32>, Arc<AtomicBool>) {
            let exit = Arc::new(AtomicI32::new(i32::MIN));
            let killed = Arc::new(AtomicBool::new(false));
            (
                Self {
                    exit: exit.clone(),
                    killed: killed.clone(),
                },
                exit,
                killed,
            )
        }
    }

    impl WorkerProcess for StubProcess {
        fn pid(&self) -> Option<u32> {
            Some(4242)
        }

        fn try_wait(&mut self) -> io::Result<Option<i32>> {
            let code = self.exit.load(Ordering::SeqCst);
            Ok(if code == i32::MIN { None } else { Some(code) })
        }

        fn kill(&mut self) -> io::Result<()> {
            self.killed.store(true, Ordering::SeqCst);
            self.exit.store(-1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_poll_idle_running_exited() {
        let registry = ProcessRegistry::new();
        assert_eq!(registry.poll("r1"), Liveness::Idle);

        let (process, exit, _) = StubProcess::new();
        registry.insert("r1", WorkerHandle::new("a1", Box::new(process)));
        assert_eq!(
            registry.poll("r1"),
            Liveness::Running {
                agent_id: "a1".to_string()
            }
        );

        exit.store(0, Ordering::SeqCst);
        assert_eq!(
            registry.poll("r1"),
            Liveness::Exited {
                agent_id: "a1".to_string(),
                exit_code: Some(0)
            }
        );
        // Exit is reported exactly once
        assert_eq!(registry.poll("r1"), Liveness::Idle);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_poll_agent_ignores_other_agents_handle() {
        let registry = ProcessRegistry::new();
        let (process, exit, _) = StubProcess::new();
        registry.insert("r1", WorkerHandle::new("a2", Box::new(process)));
        exit.store(1, Ordering::SeqCst);

        assert_eq!(registry.poll_agent("r1", "a1"), Liveness::Idle);
        assert!(registry.contains("r1"));
    }

    #[test]
    fn test_cancel_all_sets_flags() {
        let registry = ProcessRegistry::new();
        let (process, _, killed) = StubProcess::new();
        let handle = WorkerHandle::new("a1", Box::new(process));
        let token = handle.cancellation();
        registry.insert("r1", handle);

        registry.cancel_all();
        assert!(token.load(Ordering::Relaxed));
        // Workers are not killed on shutdown
        assert!(!killed.load(Ordering::SeqCst));
        assert_eq!(registry.research_ids(), vec!["r1".to_string()]);
    }
}

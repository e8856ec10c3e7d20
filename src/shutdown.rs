// Signal trapping and portal shutdown
//
// Workers are independent processes and outlive the portal. Shutting down
// only stops the HTTP server and detaches the exit monitors.

use crate::session::Orchestrator;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared shutdown flag, polled by the HTTP server
#[derive(Clone)]
pub struct ShutdownState {
    shutdown_requested: Arc<AtomicBool>,
    cleanup_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            cleanup_complete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_shutdown(&self) {
        if !self.shutdown_requested.swap(true, Ordering::SeqCst) {
            log::info!("[Shutdown] Shutdown requested");
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn mark_cleanup_complete(&self) {
        self.cleanup_complete.store(true, Ordering::SeqCst);
    }

    pub fn is_cleanup_complete(&self) -> bool {
        self.cleanup_complete.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

/// What shutdown left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Researches whose worker is still running unsupervised
    pub detached_workers: Vec<String>,
}

/// Detach from all workers and mark cleanup complete
pub fn detach_workers(state: &ShutdownState, orchestrator: &Orchestrator) -> ShutdownReport {
    state.request_shutdown();

    let detached_workers = orchestrator.live_research_ids();
    orchestrator.shutdown();

    for research_id in &detached_workers {
        log::info!(
            "[Shutdown] Worker for research {} left running; it will be resumable after restart",
            research_id
        );
    }

    state.mark_cleanup_complete();
    log::info!(
        "[Shutdown] Cleanup complete ({} worker(s) detached)",
        detached_workers.len()
    );

    ShutdownReport { detached_workers }
}

/// Register handlers for SIGINT (Ctrl+C), SIGTERM and SIGHUP
#[cfg(unix)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
        .map_err(|e| anyhow::anyhow!("Failed to register signal handlers: {}", e))?;

    thread::spawn(move || {
        for signal in signals.forever() {
            let name = match signal {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => continue,
            };
            log::info!("[Shutdown] Received {}", name);
            state.request_shutdown();
        }
    });

    log::info!("[Shutdown] Signal handlers registered (SIGINT, SIGTERM, SIGHUP)");
    Ok(())
}

#[cfg(windows)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("[Shutdown] Received Ctrl+C");
        state.request_shutdown();
    })
    .map_err(|e| anyhow::anyhow!("Failed to register Ctrl+C handler: {}", e))?;

    log::info!("[Shutdown] Signal handler registered (Ctrl+C)");
    Ok(())
}

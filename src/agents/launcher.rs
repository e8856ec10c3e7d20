// Worker process launching
//
// The orchestrator never spawns processes directly. It goes through a
// `WorkerLauncher`, so the production `CommandLauncher` can be swapped for a
// fake in tests.

use crate::config::providers::build_provider_env_vars;
use crate::models::{ResearchDepth, ResearchStyle};
use anyhow::{anyhow, Context, Result};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::Duration;

/// Everything a worker needs to run one Research
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub research_id: String,
    pub project_dir: PathBuf,
    pub topic: String,
    pub depth: ResearchDepth,
    pub focus: Option<String>,
    pub style: ResearchStyle,
    pub provider: String,
    pub model: String,
    /// API key for `provider`; `None` lets the worker inherit the portal's env
    pub credentials: Option<String>,
    /// Continue the Research in its existing directory
    pub resume: bool,
    /// Conversation history for a resumed worker
    pub context_file: Option<PathBuf>,
}

/// A running worker. Exit codes are reported but never interpreted.
pub trait WorkerProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// `Ok(Some(code))` once the process has exited. A process killed by a
    /// signal reports -1.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    fn kill(&mut self) -> io::Result<()>;
}

pub trait WorkerLauncher: Send + Sync {
    /// Start a worker and confirm it did not die on startup
    fn launch(&self, launch: &WorkerLaunch) -> Result<Box<dyn WorkerProcess>>;
}

/// Spawns `<program> <script> <topic> <outputDir> <provider> <model> ...`
pub struct CommandLauncher {
    program: String,
    script: PathBuf,
    startup_grace: Duration,
}

impl CommandLauncher {
    pub fn new(program: impl Into<String>, script: impl Into<PathBuf>, startup_grace: Duration) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            startup_grace,
        }
    }

    fn resolve_program(&self) -> Result<PathBuf> {
        let as_path = Path::new(&self.program);
        if as_path.is_absolute() && as_path.exists() {
            return Ok(as_path.to_path_buf());
        }
        which::which(&self.program)
            .map_err(|e| anyhow!("Worker program '{}' not found: {}", self.program, e))
    }

    /// Build the worker command without spawning it
    pub fn build_command(&self, launch: &WorkerLaunch) -> Result<Command> {
        let program = self.resolve_program()?;

        // The script path is relative to the portal's cwd, not the project dir
        let script = if self.script.is_absolute() {
            self.script.clone()
        } else {
            std::env::current_dir()
                .context("Failed to read current directory")?
                .join(&self.script)
        };

        let mut cmd = Command::new(program);
        cmd.arg(script)
            .arg(&launch.topic)
            .arg(&launch.project_dir)
            .arg(&launch.provider)
            .arg(&launch.model);

        if launch.resume {
            cmd.arg("--resume");
        }
        cmd.arg("--depth").arg(launch.depth.as_str());
        cmd.arg("--style").arg(launch.style.as_str());
        if let Some(focus) = launch.focus.as_deref().filter(|f| !f.trim().is_empty()) {
            cmd.arg("--focus").arg(focus);
        }

        cmd.current_dir(&launch.project_dir);
        cmd.envs(build_provider_env_vars(
            &launch.provider,
            launch.credentials.as_deref(),
        ));
        cmd.env("RESEARCH_ID", &launch.research_id);
        if let Some(context_file) = &launch.context_file {
            cmd.env("RESEARCH_CONTEXT_FILE", context_file);
        }

        Ok(cmd)
    }
}

impl WorkerLauncher for CommandLauncher {
    fn launch(&self, launch: &WorkerLaunch) -> Result<Box<dyn WorkerProcess>> {
        let mut command = self.build_command(launch)?;

        let program = command.get_program().to_string_lossy().to_string();
        let args: Vec<String> = command
            .get_args()
            .map(|s| s.to_string_lossy().to_string())
            .collect();
        log::info!("[Launcher] Executing command: {} {:?}", program, args);

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn worker process '{}'", program))?;

        let pid = child.id();
        log::info!(
            "[Launcher] Worker for research {} spawned with PID {}",
            launch.research_id,
            pid
        );

        let stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        // Give the process a moment to start (catches bad scripts and imports)
        thread::sleep(self.startup_grace);

        if let Some(status) = child.try_wait().context("Failed to check worker status")? {
            let mut stderr_content = String::new();
            if let Some(handle) = stderr.as_mut() {
                let _ = handle.read_to_string(&mut stderr_content);
            }
            log::error!(
                "[Launcher] Worker {} exited immediately with {}",
                pid,
                status
            );
            let detail = stderr_content.trim();
            return Err(if detail.is_empty() {
                anyhow!("Worker exited immediately with {}", status)
            } else {
                anyhow!("Worker exited immediately with {}: {}", status, detail)
            });
        }

        spawn_output_readers(&launch.research_id, stdout, stderr);

        Ok(Box::new(ChildProcess { child }))
    }
}

/// Drain worker output into the log so the pipes never fill up
fn spawn_output_readers(research_id: &str, stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) {
    if let Some(stdout) = stdout {
        let research_id = research_id.to_string();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) => log::info!("[Worker {}] {}", research_id, line),
                    Err(e) => {
                        log::debug!("[Worker {}] stdout closed: {}", research_id, e);
                        break;
                    }
                }
            }
        });
    }

    if let Some(stderr) = stderr {
        let research_id = research_id.to_string();
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) => log::warn!("[Worker {}] stderr: {}", research_id, line),
                    Err(e) => {
                        log::debug!("[Worker {}] stderr closed: {}", research_id, e);
                        break;
                    }
                }
            }
        });
    }
}

struct ChildProcess {
    child: Child,
}

impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        // Reap so the worker does not linger as a zombie
        self.child.wait()?;
        Ok(())
    }
}

use clap::Parser;
use research_portal_lib::agents::CommandLauncher;
use research_portal_lib::config::{ConfigOverrides, PortalConfig};
use research_portal_lib::database::Database;
use research_portal_lib::server::{self, ServerAppState};
use research_portal_lib::session::{Orchestrator, OrchestratorSettings};
use research_portal_lib::shutdown::{self, ShutdownState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Research Portal - local orchestrator for autonomous research workers
#[derive(Parser, Debug)]
#[command(name = "research-portal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.research-portal/config.toml)
    #[arg(long, env = "RESEARCH_PORTAL_CONFIG")]
    config: Option<PathBuf>,

    /// Port to bind the server to
    #[arg(long, env = "RESEARCH_PORTAL_PORT")]
    port: Option<u16>,

    /// Address to bind the server to
    #[arg(long)]
    bind: Option<String>,

    /// Allowed CORS origin (repeatable); any origin when none is given
    #[arg(long = "cors-origin")]
    cors_origins: Vec<String>,

    /// SQLite database file
    #[arg(long, env = "RESEARCH_PORTAL_DB")]
    database: Option<PathBuf>,

    /// Directory that holds research project directories
    #[arg(long)]
    projects_root: Option<PathBuf>,

    /// Interpreter used to run the worker script
    #[arg(long)]
    worker_program: Option<String>,

    /// Research worker script
    #[arg(long, env = "RESEARCH_WORKER_SCRIPT")]
    worker_script: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match PortalConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.apply_overrides(ConfigOverrides {
        port: cli.port,
        bind: cli.bind,
        cors_origins: cli.cors_origins,
        database_path: cli.database,
        projects_root: cli.projects_root,
        worker_program: cli.worker_program,
        worker_script: cli.worker_script,
    });

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(config)) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: PortalConfig) -> Result<(), String> {
    let database_path = config.storage.database_path();
    let database = Database::open(&database_path)
        .map_err(|e| format!("Failed to open database {:?}: {}", database_path, e))?;
    log::info!("[Portal] Record store at {:?}", database_path);

    let launcher = CommandLauncher::new(
        config.worker.program.clone(),
        config.worker.script.clone(),
        Duration::from_millis(config.worker.startup_grace_ms),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(database),
        Arc::new(launcher),
        OrchestratorSettings::from_config(&config),
    ));

    if let Some(exit_events) = orchestrator.take_exit_events() {
        tokio::spawn(orchestrator.clone().forward_exit_events(exit_events));
    }
    tokio::spawn(
        orchestrator
            .clone()
            .sync_live_journals(Duration::from_millis(config.worker.poll_interval_ms)),
    );

    let reconciler = orchestrator.clone();
    match tokio::task::spawn_blocking(move || reconciler.reconcile_on_startup()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => log::warn!("[Portal] Startup reconciliation failed: {}", e),
        Err(e) => log::warn!("[Portal] Startup reconciliation panicked: {}", e),
    }

    let shutdown_state = ShutdownState::new();
    if let Err(e) = shutdown::register_signal_handlers(shutdown_state.clone()) {
        log::warn!("[Portal] Failed to register signal handlers: {}", e);
    }

    let port = config.server.port;
    let bind = config.server.bind.clone();
    let cors_origins = config.server.cors_origins.clone();
    let state = ServerAppState::new(orchestrator.clone(), config, shutdown_state.clone());

    let result = server::run_server(port, &bind, state, cors_origins).await;
    shutdown::detach_workers(&shutdown_state, &orchestrator);
    result
}

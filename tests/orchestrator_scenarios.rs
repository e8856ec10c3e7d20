// End-to-end orchestrator scenarios against a real SQLite store and project
// directories, with an in-process fake standing in for the worker script.

#[cfg(test)]
mod orchestrator_scenarios {
    use research_portal_lib::agents::{WorkerLaunch, WorkerLauncher, WorkerProcess};
    use research_portal_lib::database::Database;
    use research_portal_lib::file_storage::activities::ACTIVITIES_FILE;
    use research_portal_lib::file_storage::control::KILL_FILE;
    use research_portal_lib::file_storage::messages::{read_messages, MessageRole, MESSAGES_FILE};
    use research_portal_lib::file_storage::progress::PROGRESS_FILE;
    use research_portal_lib::session::{
        MessageOutcome, Orchestrator, OrchestratorError, OrchestratorSettings, StartParams,
        WorkerEvent, JOURNAL_ID_KEY, STOPPED_BY_USER, WORKER_EXITED_EARLY,
    };
    use research_portal_lib::{ActivityAction, AgentStatus, ResearchStatus};
    use serde_json::json;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    const RUNNING: i32 = i32::MIN;

    /// Shared view of one fake worker
    #[derive(Clone)]
    struct WorkerControl {
        exit: Arc<AtomicI32>,
        killed: Arc<AtomicBool>,
    }

    impl WorkerControl {
        fn exit_with(&self, code: i32) {
            self.exit.store(code, Ordering::SeqCst);
        }

        fn was_killed(&self) -> bool {
            self.killed.load(Ordering::SeqCst)
        }
    }

    struct FakeProcess {
        pid: u32,
        control: WorkerControl,
    }

    impl WorkerProcess for FakeProcess {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn try_wait(&mut self) -> io::Result<Option<i32>> {
            let code = self.control.exit.load(Ordering::SeqCst);
            Ok((code != RUNNING).then_some(code))
        }

        fn kill(&mut self) -> io::Result<()> {
            self.control.killed.store(true, Ordering::SeqCst);
            self.control.exit.store(-1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Records every launch and hands out controllable fake workers
    #[derive(Default)]
    struct FakeLauncher {
        launches: Mutex<Vec<WorkerLaunch>>,
        workers: Mutex<Vec<WorkerControl>>,
        count: AtomicUsize,
        fail: AtomicBool,
        /// (entered, release): the next launch reports in and waits for release
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl FakeLauncher {
        fn failing() -> Self {
            let launcher = Self::default();
            launcher.fail.store(true, Ordering::SeqCst);
            launcher
        }

        fn gated() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let launcher = Self::default();
            *launcher.gate.lock().unwrap() = Some((entered_tx, release_rx));
            (launcher, entered_rx, release_tx)
        }

        fn launch_count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }

        fn last_launch(&self) -> WorkerLaunch {
            self.launches.lock().unwrap().last().cloned().unwrap()
        }

        fn worker(&self, index: usize) -> WorkerControl {
            self.workers.lock().unwrap()[index].clone()
        }
    }

    impl WorkerLauncher for FakeLauncher {
        fn launch(&self, launch: &WorkerLaunch) -> anyhow::Result<Box<dyn WorkerProcess>> {
            if let Some((entered, release)) = self.gate.lock().unwrap().take() {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("worker exited immediately: missing interpreter");
            }

            let n = self.count.fetch_add(1, Ordering::SeqCst);
            let control = WorkerControl {
                exit: Arc::new(AtomicI32::new(RUNNING)),
                killed: Arc::new(AtomicBool::new(false)),
            };
            self.launches.lock().unwrap().push(launch.clone());
            self.workers.lock().unwrap().push(control.clone());
            Ok(Box::new(FakeProcess {
                pid: 4000 + n as u32,
                control,
            }))
        }
    }

    struct Harness {
        _temp_dir: TempDir,
        root: PathBuf,
        store: Arc<Database>,
        launcher: Arc<FakeLauncher>,
        orchestrator: Arc<Orchestrator>,
    }

    fn harness_with(launcher: FakeLauncher, poll_interval: Duration) -> Harness {
        let temp_dir = TempDir::new().unwrap();
        // Stored project directories are canonical, so compare against a canonical root
        let root = temp_dir.path().canonicalize().unwrap().join("research");
        let store = Arc::new(Database::open(temp_dir.path().join("portal.db")).unwrap());
        let launcher = Arc::new(launcher);

        let mut settings = OrchestratorSettings::new(&root);
        // Most tests use a long interval so only explicit polls observe exits
        settings.poll_interval = poll_interval;

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            launcher.clone(),
            settings,
        ));
        Harness {
            _temp_dir: temp_dir,
            root,
            store,
            launcher,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeLauncher::default(), Duration::from_secs(60))
    }

    fn start(h: &Harness, topic: &str) -> String {
        h.orchestrator.start(StartParams::new(topic)).unwrap()
    }

    fn project_dir(h: &Harness, research_id: &str) -> PathBuf {
        PathBuf::from(h.store.get_research(research_id).unwrap().unwrap().project_dir)
    }

    fn write_journal(dir: &Path, entries: serde_json::Value) {
        std::fs::write(dir.join(ACTIVITIES_FILE), entries.to_string()).unwrap();
    }

    #[test]
    fn test_start_records_pending_until_worker_confirmed() {
        let (launcher, entered, release) = FakeLauncher::gated();
        let h = harness_with(launcher, Duration::from_secs(60));

        let orchestrator = h.orchestrator.clone();
        let starter = thread::spawn(move || {
            orchestrator
                .start(StartParams::new("Solid state batteries"))
                .unwrap()
        });

        entered.recv().unwrap();
        let list = h.orchestrator.list_all().unwrap();
        assert_eq!(list.researches.len(), 1);
        assert_eq!(list.researches[0].status, ResearchStatus::Pending);
        assert_eq!(list.stats.pending_researches, 1);

        release.send(()).unwrap();
        let research_id = starter.join().unwrap();

        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert_eq!(state.research.status, ResearchStatus::InProgress);
        assert_eq!(state.research.total_agents, 1);
        assert!(state.active);
        assert_eq!(state.agents.len(), 1);
        assert_eq!(state.agents[0].agent.status, AgentStatus::Running);
        assert_eq!(state.agents[0].agent.name, "Research Agent #1");
        assert_eq!(
            state.agents[0].activities[0].action,
            ActivityAction::event("start")
        );
    }

    #[test]
    fn test_start_generates_project_dir_and_launch_arguments() {
        let h = harness();
        let mut params = StartParams::new("  Quantum Error Correction!  ");
        params.focus = Some("surface codes".to_string());
        let research_id = h.orchestrator.start(params).unwrap();

        let research = h.store.get_research(&research_id).unwrap().unwrap();
        assert_eq!(research.topic, "Quantum Error Correction!");
        let dir = std::path::Path::new(&research.project_dir);
        assert!(dir.is_dir());
        assert!(dir.starts_with(&h.root));
        let name = dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("quantum-error-correction-"), "{}", name);

        let launch = h.launcher.last_launch();
        assert_eq!(launch.research_id, research_id);
        assert_eq!(launch.provider, "anthropic");
        assert_eq!(launch.focus.as_deref(), Some("surface codes"));
        assert!(!launch.resume);
    }

    #[test]
    fn test_start_rejects_blank_topic() {
        let h = harness();
        let err = h.orchestrator.start(StartParams::new("   ")).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
        assert_eq!(h.launcher.launch_count(), 0);
        assert!(h.orchestrator.list_all().unwrap().researches.is_empty());
    }

    #[test]
    fn test_spawn_failure_marks_research_failed() {
        let h = harness_with(FakeLauncher::failing(), Duration::from_secs(60));
        let err = h
            .orchestrator
            .start(StartParams::new("Unlaunchable"))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SpawnFailure(_)));
        assert!(err.to_string().contains("exited immediately"));

        let list = h.orchestrator.list_all().unwrap();
        assert_eq!(list.researches.len(), 1);
        assert_eq!(list.researches[0].status, ResearchStatus::Failed);
        assert_eq!(list.researches[0].total_agents, 0);
        assert_eq!(list.stats.total_agents, 0);
    }

    #[test]
    fn test_stop_twice_returns_same_status() {
        let h = harness();
        let research_id = start(&h, "Tidal energy");

        let first = h
            .orchestrator
            .stop(&research_id, ResearchStatus::Completed)
            .unwrap();
        let second = h
            .orchestrator
            .stop(&research_id, ResearchStatus::Failed)
            .unwrap();
        assert_eq!(first, ResearchStatus::Completed);
        assert_eq!(second, ResearchStatus::Completed);
        assert!(h.launcher.worker(0).was_killed());

        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert!(!state.active);
        assert!(state.research.completed_at.is_some());
        assert_eq!(state.agents[0].agent.status, AgentStatus::Completed);
    }

    #[test]
    fn test_stop_as_failed_records_reason() {
        let h = harness();
        let research_id = start(&h, "Fusion startups");

        let status = h
            .orchestrator
            .stop(&research_id, ResearchStatus::Failed)
            .unwrap();
        assert_eq!(status, ResearchStatus::Failed);

        let state = h.orchestrator.get_state(&research_id).unwrap();
        let agent = &state.agents[0].agent;
        assert_eq!(agent.status, AgentStatus::Failed);
        assert_eq!(agent.error_message.as_deref(), Some(STOPPED_BY_USER));
    }

    #[test]
    fn test_stop_rejects_non_terminal_outcome() {
        let h = harness();
        let research_id = start(&h, "Soil carbon");
        let err = h
            .orchestrator
            .stop(&research_id, ResearchStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
        assert!(h.orchestrator.is_active(&research_id));
    }

    #[test]
    fn test_stop_unknown_research_is_not_found() {
        let h = harness();
        let err = h
            .orchestrator
            .stop("no-such-research", ResearchStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
    }

    #[test]
    fn test_message_after_stop_resumes_with_new_agent() {
        let h = harness();
        let research_id = start(&h, "Desalination costs");
        h.orchestrator
            .stop(&research_id, ResearchStatus::Completed)
            .unwrap();

        let research = h.store.get_research(&research_id).unwrap().unwrap();
        let dir = std::path::PathBuf::from(&research.project_dir);
        assert!(dir.join(KILL_FILE).exists());

        let outcome = h
            .orchestrator
            .append_message(&research_id, "What about reverse osmosis?")
            .unwrap();
        assert_eq!(
            outcome,
            MessageOutcome {
                logged: true,
                resumed: true
            }
        );

        assert!(!dir.join(KILL_FILE).exists());
        assert_eq!(h.launcher.launch_count(), 2);
        let launch = h.launcher.last_launch();
        assert!(launch.resume);
        let context = std::fs::read_to_string(launch.context_file.unwrap()).unwrap();
        assert!(context.contains("Desalination costs"));

        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert_eq!(state.research.status, ResearchStatus::InProgress);
        assert_eq!(state.research.total_agents, 2);
        assert_eq!(state.agents.len(), 2);
        assert_eq!(state.agents[1].agent.name, "Research Agent #2");
        assert!(state.active);

        let queue = read_messages(&dir);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].role, MessageRole::User);
        assert_eq!(queue[0].content, "What about reverse osmosis?");
    }

    #[test]
    fn test_message_to_live_worker_does_not_resume() {
        let h = harness();
        let research_id = start(&h, "Heat pumps");

        let outcome = h
            .orchestrator
            .append_message(&research_id, "Include cold climates")
            .unwrap();
        assert_eq!(
            outcome,
            MessageOutcome {
                logged: true,
                resumed: false
            }
        );
        assert_eq!(h.launcher.launch_count(), 1);

        let state = h.orchestrator.get_state(&research_id).unwrap();
        let activities = &state.agents[0].activities;
        let message = activities.last().unwrap();
        assert_eq!(message.action, ActivityAction::UserMessage);
        assert_eq!(message.description, "Include cold climates");
        assert!(message.metadata.get("messageId").is_some());
    }

    #[test]
    fn test_message_on_completed_research_resumes_and_logs() {
        let h = harness();
        let research_id = start(&h, "Grid storage");
        h.orchestrator
            .ingest_event(
                &research_id,
                WorkerEvent::from_value(json!({"type": "research_completed"})).unwrap(),
            )
            .unwrap();
        // The worker exits after reporting
        h.launcher.worker(0).exit_with(0);

        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert_eq!(state.research.status, ResearchStatus::Completed);
        assert_eq!(state.agents[0].agent.status, AgentStatus::Completed);

        let outcome = h
            .orchestrator
            .append_message(&research_id, "Now compare with pumped hydro")
            .unwrap();
        assert!(outcome.resumed);

        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert_eq!(state.research.status, ResearchStatus::InProgress);
        // The earlier completion is not undone by the resume
        assert_eq!(state.agents[0].agent.status, AgentStatus::Completed);
        assert!(state.agents[0]
            .activities
            .iter()
            .any(|a| a.action == ActivityAction::UserMessage
                && a.description == "Now compare with pumped hydro"));

        let queue = read_messages(std::path::Path::new(&state.research.project_dir));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_concurrent_resumes_spawn_one_worker() {
        let h = harness();
        let research_id = start(&h, "Hydrogen steel");
        h.orchestrator
            .stop(&research_id, ResearchStatus::Completed)
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let orchestrator = h.orchestrator.clone();
                let barrier = barrier.clone();
                let research_id = research_id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    orchestrator.resume(&research_id)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

        let resumed = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(resumed, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(OrchestratorError::InvalidState(_)))));
        assert_eq!(h.launcher.launch_count(), 2);

        let research = h.store.get_research(&research_id).unwrap().unwrap();
        assert_eq!(research.total_agents, 2);
    }

    #[test]
    fn test_resume_marks_orphaned_agent_lost() {
        let h = harness();
        let research_id = start(&h, "Ocean alkalinity");

        // A second orchestrator over the same store sees no live worker,
        // like a portal restarted while the Research was in progress
        let restarted = Orchestrator::new(
            h.store.clone(),
            h.launcher.clone(),
            OrchestratorSettings::new(&h.root),
        );
        assert_eq!(
            restarted.reconcile_on_startup().unwrap(),
            vec![research_id.clone()]
        );
        assert!(!restarted.is_active(&research_id));

        let agent = restarted.resume(&research_id).unwrap();
        assert_eq!(agent.status, AgentStatus::Running);

        let agents = h.store.get_research_agents(&research_id).unwrap();
        assert_eq!(agents[0].status, AgentStatus::Failed);
        assert_eq!(
            agents[0].error_message.as_deref(),
            Some("worker no longer running")
        );
        restarted.shutdown();
    }

    #[test]
    fn test_ingest_events_keep_order() {
        let h = harness();
        let research_id = start(&h, "Perovskite durability");

        let events = [
            json!({"type": "thought", "content": "Look for accelerated aging studies"}),
            json!({"type": "tool_call", "tool": "web_search", "args": {"query": "perovskite aging"}}),
            json!({"type": "tool_result", "output": "12 results"}),
        ];
        for event in events {
            h.orchestrator
                .ingest_event(&research_id, WorkerEvent::from_value(event).unwrap())
                .unwrap();
        }

        let state = h.orchestrator.get_state(&research_id).unwrap();
        let actions: Vec<_> = state.agents[0]
            .activities
            .iter()
            .skip(1)
            .map(|a| a.action.clone())
            .collect();
        assert_eq!(
            actions,
            vec![
                ActivityAction::Thought,
                ActivityAction::ToolCall,
                ActivityAction::ToolResult
            ]
        );
        let result = state.agents[0].activities.last().unwrap();
        assert_eq!(result.metadata["tool"], "web_search");
        assert_eq!(result.metadata["output"], "12 results");
    }

    #[test]
    fn test_ingest_failure_report_settles_research() {
        let h = harness();
        let research_id = start(&h, "Lithium recycling");
        h.orchestrator
            .ingest_event(
                &research_id,
                WorkerEvent::from_value(json!({"type": "research_failed", "error": "rate limited"}))
                    .unwrap(),
            )
            .unwrap();

        let research = h.store.get_research(&research_id).unwrap().unwrap();
        assert_eq!(research.status, ResearchStatus::Failed);
        let agents = h.store.get_research_agents(&research_id).unwrap();
        assert_eq!(agents[0].error_message.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_worker_exit_observed_by_poll_fails_research() {
        let h = harness();
        let research_id = start(&h, "Carbon capture");
        h.launcher.worker(0).exit_with(1);

        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert!(!state.active);
        assert_eq!(state.research.status, ResearchStatus::Failed);
        assert_eq!(state.agents[0].agent.status, AgentStatus::Failed);
        assert_eq!(
            state.agents[0].agent.error_message.as_deref(),
            Some(WORKER_EXITED_EARLY)
        );
    }

    #[test]
    fn test_worker_exit_reported_by_monitor() {
        let h = harness_with(FakeLauncher::default(), Duration::from_millis(10));
        let mut exits = h.orchestrator.take_exit_events().unwrap();
        assert!(h.orchestrator.take_exit_events().is_none());

        let research_id = start(&h, "Geothermal drilling");
        h.launcher.worker(0).exit_with(0);

        let event = exits.blocking_recv().unwrap();
        assert_eq!(event.research_id, research_id);
        assert_eq!(event.exit_code, Some(0));
        h.orchestrator.handle_worker_exit(&event).unwrap();
        // Settling twice is harmless
        h.orchestrator.handle_worker_exit(&event).unwrap();

        let research = h.store.get_research(&research_id).unwrap().unwrap();
        assert_eq!(research.status, ResearchStatus::Failed);
        assert!(!h.orchestrator.is_active(&research_id));
    }

    #[test]
    fn test_manual_research_gets_queue_file_only() {
        let h = harness();
        let manual_dir = h.root.join("hand-made");
        std::fs::create_dir_all(&manual_dir).unwrap();

        let outcome = h
            .orchestrator
            .append_message("hand-made", "Summarize the notes")
            .unwrap();
        assert_eq!(
            outcome,
            MessageOutcome {
                logged: false,
                resumed: false
            }
        );
        assert_eq!(read_messages(&manual_dir).len(), 1);
        assert_eq!(h.launcher.launch_count(), 0);

        let err = h
            .orchestrator
            .append_message("missing-dir", "hello")
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));

        let err = h
            .orchestrator
            .append_message("../escape", "hello")
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
    }

    #[test]
    fn test_malformed_agent_row_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("portal.db");
        let store = Arc::new(Database::open(&db_path).unwrap());
        let project_dir = temp_dir.path().join("project");
        std::fs::create_dir_all(&project_dir).unwrap();
        let research = store
            .create_research("Broken rows", &project_dir.to_string_lossy(), 0)
            .unwrap();

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "INSERT INTO agents (id, research_id, seq, name, status) VALUES ('bad-agent', ?1, 1, 'Agent', 'zombie')",
            rusqlite::params![research.id],
        )
        .unwrap();

        let orchestrator = Orchestrator::new(
            store,
            Arc::new(FakeLauncher::default()),
            OrchestratorSettings::new(temp_dir.path()),
        );
        let err = orchestrator.get_state(&research.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::MalformedStoreResult(_)));
        assert_eq!(err.kind(), "malformed_store_result");
    }

    #[test]
    fn test_recent_activities_across_researches() {
        let h = harness();
        let first = start(&h, "Wind turbine blades");
        let second = start(&h, "Small modular reactors");
        h.orchestrator
            .ingest_event(
                &first,
                WorkerEvent::from_value(json!({"type": "log", "message": "fetching papers"})).unwrap(),
            )
            .unwrap();

        let all = h.orchestrator.recent_activities(50).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].research_id, first);
        assert!(all.iter().any(|a| a.research_id == second));

        let limited = h.orchestrator.recent_activities(2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].activity.description, all[0].activity.description);
    }

    #[test]
    fn test_stats_count_live_workers() {
        let h = harness();
        let running = start(&h, "Direct air capture");
        let stopped = start(&h, "Green ammonia");
        h.orchestrator
            .stop(&stopped, ResearchStatus::Completed)
            .unwrap();

        let stats = h.orchestrator.list_all().unwrap().stats;
        assert_eq!(stats.total_researches, 2);
        assert_eq!(stats.active_researches, 1);
        assert_eq!(stats.completed_researches, 1);
        assert_eq!(stats.completed_agents, 1);
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.live_workers, 1);
        assert_eq!(h.orchestrator.live_research_ids(), vec![running]);
    }

    #[test]
    fn test_project_dir_spellings_resolve_to_one_research() {
        let h = harness();
        let shared = h.root.join("shared");
        let mut params = StartParams::new("Shared notes");
        params.project_dir = Some(shared.clone());
        let first = h.orchestrator.start(params).unwrap();
        assert_eq!(
            project_dir(&h, &first),
            shared.canonicalize().unwrap()
        );

        let spellings = [
            PathBuf::from(format!("{}/", shared.display())),
            h.root.join(".").join("shared"),
            h.root.join("shared").join("..").join("shared"),
        ];
        for spelling in spellings {
            let mut params = StartParams::new("Same place, other name");
            params.project_dir = Some(spelling.clone());
            match h.orchestrator.start(params) {
                Err(OrchestratorError::Conflict { existing, .. }) => assert_eq!(existing, first),
                other => panic!("expected conflict for {:?}, got {:?}", spelling, other),
            }
        }

        assert_eq!(h.orchestrator.list_all().unwrap().researches.len(), 1);
        assert_eq!(h.launcher.launch_count(), 1);
    }

    #[test]
    fn test_message_to_live_worker_reopens_completed_research() {
        let h = harness();
        let research_id = start(&h, "Battery passports");
        h.orchestrator
            .ingest_event(
                &research_id,
                WorkerEvent::from_value(json!({"type": "research_fully_completed"})).unwrap(),
            )
            .unwrap();
        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert_eq!(state.research.status, ResearchStatus::Completed);
        assert!(state.active);

        // The worker is still listening for follow-up questions
        let outcome = h
            .orchestrator
            .append_message(&research_id, "Which regions mandate them?")
            .unwrap();
        assert_eq!(
            outcome,
            MessageOutcome {
                logged: true,
                resumed: false
            }
        );
        assert_eq!(h.launcher.launch_count(), 1);
        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert_eq!(state.research.status, ResearchStatus::InProgress);
        assert!(state.active);

        // Exiting after the follow-up restores the reported outcome
        h.launcher.worker(0).exit_with(0);
        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert!(!state.active);
        assert_eq!(state.research.status, ResearchStatus::Completed);
        assert_eq!(state.agents[0].agent.status, AgentStatus::Completed);
    }

    #[test]
    fn test_worker_journal_is_ingested_once() {
        let h = harness();
        let research_id = start(&h, "Microplastics in soil");
        let dir = project_dir(&h, &research_id);

        write_journal(
            &dir,
            json!([
                {"type": "thought", "content": "Start with field surveys", "timestamp": "2025-03-01T10:00:00", "id": "activity_1_thought"},
                {"type": "tool_call", "tool": "web_search", "args": {"query": "soil microplastics"}, "id": "activity_2_tool_call"},
                {"type": "tool_result", "tool": "web_search", "output": "8 results", "id": "activity_3_tool_result"},
                {"type": "thought", "content": "no id, never ingested"}
            ]),
        );

        let state = h.orchestrator.get_state(&research_id).unwrap();
        let activities = &state.agents[0].activities;
        let actions: Vec<_> = activities.iter().skip(1).map(|a| a.action.clone()).collect();
        assert_eq!(
            actions,
            vec![
                ActivityAction::Thought,
                ActivityAction::ToolCall,
                ActivityAction::ToolResult
            ]
        );
        assert_eq!(activities[1].description, "Start with field surveys");
        assert_eq!(activities[1].metadata[JOURNAL_ID_KEY], "activity_1_thought");
        assert_eq!(activities[3].metadata["output"], "8 results");

        // Already-seen entries are skipped on every later sync
        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert_eq!(state.agents[0].activities.len(), 4);
        assert_eq!(h.orchestrator.sync_worker_activities(&research_id).unwrap(), 0);

        // The worker appends and trims; only the new entry is recorded
        write_journal(
            &dir,
            json!([
                {"type": "tool_result", "tool": "web_search", "output": "8 results", "id": "activity_3_tool_result"},
                {"type": "thought", "content": "Compare tillage methods", "id": "activity_4_thought"}
            ]),
        );
        assert_eq!(h.orchestrator.sync_worker_activities(&research_id).unwrap(), 1);
        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert_eq!(state.agents[0].activities.len(), 5);
    }

    #[test]
    fn test_journal_written_before_exit_is_kept() {
        let h = harness();
        let research_id = start(&h, "Rare earth substitutes");
        let dir = project_dir(&h, &research_id);

        write_journal(
            &dir,
            json!([
                {"type": "thought", "content": "Last words", "id": "activity_9_thought"},
                {"type": "research_completed", "id": "activity_10_research_completed"}
            ]),
        );
        h.launcher.worker(0).exit_with(0);

        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert!(!state.active);
        assert_eq!(state.research.status, ResearchStatus::Completed);
        assert_eq!(state.agents[0].agent.status, AgentStatus::Completed);
        assert!(state.agents[0]
            .activities
            .iter()
            .any(|a| a.description == "Last words"));
    }

    #[test]
    fn test_messages_queued_before_first_worker_are_logged() {
        let h = harness();
        let dir = h.root.join("prepared");
        std::fs::create_dir_all(&dir).unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        std::fs::write(
            dir.join(MESSAGES_FILE),
            json!([
                {"id": "old", "timestamp": now - 3_600_000, "role": "user", "content": "from an earlier session", "processed": false},
                {"id": "early", "timestamp": now + 60_000, "role": "user", "content": "Focus on Europe", "processed": false},
                {"id": "done", "timestamp": now + 60_000, "role": "user", "content": "already answered", "processed": true}
            ])
            .to_string(),
        )
        .unwrap();

        let mut params = StartParams::new("Heat networks");
        params.project_dir = Some(dir);
        let research_id = h.orchestrator.start(params).unwrap();

        let state = h.orchestrator.get_state(&research_id).unwrap();
        let messages: Vec<_> = state.agents[0]
            .activities
            .iter()
            .filter(|a| a.action == ActivityAction::UserMessage)
            .collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].description, "Focus on Europe");
        assert_eq!(messages[0].metadata["messageId"], "early");
    }

    #[test]
    fn test_state_reports_clamped_progress() {
        let h = harness();
        let research_id = start(&h, "Induction cooking");
        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert!(state.progress.is_none());
        assert_eq!(state.percent_complete, 0.0);

        std::fs::write(
            project_dir(&h, &research_id).join(PROGRESS_FILE),
            json!({"percentage": 140, "currentTask": "Writing summary"}).to_string(),
        )
        .unwrap();
        let state = h.orchestrator.get_state(&research_id).unwrap();
        assert_eq!(state.percent_complete, 100.0);
        assert_eq!(
            state.progress.unwrap().current_task.as_deref(),
            Some("Writing summary")
        );
    }
}

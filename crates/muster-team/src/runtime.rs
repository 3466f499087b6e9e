use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::TimeZone;
use muster_agents::{
    build_worker_env, contract, launch_args, parse_output, prompt_mode_args,
    validate_cli_available,
};
use muster_core::config::TeamConfig;
use muster_core::event_bus::EventBus;
use muster_core::paths::{default_state_root, TeamPaths};
use muster_core::store::write_document;
use muster_mux::{LayoutStabilizer, MuxControl};
use muster_observability::{emit_event, ObservabilityEvent, ProcessKind};
use muster_pipeline::{default_stages, PipelineOrchestrator, StageContext, TickOutcome};
use muster_types::{TeamPhase, WorkerInfo};
use serde::Serialize;
use serde_json::json;
use tokio::process::Command;
use tracing::{info, warn, Level};

use crate::heartbeat::{is_worker_alive, read_heartbeat};
use crate::messaging::Messenger;
use crate::phase::{infer_phase, is_terminal_phase};
use crate::tasks::TaskStore;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub tick_interval: Duration,
    /// Stop after this many monitor ticks even without a terminal phase.
    pub max_ticks: Option<u64>,
    /// Startup CLI validation; tests running without the agent binaries
    /// installed turn this off.
    pub validate_clis: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_ticks: None,
            validate_clis: true,
        }
    }
}

/// The structured result payload handed back at the process boundary.
#[derive(Debug, Clone, Serialize)]
pub struct TeamResult {
    pub team_name: String,
    pub phase: TeamPhase,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub workers: Vec<WorkerInfo>,
}

/// Leader-side team lifecycle: spawn worker panes, run the monitor loop,
/// tear everything down. Owns the task files, workers record, and the
/// pipeline state; workers only ever write their own heartbeats and
/// messages.
pub struct TeamRuntime {
    config: TeamConfig,
    paths: TeamPaths,
    state_root: PathBuf,
    session: String,
    mux: Arc<dyn MuxControl>,
    bus: EventBus,
    stabilizer: Arc<LayoutStabilizer>,
    messenger: Messenger,
    tasks: TaskStore,
    workers: Vec<WorkerInfo>,
    pipeline: Option<PipelineDriver>,
}

/// Leader-held handle on the staged pipeline: the orchestrator plus the
/// worker pane whose output carries the stage completion signals.
struct PipelineDriver {
    orchestrator: PipelineOrchestrator,
    worker: String,
    pane_id: Option<String>,
    done: bool,
}

impl TeamRuntime {
    pub async fn start(
        config: TeamConfig,
        mux: Arc<dyn MuxControl>,
        options: &RunOptions,
    ) -> anyhow::Result<TeamRuntime> {
        // Fail fast before any pane exists: a missing CLI half-way
        // through startup would leave orphan panes behind.
        if options.validate_clis {
            for def in &config.workers {
                validate_cli_available(def.agent)
                    .with_context(|| format!("worker `{}` cannot start", def.name))?;
            }
        }

        let state_root = config
            .state_root
            .clone()
            .unwrap_or_else(default_state_root);
        let paths = TeamPaths::new(&state_root);
        let team = config.team_name.clone();
        write_document(&paths.config_file(&team), &config, "leader").await?;

        let session = format!("muster-{team}");
        let leader_pane = std::env::var("TMUX_PANE").unwrap_or_else(|_| "%0".to_string());
        let bus = EventBus::new();
        let stabilizer = LayoutStabilizer::with_debounce(
            Arc::clone(&mux),
            &session,
            &leader_pane,
            config.layout_debounce(),
        );
        let messenger = Messenger::new(paths.clone(), &team, Arc::clone(&mux), bus.clone());
        let tasks = TaskStore::new(paths.clone(), &team, "leader");

        let cwd = std::env::current_dir()?;
        let mut workers = Vec::with_capacity(config.workers.len());
        for def in &config.workers {
            let pane_id = mux
                .create_pane(&session, &cwd)
                .await
                .with_context(|| format!("failed creating pane for worker `{}`", def.name))?;
            let launch = launch_command(&config, def, &state_root);
            if let Err(err) = mux.send_literal_keys(&pane_id, &launch).await {
                warn!(worker = %def.name, error = %err, "failed typing launch command");
            }
            let mut info = WorkerInfo::new(&def.name, def.agent);
            info.pane_id = Some(pane_id);
            info.model = def.model.clone();
            messenger
                .publish(
                    "worker_started",
                    json!({ "worker": def.name, "agent": def.agent.as_str() }),
                )
                .await;
            workers.push(info);
            stabilizer.request_layout();
        }
        write_document(&paths.workers_file(&team), &workers, "leader").await?;
        info!(team = %team, workers = workers.len(), "team started");
        emit_event(
            Level::INFO,
            ProcessKind::Leader,
            ObservabilityEvent {
                event: "team_started",
                component: "runtime",
                team: Some(&team),
                ..ObservabilityEvent::default()
            },
        );

        let pipeline = config.objective.clone().and_then(|objective| {
            let Some(first) = workers.first() else {
                warn!("objective set but no workers configured");
                return None;
            };
            Some(PipelineDriver {
                orchestrator: PipelineOrchestrator::new(
                    paths.pipeline_file(&team),
                    "leader",
                    default_stages(),
                    config.pipeline_config(),
                    StageContext {
                        team_name: team.clone(),
                        objective,
                        notes: None,
                    },
                ),
                worker: first.name.clone(),
                pane_id: first.pane_id.clone(),
                done: false,
            })
        });

        let mut runtime = Self {
            config,
            paths,
            state_root,
            session,
            mux,
            bus,
            stabilizer,
            messenger,
            tasks,
            workers,
            pipeline,
        };
        runtime.advance_pipeline().await?;
        Ok(runtime)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub fn workers(&self) -> &[WorkerInfo] {
        &self.workers
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Drives the staged pipeline one step: captures the pipeline pane,
    /// feeds its content to the orchestrator, and hands any fresh stage
    /// prompt to the pipeline worker as an inbox instruction. Stage
    /// completion signals only ever appear in pane output, never in the
    /// short wake triggers this side types into the pane.
    async fn advance_pipeline(&mut self) -> anyhow::Result<()> {
        let Some(driver) = self.pipeline.as_mut() else {
            return Ok(());
        };
        if driver.done {
            return Ok(());
        }
        let output = match driver.pane_id.as_deref() {
            Some(pane_id) => match self.mux.capture_pane(pane_id).await {
                Ok(content) => Some(content),
                Err(err) => {
                    warn!(pane_id, error = %err, "failed capturing pipeline pane");
                    None
                }
            },
            None => None,
        };
        match driver
            .orchestrator
            .tick_until_actionable(output.as_deref())
            .await?
        {
            TickOutcome::Prompt { stage, text } => {
                self.messenger
                    .queue_inbox_instruction(&driver.worker, &text, driver.pane_id.as_deref())
                    .await?;
                self.messenger
                    .publish(
                        "pipeline_stage_started",
                        json!({ "stage": stage.as_str(), "worker": driver.worker }),
                    )
                    .await;
            }
            TickOutcome::Complete => {
                driver.done = true;
                info!(team = %self.config.team_name, "pipeline complete");
                self.messenger
                    .publish(
                        "pipeline_complete",
                        json!({ "team": self.config.team_name }),
                    )
                    .await;
            }
            TickOutcome::Waiting { .. } => {}
            outcome => {
                // tick_until_actionable resolves Skipped/Advanced internally.
                warn!(?outcome, "unexpected pipeline outcome");
            }
        }
        Ok(())
    }

    /// One leader cycle: refresh heartbeat views, recompute the phase
    /// cache, publish events, ask for a layout pass. Never blocks on
    /// worker activity.
    pub async fn monitor_tick(&mut self) -> anyhow::Result<TeamPhase> {
        let team = self.config.team_name.clone();
        let max_age = self.config.heartbeat_max_age();
        for worker in &mut self.workers {
            if let Some(beat) = read_heartbeat(&self.paths, &team, &worker.name).await? {
                worker.last_heartbeat = chrono::Utc.timestamp_millis_opt(beat.at_ms as i64).single();
            }
            if !is_worker_alive(&self.paths, &team, &worker.name, max_age).await? {
                self.messenger
                    .publish("worker_stale", json!({ "worker": worker.name }))
                    .await;
            }
        }
        write_document(&self.paths.workers_file(&team), &self.workers, "leader").await?;
        self.advance_pipeline().await?;

        let tasks = self.tasks.list().await?;
        let phase = infer_phase(&tasks);
        write_document(&self.paths.phase_file(&team), &phase, "leader").await?;
        self.messenger
            .publish(
                "phase_recomputed",
                json!({ "phase": phase.as_str(), "tasks": tasks.len() }),
            )
            .await;
        self.stabilizer.request_layout();
        Ok(phase)
    }

    /// One-shot headless delivery for agents that support it: spawn the
    /// CLI with the instruction and return its parsed response. Callers
    /// fall back to keystroke injection when this returns `None`.
    pub async fn run_headless_instruction(
        &self,
        worker: &WorkerInfo,
        instruction: &str,
    ) -> anyhow::Result<Option<String>> {
        let Some(args) = prompt_mode_args(worker.agent_kind, instruction) else {
            return Ok(None);
        };
        let binary = contract(worker.agent_kind).binary;
        let env = build_worker_env(
            &self.config.team_name,
            &worker.name,
            worker.agent_kind,
            &self.state_root,
        );
        let output = Command::new(binary)
            .args(&args)
            .env_clear()
            .envs(env)
            .output()
            .await
            .with_context(|| format!("failed launching {binary}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{binary} exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        Ok(Some(parse_output(worker.agent_kind, &raw)))
    }

    /// Tears the team down: kill panes, settle the layout, stop the
    /// stabilizer. Pane kills are best-effort; a pane closed by hand is
    /// not an error.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        for worker in &self.workers {
            if let Some(pane_id) = &worker.pane_id {
                if let Err(err) = self.mux.kill_pane(pane_id).await {
                    warn!(worker = %worker.name, error = %err, "failed killing pane");
                }
            }
        }
        self.stabilizer.flush().await;
        self.stabilizer.dispose();
        self.messenger
            .publish("team_stopped", json!({ "team": self.config.team_name }))
            .await;
        info!(team = %self.config.team_name, "team stopped");
        emit_event(
            Level::INFO,
            ProcessKind::Leader,
            ObservabilityEvent {
                event: "team_stopped",
                component: "runtime",
                team: Some(&self.config.team_name),
                ..ObservabilityEvent::default()
            },
        );
        Ok(())
    }
}

/// Command line typed into a fresh worker pane. Identity travels as env
/// assignments prefixed to the invocation.
fn launch_command(
    config: &TeamConfig,
    def: &muster_core::config::WorkerDefinition,
    state_root: &std::path::Path,
) -> String {
    let binary = contract(def.agent).binary;
    let args = launch_args(def.agent, def.model.as_deref(), &[]);
    let mut parts = vec![
        format!("MUSTER_TEAM={}", config.team_name),
        format!("MUSTER_WORKER={}", def.name),
        format!("MUSTER_AGENT_KIND={}", def.agent.as_str()),
        format!("MUSTER_STATE_ROOT={}", state_root.display()),
        binary.to_string(),
    ];
    parts.extend(args);
    parts.join(" ")
}

/// The runtime entry point: start, monitor until the phase is terminal
/// (or the tick budget runs out), tear down, report.
pub async fn run_team(
    config: TeamConfig,
    mux: Arc<dyn MuxControl>,
    options: RunOptions,
) -> anyhow::Result<TeamResult> {
    let mut runtime = TeamRuntime::start(config, mux, &options).await?;
    let mut ticks = 0u64;
    let phase = loop {
        let phase = runtime.monitor_tick().await?;
        ticks += 1;
        if is_terminal_phase(phase) {
            break phase;
        }
        if options.max_ticks.is_some_and(|max| ticks >= max) {
            break phase;
        }
        tokio::time::sleep(options.tick_interval).await;
    };
    let tasks = runtime.tasks.list().await?;
    let result = TeamResult {
        team_name: runtime.config.team_name.clone(),
        phase,
        tasks_total: tasks.len(),
        tasks_completed: tasks
            .iter()
            .filter(|t| t.status == muster_types::TaskStatus::Completed && !t.is_failed())
            .count(),
        tasks_failed: tasks.iter().filter(|t| t.is_failed()).count(),
        workers: runtime.workers.clone(),
    };
    runtime.shutdown().await?;
    Ok(result)
}

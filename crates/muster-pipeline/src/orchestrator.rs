use std::path::PathBuf;

use anyhow::Context;
use muster_core::store::{update_document, DEFAULT_LOCK_TTL};
use muster_core::now_ms;
use muster_types::{PipelineConfig, PipelineState, StageId, StageStatus};
use serde_json::json;
use tracing::{debug, info};

use crate::adapter::{StageAdapter, StageContext};

/// What the caller should do next after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Deliver this prompt to the agent and feed its output back in.
    Prompt { stage: StageId, text: String },
    /// The current stage was skipped by config; tick again.
    Skipped { stage: StageId },
    /// The active stage's completion signal was consumed; the stage is
    /// done. Tick again.
    Advanced { stage: StageId },
    /// The current stage is active and its signal has not appeared yet.
    Waiting { stage: StageId },
    /// Every stage is complete or skipped.
    Complete,
}

/// Drives one agent through the ordered stages, persisting progress so a
/// crashed session resumes where it left off. Persistence goes through
/// the same lock-guarded envelope path as team state.
pub struct PipelineOrchestrator {
    state_path: PathBuf,
    writer: String,
    stages: Vec<Box<dyn StageAdapter>>,
    config: PipelineConfig,
    context: StageContext,
}

impl PipelineOrchestrator {
    pub fn new(
        state_path: PathBuf,
        writer: &str,
        stages: Vec<Box<dyn StageAdapter>>,
        config: PipelineConfig,
        context: StageContext,
    ) -> Self {
        Self {
            state_path,
            writer: writer.to_string(),
            stages,
            config,
            context,
        }
    }

    /// Advances the persisted state by at most one transition and reports
    /// what the caller should do. `agent_output` is the output produced
    /// since the last tick, scanned for the active stage's completion
    /// signal.
    pub async fn tick(&self, agent_output: Option<&str>) -> anyhow::Result<TickOutcome> {
        let mut outcome = TickOutcome::Complete;
        update_document::<PipelineState, _>(
            &self.state_path,
            &self.writer,
            DEFAULT_LOCK_TTL,
            |state| {
                outcome = self.step(state, agent_output);
            },
        )
        .await
        .with_context(|| format!("failed ticking pipeline {}", self.state_path.display()))?;
        Ok(outcome)
    }

    /// Runs skip/advance transitions until the pipeline is waiting on the
    /// agent (or done), returning the first actionable outcome.
    pub async fn tick_until_actionable(
        &self,
        agent_output: Option<&str>,
    ) -> anyhow::Result<TickOutcome> {
        let mut output = agent_output;
        loop {
            match self.tick(output).await? {
                TickOutcome::Skipped { .. } | TickOutcome::Advanced { .. } => {
                    // Output was consumed by the transition it triggered.
                    output = None;
                }
                actionable => return Ok(actionable),
            }
        }
    }

    fn step(&self, state: &mut PipelineState, agent_output: Option<&str>) -> TickOutcome {
        loop {
            if state.is_complete() {
                return TickOutcome::Complete;
            }
            let record = &state.stages[state.current_stage];
            let stage_id = record.id;
            let Some(adapter) = self.stages.iter().find(|s| s.id() == stage_id) else {
                // A stage with no adapter cannot run; treat it as skipped.
                self.transition(state, StageStatus::Skipped);
                return TickOutcome::Skipped { stage: stage_id };
            };

            match record.status {
                StageStatus::Complete | StageStatus::Skipped => {
                    // Externally-written state can point at a stage that is
                    // already finished. Move past it here, without returning,
                    // so the caller's output still reaches the active stage.
                    self.advance(state);
                }
                StageStatus::Pending if adapter.should_skip(&self.config) => {
                    info!(stage = stage_id.as_str(), "stage disabled by config");
                    self.transition(state, StageStatus::Skipped);
                    return TickOutcome::Skipped { stage: stage_id };
                }
                StageStatus::Pending => {
                    state.stages[state.current_stage].status = StageStatus::Active;
                    state.revision += 1;
                    self.track(state, stage_id, "activated");
                    return TickOutcome::Prompt {
                        stage: stage_id,
                        text: adapter.prompt(&self.context),
                    };
                }
                StageStatus::Active => {
                    let signalled = agent_output
                        .map(|out| out.contains(adapter.completion_signal()))
                        .unwrap_or(false);
                    return if signalled {
                        debug!(stage = stage_id.as_str(), "completion signal observed");
                        self.transition(state, StageStatus::Complete);
                        TickOutcome::Advanced { stage: stage_id }
                    } else {
                        TickOutcome::Waiting { stage: stage_id }
                    };
                }
            }
        }
    }

    fn transition(&self, state: &mut PipelineState, status: StageStatus) {
        let stage_id = state.stages[state.current_stage].id;
        state.stages[state.current_stage].status = status;
        self.advance(state);
        self.track(
            state,
            stage_id,
            match status {
                StageStatus::Complete => "completed",
                StageStatus::Skipped => "skipped",
                StageStatus::Pending => "pending",
                StageStatus::Active => "activated",
            },
        );
    }

    fn advance(&self, state: &mut PipelineState) {
        state.current_stage += 1;
        state.revision += 1;
    }

    fn track(&self, state: &mut PipelineState, stage: StageId, what: &str) {
        state.tracking = Some(json!({
            "last_stage": stage.as_str(),
            "last_transition": what,
            "at_ms": now_ms(),
        }));
    }
}

use muster_types::{PipelineConfig, StageId};

/// Inputs available to a stage when it renders its prompt.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub team_name: String,
    /// The high-level objective the agent is working toward.
    pub objective: String,
    pub notes: Option<String>,
}

/// One pluggable pipeline phase: whether to run it, what to tell the
/// agent, and the marker that proves the agent finished it.
pub trait StageAdapter: Send + Sync {
    fn id(&self) -> StageId;
    fn should_skip(&self, config: &PipelineConfig) -> bool;
    fn prompt(&self, context: &StageContext) -> String;
    /// Unique string the agent is instructed to print when the stage is
    /// done. The orchestrator scans output for it verbatim.
    fn completion_signal(&self) -> &'static str;
}

pub struct PlanStage;

impl StageAdapter for PlanStage {
    fn id(&self) -> StageId {
        StageId::Plan
    }

    fn should_skip(&self, config: &PipelineConfig) -> bool {
        !config.plan
    }

    fn prompt(&self, context: &StageContext) -> String {
        format!(
            "Objective: {}\n\nBreak the objective into a concrete, ordered task list. \
             Do not write any code yet. When the plan is written down, print {} on its own line.",
            context.objective,
            self.completion_signal()
        )
    }

    fn completion_signal(&self) -> &'static str {
        "MUSTER_PLAN_COMPLETE"
    }
}

pub struct ExecuteStage;

impl StageAdapter for ExecuteStage {
    fn id(&self) -> StageId {
        StageId::Execute
    }

    // The execute stage is the pipeline's reason to exist; it never skips.
    fn should_skip(&self, _config: &PipelineConfig) -> bool {
        false
    }

    fn prompt(&self, context: &StageContext) -> String {
        let notes = context
            .notes
            .as_deref()
            .map(|n| format!("\n\nNotes from planning: {n}"))
            .unwrap_or_default();
        format!(
            "Work through the task list for: {}.{notes}\n\nWhen every task is done, \
             print {} on its own line.",
            context.objective,
            self.completion_signal()
        )
    }

    fn completion_signal(&self) -> &'static str {
        "MUSTER_EXECUTE_COMPLETE"
    }
}

pub struct FixStage;

impl StageAdapter for FixStage {
    fn id(&self) -> StageId {
        StageId::Fix
    }

    fn should_skip(&self, config: &PipelineConfig) -> bool {
        !config.fix
    }

    fn prompt(&self, context: &StageContext) -> String {
        format!(
            "Verify the work done for: {}. Run the test suite, fix anything broken, \
             and repeat until it passes. Then print {} on its own line.",
            context.objective,
            self.completion_signal()
        )
    }

    fn completion_signal(&self) -> &'static str {
        "MUSTER_FIX_COMPLETE"
    }
}

pub struct QaStage;

impl StageAdapter for QaStage {
    fn id(&self) -> StageId {
        StageId::Qa
    }

    fn should_skip(&self, config: &PipelineConfig) -> bool {
        !config.qa
    }

    fn prompt(&self, context: &StageContext) -> String {
        format!(
            "Review the finished work for: {} as a skeptical second reader. Flag gaps \
             against the objective and address them. Then print {} on its own line.",
            context.objective,
            self.completion_signal()
        )
    }

    fn completion_signal(&self) -> &'static str {
        "MUSTER_QA_COMPLETE"
    }
}

/// Canonical stage order.
pub fn default_stages() -> Vec<Box<dyn StageAdapter>> {
    vec![
        Box::new(PlanStage),
        Box::new(ExecuteStage),
        Box::new(FixStage),
        Box::new(QaStage),
    ]
}

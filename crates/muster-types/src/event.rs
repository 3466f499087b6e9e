use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broadcast payload for everything the team does: queue/notify actions,
/// phase changes, layout requests, worker lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamEvent {
    pub event_type: String,
    pub properties: Value,
    pub emitted_at: DateTime<Utc>,
}

impl TeamEvent {
    pub fn new(event_type: impl Into<String>, properties: Value) -> Self {
        Self {
            event_type: event_type.into(),
            properties,
            emitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamPhase {
    Initializing,
    Planning,
    Executing,
    Fixing,
    Completed,
    Failed,
}

impl TeamPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TeamPhase::Initializing => "initializing",
            TeamPhase::Planning => "planning",
            TeamPhase::Executing => "executing",
            TeamPhase::Fixing => "fixing",
            TeamPhase::Completed => "completed",
            TeamPhase::Failed => "failed",
        }
    }
}

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Plan,
    Execute,
    Fix,
    Qa,
}

// Deserialization goes through `parse` so deprecated aliases in old
// persisted state normalize silently to the canonical id.
impl<'de> Deserialize<'de> for StageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        StageId::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown pipeline stage `{raw}`")))
    }
}

impl StageId {
    pub const ORDERED: [StageId; 4] = [StageId::Plan, StageId::Execute, StageId::Fix, StageId::Qa];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Plan => "plan",
            StageId::Execute => "execute",
            StageId::Fix => "fix",
            StageId::Qa => "qa",
        }
    }

    /// Accepts deprecated aliases from old persisted state or old
    /// invocations and maps them to the canonical id.
    pub fn parse(raw: &str) -> Option<StageId> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "plan" | "planning" => Some(StageId::Plan),
            "execute" | "implementation" | "impl" => Some(StageId::Execute),
            "fix" | "fixing" | "verify" => Some(StageId::Fix),
            "qa" | "quality" | "review" => Some(StageId::Qa),
            _ => None,
        }
    }
}

/// Per-team toggles for the staged pipeline. Defaults keep every stage on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub plan: bool,
    #[serde(default = "default_true")]
    pub fix: bool,
    #[serde(default = "default_true")]
    pub qa: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            plan: true,
            fix: true,
            qa: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Complete,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub id: StageId,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub current_stage: usize,
    pub stages: Vec<StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<Value>,
    pub revision: u64,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            current_stage: 0,
            stages: StageId::ORDERED
                .iter()
                .map(|id| StageRecord {
                    id: *id,
                    status: StageStatus::Pending,
                })
                .collect(),
            tracking: None,
            revision: 1,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_stage >= self.stages.len()
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::fs;

use muster_types::{AgentKind, PipelineConfig};

pub const DEFAULT_HEARTBEAT_MAX_AGE_MS: u64 = 60_000;
pub const DEFAULT_LAYOUT_DEBOUNCE_MS: u64 = 150;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDefinition {
    pub name: String,
    pub agent: AgentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// The structured configuration payload the runtime entry point accepts.
/// A workspace-local `.muster/team.yaml` provides defaults; optional
/// fields stay unset here so the merge can tell "payload said nothing"
/// apart from "payload chose the default".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub team_name: String,
    #[serde(default)]
    pub workers: Vec<WorkerDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,
    /// High-level goal the team works toward; seeds the staged pipeline
    /// when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_max_age_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_debounce_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_root: Option<PathBuf>,
}

impl TeamConfig {
    /// Effective pipeline toggles; unset keeps every stage on.
    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_default()
    }

    pub fn heartbeat_max_age(&self) -> Duration {
        Duration::from_millis(
            self.heartbeat_max_age_ms
                .unwrap_or(DEFAULT_HEARTBEAT_MAX_AGE_MS),
        )
    }

    pub fn layout_debounce(&self) -> Duration {
        Duration::from_millis(
            self.layout_debounce_ms
                .unwrap_or(DEFAULT_LAYOUT_DEBOUNCE_MS),
        )
    }
}

/// Reads `.muster/team.yaml` from the workspace if present.
pub async fn load_workspace_config(workspace_root: &Path) -> anyhow::Result<Option<TeamConfig>> {
    let path = workspace_root.join(".muster").join("team.yaml");
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed reading {}", path.display()))?;
    let parsed = serde_yaml::from_str::<TeamConfig>(&raw)
        .with_context(|| format!("failed parsing {}", path.display()))?;
    Ok(Some(parsed))
}

/// Overlays the runtime payload on top of workspace defaults. Worker
/// lists replace wholesale; every optional field keeps the payload value
/// when set and falls back to the file otherwise.
pub fn merge_config(file: Option<TeamConfig>, payload: TeamConfig) -> TeamConfig {
    let Some(file) = file else {
        return payload;
    };
    TeamConfig {
        team_name: payload.team_name,
        workers: if payload.workers.is_empty() {
            file.workers
        } else {
            payload.workers
        },
        pipeline: payload.pipeline.or(file.pipeline),
        objective: payload.objective.or(file.objective),
        heartbeat_max_age_ms: payload.heartbeat_max_age_ms.or(file.heartbeat_max_age_ms),
        layout_debounce_ms: payload.layout_debounce_ms.or(file.layout_debounce_ms),
        state_root: payload.state_root.or(file.state_root),
    }
}

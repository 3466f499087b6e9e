use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use muster_core::now_ms;
use muster_core::paths::{default_state_root, TeamPaths};
use muster_core::store::{read_document, write_document};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker: String,
    pub pid: u32,
    pub at_ms: u64,
}

/// Workers call this periodically; the leader only ever reads.
pub async fn write_heartbeat(
    paths: &TeamPaths,
    team: &str,
    worker: &str,
) -> anyhow::Result<Heartbeat> {
    let beat = Heartbeat {
        worker: worker.to_string(),
        pid: std::process::id(),
        at_ms: now_ms(),
    };
    write_document(&paths.heartbeat_file(team, worker), &beat, worker).await?;
    Ok(beat)
}

/// Entry point behind `muster heartbeat`: a worker pane runs it to
/// record its own liveness, identified by the env variables the launch
/// command exported into the pane.
pub async fn record_heartbeat_from_env() -> anyhow::Result<Heartbeat> {
    let team = std::env::var("MUSTER_TEAM").context("MUSTER_TEAM is not set")?;
    let worker = std::env::var("MUSTER_WORKER").context("MUSTER_WORKER is not set")?;
    let root = std::env::var_os("MUSTER_STATE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(default_state_root);
    write_heartbeat(&TeamPaths::new(&root), &team, &worker).await
}

pub async fn read_heartbeat(
    paths: &TeamPaths,
    team: &str,
    worker: &str,
) -> anyhow::Result<Option<Heartbeat>> {
    read_document(&paths.heartbeat_file(team, worker)).await
}

/// Stale means no heartbeat or one older than `max_age`. A stale worker
/// is reported, never killed; it may just be busy.
pub async fn is_worker_alive(
    paths: &TeamPaths,
    team: &str,
    worker: &str,
    max_age: Duration,
) -> anyhow::Result<bool> {
    let Some(beat) = read_heartbeat(paths, team, worker).await? else {
        return Ok(false);
    };
    let age_ms = now_ms().saturating_sub(beat.at_ms);
    Ok(age_ms <= max_age.as_millis() as u64)
}

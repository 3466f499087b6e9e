use std::sync::Arc;

use anyhow::Context;
use muster_core::config::{load_workspace_config, merge_config, TeamConfig};
use muster_core::paths::default_state_root;
use muster_mux::TmuxControl;
use muster_observability::{canonical_logs_dir_from_root, init_process_logging, ProcessKind};
use muster_team::{record_heartbeat_from_env, run_team, RunOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

const LOG_RETENTION_DAYS: u64 = 14;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match std::env::args().nth(1).as_deref() {
        Some("heartbeat") => heartbeat_main().await,
        _ => leader_main().await,
    }
}

/// Worker-side mode: `muster heartbeat`, run from inside a pane whose
/// launch command exported the MUSTER_* identity variables.
async fn heartbeat_main() -> anyhow::Result<()> {
    let state_root = std::env::var_os("MUSTER_STATE_ROOT")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(default_state_root);
    let logs_dir = canonical_logs_dir_from_root(&state_root);
    let (_log_guard, _) = init_process_logging(ProcessKind::Worker, &logs_dir, LOG_RETENTION_DAYS)?;
    let beat = record_heartbeat_from_env().await?;
    info!(worker = %beat.worker, "heartbeat recorded");
    Ok(())
}

/// Reads a JSON team configuration payload from stdin, runs the team to
/// a terminal phase, and writes a JSON result payload to stdout.
async fn leader_main() -> anyhow::Result<()> {
    let state_root = default_state_root();
    let logs_dir = canonical_logs_dir_from_root(&state_root);
    let (_log_guard, log_info) =
        init_process_logging(ProcessKind::Leader, &logs_dir, LOG_RETENTION_DAYS)?;
    info!(logs = %log_info.logs_dir, "logging initialized");

    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("failed reading configuration payload from stdin")?;
    let payload: TeamConfig =
        serde_json::from_str(&raw).context("malformed configuration payload")?;

    let workspace = std::env::current_dir()?;
    let defaults = load_workspace_config(&workspace).await?;
    let config = merge_config(defaults, payload);
    info!(team = %config.team_name, workers = config.workers.len(), "starting team");

    let mux = Arc::new(TmuxControl::new());
    let result = run_team(config, mux, RunOptions::default()).await?;

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(serde_json::to_string_pretty(&result)?.as_bytes())
        .await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

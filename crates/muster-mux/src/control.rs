use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// The only thing the coordination core needs from a multiplexer:
/// addressable panes, literal keystroke injection, and repeatable layout
/// recomputation.
#[async_trait]
pub trait MuxControl: Send + Sync {
    /// Splits a new pane in the session, returns its pane id.
    async fn create_pane(&self, session: &str, cwd: &Path) -> anyhow::Result<String>;
    async fn kill_pane(&self, pane_id: &str) -> anyhow::Result<()>;
    /// Sends keystrokes literally: control sequences in `keys` are never
    /// interpreted by the multiplexer. A trailing Enter is sent separately.
    async fn send_literal_keys(&self, pane_id: &str, keys: &str) -> anyhow::Result<()>;
    async fn select_layout(&self, session: &str, layout: &str) -> anyhow::Result<()>;
    async fn focus_pane(&self, pane_id: &str) -> anyhow::Result<()>;
    async fn capture_pane(&self, pane_id: &str) -> anyhow::Result<String>;
}

/// tmux-backed implementation.
#[derive(Debug, Clone)]
pub struct TmuxControl;

impl TmuxControl {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        debug!(?args, "tmux");
        let output = Command::new("tmux")
            .args(args)
            .output()
            .await
            .context("failed launching tmux")?;
        if !output.status.success() {
            anyhow::bail!(
                "tmux {:?} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for TmuxControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MuxControl for TmuxControl {
    async fn create_pane(&self, session: &str, cwd: &Path) -> anyhow::Result<String> {
        let cwd = cwd.display().to_string();
        let pane_id = self
            .run(&[
                "split-window",
                "-d",
                "-P",
                "-F",
                "#{pane_id}",
                "-t",
                session,
                "-c",
                &cwd,
            ])
            .await?;
        Ok(pane_id.trim().to_string())
    }

    async fn kill_pane(&self, pane_id: &str) -> anyhow::Result<()> {
        self.run(&["kill-pane", "-t", pane_id]).await?;
        Ok(())
    }

    async fn send_literal_keys(&self, pane_id: &str, keys: &str) -> anyhow::Result<()> {
        // `-l` keeps the payload literal; a separate send delivers Enter.
        self.run(&["send-keys", "-t", pane_id, "-l", keys]).await?;
        self.run(&["send-keys", "-t", pane_id, "Enter"]).await?;
        Ok(())
    }

    async fn select_layout(&self, session: &str, layout: &str) -> anyhow::Result<()> {
        self.run(&["select-layout", "-t", session, layout]).await?;
        Ok(())
    }

    async fn focus_pane(&self, pane_id: &str) -> anyhow::Result<()> {
        self.run(&["select-pane", "-t", pane_id]).await?;
        Ok(())
    }

    async fn capture_pane(&self, pane_id: &str) -> anyhow::Result<String> {
        self.run(&["capture-pane", "-p", "-t", pane_id]).await
    }
}

/// Recorded call for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxCall {
    CreatePane { session: String, cwd: PathBuf },
    KillPane(String),
    SendKeys { pane_id: String, keys: String },
    SelectLayout { session: String, layout: String },
    FocusPane(String),
    CapturePane(String),
}

/// In-memory test double. Records every call; failure and latency are
/// injectable so callers can exercise the best-effort paths.
#[derive(Default)]
pub struct MockMux {
    calls: Mutex<Vec<MuxCall>>,
    next_pane: AtomicU64,
    fail_send_keys: AtomicBool,
    fail_layout: AtomicBool,
    layout_delay_ms: AtomicU64,
    pane_content: Mutex<String>,
}

impl MockMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MuxCall> {
        self.calls.lock().expect("mux calls").clone()
    }

    pub fn layout_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MuxCall::SelectLayout { .. }))
            .count()
    }

    pub fn sent_keys(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MuxCall::SendKeys { pane_id, keys } => Some((pane_id, keys)),
                _ => None,
            })
            .collect()
    }

    pub fn set_fail_send_keys(&self, fail: bool) {
        self.fail_send_keys.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_layout(&self, fail: bool) {
        self.fail_layout.store(fail, Ordering::SeqCst);
    }

    pub fn set_layout_delay(&self, delay: Duration) {
        self.layout_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_pane_content(&self, content: impl Into<String>) {
        *self.pane_content.lock().expect("pane content") = content.into();
    }

    fn record(&self, call: MuxCall) {
        self.calls.lock().expect("mux calls").push(call);
    }
}

#[async_trait]
impl MuxControl for MockMux {
    async fn create_pane(&self, session: &str, cwd: &Path) -> anyhow::Result<String> {
        self.record(MuxCall::CreatePane {
            session: session.to_string(),
            cwd: cwd.to_path_buf(),
        });
        let n = self.next_pane.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("%{n}"))
    }

    async fn kill_pane(&self, pane_id: &str) -> anyhow::Result<()> {
        self.record(MuxCall::KillPane(pane_id.to_string()));
        Ok(())
    }

    async fn send_literal_keys(&self, pane_id: &str, keys: &str) -> anyhow::Result<()> {
        if self.fail_send_keys.load(Ordering::SeqCst) {
            anyhow::bail!("pane {pane_id} gone");
        }
        self.record(MuxCall::SendKeys {
            pane_id: pane_id.to_string(),
            keys: keys.to_string(),
        });
        Ok(())
    }

    async fn select_layout(&self, session: &str, layout: &str) -> anyhow::Result<()> {
        let delay = self.layout_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_layout.load(Ordering::SeqCst) {
            anyhow::bail!("no such session {session}");
        }
        self.record(MuxCall::SelectLayout {
            session: session.to_string(),
            layout: layout.to_string(),
        });
        Ok(())
    }

    async fn focus_pane(&self, pane_id: &str) -> anyhow::Result<()> {
        self.record(MuxCall::FocusPane(pane_id.to_string()));
        Ok(())
    }

    async fn capture_pane(&self, pane_id: &str) -> anyhow::Result<String> {
        self.record(MuxCall::CapturePane(pane_id.to_string()));
        Ok(self.pane_content.lock().expect("pane content").clone())
    }
}

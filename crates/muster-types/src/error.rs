use std::path::PathBuf;

use thiserror::Error;

/// Protocol-level failure classes. Lock contention and trigger delivery
/// problems are recovered locally by callers; the fatal variants surface
/// an actionable message naming the binary or file at fault.
#[derive(Debug, Error)]
pub enum TeamError {
    #[error("resource busy: lock at {path} held by pid {holder_pid}")]
    ResourceBusy { path: PathBuf, holder_pid: u32 },

    #[error("stale lock at {path} reclaimed from pid {previous_pid}")]
    ResourceStale { path: PathBuf, previous_pid: u32 },

    #[error("trigger delivery to pane {pane_id} failed: {detail}")]
    DeliveryFailed { pane_id: String, detail: String },

    #[error("agent CLI `{binary}` not found on PATH ({install_hint})")]
    AgentUnavailable {
        binary: String,
        install_hint: String,
    },

    #[error("validation failed for {subject}: {detail}")]
    ValidationFailed { subject: String, detail: String },

    #[error("task {task_id} permanently failed after {retries} retries")]
    TaskPermanentlyFailed { task_id: String, retries: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl TeamError {
    /// Recoverable errors are handled in place with retry/backoff or a
    /// boolean result; everything else propagates.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TeamError::ResourceBusy { .. } | TeamError::DeliveryFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_unavailable_message_names_binary_and_hint() {
        let err = TeamError::AgentUnavailable {
            binary: "codex".to_string(),
            install_hint: "npm install -g @openai/codex".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("codex"));
        assert!(msg.contains("npm install -g @openai/codex"));
    }

    #[test]
    fn only_busy_and_delivery_are_recoverable() {
        assert!(TeamError::ResourceBusy {
            path: PathBuf::from("/tmp/x.lock"),
            holder_pid: 42
        }
        .is_recoverable());
        assert!(TeamError::DeliveryFailed {
            pane_id: "%1".to_string(),
            detail: "pane gone".to_string()
        }
        .is_recoverable());
        assert!(!TeamError::ValidationFailed {
            subject: "tasks.json".to_string(),
            detail: "truncated".to_string()
        }
        .is_recoverable());
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use muster_core::event_bus::EventBus;
use muster_core::lockfile::LockFile;
use muster_core::paths::TeamPaths;
use muster_core::store::{append_jsonl, read_jsonl, DEFAULT_LOCK_TTL};
use muster_mux::MuxControl;
use muster_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use muster_types::{
    InboxInstruction, MailboxEntry, TeamError, TeamEvent, WorkerInfo, BROADCAST_RECIPIENT,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn, Level};

/// Hard ceiling on trigger payloads. Triggers carry no data, only a
/// nudge; the instruction itself is already on disk.
pub const TRIGGER_CHAR_LIMIT: usize = 200;

/// Write-then-notify messaging over inbox/mailbox JSONL files.
///
/// The invariant: a message is durably persisted before any trigger
/// referencing it is sent, so a woken worker always finds its data. The
/// trigger is best-effort; a failed delivery is reported as `false` and
/// the message is picked up on the worker's next poll.
pub struct Messenger {
    paths: TeamPaths,
    team: String,
    mux: Arc<dyn MuxControl>,
    bus: EventBus,
}

impl Messenger {
    pub fn new(paths: TeamPaths, team: &str, mux: Arc<dyn MuxControl>, bus: EventBus) -> Self {
        Self {
            paths,
            team: team.to_string(),
            mux,
            bus,
        }
    }

    /// Persists a leader command to the worker's inbox, then nudges the
    /// pane. Returns the instruction and whether the trigger landed.
    pub async fn queue_inbox_instruction(
        &self,
        worker: &str,
        body: &str,
        pane_id: Option<&str>,
    ) -> anyhow::Result<(InboxInstruction, bool)> {
        let instruction = InboxInstruction::new(worker, body);
        self.locked_append(&self.paths.inbox_file(&self.team, worker), &instruction)
            .await?;
        self.publish(
            "instruction_queued",
            json!({
                "worker": worker,
                "instruction_id": instruction.id,
                "body": redact_text(body),
            }),
        )
        .await;
        let delivered = self
            .notify(worker, pane_id, &instruction.id, "instruction")
            .await;
        Ok((instruction, delivered))
    }

    pub async fn queue_direct_message(
        &self,
        sender: &str,
        recipient: &str,
        body: &str,
        pane_id: Option<&str>,
    ) -> anyhow::Result<(MailboxEntry, bool)> {
        let entry = MailboxEntry::new(sender, recipient, body);
        self.locked_append(&self.paths.mailbox_file(&self.team, recipient), &entry)
            .await?;
        self.publish(
            "message_queued",
            json!({
                "sender": sender,
                "recipient": recipient,
                "message_id": entry.id,
            }),
        )
        .await;
        let delivered = self.notify(recipient, pane_id, &entry.id, "message").await;
        Ok((entry, delivered))
    }

    /// Writes to every worker's mailbox before sending any trigger, so a
    /// slow or dead pane never delays delivery to the others. Returns
    /// true only if every trigger landed.
    pub async fn queue_broadcast_message(
        &self,
        sender: &str,
        body: &str,
        workers: &[WorkerInfo],
    ) -> anyhow::Result<bool> {
        let mut queued = Vec::with_capacity(workers.len());
        for worker in workers {
            // Every copy carries the broadcast recipient marker so readers
            // can tell a fan-out apart from a direct message.
            let entry = MailboxEntry::new(sender, BROADCAST_RECIPIENT, body);
            self.locked_append(&self.paths.mailbox_file(&self.team, &worker.name), &entry)
                .await?;
            queued.push((worker, entry));
        }
        self.publish(
            "broadcast_queued",
            json!({ "sender": sender, "recipients": workers.len() }),
        )
        .await;
        let mut all_delivered = true;
        for (worker, entry) in queued {
            let delivered = self
                .notify(&worker.name, worker.pane_id.as_deref(), &entry.id, "message")
                .await;
            all_delivered &= delivered;
        }
        Ok(all_delivered)
    }

    /// Entries strictly after the cursor, in append order. Re-reading
    /// with the same cursor returns the same set; a cursor equal to the
    /// last entry's id returns nothing. An unknown cursor restarts from
    /// the beginning rather than dropping entries.
    pub async fn read_mailbox(
        &self,
        worker: &str,
        cursor: Option<&str>,
    ) -> anyhow::Result<Vec<MailboxEntry>> {
        let entries: Vec<MailboxEntry> =
            read_jsonl(&self.paths.mailbox_file(&self.team, worker)).await?;
        Ok(after_cursor(entries, cursor, |e| e.id.as_str()))
    }

    pub async fn read_inbox(
        &self,
        worker: &str,
        cursor: Option<&str>,
    ) -> anyhow::Result<Vec<InboxInstruction>> {
        let entries: Vec<InboxInstruction> =
            read_jsonl(&self.paths.inbox_file(&self.team, worker)).await?;
        Ok(after_cursor(entries, cursor, |e| e.id.as_str()))
    }

    async fn locked_append<T: Serialize>(&self, path: &Path, row: &T) -> anyhow::Result<()> {
        let lock = LockFile::guarding(path, DEFAULT_LOCK_TTL);
        let _guard = lock
            .acquire_with_retry(10, Duration::from_millis(50))
            .await
            .with_context(|| format!("lock contention on {}", path.display()))?;
        append_jsonl(path, row).await
    }

    /// Best-effort trigger. Never fails; the data is already persisted.
    async fn notify(
        &self,
        worker: &str,
        pane_id: Option<&str>,
        message_id: &str,
        kind: &str,
    ) -> bool {
        let Some(pane_id) = pane_id else {
            debug!(worker, "no pane bound, worker will poll");
            return false;
        };
        let trigger = trigger_text(kind, message_id);
        match self.mux.send_literal_keys(pane_id, &trigger).await {
            Ok(()) => {
                self.publish(
                    "trigger_delivered",
                    json!({ "worker": worker, "pane_id": pane_id, "message_id": message_id }),
                )
                .await;
                emit_event(
                    Level::INFO,
                    ProcessKind::Leader,
                    ObservabilityEvent {
                        event: "trigger_delivered",
                        component: "messaging",
                        team: Some(&self.team),
                        worker: Some(worker),
                        pane_id: Some(pane_id),
                        message_id: Some(message_id),
                        ..ObservabilityEvent::default()
                    },
                );
                true
            }
            Err(err) => {
                let failure = TeamError::DeliveryFailed {
                    pane_id: pane_id.to_string(),
                    detail: err.to_string(),
                };
                warn!(worker, error = %failure, "trigger not delivered, data already persisted");
                let detail = err.to_string();
                emit_event(
                    Level::WARN,
                    ProcessKind::Leader,
                    ObservabilityEvent {
                        event: "trigger_failed",
                        component: "messaging",
                        team: Some(&self.team),
                        worker: Some(worker),
                        pane_id: Some(pane_id),
                        message_id: Some(message_id),
                        error_code: Some("delivery_failed"),
                        detail: Some(&detail),
                        ..ObservabilityEvent::default()
                    },
                );
                false
            }
        }
    }

    pub(crate) async fn publish(&self, event_type: &str, properties: serde_json::Value) {
        let event = TeamEvent::new(event_type, properties);
        if let Err(err) = append_jsonl(&self.paths.events_file(&self.team), &event).await {
            warn!(error = %err, "failed appending team event");
        }
        self.bus.publish(event);
    }
}

/// The nudge a worker receives. Payload-free by design and bounded well
/// under the multiplexer-safe limit.
fn trigger_text(kind: &str, message_id: &str) -> String {
    let text = format!("[muster] new {kind} {message_id}, check your inbox");
    text.chars().take(TRIGGER_CHAR_LIMIT - 1).collect()
}

fn after_cursor<T, F>(entries: Vec<T>, cursor: Option<&str>, id_of: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let Some(cursor) = cursor else {
        return entries;
    };
    match entries.iter().position(|e| id_of(e) == cursor) {
        Some(pos) => entries.into_iter().skip(pos + 1).collect(),
        None => entries,
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const BROADCAST_RECIPIENT: &str = "broadcast";

/// One append-only mailbox row. Readers consume by cursor (last-seen id),
/// never by destructive dequeue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxEntry {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub notified: bool,
}

impl MailboxEntry {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            sender: sender.into(),
            recipient: recipient.into(),
            body: body.into(),
            summary: None,
            created_at: Utc::now(),
            notified: false,
        }
    }
}

/// A leader-to-worker command. Same wire shape as a mailbox entry but kept
/// in the worker's inbox file and treated as actionable rather than chatter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxInstruction {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub notified: bool,
}

impl InboxInstruction {
    pub fn new(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: format!("ins_{}", uuid::Uuid::new_v4().simple()),
            sender: "leader".to_string(),
            recipient: recipient.into(),
            body: body.into(),
            created_at: Utc::now(),
            notified: false,
        }
    }
}

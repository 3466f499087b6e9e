use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Retry bookkeeping carried alongside a task. All fields default so
/// documents written before this metadata existed still parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub permanently_failed: bool,
}

impl TaskMetadata {
    pub fn retries_remaining(&self) -> bool {
        !self.permanently_failed && self.retry_count < self.max_retries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(subject: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4().simple()),
            subject: subject.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            owner: None,
            metadata: TaskMetadata::default(),
            extra: None,
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// A task counts as failed when its status says so or when the retry
    /// machinery has marked it permanently failed, whatever the literal
    /// status string claims.
    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed || self.metadata.permanently_failed
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed) || self.metadata.permanently_failed
    }
}

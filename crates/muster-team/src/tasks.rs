use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use muster_core::lockfile::LockFile;
use muster_core::paths::TeamPaths;
use muster_core::store::{read_document, write_document, DEFAULT_LOCK_TTL};
use muster_types::{Task, TaskStatus, TeamError};
use tokio::fs;
use tracing::{info, warn};

/// Task records, one file per task under `tasks/`. The leader owns these;
/// mutation is a lock-guarded read-modify-write per file. Tasks are
/// archived, never deleted.
#[derive(Clone)]
pub struct TaskStore {
    paths: TeamPaths,
    team: String,
    writer: String,
}

impl TaskStore {
    pub fn new(paths: TeamPaths, team: &str, writer: &str) -> Self {
        Self {
            paths,
            team: team.to_string(),
            writer: writer.to_string(),
        }
    }

    pub async fn create(&self, subject: &str, description: &str) -> anyhow::Result<Task> {
        let task = Task::new(subject, description);
        write_document(
            &self.paths.task_file(&self.team, &task.id),
            &task,
            &self.writer,
        )
        .await?;
        info!(task_id = %task.id, subject, "task created");
        Ok(task)
    }

    pub async fn get(&self, task_id: &str) -> anyhow::Result<Option<Task>> {
        read_document(&self.paths.task_file(&self.team, task_id)).await
    }

    /// Lock-guarded read-modify-write of one task. `updated_at` is bumped
    /// on every mutation.
    pub async fn update<F>(&self, task_id: &str, mutate: F) -> anyhow::Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        let path = self.paths.task_file(&self.team, task_id);
        let lock = LockFile::guarding(&path, DEFAULT_LOCK_TTL);
        let _guard = lock
            .acquire_with_retry(10, Duration::from_millis(50))
            .await
            .with_context(|| format!("lock contention on task {task_id}"))?;
        let mut task = read_document::<Task>(&path)
            .await?
            .with_context(|| format!("unknown task {task_id}"))?;
        mutate(&mut task);
        task.updated_at = Utc::now();
        write_document(&path, &task, &self.writer).await?;
        Ok(task)
    }

    pub async fn assign(&self, task_id: &str, worker: &str) -> anyhow::Result<Task> {
        self.update(task_id, |task| {
            task.owner = Some(worker.to_string());
            task.status = TaskStatus::InProgress;
        })
        .await
    }

    pub async fn complete(&self, task_id: &str) -> anyhow::Result<Task> {
        self.update(task_id, |task| {
            task.status = TaskStatus::Completed;
        })
        .await
    }

    /// Marks a failure. Once the retry budget is spent the task is marked
    /// permanently failed and excluded from further retries.
    pub async fn record_failure(&self, task_id: &str) -> anyhow::Result<Task> {
        self.update(task_id, |task| {
            task.status = TaskStatus::Failed;
            if task.metadata.retry_count >= task.metadata.max_retries {
                task.metadata.permanently_failed = true;
            }
        })
        .await
    }

    /// Re-queues a failed task, spending one retry. A task with no retry
    /// budget left is refused with a typed error.
    pub async fn retry(&self, task_id: &str) -> anyhow::Result<Task> {
        let path = self.paths.task_file(&self.team, task_id);
        let lock = LockFile::guarding(&path, DEFAULT_LOCK_TTL);
        let _guard = lock
            .acquire_with_retry(10, Duration::from_millis(50))
            .await
            .with_context(|| format!("lock contention on task {task_id}"))?;
        let mut task = read_document::<Task>(&path)
            .await?
            .with_context(|| format!("unknown task {task_id}"))?;
        if !task.metadata.retries_remaining() {
            return Err(TeamError::TaskPermanentlyFailed {
                task_id: task_id.to_string(),
                retries: task.metadata.retry_count,
            }
            .into());
        }
        task.metadata.retry_count += 1;
        task.status = TaskStatus::Pending;
        task.owner = None;
        task.updated_at = Utc::now();
        write_document(&path, &task, &self.writer).await?;
        Ok(task)
    }

    /// Every live (non-archived) task, oldest first.
    pub async fn list(&self) -> anyhow::Result<Vec<Task>> {
        let dir = self.paths.tasks_dir(&self.team);
        let mut tasks = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(tasks),
            Err(err) => {
                return Err(err).with_context(|| format!("failed listing {}", dir.display()))
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(task) = read_document::<Task>(&path).await? {
                tasks.push(task);
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// Moves a task to `tasks/archive/`, keeping its full history.
    pub async fn archive(&self, task_id: &str) -> anyhow::Result<Task> {
        let path = self.paths.task_file(&self.team, task_id);
        let lock = LockFile::guarding(&path, DEFAULT_LOCK_TTL);
        let _guard = lock
            .acquire_with_retry(10, Duration::from_millis(50))
            .await
            .with_context(|| format!("lock contention on task {task_id}"))?;
        let mut task = read_document::<Task>(&path)
            .await?
            .with_context(|| format!("unknown task {task_id}"))?;
        if !task.is_terminal() {
            warn!(task_id, status = ?task.status, "archiving an unfinished task");
        }
        task.archived = true;
        task.updated_at = Utc::now();
        write_document(
            &self.paths.archived_task_file(&self.team, task_id),
            &task,
            &self.writer,
        )
        .await?;
        fs::remove_file(&path)
            .await
            .with_context(|| format!("failed removing {}", path.display()))?;
        info!(task_id, "task archived");
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> TaskStore {
        TaskStore::new(TeamPaths::new(dir.path()), "alpha", "leader")
    }

    #[tokio::test]
    async fn create_assign_complete_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        let task = store.create("wire parser", "hook it up").await.expect("create");
        assert_eq!(task.status, TaskStatus::Pending);

        let task = store.assign(&task.id, "builder").await.expect("assign");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.owner.as_deref(), Some("builder"));

        let task = store.complete(&task.id).await.expect("complete");
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.updated_at >= task.created_at);
    }

    #[tokio::test]
    async fn failure_exhausts_retries_then_goes_permanent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        let task = store.create("flaky", "").await.expect("create");
        store
            .update(&task.id, |t| t.metadata.max_retries = 1)
            .await
            .expect("budget");

        let task = store.record_failure(&task.id).await.expect("fail 1");
        assert!(!task.metadata.permanently_failed);
        assert!(task.metadata.retries_remaining());

        let task = store.retry(&task.id).await.expect("retry");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.metadata.retry_count, 1);

        let task = store.record_failure(&task.id).await.expect("fail 2");
        assert!(task.metadata.permanently_failed);
        assert!(task.is_failed());
        assert!(task.is_terminal());

        // Retrying a permanently failed task is refused, not silently eaten.
        let err = store.retry(&task.id).await.expect_err("retry must refuse");
        assert!(matches!(
            err.downcast_ref::<TeamError>(),
            Some(TeamError::TaskPermanentlyFailed { retries: 1, .. })
        ));
        let kept = store.get(&task.id).await.expect("get").expect("present");
        assert_eq!(kept.status, TaskStatus::Failed);
        assert_eq!(kept.metadata.retry_count, 1);
    }

    #[tokio::test]
    async fn list_returns_live_tasks_oldest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        let first = store.create("first", "").await.expect("a");
        let second = store.create("second", "").await.expect("b");
        let listed = store.list().await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[tokio::test]
    async fn archive_moves_the_record_out_of_the_live_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir);
        let task = store.create("done", "").await.expect("create");
        store.complete(&task.id).await.expect("complete");
        let archived = store.archive(&task.id).await.expect("archive");
        assert!(archived.archived);

        assert!(store.list().await.expect("list").is_empty());
        let paths = TeamPaths::new(dir.path());
        let kept: Option<Task> = read_document(&paths.archived_task_file("alpha", &task.id))
            .await
            .expect("read archive");
        assert!(kept.expect("archived record").archived);
    }

    #[tokio::test]
    async fn listing_an_empty_team_is_empty_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(store(&dir).list().await.expect("list").is_empty());
    }
}

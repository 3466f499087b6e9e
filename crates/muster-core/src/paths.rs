use std::path::{Path, PathBuf};

/// On-disk layout for one state root. Everything the leader and workers
/// share lives under `<state_root>/teams/<team_name>/`.
#[derive(Debug, Clone)]
pub struct TeamPaths {
    root: PathBuf,
}

impl TeamPaths {
    pub fn new(state_root: impl AsRef<Path>) -> Self {
        Self {
            root: state_root.as_ref().join("teams"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn team_dir(&self, team_name: &str) -> PathBuf {
        self.root.join(team_name)
    }

    pub fn config_file(&self, team_name: &str) -> PathBuf {
        self.team_dir(team_name).join("config.json")
    }

    pub fn workers_file(&self, team_name: &str) -> PathBuf {
        self.team_dir(team_name).join("workers.json")
    }

    pub fn tasks_dir(&self, team_name: &str) -> PathBuf {
        self.team_dir(team_name).join("tasks")
    }

    pub fn task_file(&self, team_name: &str, task_id: &str) -> PathBuf {
        self.tasks_dir(team_name).join(format!("{}.json", task_id))
    }

    pub fn task_archive_dir(&self, team_name: &str) -> PathBuf {
        self.tasks_dir(team_name).join("archive")
    }

    pub fn archived_task_file(&self, team_name: &str, task_id: &str) -> PathBuf {
        self.task_archive_dir(team_name)
            .join(format!("{}.json", task_id))
    }

    pub fn inboxes_dir(&self, team_name: &str) -> PathBuf {
        self.team_dir(team_name).join("inboxes")
    }

    pub fn inbox_file(&self, team_name: &str, worker_name: &str) -> PathBuf {
        self.inboxes_dir(team_name)
            .join(format!("{}.jsonl", worker_name))
    }

    pub fn mailboxes_dir(&self, team_name: &str) -> PathBuf {
        self.team_dir(team_name).join("mailboxes")
    }

    pub fn mailbox_file(&self, team_name: &str, worker_name: &str) -> PathBuf {
        self.mailboxes_dir(team_name)
            .join(format!("{}.jsonl", worker_name))
    }

    pub fn heartbeats_dir(&self, team_name: &str) -> PathBuf {
        self.team_dir(team_name).join("heartbeats")
    }

    pub fn heartbeat_file(&self, team_name: &str, worker_name: &str) -> PathBuf {
        self.heartbeats_dir(team_name)
            .join(format!("{}.json", worker_name))
    }

    pub fn pipeline_file(&self, team_name: &str) -> PathBuf {
        self.team_dir(team_name).join("pipeline.json")
    }

    /// Display cache only; ground truth is always recomputed from tasks.
    pub fn phase_file(&self, team_name: &str) -> PathBuf {
        self.team_dir(team_name).join("phase.json")
    }

    pub fn events_file(&self, team_name: &str) -> PathBuf {
        self.team_dir(team_name).join("events.jsonl")
    }
}

/// Default state root: platform data dir, falling back to a dot directory
/// under HOME, falling back to the working directory.
pub fn default_state_root() -> PathBuf {
    if let Some(dir) = dirs::data_local_dir() {
        return dir.join("muster");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".muster");
    }
    PathBuf::from(".muster")
}

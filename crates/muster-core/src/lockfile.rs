use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use muster_types::TeamError;

use crate::now_ms;

/// Marker document written into the lock file by the holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMarker {
    pub pid: u32,
    pub acquired_at_ms: u64,
}

/// Advisory cross-process mutex over a filesystem path. At most one live
/// holder per path: acquisition is an atomic create-exclusive write, and
/// the only path past an existing marker is proving its holder dead or
/// older than the stale TTL.
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
    stale_ttl: Duration,
}

/// Held lock. Releasing happens on drop so every exit path, including
/// early `?` returns, removes the marker.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>, stale_ttl: Duration) -> Self {
        Self {
            path: path.into(),
            stale_ttl,
        }
    }

    /// Conventional lock path guarding a state file: sibling with `.lock`
    /// appended, so `tasks/t1.json` is guarded by `tasks/t1.json.lock`.
    pub fn guarding(target: &Path, stale_ttl: Duration) -> Self {
        let mut name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "state".to_string());
        name.push_str(".lock");
        Self::new(target.with_file_name(name), stale_ttl)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking acquisition for call sites that cannot suspend.
    pub fn acquire_blocking(&self) -> Result<LockGuard, TeamError> {
        match self.try_create() {
            Ok(guard) => Ok(guard),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let marker = self.read_marker();
                if self.is_stale(marker.as_ref()) {
                    let stale = TeamError::ResourceStale {
                        path: self.path.clone(),
                        previous_pid: marker.map(|m| m.pid).unwrap_or(0),
                    };
                    debug!(reason = %stale, "reclaiming stale lock");
                    let _ = std::fs::remove_file(&self.path);
                    // One retry only. Losing the create race here means a
                    // live contender won; report busy, do not loop.
                    self.try_create().map_err(|_| TeamError::ResourceBusy {
                        path: self.path.clone(),
                        holder_pid: self.read_marker().map(|m| m.pid).unwrap_or(0),
                    })
                } else {
                    Err(TeamError::ResourceBusy {
                        path: self.path.clone(),
                        holder_pid: marker.map(|m| m.pid).unwrap_or(0),
                    })
                }
            }
            Err(err) => Err(TeamError::Io(err)),
        }
    }

    /// Async acquisition. The create-exclusive syscall is cheap, so this
    /// simply wraps the blocking path without a spawn_blocking hop.
    pub async fn acquire(&self) -> Result<LockGuard, TeamError> {
        self.acquire_blocking()
    }

    /// Suspends between bounded attempts, then fails with the last busy
    /// error. Backoff is fixed; there is no fairness guarantee.
    pub async fn acquire_with_retry(
        &self,
        attempts: u32,
        backoff: Duration,
    ) -> Result<LockGuard, TeamError> {
        let mut last = None;
        for attempt in 0..attempts.max(1) {
            match self.acquire().await {
                Ok(guard) => return Ok(guard),
                Err(err @ TeamError::ResourceBusy { .. }) => {
                    if attempt + 1 < attempts {
                        tokio::time::sleep(backoff).await;
                    }
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or_else(|| TeamError::ResourceBusy {
            path: self.path.clone(),
            holder_pid: 0,
        }))
    }

    fn try_create(&self) -> std::io::Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let marker = LockMarker {
            pid: std::process::id(),
            acquired_at_ms: now_ms(),
        };
        let payload = serde_json::to_string(&marker).unwrap_or_default();
        file.write_all(payload.as_bytes())?;
        file.sync_all()?;
        Ok(LockGuard {
            path: self.path.clone(),
            released: false,
        })
    }

    fn read_marker(&self) -> Option<LockMarker> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// A lock is stale when its marker is unreadable, its holder is no
    /// longer alive, or its age exceeds the TTL.
    fn is_stale(&self, marker: Option<&LockMarker>) -> bool {
        let Some(marker) = marker else {
            return true;
        };
        if !process_alive(marker.pid) {
            return true;
        }
        let age_ms = now_ms().saturating_sub(marker.acquired_at_ms);
        age_ms > self.stale_ttl.as_millis() as u64
    }
}

impl LockGuard {
    /// Explicit release for call sites that want the error, not just the
    /// drop-time best effort.
    pub fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        std::fs::remove_file(&self.path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %err, "failed removing lock marker");
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(pid: u32) -> bool {
    // No portable liveness probe without extra deps; the TTL governs.
    pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_lock(ttl: Duration) -> (tempfile::TempDir, LockFile) {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = LockFile::new(dir.path().join("state.json.lock"), ttl);
        (dir, lock)
    }

    #[test]
    fn second_acquire_fails_busy_while_held() {
        let (_dir, lock) = temp_lock(Duration::from_secs(60));
        let guard = lock.acquire_blocking().expect("first acquire");
        let err = lock.acquire_blocking().expect_err("second must fail");
        assert!(matches!(err, TeamError::ResourceBusy { .. }));
        drop(guard);
        lock.acquire_blocking().expect("reacquire after release");
    }

    #[test]
    fn guard_drop_removes_marker_on_early_return() {
        let (_dir, lock) = temp_lock(Duration::from_secs(60));
        let attempt = || -> Result<(), TeamError> {
            let _guard = lock.acquire_blocking()?;
            Err(TeamError::ValidationFailed {
                subject: "doc".to_string(),
                detail: "boom".to_string(),
            })
        };
        assert!(attempt().is_err());
        assert!(!lock.path().exists());
    }

    #[test]
    fn expired_ttl_marker_is_reclaimed() {
        let (_dir, lock) = temp_lock(Duration::from_millis(0));
        // Plant a marker from this (live) process with an ancient timestamp.
        std::fs::write(
            lock.path(),
            serde_json::to_string(&LockMarker {
                pid: std::process::id(),
                acquired_at_ms: 1,
            })
            .unwrap(),
        )
        .unwrap();
        lock.acquire_blocking().expect("stale lock reclaimed");
    }

    #[test]
    fn dead_holder_marker_is_reclaimed() {
        let (_dir, lock) = temp_lock(Duration::from_secs(3600));
        std::fs::write(
            lock.path(),
            serde_json::to_string(&LockMarker {
                pid: 0,
                acquired_at_ms: now_ms(),
            })
            .unwrap(),
        )
        .unwrap();
        lock.acquire_blocking().expect("dead holder reclaimed");
    }

    #[test]
    fn live_fresh_holder_is_never_reclaimed() {
        let (_dir, lock) = temp_lock(Duration::from_secs(3600));
        std::fs::write(
            lock.path(),
            serde_json::to_string(&LockMarker {
                pid: std::process::id(),
                acquired_at_ms: now_ms(),
            })
            .unwrap(),
        )
        .unwrap();
        let err = lock.acquire_blocking().expect_err("must stay busy");
        assert!(matches!(err, TeamError::ResourceBusy { .. }));
    }

    #[test]
    fn garbage_marker_counts_as_stale() {
        let (_dir, lock) = temp_lock(Duration::from_secs(3600));
        std::fs::write(lock.path(), "not json").unwrap();
        lock.acquire_blocking().expect("garbage marker reclaimed");
    }

    #[tokio::test]
    async fn retry_acquires_after_holder_releases() {
        let (_dir, lock) = temp_lock(Duration::from_secs(60));
        let guard = lock.acquire_blocking().expect("held");
        let contender = lock.clone();
        let task = tokio::spawn(async move {
            contender
                .acquire_with_retry(20, Duration::from_millis(10))
                .await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(guard);
        let acquired = task.await.expect("join").expect("eventually acquires");
        drop(acquired);
    }

    #[test]
    fn guarding_appends_lock_extension() {
        let lock = LockFile::guarding(Path::new("/x/tasks/t1.json"), Duration::from_secs(1));
        assert_eq!(lock.path(), Path::new("/x/tasks/t1.json.lock"));
    }
}

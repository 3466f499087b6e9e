use muster_types::{Task, TaskStatus, TeamPhase};

/// Projects a task snapshot onto one collective phase. Pure and
/// deterministic: the leader polls this on every tick and must get the
/// same answer for the same snapshot.
///
/// Rules are ordered; the first match wins:
/// 1. no tasks: initializing
/// 2. anything in progress: executing
/// 3. everything still pending: planning
/// 4. completed/pending mix with nothing active: executing
/// 5. failed means status failed OR permanently_failed, whatever the
///    status string claims
/// 6. any failed task with retries remaining somewhere: fixing
/// 7. everything failed, no retries anywhere: failed
/// 8. everything completed, nothing permanently failed: completed
/// 9. anything else: executing
pub fn infer_phase(tasks: &[Task]) -> TeamPhase {
    if tasks.is_empty() {
        return TeamPhase::Initializing;
    }
    if tasks.iter().any(|t| t.status == TaskStatus::InProgress) {
        return TeamPhase::Executing;
    }
    if tasks
        .iter()
        .all(|t| t.status == TaskStatus::Pending && !t.metadata.permanently_failed)
    {
        return TeamPhase::Planning;
    }
    let any_failed = tasks.iter().any(Task::is_failed);
    if !any_failed && tasks.iter().any(|t| t.status == TaskStatus::Pending) {
        return TeamPhase::Executing;
    }
    if any_failed {
        if tasks
            .iter()
            .filter(|t| t.is_failed())
            .any(|t| t.metadata.retries_remaining())
        {
            return TeamPhase::Fixing;
        }
        if tasks.iter().all(Task::is_failed) {
            return TeamPhase::Failed;
        }
    }
    if tasks.iter().all(|t| t.status == TaskStatus::Completed)
        && !tasks.iter().any(|t| t.metadata.permanently_failed)
    {
        return TeamPhase::Completed;
    }
    TeamPhase::Executing
}

pub fn is_terminal_phase(phase: TeamPhase) -> bool {
    matches!(phase, TeamPhase::Completed | TeamPhase::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_types::TaskMetadata;

    fn task(status: TaskStatus) -> Task {
        let mut t = Task::new("t", "");
        t.status = status;
        t
    }

    fn failed_task(retry_count: u32, max_retries: u32) -> Task {
        let mut t = task(TaskStatus::Failed);
        t.metadata = TaskMetadata {
            retry_count,
            max_retries,
            permanently_failed: retry_count >= max_retries,
        };
        t
    }

    #[test]
    fn empty_snapshot_is_initializing() {
        assert_eq!(infer_phase(&[]), TeamPhase::Initializing);
    }

    #[test]
    fn any_in_progress_wins_over_everything_else() {
        let tasks = vec![
            task(TaskStatus::InProgress),
            failed_task(2, 2),
            task(TaskStatus::Completed),
        ];
        assert_eq!(infer_phase(&tasks), TeamPhase::Executing);
    }

    #[test]
    fn all_pending_is_planning() {
        let tasks = vec![task(TaskStatus::Pending), task(TaskStatus::Pending)];
        assert_eq!(infer_phase(&tasks), TeamPhase::Planning);
    }

    #[test]
    fn completed_pending_mix_with_nothing_active_is_executing() {
        let tasks = vec![task(TaskStatus::Completed), task(TaskStatus::Pending)];
        assert_eq!(infer_phase(&tasks), TeamPhase::Executing);
    }

    #[test]
    fn failed_with_retries_remaining_is_fixing() {
        let tasks = vec![failed_task(0, 2)];
        assert_eq!(infer_phase(&tasks), TeamPhase::Fixing);
        // Even alongside completed work.
        let tasks = vec![task(TaskStatus::Completed), failed_task(1, 3)];
        assert_eq!(infer_phase(&tasks), TeamPhase::Fixing);
    }

    #[test]
    fn all_failed_without_retries_is_failed() {
        let tasks = vec![failed_task(2, 2), failed_task(3, 3)];
        assert_eq!(infer_phase(&tasks), TeamPhase::Failed);
    }

    #[test]
    fn all_completed_is_completed() {
        let tasks = vec![task(TaskStatus::Completed), task(TaskStatus::Completed)];
        assert_eq!(infer_phase(&tasks), TeamPhase::Completed);
    }

    #[test]
    fn permanent_failure_counts_as_failed_regardless_of_status() {
        // Status says completed, metadata says permanently failed.
        let mut poisoned = task(TaskStatus::Completed);
        poisoned.metadata.permanently_failed = true;
        let tasks = vec![task(TaskStatus::Completed), poisoned];
        // Not completed (rule 8 requires zero permanent failures), not
        // fixing (no retries remain), not failed (not all failed).
        assert_eq!(infer_phase(&tasks), TeamPhase::Executing);
    }

    #[test]
    fn completed_mixed_with_exhausted_failure_falls_back_to_executing() {
        let tasks = vec![task(TaskStatus::Completed), failed_task(2, 2)];
        assert_eq!(infer_phase(&tasks), TeamPhase::Executing);
    }

    #[test]
    fn identical_snapshots_always_agree() {
        let tasks = vec![
            task(TaskStatus::Pending),
            task(TaskStatus::Completed),
            failed_task(0, 1),
        ];
        let first = infer_phase(&tasks);
        for _ in 0..100 {
            assert_eq!(infer_phase(&tasks), first);
        }
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(is_terminal_phase(TeamPhase::Completed));
        assert!(is_terminal_phase(TeamPhase::Failed));
        assert!(!is_terminal_phase(TeamPhase::Initializing));
        assert!(!is_terminal_phase(TeamPhase::Planning));
        assert!(!is_terminal_phase(TeamPhase::Executing));
        assert!(!is_terminal_phase(TeamPhase::Fixing));
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::control::MuxControl;

pub const DEFAULT_LAYOUT_DEBOUNCE: Duration = Duration::from_millis(150);
pub const DEFAULT_LAYOUT: &str = "tiled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayoutPhase {
    Idle,
    Pending,
    Running,
}

#[derive(Debug)]
struct StabilizerState {
    phase: LayoutPhase,
    /// Bumped on every (re)schedule; a timer whose epoch no longer
    /// matches was superseded and must not fire.
    epoch: u64,
    rerun_queued: bool,
}

/// Coalesces bursts of layout-change requests into single recomputes.
///
/// Requests arriving within the debounce window collapse into one run;
/// requests arriving while a run is in flight set a single-slot rerun
/// flag rather than queueing. Recompute failures are logged and
/// swallowed so pane churn never takes the caller down.
pub struct LayoutStabilizer {
    mux: Arc<dyn MuxControl>,
    session: String,
    leader_pane: String,
    debounce: Duration,
    state: Mutex<StabilizerState>,
    run_lock: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
    runs: AtomicU64,
}

impl LayoutStabilizer {
    pub fn new(mux: Arc<dyn MuxControl>, session: &str, leader_pane: &str) -> Arc<Self> {
        Self::with_debounce(mux, session, leader_pane, DEFAULT_LAYOUT_DEBOUNCE)
    }

    pub fn with_debounce(
        mux: Arc<dyn MuxControl>,
        session: &str,
        leader_pane: &str,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            mux,
            session: session.to_string(),
            leader_pane: leader_pane.to_string(),
            debounce,
            state: Mutex::new(StabilizerState {
                phase: LayoutPhase::Idle,
                epoch: 0,
                rerun_queued: false,
            }),
            run_lock: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
            runs: AtomicU64::new(0),
        })
    }

    /// Number of completed recomputes.
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Asks for a layout recompute soon. Never blocks; safe to call from
    /// any task at any rate.
    pub fn request_layout(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let epoch = {
            let mut state = self.state.lock().expect("stabilizer state");
            match state.phase {
                LayoutPhase::Running => {
                    state.rerun_queued = true;
                    return;
                }
                // Pending restarts the window; Idle opens one.
                LayoutPhase::Idle | LayoutPhase::Pending => {
                    state.phase = LayoutPhase::Pending;
                    state.epoch += 1;
                    state.epoch
                }
            }
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            let fire = {
                let mut state = this.state.lock().expect("stabilizer state");
                if this.disposed.load(Ordering::SeqCst)
                    || state.epoch != epoch
                    || state.phase != LayoutPhase::Pending
                {
                    false
                } else {
                    state.phase = LayoutPhase::Running;
                    true
                }
            };
            if fire {
                this.run_until_settled().await;
            }
        });
    }

    /// Runs any pending recompute immediately and waits for it, including
    /// a run already in flight. Used at teardown so the final pane set is
    /// reflected before the session is handed back.
    pub async fn flush(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock().expect("stabilizer state");
            // Cancel any pending timer; we take over the run ourselves.
            state.epoch += 1;
            state.rerun_queued = false;
            state.phase = LayoutPhase::Running;
        }
        self.run_until_settled().await;
    }

    /// Permanently disables the stabilizer. Pending timers are cancelled
    /// and later requests become no-ops; an in-flight run finishes on its
    /// own and releases anyone awaiting it.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().expect("stabilizer state");
        state.epoch += 1;
        state.rerun_queued = false;
        debug!(session = %self.session, "layout stabilizer disposed");
    }

    async fn run_until_settled(self: &Arc<Self>) {
        loop {
            {
                let _running = self.run_lock.lock().await;
                if self.disposed.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = self.recompute().await {
                    warn!(session = %self.session, error = %err, "layout recompute failed");
                }
                self.runs.fetch_add(1, Ordering::SeqCst);
            }
            let rerun = {
                let mut state = self.state.lock().expect("stabilizer state");
                if state.rerun_queued && !self.disposed.load(Ordering::SeqCst) {
                    state.rerun_queued = false;
                    true
                } else {
                    state.phase = LayoutPhase::Idle;
                    false
                }
            };
            if !rerun {
                return;
            }
        }
        let mut state = self.state.lock().expect("stabilizer state");
        state.phase = LayoutPhase::Idle;
        state.rerun_queued = false;
    }

    async fn recompute(&self) -> anyhow::Result<()> {
        self.mux.select_layout(&self.session, DEFAULT_LAYOUT).await?;
        // Recomputing steals focus in some multiplexers; hand it back.
        self.mux.focus_pane(&self.leader_pane).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::MockMux;

    fn stabilizer(mux: &Arc<MockMux>) -> Arc<LayoutStabilizer> {
        LayoutStabilizer::with_debounce(
            Arc::clone(mux) as Arc<dyn MuxControl>,
            "muster-alpha",
            "%0",
            Duration::from_millis(150),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_requests_collapses_to_one_recompute() {
        let mux = Arc::new(MockMux::new());
        let stab = stabilizer(&mux);
        for _ in 0..8 {
            stab.request_layout();
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(mux.layout_count(), 1);
        assert_eq!(stab.run_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_within_window_restarts_debounce() {
        let mux = Arc::new(MockMux::new());
        let stab = stabilizer(&mux);
        stab.request_layout();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mux.layout_count(), 0);
        stab.request_layout();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // 200ms after the first request, but only 100ms after the second.
        assert_eq!(mux.layout_count(), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mux.layout_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_during_run_queues_exactly_one_rerun() {
        let mux = Arc::new(MockMux::new());
        mux.set_layout_delay(Duration::from_millis(50));
        let stab = stabilizer(&mux);
        stab.request_layout();
        tokio::time::sleep(Duration::from_millis(160)).await;
        // Recompute is now in flight; pile on more requests.
        stab.request_layout();
        stab.request_layout();
        stab.request_layout();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(stab.run_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_returns_to_leader_after_recompute() {
        let mux = Arc::new(MockMux::new());
        let stab = stabilizer(&mux);
        stab.request_layout();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let calls = mux.calls();
        let layout_idx = calls
            .iter()
            .position(|c| matches!(c, crate::MuxCall::SelectLayout { .. }))
            .expect("layout call");
        assert_eq!(
            calls.get(layout_idx + 1),
            Some(&crate::MuxCall::FocusPane("%0".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flush_forces_immediate_recompute() {
        let mux = Arc::new(MockMux::new());
        let stab = stabilizer(&mux);
        stab.request_layout();
        // Debounce window still open; flush must not wait it out.
        stab.flush().await;
        assert_eq!(mux.layout_count(), 1);
        // The superseded timer must not fire a second run later.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(mux.layout_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_stabilizer_ignores_requests() {
        let mux = Arc::new(MockMux::new());
        let stab = stabilizer(&mux);
        stab.request_layout();
        stab.dispose();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(mux.layout_count(), 0);
        stab.request_layout();
        stab.flush().await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(mux.layout_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recompute_failure_is_swallowed() {
        let mux = Arc::new(MockMux::new());
        mux.set_fail_layout(true);
        let stab = stabilizer(&mux);
        stab.request_layout();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(stab.run_count(), 1);
        // The stabilizer keeps accepting work after a failed run.
        mux.set_fail_layout(false);
        stab.request_layout();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(mux.layout_count(), 1);
        assert_eq!(stab.run_count(), 2);
    }
}

use tokio::sync::broadcast;

use muster_types::TeamEvent;

/// Fan-out bus for team events. Lossy by design: slow subscribers fall
/// behind rather than backpressuring the leader loop.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TeamEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TeamEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: TeamEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

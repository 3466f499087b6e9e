pub mod heartbeat;
pub mod messaging;
pub mod phase;
pub mod runtime;
pub mod tasks;

pub use heartbeat::record_heartbeat_from_env;
pub use messaging::Messenger;
pub use phase::{infer_phase, is_terminal_phase};
pub use runtime::{run_team, RunOptions, TeamResult, TeamRuntime};
pub use tasks::TaskStore;

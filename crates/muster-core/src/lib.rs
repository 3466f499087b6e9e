pub mod config;
pub mod event_bus;
pub mod lockfile;
pub mod paths;
pub mod store;

pub use config::*;
pub use event_bus::*;
pub use lockfile::*;
pub use paths::*;
pub use store::*;

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub mod adapter;
pub mod orchestrator;

pub use adapter::*;
pub use orchestrator::*;

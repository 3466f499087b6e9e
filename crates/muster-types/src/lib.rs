pub mod error;
pub mod event;
pub mod message;
pub mod pipeline;
pub mod task;
pub mod worker;

pub use error::*;
pub use event::*;
pub use message::*;
pub use pipeline::*;
pub use task::*;
pub use worker::*;

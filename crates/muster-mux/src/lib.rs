pub mod control;
pub mod layout;

pub use control::*;
pub use layout::*;

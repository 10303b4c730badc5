pub mod api;
pub mod health;
pub mod orchestrator;
pub mod rename;

pub use api::*;
pub use health::*;
pub use orchestrator::*;
pub use rename::*;

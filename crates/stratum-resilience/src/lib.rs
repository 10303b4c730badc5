pub mod breaker;
pub mod guard;
pub mod retry;

pub use breaker::*;
pub use guard::*;
pub use retry::*;

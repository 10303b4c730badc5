pub mod cycles;
pub mod dependency;
pub mod engine;
pub mod rules;

pub use cycles::*;
pub use dependency::*;
pub use engine::*;
pub use rules::*;

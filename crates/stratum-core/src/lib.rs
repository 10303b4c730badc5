pub mod concept;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use concept::*;
pub use config::*;
pub use error::*;
pub use traits::*;
pub use types::*;

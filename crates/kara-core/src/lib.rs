pub mod config;
pub mod error;
pub mod types;

pub use config::KaraConfig;
pub use error::{KaraError, Result};
pub use types::*;

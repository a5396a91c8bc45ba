pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, JudgmentFailurePolicy};
pub use error::LeadScoutError;
pub use types::*;

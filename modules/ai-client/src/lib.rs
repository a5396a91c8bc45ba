//! Provider-agnostic chat client with credential rotation and ordered
//! provider fallback.

pub mod claude;
pub mod error;
pub mod openai;
pub mod rotation;
pub mod traits;
pub mod util;

pub use claude::Claude;
pub use error::{AiError, Result};
pub use openai::OpenAi;
pub use rotation::{ChainOutcome, ProviderChain, ProviderFailure, RotatingProvider};
pub use traits::TextModel;

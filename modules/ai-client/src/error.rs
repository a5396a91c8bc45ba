use std::time::Duration;

use thiserror::Error;

use crate::util::truncate_to_char_boundary;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    /// Credential rejected (401/403). Rotating to another key can help.
    #[error("{provider} authentication failed: {message}")]
    Auth { provider: String, message: String },

    /// Rate limit or exhausted credit (402/429). Rotating can help.
    #[error("{provider} quota exceeded: {message}")]
    Quota { provider: String, message: String },

    /// Network failure or 5xx. A retry can help.
    #[error("{provider} transient failure: {message}")]
    Transient { provider: String, message: String },

    #[error("{provider} timed out after {elapsed:?}")]
    Timeout { provider: String, elapsed: Duration },

    /// The provider answered but the answer was unusable.
    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("all credentials for {provider} failed ({attempts} attempts)")]
    Exhausted { provider: String, attempts: usize },
}

/// Error bodies kept in messages; provider error pages can be large.
const MAX_ERROR_BODY_BYTES: usize = 500;

impl AiError {
    /// Errors after which trying the next credential or provider makes sense.
    pub fn is_rotatable(&self) -> bool {
        !matches!(self, AiError::InvalidResponse { .. })
    }

    pub(crate) fn from_status(provider: &str, status: u16, message: String) -> Self {
        let provider = provider.to_string();
        let message = truncate_to_char_boundary(&message, MAX_ERROR_BODY_BYTES).to_string();
        match status {
            401 | 403 => AiError::Auth { provider, message },
            402 | 429 => AiError::Quota { provider, message },
            // Anthropic reports an empty credit balance as a 400.
            400 if message.contains("credit balance") => AiError::Quota { provider, message },
            s if s >= 500 => AiError::Transient { provider, message },
            _ => AiError::InvalidResponse {
                provider,
                message: format!("status {status}: {message}"),
            },
        }
    }

    pub(crate) fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        AiError::Transient {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserlessError>;

#[derive(Debug, Error)]
pub enum BrowserlessError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Navigation timed out after {0}ms")]
    Timeout(u64),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl BrowserlessError {
    /// Whether a retry against the same endpoint can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BrowserlessError::Network(_) | BrowserlessError::Timeout(_) => true,
            BrowserlessError::Api { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

impl From<reqwest::Error> for BrowserlessError {
    fn from(err: reqwest::Error) -> Self {
        BrowserlessError::Network(err.to_string())
    }
}

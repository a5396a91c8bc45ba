use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeadScoutError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Scraping error: {0}")]
    Scraping(String),

    #[error("Blocked by search engine challenge: {0}")]
    Blocked(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

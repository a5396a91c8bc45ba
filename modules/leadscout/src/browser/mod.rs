// Browser automation boundary.
//
// The scraper only sees `BrowserSession`: navigate to a URL, get a rendered
// document back. Two engines implement it (Browserless over HTTP and a local
// headless Chromium), and `SessionPool` hands sessions out one task at a time.

mod browserless;
mod chrome;
mod pool;

pub use browserless::BrowserlessSession;
pub use browserless_client::WaitPolicy;
pub use chrome::ChromeSession;
pub use pool::{SessionLease, SessionPool, MAX_POOL_SIZE};

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::warn;

/// A rendered page.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub html: String,
}

impl Document {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }

    /// Parse the page and run `extractor` over the DOM. The parsed tree is
    /// not `Send`, so it never outlives this call.
    pub fn extract<T>(&self, extractor: impl FnOnce(&scraper::Html) -> T) -> T {
        let dom = scraper::Html::parse_document(&self.html);
        extractor(&dom)
    }
}

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    /// Worth retrying: network blips, 5xx, browser failed to fork.
    #[error("transient navigation failure for {url}: {message}")]
    Transient { url: String, message: String },

    /// Not worth retrying: bad URL, bad credentials, non-retryable status.
    #[error("navigation to {url} failed: {message}")]
    Fatal { url: String, message: String },
}

impl NavigationError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NavigationError::Fatal { .. })
    }
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Label for logs.
    fn id(&self) -> &str;

    async fn navigate(
        &self,
        url: &str,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> Result<Document, NavigationError>;
}

/// Identity a session presents to sites: user agent and request headers.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept_language: String,
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:131.0) Gecko/20100101 Firefox/131.0",
];

impl BrowserProfile {
    /// A Brazilian-Portuguese desktop profile with a randomly chosen user agent.
    pub fn pt_br() -> Self {
        let ua = USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())];
        Self {
            user_agent: ua.to_string(),
            accept_language: "pt-BR,pt;q=0.9,en-US;q=0.7,en;q=0.6".to_string(),
        }
    }
}

/// Max attempts for retryable navigation failures.
pub const NAVIGATION_MAX_ATTEMPTS: u32 = 3;
/// Base backoff. Actual delay is base * 3^attempt + jitter.
const NAVIGATION_RETRY_BASE: Duration = Duration::from_secs(2);

/// Navigate with bounded retries and exponential backoff plus jitter.
pub async fn navigate_with_retry(
    session: &dyn BrowserSession,
    url: &str,
    wait: WaitPolicy,
    timeout: Duration,
) -> Result<Document, NavigationError> {
    let mut attempt = 0;
    loop {
        match session.navigate(url, wait, timeout).await {
            Ok(doc) => return Ok(doc),
            Err(e) if e.is_retryable() && attempt + 1 < NAVIGATION_MAX_ATTEMPTS => {
                let backoff = NAVIGATION_RETRY_BASE * 3u32.pow(attempt);
                let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
                warn!(
                    session = session.id(),
                    url,
                    attempt = attempt + 1,
                    backoff_secs = backoff.as_secs(),
                    error = %e,
                    "Navigation failed, retrying after backoff"
                );
                tokio::time::sleep(backoff + jitter).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

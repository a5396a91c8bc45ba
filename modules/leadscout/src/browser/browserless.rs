use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use browserless_client::{BrowserlessClient, BrowserlessError, ContentRequest, WaitPolicy};
use tracing::{debug, info};

use super::{BrowserProfile, BrowserSession, Document, NavigationError};

/// Session backed by a Browserless `/content` endpoint. Each session keeps
/// its own profile so concurrent sessions look like different visitors.
pub struct BrowserlessSession {
    id: String,
    client: Arc<BrowserlessClient>,
    profile: BrowserProfile,
}

impl BrowserlessSession {
    pub fn new(id: impl Into<String>, client: Arc<BrowserlessClient>, profile: BrowserProfile) -> Self {
        let id = id.into();
        info!(session = %id, user_agent = %profile.user_agent, "Using BrowserlessSession");
        Self { id, client, profile }
    }
}

#[async_trait]
impl BrowserSession for BrowserlessSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(
        &self,
        url: &str,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> Result<Document, NavigationError> {
        debug!(session = %self.id, url, "Navigating");

        let request = ContentRequest::new(url)
            .wait(wait)
            .timeout(timeout)
            .user_agent(&self.profile.user_agent)
            .header("Accept-Language", &self.profile.accept_language);

        match self.client.content(&request).await {
            Ok(html) => Ok(Document::new(url, html)),
            Err(BrowserlessError::Timeout(_)) => Err(NavigationError::Timeout {
                url: url.to_string(),
                timeout,
            }),
            Err(e) if e.is_transient() => Err(NavigationError::Transient {
                url: url.to_string(),
                message: e.to_string(),
            }),
            Err(e) => Err(NavigationError::Fatal {
                url: url.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

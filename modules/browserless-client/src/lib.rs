pub mod error;

pub use error::{BrowserlessError, Result};

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

/// When Browserless considers a navigation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitPolicy {
    #[serde(rename = "load")]
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle2")]
    NetworkIdle,
}

/// Options for a single `/content` render.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub url: String,
    pub wait: WaitPolicy,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
    /// Selector to wait for after navigation, best-effort.
    pub wait_for_selector: Option<String>,
}

impl ContentRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            wait: WaitPolicy::DomContentLoaded,
            timeout: Duration::from_secs(30),
            user_agent: None,
            headers: HashMap::new(),
            wait_for_selector: None,
        }
    }

    pub fn wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn wait_for_selector(mut self, selector: impl Into<String>) -> Self {
        self.wait_for_selector = Some(selector.into());
        self
    }

    fn body(&self) -> serde_json::Value {
        let timeout_ms = self.timeout.as_millis() as u64;
        let mut body = serde_json::json!({
            "url": self.url,
            "bestAttempt": true,
            "gotoOptions": {
                "waitUntil": self.wait,
                "timeout": timeout_ms,
            },
        });
        if let Some(ref ua) = self.user_agent {
            body["userAgent"] = serde_json::json!(ua);
        }
        if !self.headers.is_empty() {
            body["setExtraHTTPHeaders"] = serde_json::json!(self.headers);
        }
        if let Some(ref selector) = self.wait_for_selector {
            body["waitForSelector"] = serde_json::json!({
                "selector": selector,
                "timeout": timeout_ms,
            });
        }
        body
    }
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// Fetch fully-rendered HTML content for a URL via Browserless /content endpoint.
    pub async fn content(&self, request: &ContentRequest) -> Result<String> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        debug!(url = %request.url, wait = ?request.wait, "Browserless content request");

        // Leave headroom over the in-browser navigation timeout for the render itself.
        let http_timeout = request.timeout + Duration::from_secs(15);
        let timeout_ms = request.timeout.as_millis() as u64;

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .timeout(http_timeout)
            .json(&request.body())
            .send()
            .await
            .map_err(|e| classify(e, timeout_ms))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            if status.as_u16() == 408 {
                return Err(BrowserlessError::Timeout(timeout_ms));
            }
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        resp.text().await.map_err(|e| classify(e, timeout_ms))
    }
}

fn classify(err: reqwest::Error, timeout_ms: u64) -> BrowserlessError {
    if err.is_timeout() {
        BrowserlessError::Timeout(timeout_ms)
    } else {
        BrowserlessError::from(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn body_carries_wait_policy_and_headers() {
        let body = ContentRequest::new("https://www.google.com/search?q=x")
            .wait(WaitPolicy::NetworkIdle)
            .timeout(Duration::from_secs(20))
            .user_agent("Mozilla/5.0")
            .header("Accept-Language", "pt-BR,pt;q=0.9")
            .body();

        assert_eq!(body["gotoOptions"]["waitUntil"], "networkidle2");
        assert_eq!(body["gotoOptions"]["timeout"], 20_000);
        assert_eq!(body["userAgent"], "Mozilla/5.0");
        assert_eq!(body["setExtraHTTPHeaders"]["Accept-Language"], "pt-BR,pt;q=0.9");
        assert!(body.get("waitForSelector").is_none());
    }

    #[tokio::test]
    async fn content_returns_html() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/content"))
            .and(query_param("token", "secret"))
            .and(body_partial_json(serde_json::json!({ "url": "https://example.com" })))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let client = BrowserlessClient::new(&server.uri(), Some("secret")).unwrap();
        let html = client
            .content(&ContentRequest::new("https://example.com"))
            .await
            .unwrap();
        assert_eq!(html, "<html>ok</html>");
    }

    #[tokio::test]
    async fn api_errors_carry_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/content"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = BrowserlessClient::new(&server.uri(), None).unwrap();
        let err = client
            .content(&ContentRequest::new("https://example.com"))
            .await
            .unwrap_err();
        match err {
            BrowserlessError::Api { status, ref message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let err = BrowserlessError::Api {
            status: 401,
            message: "bad token".into(),
        };
        assert!(!err.is_transient());
        assert!(BrowserlessError::Timeout(1000).is_transient());
    }
}

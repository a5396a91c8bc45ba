use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{BrowserProfile, BrowserSession, Document, NavigationError, WaitPolicy};

/// Session that shells out to headless Chromium `--dump-dom`. Each navigation
/// gets a fresh temp profile dir, so no cookies carry over between pages.
pub struct ChromeSession {
    id: String,
    chrome_bin: String,
    profile: BrowserProfile,
}

impl ChromeSession {
    pub fn new(id: impl Into<String>, chrome_bin: impl Into<String>, profile: BrowserProfile) -> Self {
        let id = id.into();
        let chrome_bin = chrome_bin.into();
        info!(session = %id, chrome_bin = %chrome_bin, "Using ChromeSession (dump-dom)");
        Self {
            id,
            chrome_bin,
            profile,
        }
    }

    fn args(&self, url: &str, wait: WaitPolicy, user_data_dir: &str) -> Vec<String> {
        vec![
            "--headless".to_string(),
            "--no-sandbox".to_string(),
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--lang=pt-BR".to_string(),
            format!("--user-agent={}", self.profile.user_agent),
            format!("--user-data-dir={user_data_dir}"),
            format!("--virtual-time-budget={}", virtual_time_budget_ms(wait)),
            "--dump-dom".to_string(),
            url.to_string(),
        ]
    }
}

/// How long Chromium lets the page run scripts before dumping the DOM.
fn virtual_time_budget_ms(wait: WaitPolicy) -> u64 {
    match wait {
        WaitPolicy::DomContentLoaded => 2_000,
        WaitPolicy::Load => 5_000,
        WaitPolicy::NetworkIdle => 10_000,
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(
        &self,
        url: &str,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> Result<Document, NavigationError> {
        let parsed = url::Url::parse(url).map_err(|e| NavigationError::Fatal {
            url: url.to_string(),
            message: format!("invalid URL: {e}"),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(NavigationError::Fatal {
                url: url.to_string(),
                message: format!("only http/https URLs are allowed, got: {}", parsed.scheme()),
            });
        }

        let tmp_dir = tempfile::tempdir().map_err(|e| NavigationError::Transient {
            url: url.to_string(),
            message: format!("failed to create temp profile dir: {e}"),
        })?;
        let user_data_dir = tmp_dir.path().display().to_string();

        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&self.chrome_bin)
                .args(self.args(url, wait, &user_data_dir))
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                if output.stdout.is_empty() {
                    return Err(NavigationError::Transient {
                        url: url.to_string(),
                        message: "Chrome returned an empty DOM".to_string(),
                    });
                }
                Ok(Document::new(url, String::from_utf8_lossy(&output.stdout).into_owned()))
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(session = %self.id, url, stderr = %stderr, "Chrome exited with error");
                // Fork/resource exhaustion clears up on its own.
                let transient = stderr.contains("Cannot fork")
                    || stderr.contains("Resource temporarily unavailable");
                let message = format!("Chrome exited with {}", output.status);
                if transient {
                    Err(NavigationError::Transient {
                        url: url.to_string(),
                        message,
                    })
                } else {
                    Err(NavigationError::Fatal {
                        url: url.to_string(),
                        message,
                    })
                }
            }
            Ok(Err(e)) => Err(NavigationError::Transient {
                url: url.to_string(),
                message: format!("failed to launch Chrome: {e}"),
            }),
            Err(_) => Err(NavigationError::Timeout {
                url: url.to_string(),
                timeout,
            }),
        }
    }
}

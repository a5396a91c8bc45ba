// Search-engine scraping: build the results URL for each page, navigate
// through a leased browser session, check page 1 for challenges, extract
// candidates.

mod detect;
mod extract;

pub use detect::{is_authenticated, is_challenge};
pub use extract::{extract_results, MAX_RESULTS_PER_PAGE};

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use leadscout_common::{Config, RawResult, SearchTask};

use crate::browser::{navigate_with_retry, BrowserSession, NavigationError, WaitPolicy};

const SEARCH_URL: &str = "https://www.google.com/search";

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Page 1 served a bot challenge to an anonymous session.
    #[error("search blocked by a bot challenge at {url}")]
    Blocked { url: String },

    #[error("navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    /// Navigation kept failing after retries.
    #[error("navigation failed: {message}")]
    Transient { message: String },
}

impl From<NavigationError> for ScrapeError {
    fn from(err: NavigationError) -> Self {
        match err {
            NavigationError::Timeout { url, timeout } => ScrapeError::Timeout { url, timeout },
            other => ScrapeError::Transient {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperSettings {
    pub results_per_page: u32,
    pub navigation_timeout: Duration,
    pub page_delay: Duration,
    pub task_delay: Duration,
    /// Pause before re-checking a page served to a signed-in session.
    pub auth_wait: Duration,
}

impl ScraperSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            results_per_page: config.results_per_page,
            navigation_timeout: Duration::from_secs(30),
            page_delay: config.page_delay,
            task_delay: config.task_delay,
            auth_wait: Duration::from_secs(5),
        }
    }
}

/// Pages scraped for one task and the candidates they produced.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOutcome {
    pub results: Vec<RawResult>,
    /// Every page that was fetched and extracted, including an empty last one.
    pub pages: Vec<u32>,
}

pub struct SearchScraper {
    settings: ScraperSettings,
}

impl SearchScraper {
    pub fn new(settings: ScraperSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ScraperSettings {
        &self.settings
    }

    /// Results URL for `term` at 1-based `page`.
    pub fn search_url(&self, term: &str, page: u32) -> String {
        let mut url = url::Url::parse(SEARCH_URL).expect("SEARCH_URL is a valid URL");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("q", term)
                .append_pair("hl", "pt-BR")
                .append_pair("gl", "br")
                .append_pair("num", &self.settings.results_per_page.to_string());
            if page > 1 {
                let start = (page - 1) * self.settings.results_per_page;
                query.append_pair("start", &start.to_string());
            }
        }
        url.to_string()
    }

    /// Scrape pages `1..=max_pages` for `task`.
    pub async fn scrape(
        &self,
        session: &dyn BrowserSession,
        task: &SearchTask,
        max_pages: u32,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        self.scrape_pages(session, task, 1, max_pages).await
    }

    /// Scrape pages `first_page..=max_pages` for `task`, stopping early when a
    /// page after the first comes back empty.
    pub async fn scrape_pages(
        &self,
        session: &dyn BrowserSession,
        task: &SearchTask,
        first_page: u32,
        max_pages: u32,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let mut outcome = ScrapeOutcome::default();

        for page in first_page.max(1)..=max_pages {
            if page > first_page {
                tokio::time::sleep(jittered(self.settings.page_delay)).await;
            }

            let url = self.search_url(&task.term, page);
            let mut doc = navigate_with_retry(
                session,
                &url,
                WaitPolicy::DomContentLoaded,
                self.settings.navigation_timeout,
            )
            .await?;

            if page == 1 {
                if is_authenticated(&doc.html) {
                    warn!(
                        session = session.id(),
                        term = %task.term,
                        "Signed-in session detected, waiting before re-check"
                    );
                    tokio::time::sleep(self.settings.auth_wait).await;
                    doc = navigate_with_retry(
                        session,
                        &url,
                        WaitPolicy::DomContentLoaded,
                        self.settings.navigation_timeout,
                    )
                    .await?;
                } else if is_challenge(&doc.html) {
                    warn!(session = session.id(), term = %task.term, "Bot challenge on first page");
                    return Err(ScrapeError::Blocked { url });
                }
            }

            let results = doc.extract(|dom| extract_results(dom, &url, page));
            outcome.pages.push(page);
            debug!(term = %task.term, page, found = results.len(), "Page extracted");

            if results.is_empty() && page > 1 {
                break;
            }
            outcome.results.extend(results);
        }

        info!(
            term = %task.term,
            pages = outcome.pages.len(),
            results = outcome.results.len(),
            "Scrape finished"
        );
        tokio::time::sleep(jittered(self.settings.task_delay)).await;
        Ok(outcome)
    }
}

/// `base` plus up to a quarter of it again.
fn jittered(base: Duration) -> Duration {
    let max_extra = base.as_millis() as u64 / 4;
    base + Duration::from_millis(rand::rng().random_range(0..=max_extra))
}

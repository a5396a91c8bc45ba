// Test mocks for the search loop.
//
// Three mocks matching the trait boundaries:
// - MockSession (BrowserSession): HashMap-based URL→HTML with scripted failures
// - MockModel (ModelJudge): fixed answer or failure, counts calls
// - MemoryStore (ProspectStore): stateful in-memory documents
//
// Plus helpers for building tasks and results.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use leadscout_common::{
    CacheData, CampaignPlan, CampaignStats, CompanyRecord, LearningStats, RawResult,
    SearchCompletionRecord, SearchTask, StatsPatch, Strategy,
};

use crate::browser::{BrowserSession, Document, NavigationError, WaitPolicy};
use crate::store::ProspectStore;
use crate::validator::{JudgeError, JudgmentPrompt, ModelJudge};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn task(term: &str, neighborhood: &str, business_type: &str, strategy: Strategy) -> SearchTask {
    SearchTask {
        term: term.to_string(),
        neighborhood: neighborhood.to_string(),
        business_type: business_type.to_string(),
        strategy,
    }
}

/// Results-page HTML with one `div.g` block per `(url, title, snippet)`.
pub fn results_page(entries: &[(&str, &str, &str)]) -> String {
    let mut html = String::from("<html><body><div id=\"search\">");
    for (url, title, snippet) in entries {
        html.push_str(&format!(
            "<div class=\"g\"><a href=\"{url}\"><h3>{title}</h3></a><div class=\"VwiC3b\">{snippet}</div></div>"
        ));
    }
    html.push_str("</div></body></html>");
    html
}

pub fn raw_result(url: &str, title: &str, description: &str) -> RawResult {
    RawResult {
        title: title.to_string(),
        url: url.to_string(),
        description: description.to_string(),
        position: 1,
        source_page: 1,
    }
}

// ---------------------------------------------------------------------------
// MockSession
// ---------------------------------------------------------------------------

/// HashMap-based browser session. Unregistered URLs fail with a fatal
/// navigation error unless a fallback page is set.
/// Builder pattern: `.on_page()`, `.fail_times()`, `.otherwise()`.
pub struct MockSession {
    id: String,
    pages: HashMap<String, String>,
    fallback: Option<String>,
    failures: Mutex<HashMap<String, u32>>,
    visited: Mutex<Vec<String>>,
    navigations: AtomicUsize,
}

impl MockSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pages: HashMap::new(),
            fallback: None,
            failures: Mutex::new(HashMap::new()),
            visited: Mutex::new(Vec::new()),
            navigations: AtomicUsize::new(0),
        }
    }

    pub fn on_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Served for every URL without a registered page.
    pub fn otherwise(mut self, html: &str) -> Self {
        self.fallback = Some(html.to_string());
        self
    }

    /// Fail the next `times` navigations to `url` with a transient error.
    pub fn fail_times(self, url: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(
        &self,
        url: &str,
        _wait: WaitPolicy,
        _timeout: Duration,
    ) -> Result<Document, NavigationError> {
        self.navigations.fetch_add(1, Ordering::SeqCst);
        self.visited.lock().unwrap().push(url.to_string());

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(NavigationError::Transient {
                        url: url.to_string(),
                        message: "MockSession: scripted failure".to_string(),
                    });
                }
            }
        }

        match self.pages.get(url).or(self.fallback.as_ref()) {
            Some(html) => Ok(Document::new(url, html.clone())),
            None => Err(NavigationError::Fatal {
                url: url.to_string(),
                message: "MockSession: no page registered".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MockModel
// ---------------------------------------------------------------------------

/// Judge that always gives the same answer (or always fails). Clones share
/// the call counter.
#[derive(Clone)]
pub struct MockModel {
    answer: Option<String>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<JudgmentPrompt>>>,
}

impl MockModel {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<JudgmentPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelJudge for MockModel {
    async fn judge(&self, prompt: &JudgmentPrompt, _timeout: Duration) -> Result<String, JudgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        match &self.answer {
            Some(answer) => Ok(answer.clone()),
            None => Err(JudgeError::Exhausted("MockModel: scripted failure".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStoreInner {
    companies: BTreeMap<String, CompanyRecord>,
    completions: HashMap<String, SearchCompletionRecord>,
    stats: CampaignStats,
    learning: LearningStats,
    cache: CacheData,
    plan: CampaignPlan,
    fail_writes: bool,
}

/// In-memory `ProspectStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write return an error.
    pub fn failing_writes(self) -> Self {
        self.inner.lock().unwrap().fail_writes = true;
        self
    }

    pub fn company_count(&self) -> usize {
        self.inner.lock().unwrap().companies.len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.inner.lock().unwrap().fail_writes {
            bail!("MemoryStore: writes disabled");
        }
        Ok(())
    }
}

#[async_trait]
impl ProspectStore for MemoryStore {
    async fn get_company(&self, url: &str) -> Result<Option<CompanyRecord>> {
        Ok(self.inner.lock().unwrap().companies.get(url).cloned())
    }

    async fn save_company(&self, record: &CompanyRecord) -> Result<bool> {
        self.check_writable()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.companies.contains_key(&record.url) {
            return Ok(false);
        }
        inner.companies.insert(record.url.clone(), record.clone());
        Ok(true)
    }

    async fn all_companies(&self) -> Result<Vec<CompanyRecord>> {
        Ok(self.inner.lock().unwrap().companies.values().cloned().collect())
    }

    async fn get_stats(&self) -> Result<CampaignStats> {
        Ok(self.inner.lock().unwrap().stats.clone())
    }

    async fn update_stats(&self, patch: &StatsPatch) -> Result<CampaignStats> {
        self.check_writable()?;
        let mut inner = self.inner.lock().unwrap();
        inner.stats.apply(patch);
        Ok(inner.stats.clone())
    }

    async fn get_learning_data(&self) -> Result<LearningStats> {
        Ok(self.inner.lock().unwrap().learning.clone())
    }

    async fn save_learning_data(&self, data: &LearningStats) -> Result<()> {
        self.check_writable()?;
        self.inner.lock().unwrap().learning = data.clone();
        Ok(())
    }

    async fn get_cache(&self) -> Result<CacheData> {
        Ok(self.inner.lock().unwrap().cache.clone())
    }

    async fn save_cache(&self, data: &CacheData) -> Result<()> {
        self.check_writable()?;
        self.inner.lock().unwrap().cache = data.clone();
        Ok(())
    }

    async fn get_completion(&self, term: &str) -> Result<Option<SearchCompletionRecord>> {
        Ok(self.inner.lock().unwrap().completions.get(term).cloned())
    }

    async fn save_completion(&self, record: &SearchCompletionRecord) -> Result<()> {
        self.check_writable()?;
        self.inner
            .lock()
            .unwrap()
            .completions
            .insert(record.search_term.clone(), record.clone());
        Ok(())
    }

    async fn get_plan(&self) -> Result<CampaignPlan> {
        Ok(self.inner.lock().unwrap().plan.clone())
    }

    async fn save_plan(&self, plan: &CampaignPlan) -> Result<()> {
        self.check_writable()?;
        self.inner.lock().unwrap().plan = plan.clone();
        Ok(())
    }
}

//! Per-task state machine and batch fan-out for the search loop.
//!
//! One task moves through `CacheCheck → Scraping → Validating → Persisting →
//! LearningUpdate → Done`, or stops early at `CacheHit`, `Skipped`,
//! `Blocked` or `Failed`. Stages within a task run strictly in order; a
//! batch runs up to `MAX_POOL_SIZE` tasks at once, each on its own session.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use leadscout_common::{
    normalize_url, CacheKind, CampaignPlan, CompanyRecord, Config, RawResult,
    SearchCompletionRecord, SearchTask, StatsPatch, ValidationOutcome, ValidationStage,
};

use crate::browser::{BrowserSession, SessionPool, WaitPolicy, MAX_POOL_SIZE};
use crate::cache::ResultCache;
use crate::learning::LearningStore;
use crate::scraper::{ScrapeError, ScrapeOutcome, SearchScraper};
use crate::store::ProspectStore;
use crate::term_generator::TermGenerator;
use crate::validator::{Candidate, Validator};

// =============================================================================
// Task states
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    CacheCheck,
    CacheHit,
    Skipped,
    Scraping,
    Blocked,
    Failed,
    Validating,
    Persisting,
    LearningUpdate,
    Done,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Done
                | TaskState::CacheHit
                | TaskState::Skipped
                | TaskState::Blocked
                | TaskState::Failed
        )
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, CacheCheck)
                | (CacheCheck, CacheHit)
                | (CacheCheck, Skipped)
                | (CacheCheck, Scraping)
                | (Scraping, Validating)
                | (Scraping, Blocked)
                | (Scraping, Failed)
                | (Validating, Persisting)
                | (Persisting, LearningUpdate)
                | (LearningUpdate, Done)
        )
    }
}

/// Tracks one task's progress and logs each transition.
struct TaskRun<'a> {
    term: &'a str,
    state: TaskState,
}

impl<'a> TaskRun<'a> {
    fn new(term: &'a str) -> Self {
        Self {
            term,
            state: TaskState::Pending,
        }
    }

    fn enter(&mut self, next: TaskState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(term = self.term, from = ?self.state, to = ?next, "Task state");
        self.state = next;
    }
}

/// What a finished task produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub term: String,
    pub state: TaskState,
    /// Companies associated with the term (replayed for CACHE_HIT and SKIPPED).
    pub companies: Vec<CompanyRecord>,
    /// Companies persisted for the first time by this run.
    pub new_companies: u32,
    pub raw_results: usize,
}

impl TaskReport {
    fn terminal(task: &SearchTask, state: TaskState, companies: Vec<CompanyRecord>) -> Self {
        Self {
            term: task.term.clone(),
            state,
            companies,
            new_companies: 0,
            raw_results: 0,
        }
    }
}

// =============================================================================
// Batches
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub start_index: usize,
    pub batch_size: usize,
    /// Clamped to `1..=MAX_POOL_SIZE` and the pool size.
    pub parallelism: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results_found: u32,
    pub next_index: usize,
    pub has_more: bool,
}

// =============================================================================
// Orchestrator
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_terms: usize,
    pub max_pages: u32,
    /// Bound on the whole scraping stage of one task.
    pub task_timeout: Duration,
    pub fetch_landing_pages: bool,
    pub landing_timeout: Duration,
    /// Scrape the missing pages of a term whose first page is already done.
    pub resume_partial: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_terms: config.max_terms,
            max_pages: config.max_pages,
            task_timeout: config.task_timeout,
            fetch_landing_pages: config.fetch_landing_pages,
            landing_timeout: Duration::from_secs(15),
            resume_partial: config.resume_partial_terms,
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn ProspectStore>,
    cache: Arc<ResultCache>,
    learning: Arc<LearningStore>,
    generator: TermGenerator,
    scraper: SearchScraper,
    validator: Validator,
    sessions: SessionPool,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ProspectStore>,
        cache: Arc<ResultCache>,
        learning: Arc<LearningStore>,
        generator: TermGenerator,
        scraper: SearchScraper,
        validator: Validator,
        sessions: SessionPool,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            cache,
            learning,
            generator,
            scraper,
            validator,
            sessions,
            settings,
        }
    }

    /// A freshly generated task list for the current learning snapshot.
    pub async fn tasks(&self) -> Result<Vec<SearchTask>> {
        let stats = self.learning.snapshot().await?;
        Ok(self.generator.generate(&stats, self.settings.max_terms))
    }

    /// Task list for the campaign a batch belongs to. `start_index == 0`
    /// plans a new campaign from the current learning snapshot; later
    /// batches reuse the stored plan.
    pub async fn campaign_tasks(&self, start_index: usize) -> Result<Vec<SearchTask>> {
        if start_index > 0 {
            let plan = self
                .store
                .get_plan()
                .await
                .context("Failed to read campaign plan")?;
            if plan.is_planned() {
                return Ok(plan.tasks);
            }
            warn!(start_index, "No campaign plan stored, planning a new one");
        }

        let plan = CampaignPlan::new(self.tasks().await?);
        self.store
            .save_plan(&plan)
            .await
            .context("Failed to save campaign plan")?;
        info!(tasks = plan.tasks.len(), "Campaign planned");
        Ok(plan.tasks)
    }

    /// Run `batch_size` tasks starting at `start_index` of the campaign plan.
    pub async fn advance_batch(&self, request: BatchRequest) -> Result<BatchReport> {
        let tasks = self.campaign_tasks(request.start_index).await?;
        let start = request.start_index.min(tasks.len());
        let end = start.saturating_add(request.batch_size).min(tasks.len());
        let batch = &tasks[start..end];
        let parallelism = request
            .parallelism
            .clamp(1, MAX_POOL_SIZE)
            .min(self.sessions.size());

        info!(
            start_index = start,
            batch = batch.len(),
            total = tasks.len(),
            parallelism,
            "Advancing batch"
        );

        let reports: Vec<Option<TaskReport>> = stream::iter(batch.iter().map(|task| async move {
            match self.run_task(task).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(term = %task.term, error = %format!("{e:#}"), "Task aborted");
                    self.record_aborted(task).await;
                    None
                }
            }
        }))
        .buffer_unordered(parallelism)
        .collect()
        .await;

        let results_found = reports
            .iter()
            .flatten()
            .map(|r| r.new_companies)
            .sum();

        let purged = self.cache.purge_expired();
        if purged > 0 {
            debug!(purged, "Expired cache entries dropped");
        }
        if let Err(e) = self.cache.flush().await {
            warn!(error = %e, "Cache flush failed, continuing");
        }

        let report = BatchReport {
            results_found,
            next_index: end,
            has_more: end < tasks.len(),
        };
        info!(
            results_found = report.results_found,
            next_index = report.next_index,
            has_more = report.has_more,
            "Batch complete"
        );
        Ok(report)
    }

    /// Drive one task to a terminal state. Persistence failures are errors;
    /// scrape failures are terminal states.
    pub async fn run_task(&self, task: &SearchTask) -> Result<TaskReport> {
        let mut run = TaskRun::new(&task.term);
        run.enter(TaskState::CacheCheck);

        if let Some(companies) = self
            .cache
            .get::<Vec<CompanyRecord>>(CacheKind::Search, &task.term)
        {
            run.enter(TaskState::CacheHit);
            info!(term = %task.term, companies = companies.len(), "Search cache hit");
            return Ok(TaskReport::terminal(task, TaskState::CacheHit, companies));
        }

        let completion = self
            .store
            .get_completion(&task.term)
            .await
            .context("Failed to read completion record")?;
        let first_page = match completion.as_ref().map(|r| self.resume_page(r)) {
            Some(None) => {
                run.enter(TaskState::Skipped);
                let companies = self.store.companies_for_term(&task.term).await?;
                info!(term = %task.term, companies = companies.len(), "Already scraped, replaying");
                return Ok(TaskReport::terminal(task, TaskState::Skipped, companies));
            }
            Some(Some(page)) => page,
            None => 1,
        };

        run.enter(TaskState::Scraping);
        let session = self.sessions.acquire().await?;
        let scraped = tokio::time::timeout(
            self.settings.task_timeout,
            self.scraper
                .scrape_pages(&*session, task, first_page, self.settings.max_pages),
        )
        .await;

        let outcome = match scraped {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(ScrapeError::Blocked { url })) => {
                run.enter(TaskState::Blocked);
                warn!(term = %task.term, url = %url, "Search blocked");
                self.record_unproductive(task, TaskState::Blocked).await?;
                return Ok(TaskReport::terminal(task, TaskState::Blocked, Vec::new()));
            }
            Ok(Err(e)) => {
                run.enter(TaskState::Failed);
                warn!(term = %task.term, error = %e, "Scrape failed");
                self.record_unproductive(task, TaskState::Failed).await?;
                return Ok(TaskReport::terminal(task, TaskState::Failed, Vec::new()));
            }
            Err(_) => {
                run.enter(TaskState::Failed);
                warn!(
                    term = %task.term,
                    timeout_secs = self.settings.task_timeout.as_secs(),
                    "Scrape timed out"
                );
                self.record_unproductive(task, TaskState::Failed).await?;
                return Ok(TaskReport::terminal(task, TaskState::Failed, Vec::new()));
            }
        };

        run.enter(TaskState::Validating);
        let accepted = self.validate_results(&*session, task, &outcome.results).await?;
        drop(session);

        run.enter(TaskState::Persisting);
        let new_companies = self.persist(task, &accepted).await?;
        self.record_completion(task, completion, &outcome).await?;
        let companies = self.store.companies_for_term(&task.term).await?;
        self.cache.set(CacheKind::Search, &task.term, &companies);

        run.enter(TaskState::LearningUpdate);
        self.learning
            .update(
                &task.term,
                &task.neighborhood,
                &task.business_type,
                task.strategy,
                new_companies,
            )
            .await?;
        self.store
            .update_stats(&StatsPatch {
                companies_found: u64::from(new_companies),
                searches_run: 1,
                last_run_at: Some(Utc::now()),
                ..Default::default()
            })
            .await?;

        run.enter(TaskState::Done);
        info!(
            term = %task.term,
            raw = outcome.results.len(),
            accepted = accepted.len(),
            new = new_companies,
            "Task done"
        );
        Ok(TaskReport {
            term: task.term.clone(),
            state: TaskState::Done,
            companies,
            new_companies,
            raw_results: outcome.results.len(),
        })
    }

    /// Page to resume a previously seen term at, or `None` when it is finished.
    /// Without `resume_partial`, a finished first page finishes the term.
    fn resume_page(&self, record: &SearchCompletionRecord) -> Option<u32> {
        if record.completed_at.is_some() && !self.settings.resume_partial {
            return None;
        }
        record.next_page(self.settings.max_pages)
    }

    /// Validate each raw result once per normalized URL. Known companies are
    /// skipped and judgments are memoized per URL, except failure-policy
    /// fallbacks.
    async fn validate_results(
        &self,
        session: &dyn BrowserSession,
        task: &SearchTask,
        results: &[RawResult],
    ) -> Result<Vec<(RawResult, ValidationOutcome)>> {
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();

        for result in results {
            let url = match normalize_url(&result.url) {
                Ok(url) => url,
                Err(e) => {
                    debug!(url = %result.url, error = %e, "Skipping unparseable result URL");
                    continue;
                }
            };
            if !seen.insert(url.clone()) {
                continue;
            }
            if self.store.get_company(&url).await?.is_some() {
                debug!(url = %url, "Company already known");
                continue;
            }

            let outcome = match self
                .cache
                .get::<ValidationOutcome>(CacheKind::Judgment, &url)
            {
                Some(cached) => cached,
                None => {
                    let page_html = self.landing_page(session, &result.url).await;
                    let candidate = Candidate {
                        result,
                        task,
                        page_html: page_html.as_deref(),
                    };
                    let outcome = self.validator.validate(&candidate).await;
                    // A fallback verdict stands for this run only.
                    if outcome.stage != ValidationStage::ModelFallback {
                        self.cache.set(CacheKind::Judgment, &url, &outcome);
                    }
                    outcome
                }
            };

            if outcome.accept {
                let mut result = result.clone();
                result.url = url;
                accepted.push((result, outcome));
            }
        }

        Ok(accepted)
    }

    /// Best-effort landing-page fetch; `None` falls back to the snippet.
    async fn landing_page(&self, session: &dyn BrowserSession, url: &str) -> Option<String> {
        if !self.settings.fetch_landing_pages {
            return None;
        }
        match session
            .navigate(url, WaitPolicy::DomContentLoaded, self.settings.landing_timeout)
            .await
        {
            Ok(doc) => Some(doc.html),
            Err(e) => {
                debug!(url, error = %e, "Landing page unavailable, using snippet");
                None
            }
        }
    }

    /// Insert accepted companies; returns how many were new.
    async fn persist(
        &self,
        task: &SearchTask,
        accepted: &[(RawResult, ValidationOutcome)],
    ) -> Result<u32> {
        let mut inserted = 0;
        for (result, validation) in accepted {
            let record = CompanyRecord {
                url: result.url.clone(),
                title: result.title.clone(),
                description: result.description.clone(),
                neighborhood: task.neighborhood.clone(),
                business_type: task.business_type.clone(),
                search_term: task.term.clone(),
                found_at: Utc::now(),
                validation: validation.clone(),
                analysis: None,
            };
            if self
                .store
                .save_company(&record)
                .await
                .with_context(|| format!("Failed to save company {}", record.url))?
            {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn record_completion(
        &self,
        task: &SearchTask,
        previous: Option<SearchCompletionRecord>,
        outcome: &ScrapeOutcome,
    ) -> Result<()> {
        let now = Utc::now();
        let mut record = previous.unwrap_or_else(|| SearchCompletionRecord {
            search_term: task.term.clone(),
            neighborhood: task.neighborhood.clone(),
            business_type: task.business_type.clone(),
            completed_at: None,
            page2_completed_at: None,
            results_count: 0,
        });
        if outcome.pages.contains(&1) {
            record.completed_at = Some(now);
        }
        if outcome.pages.contains(&2) {
            record.page2_completed_at = Some(now);
        }
        record.results_count += outcome.results.len() as u32;
        self.store
            .save_completion(&record)
            .await
            .context("Failed to save completion record")
    }

    /// Learning and stats bookkeeping for BLOCKED and FAILED tasks.
    async fn record_unproductive(&self, task: &SearchTask, state: TaskState) -> Result<()> {
        self.learning
            .update(
                &task.term,
                &task.neighborhood,
                &task.business_type,
                task.strategy,
                0,
            )
            .await?;
        let patch = StatsPatch {
            searches_run: 1,
            searches_blocked: u64::from(state == TaskState::Blocked),
            searches_failed: u64::from(state == TaskState::Failed),
            last_run_at: Some(Utc::now()),
            ..Default::default()
        };
        self.store.update_stats(&patch).await?;
        Ok(())
    }

    /// A task that errored out still counts as a failed search.
    async fn record_aborted(&self, task: &SearchTask) {
        if let Err(e) = self.record_unproductive(task, TaskState::Failed).await {
            warn!(term = %task.term, error = %e, "Failed to record aborted task");
        }
    }
}

//! End-to-end runs of the search loop over mock sessions, a mock model and
//! the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use leadscout::browser::{BrowserSession, SessionPool};
use leadscout::cache::ResultCache;
use leadscout::learning::LearningStore;
use leadscout::orchestrator::{BatchRequest, Orchestrator, OrchestratorSettings, TaskState};
use leadscout::scraper::{ScraperSettings, SearchScraper};
use leadscout::store::{FileStore, ProspectStore};
use leadscout::term_generator::TermGenerator;
use leadscout::testing::{results_page, task, MemoryStore, MockModel, MockSession};
use leadscout::validator::Validator;
use leadscout_common::{
    CacheKind, CampaignPlan, CompanyRecord, JudgmentFailurePolicy, SearchCompletionRecord,
    SearchTask, Strategy, ValidationOutcome, ValidationStage,
};

const TERM: &str = "dentista Aldeota fortaleza";

fn scraper_settings() -> ScraperSettings {
    ScraperSettings {
        results_per_page: 10,
        navigation_timeout: Duration::from_secs(5),
        page_delay: Duration::ZERO,
        task_delay: Duration::ZERO,
        auth_wait: Duration::ZERO,
    }
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        max_terms: 50,
        max_pages: 1,
        task_timeout: Duration::from_secs(30),
        fetch_landing_pages: false,
        landing_timeout: Duration::from_secs(1),
        resume_partial: false,
    }
}

fn search_url(term: &str, page: u32) -> String {
    SearchScraper::new(scraper_settings()).search_url(term, page)
}

fn dentist_task() -> SearchTask {
    task(TERM, "Aldeota", "dentista", Strategy::GmapsLocal)
}

/// Two social profiles, one strong site, one weak site, one ambiguous site.
fn five_results() -> String {
    results_page(&[
        ("https://www.instagram.com/sorrisoaldeota/", "Sorriso Aldeota", "Agende pelo WhatsApp"),
        (
            "https://clinicaa.com.br/?utm_source=google",
            "Clínica A",
            "Tratamentos, (85) 3222-1234, Rua Canuto de Aguiar",
        ),
        ("https://facebook.com/odontofor", "Odonto For", "Agende pelo WhatsApp"),
        ("https://clinicab.com.br", "Clínica B", "Dentista"),
        ("https://clinicac.com.br", "Clínica C", "Agende pelo WhatsApp"),
    ])
}

struct Harness {
    store: Arc<MemoryStore>,
    model: MockModel,
    orchestrator: Orchestrator,
}

fn orchestrator(
    store: Arc<dyn ProspectStore>,
    sessions: Vec<Arc<MockSession>>,
    model: &MockModel,
    generator: TermGenerator,
    settings: OrchestratorSettings,
    scraper: ScraperSettings,
) -> Orchestrator {
    let cache = Arc::new(ResultCache::new(store.clone()));
    orchestrator_sharing(store, cache, sessions, model, generator, settings, scraper)
}

fn orchestrator_sharing(
    store: Arc<dyn ProspectStore>,
    cache: Arc<ResultCache>,
    sessions: Vec<Arc<MockSession>>,
    model: &MockModel,
    generator: TermGenerator,
    settings: OrchestratorSettings,
    scraper: ScraperSettings,
) -> Orchestrator {
    let pool = SessionPool::new(
        sessions
            .into_iter()
            .map(|s| s as Arc<dyn BrowserSession>)
            .collect(),
    )
    .unwrap();
    Orchestrator::new(
        store.clone(),
        cache,
        Arc::new(LearningStore::new(store)),
        generator,
        SearchScraper::new(scraper),
        Validator::new(Arc::new(model.clone()), JudgmentFailurePolicy::Reject),
        pool,
        settings,
    )
}

fn harness_with(
    store: Arc<MemoryStore>,
    sessions: Vec<Arc<MockSession>>,
    generator: TermGenerator,
    settings: OrchestratorSettings,
    scraper: ScraperSettings,
) -> Harness {
    let model = MockModel::answering("YES");
    let orchestrator = orchestrator(store.clone(), sessions, &model, generator, settings, scraper);
    Harness {
        store,
        model,
        orchestrator,
    }
}

fn harness(store: Arc<MemoryStore>, session: Arc<MockSession>) -> Harness {
    harness_with(
        store,
        vec![session],
        TermGenerator::fortaleza(),
        settings(),
        scraper_settings(),
    )
}

fn company(url: &str, term: &str, minute: u32) -> CompanyRecord {
    CompanyRecord {
        url: url.to_string(),
        title: "Clínica".to_string(),
        description: String::new(),
        neighborhood: "Aldeota".to_string(),
        business_type: "dentista".to_string(),
        search_term: term.to_string(),
        found_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        validation: ValidationOutcome {
            accept: true,
            reason: "business signals".to_string(),
            confidence: 80,
            stage: ValidationStage::Heuristic,
            score: 3,
            signals: Vec::new(),
        },
        analysis: None,
    }
}

#[tokio::test]
async fn social_results_are_rejected_and_the_rest_are_scored() {
    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(MockSession::new("s1").on_page(&search_url(TERM, 1), &five_results()));
    let h = harness(store.clone(), session);

    let report = h.orchestrator.run_task(&dentist_task()).await.unwrap();

    assert_eq!(report.state, TaskState::Done);
    assert_eq!(report.raw_results, 5);
    assert_eq!(report.new_companies, 2);
    let urls: HashSet<String> = report.companies.iter().map(|c| c.url.clone()).collect();
    assert_eq!(
        urls,
        HashSet::from([
            "https://clinicaa.com.br".to_string(),
            "https://clinicac.com.br".to_string()
        ])
    );
    // Only the ambiguous candidate reached the model.
    assert_eq!(h.model.calls(), 1);
    assert!(h.model.prompts()[0].user.contains("URL: https://clinicac.com.br"));

    let learning = store.get_learning_data().await.unwrap();
    assert_eq!(learning.total_searches, 1);
    assert_eq!(learning.best_neighborhoods["Aldeota"], 2);
    assert_eq!(learning.success_rate_display(), "100.00");

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.companies_found, 2);
    assert_eq!(stats.searches_run, 1);

    let completion = store.get_completion(TERM).await.unwrap().unwrap();
    assert!(completion.completed_at.is_some());
    assert_eq!(completion.results_count, 5);
}

#[tokio::test]
async fn completed_task_is_skipped_without_navigation() {
    let store = Arc::new(MemoryStore::new());
    let seeded = [
        company("https://clinicaa.com.br", TERM, 1),
        company("https://clinicac.com.br", TERM, 2),
    ];
    for c in &seeded {
        store.save_company(c).await.unwrap();
    }
    store
        .save_company(&company("https://outra.com.br", "padaria Centro fortaleza", 3))
        .await
        .unwrap();
    store
        .save_completion(&SearchCompletionRecord {
            search_term: TERM.to_string(),
            neighborhood: "Aldeota".to_string(),
            business_type: "dentista".to_string(),
            completed_at: Some(Utc::now()),
            page2_completed_at: None,
            results_count: 5,
        })
        .await
        .unwrap();

    let session = Arc::new(MockSession::new("s1").otherwise(&five_results()));
    let h = harness(store.clone(), session.clone());

    let report = h.orchestrator.run_task(&dentist_task()).await.unwrap();

    assert_eq!(report.state, TaskState::Skipped);
    assert_eq!(session.navigations(), 0);
    assert_eq!(report.companies, seeded.to_vec());
    assert_eq!(store.get_learning_data().await.unwrap().total_searches, 0);
}

#[tokio::test]
async fn rerunning_a_done_task_replays_prior_results() {
    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(MockSession::new("s1").on_page(&search_url(TERM, 1), &five_results()));
    let h = harness(store.clone(), session.clone());

    let first = h.orchestrator.run_task(&dentist_task()).await.unwrap();
    let navigations = session.navigations();

    // Same process: the search cache answers.
    let again = h.orchestrator.run_task(&dentist_task()).await.unwrap();
    assert_eq!(again.state, TaskState::CacheHit);
    assert_eq!(again.companies, first.companies);
    assert_eq!(session.navigations(), navigations);

    // Fresh process, empty cache: the completion record answers.
    let fresh_session = Arc::new(MockSession::new("s2").otherwise(&five_results()));
    let fresh = harness(store.clone(), fresh_session.clone());
    let replay = fresh.orchestrator.run_task(&dentist_task()).await.unwrap();
    assert_eq!(replay.state, TaskState::Skipped);
    assert_eq!(replay.companies, first.companies);
    assert_eq!(fresh_session.navigations(), 0);
    assert_eq!(store.company_count(), 2);
}

#[tokio::test]
async fn overlapping_tasks_never_duplicate_normalized_urls() {
    let store = Arc::new(MemoryStore::new());
    let other_term = "dentista Aldeota fortaleza site oficial";
    let overlapping = results_page(&[
        (
            "https://www.clinicaa.com.br/?gclid=abc",
            "Clínica A Aldeota",
            "Tratamentos, (85) 3222-1234, Rua Canuto de Aguiar",
        ),
        ("https://clinicac.com.br/#contato", "Clínica C", "Agende pelo WhatsApp"),
    ]);
    let session = Arc::new(
        MockSession::new("s1")
            .on_page(&search_url(TERM, 1), &five_results())
            .on_page(&search_url(other_term, 1), &overlapping),
    );
    let h = harness(store.clone(), session);

    h.orchestrator.run_task(&dentist_task()).await.unwrap();
    let second = h
        .orchestrator
        .run_task(&task(other_term, "Aldeota", "dentista", Strategy::DirectWeb))
        .await
        .unwrap();

    assert_eq!(second.state, TaskState::Done);
    assert_eq!(second.new_companies, 0);
    let all = store.all_companies().await.unwrap();
    let unique: HashSet<&str> = all.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(all.len(), 2);
    assert_eq!(unique.len(), 2);

    // A search that found nothing new counts as unproductive.
    let learning = store.get_learning_data().await.unwrap();
    assert_eq!(learning.total_searches, 2);
    assert_eq!(learning.failed_searches.len(), 1);
}

#[tokio::test]
async fn blocked_search_records_a_failure() {
    let store = Arc::new(MemoryStore::new());
    let challenge = r#"<form id="captcha-form" action="/sorry/index"></form>"#;
    let session = Arc::new(MockSession::new("s1").on_page(&search_url(TERM, 1), challenge));
    let h = harness(store.clone(), session);

    let report = h.orchestrator.run_task(&dentist_task()).await.unwrap();

    assert_eq!(report.state, TaskState::Blocked);
    assert!(report.companies.is_empty());
    let learning = store.get_learning_data().await.unwrap();
    assert_eq!(learning.total_searches, 1);
    assert_eq!(learning.failed_searches.len(), 1);
    assert_eq!(learning.success_rate, 0.0);
    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.searches_blocked, 1);
    assert!(store.get_completion(TERM).await.unwrap().is_none());
}

#[tokio::test]
async fn navigation_failure_ends_in_failed() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(store.clone(), Arc::new(MockSession::new("s1")));

    let report = h.orchestrator.run_task(&dentist_task()).await.unwrap();

    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(store.get_stats().await.unwrap().searches_failed, 1);
    assert_eq!(store.get_learning_data().await.unwrap().failed_searches.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn scrape_timeout_is_a_recoverable_failure() {
    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(MockSession::new("s1").otherwise(&five_results()));
    let mut slow = scraper_settings();
    slow.page_delay = Duration::from_secs(600);
    let mut short = settings();
    short.max_pages = 2;
    short.task_timeout = Duration::from_secs(5);
    let h = harness_with(
        store.clone(),
        vec![session],
        TermGenerator::fortaleza(),
        short,
        slow,
    );

    let report = h.orchestrator.run_task(&dentist_task()).await.unwrap();

    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(store.company_count(), 0);
    assert_eq!(store.get_learning_data().await.unwrap().total_searches, 1);
}

#[tokio::test]
async fn partial_terms_resume_at_page_two_when_enabled() {
    let store = Arc::new(MemoryStore::new());
    store
        .save_completion(&SearchCompletionRecord {
            search_term: TERM.to_string(),
            neighborhood: "Aldeota".to_string(),
            business_type: "dentista".to_string(),
            completed_at: Some(Utc::now()),
            page2_completed_at: None,
            results_count: 3,
        })
        .await
        .unwrap();
    let session = Arc::new(MockSession::new("s1").on_page(&search_url(TERM, 2), &five_results()));
    let mut resume = settings();
    resume.max_pages = 2;
    resume.resume_partial = true;
    let h = harness_with(
        store.clone(),
        vec![session.clone()],
        TermGenerator::fortaleza(),
        resume,
        scraper_settings(),
    );

    let report = h.orchestrator.run_task(&dentist_task()).await.unwrap();

    assert_eq!(report.state, TaskState::Done);
    assert_eq!(session.visited(), vec![search_url(TERM, 2)]);
    let completion = store.get_completion(TERM).await.unwrap().unwrap();
    assert!(completion.page2_completed_at.is_some());
    assert_eq!(completion.results_count, 8);
}

#[tokio::test]
async fn batch_fans_out_and_reports_progress() {
    let store = Arc::new(MemoryStore::new());
    let sessions = vec![
        Arc::new(MockSession::new("s1").otherwise(&five_results())),
        Arc::new(MockSession::new("s2").otherwise(&five_results())),
    ];
    // 1 neighborhood x 2 types: 5 distinct terms for max_terms = 8
    let generator = TermGenerator::new(["Aldeota"], ["dentista", "padaria"], "fortaleza");
    let mut small = settings();
    small.max_terms = 8;
    let h = harness_with(store.clone(), sessions.clone(), generator, small, scraper_settings());

    assert_eq!(h.orchestrator.tasks().await.unwrap().len(), 5);

    let report = h
        .orchestrator
        .advance_batch(BatchRequest {
            start_index: 0,
            batch_size: 3,
            parallelism: 2,
        })
        .await
        .unwrap();

    assert_eq!(report.next_index, 3);
    assert!(report.has_more);
    // Every task saw the same two acceptable companies; only one insert each.
    assert_eq!(report.results_found, 2);
    assert_eq!(store.company_count(), 2);
    assert_eq!(store.get_learning_data().await.unwrap().total_searches, 3);
    assert_eq!(store.get_stats().await.unwrap().searches_run, 3);
    assert!(sessions.iter().map(|s| s.navigations()).sum::<usize>() >= 3);

    // The batch flushed the cache through the store.
    assert!(!store.get_cache().await.unwrap().search.is_empty());
}

#[tokio::test]
async fn batch_past_the_end_is_empty() {
    let store = Arc::new(MemoryStore::new());
    let generator = TermGenerator::new(["Aldeota"], ["dentista"], "fortaleza");
    let h = harness_with(
        store,
        vec![Arc::new(MockSession::new("s1"))],
        generator,
        settings(),
        scraper_settings(),
    );

    let report = h
        .orchestrator
        .advance_batch(BatchRequest {
            start_index: 100,
            batch_size: 10,
            parallelism: 3,
        })
        .await
        .unwrap();

    assert_eq!(report.results_found, 0);
    assert!(!report.has_more);
    assert_eq!(report.next_index, h.orchestrator.tasks().await.unwrap().len());
}

#[tokio::test]
async fn persistence_failure_aborts_the_task_but_not_the_batch() {
    let generator = TermGenerator::new(["Aldeota"], ["dentista"], "fortaleza");
    let planned = MemoryStore::new();
    let tasks = generator.generate(&Default::default(), settings().max_terms);
    planned.save_plan(&CampaignPlan::new(tasks)).await.unwrap();
    let store = Arc::new(planned.failing_writes());
    let h = harness_with(
        store.clone(),
        vec![Arc::new(MockSession::new("s1").otherwise(&five_results()))],
        generator,
        settings(),
        scraper_settings(),
    );

    let report = h
        .orchestrator
        .advance_batch(BatchRequest {
            start_index: 1,
            batch_size: 2,
            parallelism: 1,
        })
        .await
        .unwrap();

    assert_eq!(report.results_found, 0);
    assert_eq!(report.next_index, 3);
    assert_eq!(store.company_count(), 0);

    // Planning a new campaign needs a durable plan.
    let fresh = h
        .orchestrator
        .advance_batch(BatchRequest {
            start_index: 0,
            batch_size: 1,
            parallelism: 1,
        })
        .await;
    assert!(fresh.is_err());
}

#[tokio::test]
async fn fallback_verdicts_are_not_memoized() {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(ResultCache::new(store.clone()));
    let other_term = "dentista Aldeota fortaleza site oficial";
    let ambiguous = results_page(&[("https://clinicac.com.br", "Clínica C", "Agende pelo WhatsApp")]);
    let session = || {
        Arc::new(
            MockSession::new("s1")
                .on_page(&search_url(TERM, 1), &ambiguous)
                .on_page(&search_url(other_term, 1), &ambiguous),
        )
    };

    let outage = MockModel::failing();
    let during_outage = orchestrator_sharing(
        store.clone(),
        cache.clone(),
        vec![session()],
        &outage,
        TermGenerator::fortaleza(),
        settings(),
        scraper_settings(),
    );
    let first = during_outage.run_task(&dentist_task()).await.unwrap();
    assert_eq!(first.new_companies, 0);
    assert_eq!(outage.calls(), 1);
    assert_eq!(cache.len(CacheKind::Judgment), 0);

    let healthy = MockModel::answering("YES");
    let recovered = orchestrator_sharing(
        store.clone(),
        cache.clone(),
        vec![session()],
        &healthy,
        TermGenerator::fortaleza(),
        settings(),
        scraper_settings(),
    );
    let second = recovered
        .run_task(&task(other_term, "Aldeota", "dentista", Strategy::DirectWeb))
        .await
        .unwrap();

    assert_eq!(healthy.calls(), 1);
    assert_eq!(second.new_companies, 1);
    assert_eq!(store.company_count(), 1);
    assert_eq!(cache.len(CacheKind::Judgment), 1);
}

#[tokio::test]
async fn walking_a_campaign_runs_every_planned_task_once() {
    let store = Arc::new(MemoryStore::new());
    let mut wide = settings();
    wide.max_terms = 20;
    let plan = TermGenerator::fortaleza().generate(&Default::default(), wide.max_terms);
    let productive = plan
        .iter()
        .find(|t| t.strategy == Strategy::SocialMedia)
        .unwrap()
        .term
        .clone();
    let session = Arc::new(
        MockSession::new("s1")
            .on_page(&search_url(&productive, 1), &five_results())
            .otherwise(&results_page(&[])),
    );
    let h = harness_with(
        store.clone(),
        vec![session.clone()],
        TermGenerator::fortaleza(),
        wide,
        scraper_settings(),
    );

    let mut next_index = 0;
    let mut batches = 0;
    loop {
        let report = h
            .orchestrator
            .advance_batch(BatchRequest {
                start_index: next_index,
                batch_size: 7,
                parallelism: 1,
            })
            .await
            .unwrap();
        next_index = report.next_index;
        batches += 1;
        if !report.has_more {
            break;
        }
    }

    assert_eq!(next_index, plan.len());
    assert_eq!(batches, plan.len().div_ceil(7));
    // Learning re-ranked the strategies mid-campaign.
    assert_ne!(h.orchestrator.tasks().await.unwrap(), plan);

    let visited: Vec<String> = session.visited();
    for task in &plan {
        let url = search_url(&task.term, 1);
        assert_eq!(
            visited.iter().filter(|v| **v == url).count(),
            1,
            "{} should run exactly once",
            task.term
        );
    }
    assert_eq!(
        store.get_learning_data().await.unwrap().total_searches,
        plan.len() as u64
    );
    assert_eq!(store.get_plan().await.unwrap().tasks, plan);
}

#[tokio::test]
async fn file_store_survives_a_restart_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let model = MockModel::answering("YES");

    let store: Arc<dyn ProspectStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let first = orchestrator(
        store,
        vec![Arc::new(MockSession::new("s1").otherwise(&five_results()))],
        &model,
        TermGenerator::fortaleza(),
        settings(),
        scraper_settings(),
    );
    let report = first.run_task(&dentist_task()).await.unwrap();
    assert_eq!(report.new_companies, 2);

    // Reopen the same directory as a fresh process would.
    let store: Arc<dyn ProspectStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let session = Arc::new(MockSession::new("s2").otherwise(&five_results()));
    let second = orchestrator(
        store.clone(),
        vec![session.clone()],
        &model,
        TermGenerator::fortaleza(),
        settings(),
        scraper_settings(),
    );
    let replay = second.run_task(&dentist_task()).await.unwrap();

    assert_eq!(replay.state, TaskState::Skipped);
    assert_eq!(replay.companies.len(), 2);
    assert_eq!(session.navigations(), 0);
    assert_eq!(store.all_companies().await.unwrap().len(), 2);
    assert_eq!(store.get_learning_data().await.unwrap().total_searches, 1);
}

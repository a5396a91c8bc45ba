//! Wires the concrete collaborators (file store, browser sessions, model
//! providers) into an `Orchestrator` from `Config`.

use std::sync::Arc;

use ai_client::{Claude, OpenAi, ProviderChain, RotatingProvider, TextModel};
use anyhow::{Context, Result};
use browserless_client::BrowserlessClient;
use tracing::{info, warn};

use leadscout_common::Config;

use crate::browser::{
    BrowserProfile, BrowserSession, BrowserlessSession, ChromeSession, SessionPool, MAX_POOL_SIZE,
};
use crate::cache::ResultCache;
use crate::learning::LearningStore;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::scraper::{ScraperSettings, SearchScraper};
use crate::store::{FileStore, ProspectStore};
use crate::term_generator::TermGenerator;
use crate::validator::{ChainJudge, Validator, JUDGE_TIMEOUT};

/// Open the file store. Aborts the run when the data dir is unusable.
pub fn open_store(config: &Config) -> Result<Arc<dyn ProspectStore>> {
    let store = FileStore::open(&config.data_dir)?;
    info!(dir = %store.dir().display(), "File store ready");
    Ok(Arc::new(store))
}

/// One session per pool slot, Browserless when configured, else local Chromium.
pub fn browser_sessions(config: &Config) -> Result<Vec<Arc<dyn BrowserSession>>> {
    let mut sessions: Vec<Arc<dyn BrowserSession>> = Vec::with_capacity(MAX_POOL_SIZE);
    match &config.browserless_url {
        Some(url) => {
            let client = Arc::new(
                BrowserlessClient::new(url, config.browserless_token.as_deref())
                    .context("Failed to build Browserless client")?,
            );
            for i in 0..MAX_POOL_SIZE {
                sessions.push(Arc::new(BrowserlessSession::new(
                    format!("browserless-{i}"),
                    client.clone(),
                    BrowserProfile::pt_br(),
                )));
            }
        }
        None => {
            for i in 0..MAX_POOL_SIZE {
                sessions.push(Arc::new(ChromeSession::new(
                    format!("chrome-{i}"),
                    config.chrome_bin.clone(),
                    BrowserProfile::pt_br(),
                )));
            }
        }
    }
    Ok(sessions)
}

/// Rotating Claude keys first, then the OpenAI-compatible fallback.
pub fn provider_chain(config: &Config) -> ProviderChain {
    let mut providers: Vec<Arc<dyn TextModel>> = Vec::new();

    let keys = config.anthropic_api_keys.len().max(1) as u32;
    let members: Vec<Arc<dyn TextModel>> = config
        .anthropic_api_keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            Arc::new(
                Claude::new(key.clone(), config.judge_model.clone())
                    .with_label(format!("claude#{}", i + 1)),
            ) as Arc<dyn TextModel>
        })
        .collect();
    let claude = RotatingProvider::new("claude", members).with_member_timeout(JUDGE_TIMEOUT / keys);
    if !claude.is_empty() {
        info!(keys = claude.len(), "Claude key rotation ready");
        providers.push(Arc::new(claude));
    }

    if let Some(key) = &config.openai_api_key {
        providers.push(Arc::new(OpenAi::new(key.clone(), config.fallback_model.clone())));
    }

    if providers.is_empty() {
        warn!(
            policy = ?config.judgment_failure_policy,
            "No model provider configured, ambiguous candidates fall to the failure policy"
        );
    }
    ProviderChain::new(providers)
}

pub async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let store = open_store(config)?;

    let cache = Arc::new(ResultCache::new(store.clone()));
    cache.load().await.context("Failed to load cache")?;
    let learning = Arc::new(LearningStore::new(store.clone()));

    let sessions = SessionPool::new(browser_sessions(config)?)?;
    let judge = Arc::new(ChainJudge::new(provider_chain(config)));
    let validator = Validator::new(judge, config.judgment_failure_policy);

    Ok(Orchestrator::new(
        store,
        cache,
        learning,
        TermGenerator::fortaleza(),
        SearchScraper::new(ScraperSettings::from_config(config)),
        validator,
        sessions,
        OrchestratorSettings::from_config(config),
    ))
}

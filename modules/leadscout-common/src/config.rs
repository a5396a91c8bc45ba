use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LeadScoutError;

/// What the validator does when the model-judgment call fails.
///
/// There is deliberately no `Default`: whoever builds a validator has to
/// pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentFailurePolicy {
    /// Treat the candidate as not a company.
    Reject,
    /// Keep the candidate.
    Accept,
}

impl FromStr for JudgmentFailurePolicy {
    type Err = LeadScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" | "conservative" => Ok(Self::Reject),
            "accept" | "permissive" => Ok(Self::Accept),
            other => Err(LeadScoutError::Config(format!(
                "JUDGMENT_FAILURE_POLICY must be `reject` or `accept`, got `{other}`"
            ))),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub data_dir: PathBuf,

    // Browser
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,
    pub chrome_bin: String,

    // Model providers
    pub anthropic_api_keys: Vec<String>,
    pub openai_api_key: Option<String>,
    pub judge_model: String,
    pub fallback_model: String,
    pub judgment_failure_policy: JudgmentFailurePolicy,

    // Search loop
    pub max_terms: usize,
    pub max_pages: u32,
    pub results_per_page: u32,
    pub task_timeout: Duration,
    pub page_delay: Duration,
    pub task_delay: Duration,
    pub fetch_landing_pages: bool,
    pub resume_partial_terms: bool,
}

impl Config {
    /// Load configuration from the environment (and `.env` when present).
    pub fn from_env() -> Result<Self, LeadScoutError> {
        dotenvy::dotenv().ok();

        let config = Self {
            data_dir: env::var("LEADSCOUT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            browserless_url: optional_env("BROWSERLESS_URL"),
            browserless_token: optional_env("BROWSERLESS_TOKEN"),
            chrome_bin: env::var("CHROME_BIN").unwrap_or_else(|_| "chromium".to_string()),
            anthropic_api_keys: env::var("ANTHROPIC_API_KEYS")
                .or_else(|_| env::var("ANTHROPIC_API_KEY"))
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            openai_api_key: optional_env("OPENAI_API_KEY"),
            judge_model: env::var("JUDGE_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            fallback_model: env::var("FALLBACK_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            judgment_failure_policy: required_env("JUDGMENT_FAILURE_POLICY")?.parse()?,
            max_terms: parse_env("MAX_TERMS", 200)?,
            max_pages: parse_env("MAX_PAGES", 2)?,
            results_per_page: parse_env("RESULTS_PER_PAGE", 10)?,
            task_timeout: Duration::from_secs(parse_env("TASK_TIMEOUT_SECS", 180)?),
            page_delay: Duration::from_millis(parse_env("PAGE_DELAY_MS", 3000)?),
            task_delay: Duration::from_millis(parse_env("TASK_DELAY_MS", 5000)?),
            fetch_landing_pages: parse_env("FETCH_LANDING_PAGES", true)?,
            resume_partial_terms: parse_env("RESUME_PARTIAL_TERMS", false)?,
        };

        if config.max_pages == 0 {
            return Err(LeadScoutError::Config("MAX_PAGES must be at least 1".into()));
        }

        Ok(config)
    }

    pub fn log_redacted(&self) {
        fn preview(val: &str) -> String {
            let n = val.len().min(5);
            format!("{}...({} chars)", &val[..n], val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => preview(v),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  LEADSCOUT_DATA_DIR: {}", self.data_dir.display());
        tracing::info!("  BROWSERLESS_URL: {}", self.browserless_url.as_deref().unwrap_or("<not set>"));
        tracing::info!("  BROWSERLESS_TOKEN: {}", preview_opt(&self.browserless_token));
        tracing::info!("  CHROME_BIN: {}", self.chrome_bin);
        tracing::info!("  ANTHROPIC_API_KEYS: {} configured", self.anthropic_api_keys.len());
        tracing::info!("  OPENAI_API_KEY: {}", preview_opt(&self.openai_api_key));
        tracing::info!("  JUDGE_MODEL: {}", self.judge_model);
        tracing::info!("  JUDGMENT_FAILURE_POLICY: {:?}", self.judgment_failure_policy);
        tracing::info!(
            "  MAX_TERMS={} MAX_PAGES={} RESULTS_PER_PAGE={}",
            self.max_terms,
            self.max_pages,
            self.results_per_page
        );
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required_env(key: &str) -> Result<String, LeadScoutError> {
    env::var(key).map_err(|_| LeadScoutError::Config(format!("{key} environment variable is required")))
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, LeadScoutError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| LeadScoutError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

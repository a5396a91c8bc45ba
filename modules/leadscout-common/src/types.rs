use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LeadScoutError;

// --- Search tasks ---

/// Query-construction template used by the term generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    GmapsLocal,
    SocialMedia,
    NewBusiness,
    DirectWeb,
    Generic,
}

impl Strategy {
    /// The four strategies every batch falls back on.
    pub const CANONICAL: [Strategy; 4] = [
        Strategy::GmapsLocal,
        Strategy::SocialMedia,
        Strategy::NewBusiness,
        Strategy::DirectWeb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::GmapsLocal => "gmaps_local",
            Strategy::SocialMedia => "social_media",
            Strategy::NewBusiness => "new_business",
            Strategy::DirectWeb => "direct_web",
            Strategy::Generic => "generic",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = LeadScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gmaps_local" => Ok(Strategy::GmapsLocal),
            "social_media" => Ok(Strategy::SocialMedia),
            "new_business" => Ok(Strategy::NewBusiness),
            "direct_web" => Ok(Strategy::DirectWeb),
            "generic" => Ok(Strategy::Generic),
            other => Err(LeadScoutError::Validation(format!("unknown strategy: {other}"))),
        }
    }
}

/// One term/neighborhood/business-type/strategy tuple. Identity is `term`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTask {
    pub term: String,
    pub neighborhood: String,
    pub business_type: String,
    pub strategy: Strategy,
}

/// A candidate pulled out of a search results page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResult {
    pub title: String,
    pub url: String,
    pub description: String,
    /// 1-based position within its page.
    pub position: u32,
    pub source_page: u32,
}

// --- Validation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Heuristic,
    Model,
    /// The model call failed and the caller's failure policy decided.
    ModelFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub accept: bool,
    pub reason: String,
    /// 0..=100
    pub confidence: u8,
    pub stage: ValidationStage,
    pub score: i32,
    #[serde(default)]
    pub signals: Vec<String>,
}

// --- Companies ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRecord {
    /// Normalized URL, the unique key.
    pub url: String,
    pub title: String,
    pub description: String,
    pub neighborhood: String,
    pub business_type: String,
    pub search_term: String,
    pub found_at: DateTime<Utc>,
    pub validation: ValidationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<serde_json::Value>,
}

/// Marks which pages of a term have already been scraped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCompletionRecord {
    pub search_term: String,
    pub neighborhood: String,
    pub business_type: String,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page2_completed_at: Option<DateTime<Utc>>,
    pub results_count: u32,
}

impl SearchCompletionRecord {
    /// First page that still needs scraping, if any.
    pub fn next_page(&self, max_pages: u32) -> Option<u32> {
        if self.completed_at.is_none() {
            Some(1)
        } else if max_pages >= 2 && self.page2_completed_at.is_none() {
            Some(2)
        } else {
            None
        }
    }
}

// --- Learning ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningEvent {
    pub term: String,
    pub neighborhood: String,
    pub business_type: String,
    pub strategy: Strategy,
    pub found_count: u32,
    pub at: DateTime<Utc>,
}

pub const LEARNING_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStats {
    pub version: u32,
    pub best_neighborhoods: HashMap<String, u64>,
    pub best_business_types: HashMap<String, u64>,
    pub best_strategies: HashMap<String, u64>,
    pub successful_searches: Vec<LearningEvent>,
    pub failed_searches: Vec<LearningEvent>,
    pub total_searches: u64,
    /// Percentage, rounded to two decimals.
    pub success_rate: f64,
    /// Successes ever recorded. The event lists are bounded, this is not.
    #[serde(default)]
    pub success_count: u64,
}

impl Default for LearningStats {
    fn default() -> Self {
        Self {
            version: LEARNING_SCHEMA_VERSION,
            best_neighborhoods: HashMap::new(),
            best_business_types: HashMap::new(),
            best_strategies: HashMap::new(),
            successful_searches: Vec::new(),
            failed_searches: Vec::new(),
            total_searches: 0,
            success_rate: 0.0,
            success_count: 0,
        }
    }
}

impl LearningStats {
    /// `successRate` formatted the way reports show it, e.g. "100.00".
    pub fn success_rate_display(&self) -> String {
        format!("{:.2}", self.success_rate)
    }
}

// --- Campaign stats ---

pub const STATS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    pub version: u32,
    pub companies_found: u64,
    pub searches_run: u64,
    pub searches_blocked: u64,
    pub searches_failed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Default for CampaignStats {
    fn default() -> Self {
        Self {
            version: STATS_SCHEMA_VERSION,
            companies_found: 0,
            searches_run: 0,
            searches_blocked: 0,
            searches_failed: 0,
            last_run_at: None,
        }
    }
}

/// Increments applied to `CampaignStats` by `update_stats`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsPatch {
    pub companies_found: u64,
    pub searches_run: u64,
    pub searches_blocked: u64,
    pub searches_failed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl CampaignStats {
    pub fn apply(&mut self, patch: &StatsPatch) {
        self.companies_found += patch.companies_found;
        self.searches_run += patch.searches_run;
        self.searches_blocked += patch.searches_blocked;
        self.searches_failed += patch.searches_failed;
        if patch.last_run_at.is_some() {
            self.last_run_at = patch.last_run_at;
        }
    }
}

// --- Campaign plan ---

pub const PLAN_SCHEMA_VERSION: u32 = 1;

/// Task list fixed when a campaign starts. Batch indexes always refer to it,
/// so learning updates made mid-campaign never shift the remaining tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignPlan {
    pub version: u32,
    /// `None` until a campaign has been planned.
    pub created_at: Option<DateTime<Utc>>,
    pub tasks: Vec<SearchTask>,
}

impl Default for CampaignPlan {
    fn default() -> Self {
        Self {
            version: PLAN_SCHEMA_VERSION,
            created_at: None,
            tasks: Vec::new(),
        }
    }
}

impl CampaignPlan {
    pub fn new(tasks: Vec<SearchTask>) -> Self {
        Self {
            version: PLAN_SCHEMA_VERSION,
            created_at: Some(Utc::now()),
            tasks,
        }
    }

    pub fn is_planned(&self) -> bool {
        self.created_at.is_some()
    }
}

// --- Cache ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Search,
    Judgment,
    Report,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [CacheKind::Search, CacheKind::Judgment, CacheKind::Report];

    /// Time-to-live in milliseconds.
    pub fn ttl_ms(&self) -> i64 {
        const HOUR: i64 = 60 * 60 * 1000;
        match self {
            CacheKind::Search => 24 * HOUR,
            CacheKind::Judgment => 7 * 24 * HOUR,
            CacheKind::Report => HOUR,
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            CacheKind::Search => 1000,
            CacheKind::Judgment => 500,
            CacheKind::Report => 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: serde_json::Value,
    /// Unix epoch milliseconds at write time.
    pub timestamp: i64,
}

pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Durable form of the cache tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheData {
    pub version: u32,
    #[serde(default)]
    pub search: HashMap<String, CacheEntry>,
    #[serde(default)]
    pub judgment: HashMap<String, CacheEntry>,
    #[serde(default)]
    pub report: HashMap<String, CacheEntry>,
}

impl Default for CacheData {
    fn default() -> Self {
        Self {
            version: CACHE_SCHEMA_VERSION,
            search: HashMap::new(),
            judgment: HashMap::new(),
            report: HashMap::new(),
        }
    }
}

impl CacheData {
    pub fn table(&self, kind: CacheKind) -> &HashMap<String, CacheEntry> {
        match kind {
            CacheKind::Search => &self.search,
            CacheKind::Judgment => &self.judgment,
            CacheKind::Report => &self.report,
        }
    }

    pub fn table_mut(&mut self, kind: CacheKind) -> &mut HashMap<String, CacheEntry> {
        match kind {
            CacheKind::Search => &mut self.search,
            CacheKind::Judgment => &mut self.judgment,
            CacheKind::Report => &mut self.report,
        }
    }
}

// --- URL helpers ---

/// Extract the domain from a URL (e.g., "https://www.example.com/path" -> "www.example.com").
pub fn extract_domain(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .to_lowercase()
}

const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid", "msclkid", "srsltid"];

/// Normalize a URL for company uniqueness: lowercase scheme and host, strip
/// `www.`, drop fragment, default ports and tracking params, sort the query,
/// and remove a trailing slash.
pub fn normalize_url(raw: &str) -> Result<String, LeadScoutError> {
    let mut parsed = url::Url::parse(raw.trim())
        .map_err(|e| LeadScoutError::Validation(format!("invalid url {raw}: {e}")))?;

    parsed.set_fragment(None);

    if let Some(host) = parsed.host_str().map(|h| h.to_lowercase()) {
        let bare = host.strip_prefix("www.").unwrap_or(&host).to_string();
        parsed
            .set_host(Some(&bare))
            .map_err(|e| LeadScoutError::Validation(format!("invalid host in {raw}: {e}")))?;
    }

    if parsed.port() == Some(80) && parsed.scheme() == "http"
        || parsed.port() == Some(443) && parsed.scheme() == "https"
    {
        let _ = parsed.set_port(None);
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        pairs.sort();
        let sorted: Vec<String> = pairs
            .iter()
            .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
            .collect();
        parsed.set_query(Some(&sorted.join("&")));
    }

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    let mut result = parsed.to_string();
    if parsed.query().is_none() && result.ends_with('/') {
        result.pop();
    }
    Ok(result)
}

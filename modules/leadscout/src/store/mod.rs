// Persistence boundary for the search loop.
//
// The core only talks to `ProspectStore`; `FileStore` is the shipped backend
// and `testing::MemoryStore` backs the unit and integration tests.

mod file;

pub use file::FileStore;

use anyhow::Result;
use async_trait::async_trait;

use leadscout_common::{
    CacheData, CampaignPlan, CampaignStats, CompanyRecord, LearningStats, SearchCompletionRecord,
    StatsPatch,
};

#[async_trait]
pub trait ProspectStore: Send + Sync {
    // --- Companies ---

    /// Look up a company by normalized URL.
    async fn get_company(&self, url: &str) -> Result<Option<CompanyRecord>>;

    /// Insert a company unless one with the same URL already exists.
    /// Returns `true` when the record was inserted.
    async fn save_company(&self, record: &CompanyRecord) -> Result<bool>;

    async fn all_companies(&self) -> Result<Vec<CompanyRecord>>;

    /// Companies first found by `term`, in discovery order.
    async fn companies_for_term(&self, term: &str) -> Result<Vec<CompanyRecord>> {
        let mut companies: Vec<CompanyRecord> = self
            .all_companies()
            .await?
            .into_iter()
            .filter(|c| c.search_term == term)
            .collect();
        companies.sort_by(|a, b| a.found_at.cmp(&b.found_at).then_with(|| a.url.cmp(&b.url)));
        Ok(companies)
    }

    // --- Campaign stats ---

    async fn get_stats(&self) -> Result<CampaignStats>;
    async fn update_stats(&self, patch: &StatsPatch) -> Result<CampaignStats>;

    // --- Learning ---

    async fn get_learning_data(&self) -> Result<LearningStats>;
    async fn save_learning_data(&self, data: &LearningStats) -> Result<()>;

    // --- Cache ---

    async fn get_cache(&self) -> Result<CacheData>;
    async fn save_cache(&self, data: &CacheData) -> Result<()>;

    // --- Completion records ---

    async fn get_completion(&self, term: &str) -> Result<Option<SearchCompletionRecord>>;
    async fn save_completion(&self, record: &SearchCompletionRecord) -> Result<()>;

    // --- Campaign plan ---

    /// The current campaign's task list; unplanned default when none exists.
    async fn get_plan(&self) -> Result<CampaignPlan>;
    async fn save_plan(&self, plan: &CampaignPlan) -> Result<()>;
}

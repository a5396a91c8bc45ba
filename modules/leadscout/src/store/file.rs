//! JSON-file backend for `ProspectStore`.
//!
//! Each document lives in its own file under the data directory. Writes go to
//! a temp file in the same directory and are renamed over the target, so a
//! reader sees either the previous or the next complete document. Missing,
//! unparseable, or version-mismatched files load as the documented default
//! and are repaired by the next write.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use leadscout_common::{
    CacheData, CampaignPlan, CampaignStats, CompanyRecord, LearningStats, SearchCompletionRecord,
    StatsPatch, CACHE_SCHEMA_VERSION, LEARNING_SCHEMA_VERSION, PLAN_SCHEMA_VERSION,
    STATS_SCHEMA_VERSION,
};

use super::ProspectStore;

const COMPANIES_FILE: &str = "companies.json";
const COMPLETIONS_FILE: &str = "completions.json";
const STATS_FILE: &str = "stats.json";
const LEARNING_FILE: &str = "learning.json";
const CACHE_FILE: &str = "cache.json";
const PLAN_FILE: &str = "plan.json";

const COMPANIES_SCHEMA_VERSION: u32 = 1;
const COMPLETIONS_SCHEMA_VERSION: u32 = 1;

/// Durable documents carry a schema version; anything else is treated as absent.
trait Versioned {
    const CURRENT: u32;
    fn version(&self) -> u32;
}

#[derive(Debug, Serialize, Deserialize)]
struct CompanyFile {
    version: u32,
    companies: BTreeMap<String, CompanyRecord>,
}

impl Default for CompanyFile {
    fn default() -> Self {
        Self {
            version: COMPANIES_SCHEMA_VERSION,
            companies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CompletionFile {
    version: u32,
    records: BTreeMap<String, SearchCompletionRecord>,
}

impl Default for CompletionFile {
    fn default() -> Self {
        Self {
            version: COMPLETIONS_SCHEMA_VERSION,
            records: BTreeMap::new(),
        }
    }
}

impl Versioned for CompanyFile {
    const CURRENT: u32 = COMPANIES_SCHEMA_VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}

impl Versioned for CompletionFile {
    const CURRENT: u32 = COMPLETIONS_SCHEMA_VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}

impl Versioned for CampaignStats {
    const CURRENT: u32 = STATS_SCHEMA_VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}

impl Versioned for LearningStats {
    const CURRENT: u32 = LEARNING_SCHEMA_VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}

impl Versioned for CampaignPlan {
    const CURRENT: u32 = PLAN_SCHEMA_VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}

impl Versioned for CacheData {
    const CURRENT: u32 = CACHE_SCHEMA_VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}

pub struct FileStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`. Failure here is
    /// fatal to a run: nothing could be made durable.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data dir {}", dir.display()))?;
        let probe = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Data dir {} is not writable", dir.display()))?;
        drop(probe);
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    async fn load<T>(&self, name: &str) -> Result<T>
    where
        T: DeserializeOwned + Default + Versioned,
    {
        let path = self.path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = name, "No document yet, using default");
                return Ok(T::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        match serde_json::from_slice::<T>(&bytes) {
            Ok(doc) if doc.version() == T::CURRENT => Ok(doc),
            Ok(doc) => {
                warn!(
                    file = name,
                    found = doc.version(),
                    expected = T::CURRENT,
                    "Schema version mismatch, falling back to default"
                );
                Ok(T::default())
            }
            Err(e) => {
                warn!(file = name, error = %e, "Malformed document, falling back to default");
                Ok(T::default())
            }
        }
    }

    async fn store<T: Serialize>(&self, name: &str, doc: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc).context("Failed to serialize document")?;
        let dir = self.dir.clone();
        let target = self.path(name);
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &bytes))
            .await
            .context("Atomic write task panicked")?
    }
}

/// Write `bytes` to a temp file beside `target`, fsync, then rename over it.
fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes).context("Failed to write temp file")?;
    tmp.as_file().sync_all().context("Failed to fsync temp file")?;
    tmp.persist(target)
        .with_context(|| format!("Failed to replace {}", target.display()))?;
    Ok(())
}

#[async_trait]
impl ProspectStore for FileStore {
    async fn get_company(&self, url: &str) -> Result<Option<CompanyRecord>> {
        let file: CompanyFile = self.load(COMPANIES_FILE).await?;
        Ok(file.companies.get(url).cloned())
    }

    async fn save_company(&self, record: &CompanyRecord) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut file: CompanyFile = self.load(COMPANIES_FILE).await?;
        if file.companies.contains_key(&record.url) {
            return Ok(false);
        }
        file.companies.insert(record.url.clone(), record.clone());
        self.store(COMPANIES_FILE, &file).await?;
        Ok(true)
    }

    async fn all_companies(&self) -> Result<Vec<CompanyRecord>> {
        let file: CompanyFile = self.load(COMPANIES_FILE).await?;
        Ok(file.companies.into_values().collect())
    }

    async fn get_stats(&self) -> Result<CampaignStats> {
        self.load(STATS_FILE).await
    }

    async fn update_stats(&self, patch: &StatsPatch) -> Result<CampaignStats> {
        let _guard = self.write_lock.lock().await;
        let mut stats: CampaignStats = self.load(STATS_FILE).await?;
        stats.apply(patch);
        self.store(STATS_FILE, &stats).await?;
        Ok(stats)
    }

    async fn get_learning_data(&self) -> Result<LearningStats> {
        self.load(LEARNING_FILE).await
    }

    async fn save_learning_data(&self, data: &LearningStats) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store(LEARNING_FILE, data).await
    }

    async fn get_cache(&self) -> Result<CacheData> {
        self.load(CACHE_FILE).await
    }

    async fn save_cache(&self, data: &CacheData) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store(CACHE_FILE, data).await
    }

    async fn get_completion(&self, term: &str) -> Result<Option<SearchCompletionRecord>> {
        let file: CompletionFile = self.load(COMPLETIONS_FILE).await?;
        Ok(file.records.get(term).cloned())
    }

    async fn save_completion(&self, record: &SearchCompletionRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file: CompletionFile = self.load(COMPLETIONS_FILE).await?;
        file.records
            .insert(record.search_term.clone(), record.clone());
        self.store(COMPLETIONS_FILE, &file).await
    }

    async fn get_plan(&self) -> Result<CampaignPlan> {
        self.load(PLAN_FILE).await
    }

    async fn save_plan(&self, plan: &CampaignPlan) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store(PLAN_FILE, plan).await
    }
}

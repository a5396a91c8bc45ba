//! Time-boxed memoization of search outcomes and company judgments.
//!
//! The cache is advisory: a miss, an expired entry, or an entry that no
//! longer deserializes are all just "recompute". Tables live in memory
//! behind an `RwLock` and are written through the store by `flush`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use leadscout_common::{CacheData, CacheEntry, CacheKind};

use crate::store::ProspectStore;

pub struct ResultCache {
    tables: RwLock<CacheData>,
    store: Arc<dyn ProspectStore>,
}

impl ResultCache {
    /// Empty cache backed by `store`. Call `load` to restore persisted tables.
    pub fn new(store: Arc<dyn ProspectStore>) -> Self {
        Self {
            tables: RwLock::new(CacheData::default()),
            store,
        }
    }

    /// Replace the in-memory tables with the persisted ones, minus anything
    /// already expired.
    pub async fn load(&self) -> Result<()> {
        let data = self.store.get_cache().await?;
        let mut tables = self.tables.write().expect("cache lock poisoned");
        *tables = data;
        purge_expired_at(&mut tables, now_ms());
        Ok(())
    }

    /// Persist a snapshot of the tables.
    pub async fn flush(&self) -> Result<()> {
        let snapshot = self.tables.read().expect("cache lock poisoned").clone();
        self.store.save_cache(&snapshot).await
    }

    pub fn get<T: DeserializeOwned>(&self, kind: CacheKind, key: &str) -> Option<T> {
        self.get_at(kind, key, now_ms())
    }

    pub fn get_at<T: DeserializeOwned>(&self, kind: CacheKind, key: &str, now: i64) -> Option<T> {
        let tables = self.tables.read().expect("cache lock poisoned");
        let entry = tables.table(kind).get(key)?;
        if is_expired(kind, entry, now) {
            debug!(?kind, key, "Cache entry expired");
            return None;
        }
        match serde_json::from_value(entry.data.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(?kind, key, error = %e, "Cache entry has unexpected shape, ignoring");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, kind: CacheKind, key: &str, value: &T) {
        self.set_at(kind, key, value, now_ms());
    }

    pub fn set_at<T: Serialize>(&self, kind: CacheKind, key: &str, value: &T, timestamp: i64) {
        let data = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(?kind, key, error = %e, "Value not cacheable, skipping");
                return;
            }
        };
        let mut tables = self.tables.write().expect("cache lock poisoned");
        let table = tables.table_mut(kind);
        table.insert(key.to_string(), CacheEntry { data, timestamp });
        evict_oldest(table, kind.capacity());
    }

    /// Drop expired entries from every table.
    pub fn purge_expired(&self) -> usize {
        let mut tables = self.tables.write().expect("cache lock poisoned");
        purge_expired_at(&mut tables, now_ms())
    }

    pub fn len(&self, kind: CacheKind) -> usize {
        self.tables.read().expect("cache lock poisoned").table(kind).len()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn is_expired(kind: CacheKind, entry: &CacheEntry, now: i64) -> bool {
    now - entry.timestamp > kind.ttl_ms()
}

/// Evict oldest-by-timestamp entries until `table` is at `capacity`.
fn evict_oldest(table: &mut HashMap<String, CacheEntry>, capacity: usize) {
    if table.len() <= capacity {
        return;
    }
    let mut by_age: Vec<(i64, String)> = table
        .iter()
        .map(|(k, e)| (e.timestamp, k.clone()))
        .collect();
    by_age.sort();
    let excess = table.len() - capacity;
    for (_, key) in by_age.into_iter().take(excess) {
        table.remove(&key);
    }
}

fn purge_expired_at(data: &mut CacheData, now: i64) -> usize {
    let mut removed = 0;
    for kind in CacheKind::ALL {
        let table = data.table_mut(kind);
        let before = table.len();
        table.retain(|_, entry| !is_expired(kind, entry, now));
        removed += before - table.len();
    }
    removed
}

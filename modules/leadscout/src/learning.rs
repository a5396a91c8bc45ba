//! Feedback accumulator: which neighborhoods, business types, and strategies
//! have produced companies so far.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use leadscout_common::{LearningEvent, LearningStats, Strategy};

use crate::store::ProspectStore;

/// Most recent events kept per list in the durable record.
pub const MAX_EVENTS_PER_LIST: usize = 500;

pub struct LearningStore {
    store: Arc<dyn ProspectStore>,
    /// Held across load → mutate → save so concurrent tasks never lose an update.
    update_lock: Mutex<()>,
}

impl LearningStore {
    pub fn new(store: Arc<dyn ProspectStore>) -> Self {
        Self {
            store,
            update_lock: Mutex::new(()),
        }
    }

    /// Current durable snapshot.
    pub async fn snapshot(&self) -> Result<LearningStats> {
        self.store.get_learning_data().await
    }

    /// Record the outcome of one search and return the new snapshot.
    pub async fn update(
        &self,
        term: &str,
        neighborhood: &str,
        business_type: &str,
        strategy: Strategy,
        found_count: u32,
    ) -> Result<LearningStats> {
        let _guard = self.update_lock.lock().await;

        let mut stats = self.store.get_learning_data().await?;
        let event = LearningEvent {
            term: term.to_string(),
            neighborhood: neighborhood.to_string(),
            business_type: business_type.to_string(),
            strategy,
            found_count,
            at: Utc::now(),
        };
        apply_update(&mut stats, event);
        self.store.save_learning_data(&stats).await?;

        info!(
            term,
            found_count,
            total_searches = stats.total_searches,
            success_rate = %stats.success_rate_display(),
            "Learning updated"
        );
        Ok(stats)
    }
}

/// Pure state transition behind `LearningStore::update`.
pub fn apply_update(stats: &mut LearningStats, event: LearningEvent) {
    stats.total_searches += 1;

    if event.found_count > 0 {
        let found = u64::from(event.found_count);
        bump(&mut stats.best_neighborhoods, &event.neighborhood, found);
        bump(&mut stats.best_business_types, &event.business_type, found);
        bump(&mut stats.best_strategies, event.strategy.as_str(), found);
        stats.success_count += 1;
        push_bounded(&mut stats.successful_searches, event);
    } else {
        push_bounded(&mut stats.failed_searches, event);
    }

    stats.success_rate = success_rate(stats.success_count, stats.total_searches);
}

/// `100 * successes / total`, rounded to two decimals; 0 when nothing ran.
pub fn success_rate(successes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = 100.0 * successes as f64 / total as f64;
    (raw * 100.0).round() / 100.0
}

fn bump(map: &mut HashMap<String, u64>, key: &str, by: u64) {
    *map.entry(key.to_string()).or_insert(0) += by;
}

fn push_bounded(events: &mut Vec<LearningEvent>, event: LearningEvent) {
    events.push(event);
    if events.len() > MAX_EVENTS_PER_LIST {
        let excess = events.len() - MAX_EVENTS_PER_LIST;
        events.drain(..excess);
    }
}

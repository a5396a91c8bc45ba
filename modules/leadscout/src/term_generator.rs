use std::collections::{HashMap, HashSet};

use tracing::debug;

use leadscout_common::{LearningStats, SearchTask, Strategy};

use crate::catalog;

const TOP_NEIGHBORHOODS: usize = 15;
const FILL_NEIGHBORHOODS: usize = 15;
const TOP_BUSINESS_TYPES: usize = 20;
const FILL_BUSINESS_TYPES: usize = 20;
const TOP_STRATEGIES: usize = 3;

/// Builds a weighted batch of search tasks from learning history plus the
/// static catalogs. Deterministic: the same stats always give the same batch.
pub struct TermGenerator {
    neighborhoods: Vec<String>,
    business_types: Vec<String>,
    city: String,
}

impl TermGenerator {
    pub fn new(
        neighborhoods: impl IntoIterator<Item = impl Into<String>>,
        business_types: impl IntoIterator<Item = impl Into<String>>,
        city: impl Into<String>,
    ) -> Self {
        Self {
            neighborhoods: neighborhoods.into_iter().map(Into::into).collect(),
            business_types: business_types.into_iter().map(Into::into).collect(),
            city: city.into(),
        }
    }

    /// Generator over the built-in Fortaleza catalogs.
    pub fn fortaleza() -> Self {
        Self::new(
            catalog::NEIGHBORHOODS.iter().copied(),
            catalog::BUSINESS_TYPES.iter().copied(),
            catalog::CITY,
        )
    }

    pub fn generate(&self, stats: &LearningStats, max_terms: usize) -> Vec<SearchTask> {
        let neighborhoods = priority_list(
            &stats.best_neighborhoods,
            &self.neighborhoods,
            TOP_NEIGHBORHOODS,
            FILL_NEIGHBORHOODS,
        );
        let business_types = priority_list(
            &stats.best_business_types,
            &self.business_types,
            TOP_BUSINESS_TYPES,
            FILL_BUSINESS_TYPES,
        );
        if neighborhoods.is_empty() || business_types.is_empty() || max_terms == 0 {
            return Vec::new();
        }

        let strategies = priority_strategies(&stats.best_strategies);
        let allocation = allocate(&strategies, max_terms);

        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(max_terms);

        'strategies: for (strategy, count) in allocation {
            for i in 0..count {
                if tasks.len() >= max_terms {
                    break 'strategies;
                }
                let neighborhood = &neighborhoods[i % neighborhoods.len()];
                let business_type = &business_types[i % business_types.len()];
                let term = self.term_text(strategy, business_type, neighborhood, i);
                if !seen.insert(term.clone()) {
                    continue;
                }
                tasks.push(SearchTask {
                    term,
                    neighborhood: neighborhood.clone(),
                    business_type: business_type.clone(),
                    strategy,
                });
            }
        }

        debug!(
            requested = max_terms,
            generated = tasks.len(),
            strategies = strategies.len(),
            "Generated search terms"
        );
        tasks
    }

    fn term_text(&self, strategy: Strategy, business_type: &str, neighborhood: &str, i: usize) -> String {
        match strategy {
            Strategy::GmapsLocal => format!("{business_type} {neighborhood} {}", self.city),
            Strategy::SocialMedia => format!("{business_type} {neighborhood} site:instagram.com"),
            Strategy::NewBusiness => {
                let modifier = catalog::NEW_BUSINESS_MODIFIERS[i % catalog::NEW_BUSINESS_MODIFIERS.len()];
                format!("{business_type} {neighborhood} {modifier}")
            }
            Strategy::DirectWeb => format!("{business_type} {neighborhood} {} site oficial", self.city),
            Strategy::Generic => format!("{business_type} {neighborhood}"),
        }
    }
}

/// Names sorted by descending score, ties broken by name.
fn ranked(scores: &HashMap<String, u64>) -> Vec<String> {
    let mut entries: Vec<(&String, &u64)> = scores.iter().filter(|(_, s)| **s > 0).collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().map(|(name, _)| name.clone()).collect()
}

/// Top `top` ranked names, then up to `fill` catalog entries that were not
/// ranked, in catalog order.
fn priority_list(
    scores: &HashMap<String, u64>,
    catalog: &[String],
    top: usize,
    fill: usize,
) -> Vec<String> {
    let ranked = ranked(scores);
    let ranked_set: HashSet<&String> = ranked.iter().collect();
    let mut list: Vec<String> = ranked.iter().take(top).cloned().collect();
    list.extend(
        catalog
            .iter()
            .filter(|name| !ranked_set.contains(name))
            .take(fill)
            .cloned(),
    );
    list
}

/// Top ranked strategies followed by the canonical four, deduplicated.
fn priority_strategies(scores: &HashMap<String, u64>) -> Vec<Strategy> {
    let mut list = Vec::new();
    let top = ranked(scores)
        .into_iter()
        .filter_map(|name| name.parse::<Strategy>().ok())
        .take(TOP_STRATEGIES);
    for strategy in top.chain(Strategy::CANONICAL) {
        if !list.contains(&strategy) {
            list.push(strategy);
        }
    }
    list
}

/// `max(1, 4 - rank)` weight per strategy, `floor(weight / total * max_terms)`
/// tasks each. Zero allocations are dropped; rounding losses are not rebalanced.
fn allocate(strategies: &[Strategy], max_terms: usize) -> Vec<(Strategy, usize)> {
    let weights: Vec<usize> = (0..strategies.len())
        .map(|rank| 4usize.saturating_sub(rank).max(1))
        .collect();
    let total: usize = weights.iter().sum();
    if total == 0 {
        return Vec::new();
    }
    strategies
        .iter()
        .zip(weights)
        .map(|(s, w)| (*s, w * max_terms / total))
        .filter(|(_, count)| *count > 0)
        .collect()
}

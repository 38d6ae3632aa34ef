//! Merge of freshly enriched items into a stored working set.

use std::collections::HashMap;

use crate::catalog::corrector::correct;
use crate::catalog::Catalog;
use crate::models::item::WorkingSetItem;

/// Merge `new_items` into `existing`, keyed by normalized name.
///
/// Existing items keep their position; names seen for the first time are
/// appended in encounter order. On a key collision quantities are summed and
/// the market fields (prices, averages, catalog id, URL) are taken from the
/// new item. An empty `new_items` returns `existing` untouched.
#[must_use]
pub fn consolidate(
    new_items: Vec<WorkingSetItem>,
    existing: Vec<WorkingSetItem>,
) -> Vec<WorkingSetItem> {
    if new_items.is_empty() {
        return existing;
    }

    let mut merged = existing;
    let mut index: HashMap<String, usize> = HashMap::with_capacity(merged.len());
    for (pos, item) in merged.iter().enumerate() {
        index.entry(item.key()).or_insert(pos);
    }

    for item in new_items {
        let key = item.key();
        match index.get(&key) {
            Some(&pos) => absorb(&mut merged[pos], item),
            None => {
                index.insert(key, merged.len());
                merged.push(item);
            }
        }
    }

    merged
}

fn absorb(stored: &mut WorkingSetItem, fresh: WorkingSetItem) {
    stored.quantity = stored.quantity.saturating_add(fresh.quantity);
    stored.catalog_id = fresh.catalog_id;
    stored.sell_prices = fresh.sell_prices;
    stored.buy_prices = fresh.buy_prices;
    stored.avg_sell = fresh.avg_sell;
    stored.avg_buy = fresh.avg_buy;
    stored.market_url = fresh.market_url;
}

/// Per-screenshot collection of corrected lines.
///
/// Lines resolving to the same canonical name are summed so that each
/// distinct item is enriched once; misses are kept as raw names.
#[derive(Debug, Default)]
pub struct LineAccumulator {
    order: Vec<String>,
    quantities: HashMap<String, u32>,
    unrecognized: Vec<String>,
}

impl LineAccumulator {
    /// Empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Correct `raw_name` against the catalog and record it.
    pub fn add(&mut self, catalog: &Catalog, raw_name: &str, quantity: u32) {
        let Some(entry) = correct(catalog, raw_name) else {
            self.unrecognized.push(raw_name.trim().to_owned());
            return;
        };
        let quantity = quantity.max(1);
        match self.quantities.get_mut(&entry.display_name) {
            Some(total) => *total = total.saturating_add(quantity),
            None => {
                self.order.push(entry.display_name.clone());
                self.quantities.insert(entry.display_name.clone(), quantity);
            }
        }
    }

    /// Distinct canonical names recorded so far.
    #[must_use]
    pub fn distinct(&self) -> usize {
        self.order.len()
    }

    /// Split into `(canonical name, summed quantity)` pairs in first-seen
    /// order, and the unrecognized raw names.
    #[must_use]
    pub fn into_parts(mut self) -> (Vec<(String, u32)>, Vec<String>) {
        let lines = self
            .order
            .into_iter()
            .map(|name| {
                let quantity = self.quantities.remove(&name).unwrap_or(1);
                (name, quantity)
            })
            .collect();
        (lines, self.unrecognized)
    }
}

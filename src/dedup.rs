//! In-memory collection state with hash-gated merging.

use std::collections::HashMap;

use tracing::warn;

use crate::error::CategoryConflict;
use crate::model::LegislationItem;

/// Outcome of merging one fetched item into a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Inserted,
    Updated,
    Unchanged,
}

/// Ordered sequence of items for one category, with an id index so merge
/// stays near-constant cost instead of a scan per item.
#[derive(Debug, Default)]
pub struct Collection {
    items: Vec<LegislationItem>,
    index: HashMap<String, usize>,
}

impl Collection {
    /// Rebuild from loaded items. Later duplicates of an id are dropped;
    /// duplicates only happen when the file was edited by hand.
    pub fn from_items(items: Vec<LegislationItem>) -> Self {
        let mut collection = Collection::default();
        for item in items {
            if collection.index.contains_key(&item.id) {
                warn!("dropping duplicate stored record for id {}", item.id);
                continue;
            }
            collection
                .index
                .insert(item.id.clone(), collection.items.len());
            collection.items.push(item);
        }
        collection
    }

    pub fn items(&self) -> &[LegislationItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&LegislationItem> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    /// Merge one fetched item. Absent id: inserted at the end. Present id
    /// with a different hash: replaced in place, original position kept.
    /// Present id with an equal hash: untouched, so `fetchedAt` and the
    /// serialized bytes stay stable. A category change for an existing id is
    /// rejected and the stored record stays authoritative.
    pub fn merge(&mut self, item: LegislationItem) -> Result<MergeDecision, CategoryConflict> {
        match self.index.get(&item.id) {
            None => {
                self.index.insert(item.id.clone(), self.items.len());
                self.items.push(item);
                Ok(MergeDecision::Inserted)
            }
            Some(&i) => {
                let existing = &self.items[i];
                if existing.category != item.category {
                    return Err(CategoryConflict {
                        id: item.id,
                        existing: existing.category,
                        incoming: item.category,
                    });
                }
                if existing.content_hash == item.content_hash {
                    Ok(MergeDecision::Unchanged)
                } else {
                    self.items[i] = item;
                    Ok(MergeDecision::Updated)
                }
            }
        }
    }
}

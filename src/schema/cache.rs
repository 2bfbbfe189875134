//! Relation cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::OnceCell;

use crate::schema::RelationDescriptor;

type Entry = Arc<OnceCell<RelationDescriptor>>;

/// Relations ensured during this process lifetime, keyed by relation name.
///
/// Entries are never invalidated. Each name owns a once-cell so concurrent
/// first sights of the same name run a single initialisation.
#[derive(Default)]
pub struct RelationCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl std::fmt::Debug for RelationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationCache")
            .field("relations", &self.len())
            .finish_non_exhaustive()
    }
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor for `table_name` if it has been ensured.
    pub fn get(&self, table_name: &str) -> Option<RelationDescriptor> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table_name)
            .and_then(|cell| cell.get().cloned())
    }

    /// Number of ensured relations.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ensured descriptors, sorted by relation name.
    pub fn descriptors(&self) -> Vec<RelationDescriptor> {
        let mut out: Vec<RelationDescriptor> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|cell| cell.get().cloned())
            .collect();
        out.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        out
    }

    /// The once-cell for `table_name`, inserted empty on first request.
    pub(crate) fn entry(&self, table_name: &str) -> Entry {
        if let Some(cell) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table_name)
        {
            return Arc::clone(cell);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(table_name.to_string()).or_default())
    }
}

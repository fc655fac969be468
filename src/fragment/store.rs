/// In-memory fragment store with neighbor lookup
use super::Fragment;
use ahash::{HashMap, HashMapExt};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FragmentStoreError {
    #[error("Fragment {0} already exists with different content")]
    Immutable(String),

    #[error("Document {document_id} already has fragment {existing} at position {position}")]
    PositionConflict {
        document_id: String,
        position: u32,
        existing: String,
    },
}

/// Holds every ingested fragment, keyed by id and by (document, position)
///
/// Written once during ingestion, read-only at query time.
#[derive(Debug, Default)]
pub struct FragmentStore {
    fragments: HashMap<String, Arc<Fragment>>,
    positions: HashMap<(String, u32), String>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self {
            fragments: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    /// Insert a fragment
    ///
    /// Returns `true` if the fragment is new and `false` if an identical
    /// fragment was already present.
    pub fn insert(&mut self, fragment: Fragment) -> Result<bool, FragmentStoreError> {
        if let Some(existing) = self.fragments.get(fragment.fragment_id()) {
            if existing.content_hash() == fragment.content_hash() {
                return Ok(false);
            }
            return Err(FragmentStoreError::Immutable(
                fragment.fragment_id().to_string(),
            ));
        }

        let key = (
            fragment.document_id().to_string(),
            fragment.position_in_document(),
        );
        if let Some(existing) = self.positions.get(&key) {
            return Err(FragmentStoreError::PositionConflict {
                document_id: key.0,
                position: key.1,
                existing: existing.clone(),
            });
        }

        let id = fragment.fragment_id().to_string();
        self.positions.insert(key, id.clone());
        self.fragments.insert(id, Arc::new(fragment));
        Ok(true)
    }

    pub fn get(&self, fragment_id: &str) -> Option<&Arc<Fragment>> {
        self.fragments.get(fragment_id)
    }

    pub fn contains(&self, fragment_id: &str) -> bool {
        self.fragments.contains_key(fragment_id)
    }

    /// Fragment at `position` within `document_id`
    pub fn at_position(&self, document_id: &str, position: u32) -> Option<&Arc<Fragment>> {
        self.positions
            .get(&(document_id.to_string(), position))
            .and_then(|id| self.fragments.get(id))
    }

    /// Fragment immediately before `fragment` in the same document
    pub fn previous(&self, fragment: &Fragment) -> Option<&Arc<Fragment>> {
        let position = fragment.position_in_document().checked_sub(1)?;
        self.at_position(fragment.document_id(), position)
    }

    /// Fragment immediately after `fragment` in the same document
    pub fn next(&self, fragment: &Fragment) -> Option<&Arc<Fragment>> {
        let position = fragment.position_in_document().checked_add(1)?;
        self.at_position(fragment.document_id(), position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Fragment>> {
        self.fragments.values()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(id: &str, doc: &str, position: u32, text: &str) -> Fragment {
        Fragment::builder(id, doc, text)
            .position(position)
            .build()
            .unwrap()
    }

    #[test]
    fn test_insert_and_neighbors() {
        let mut store = FragmentStore::new();
        store.insert(fragment("a", "doc", 4, "before")).unwrap();
        store.insert(fragment("b", "doc", 5, "middle")).unwrap();
        store.insert(fragment("c", "doc", 6, "after")).unwrap();
        store.insert(fragment("x", "other", 4, "elsewhere")).unwrap();

        let middle = store.get("b").unwrap().clone();
        assert_eq!(store.previous(&middle).unwrap().fragment_id(), "a");
        assert_eq!(store.next(&middle).unwrap().fragment_id(), "c");

        let first = store.get("a").unwrap().clone();
        assert!(store.previous(&first).is_none());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_reinsert_identical_is_noop() {
        let mut store = FragmentStore::new();
        assert!(store.insert(fragment("a", "doc", 0, "text")).unwrap());
        assert!(!store.insert(fragment("a", "doc", 0, "text")).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_mutation_rejected() {
        let mut store = FragmentStore::new();
        store.insert(fragment("a", "doc", 0, "text")).unwrap();

        let result = store.insert(fragment("a", "doc", 0, "changed"));
        assert!(matches!(result, Err(FragmentStoreError::Immutable(_))));
        assert_eq!(store.get("a").unwrap().normalized_text(), "text");
    }

    #[test]
    fn test_position_conflict() {
        let mut store = FragmentStore::new();
        store.insert(fragment("a", "doc", 3, "one")).unwrap();

        let result = store.insert(fragment("b", "doc", 3, "two"));
        assert!(matches!(
            result,
            Err(FragmentStoreError::PositionConflict { position: 3, .. })
        ));
    }
}

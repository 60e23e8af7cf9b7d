// src/mvcc.rs
// Multi-version document storage
//
// Every committed write appends a version to the document's chain. A
// snapshot at version `v` sees, for each chain, the newest version whose
// number is <= v; a `None` document is a tombstone.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::collection::schema::Schema;
use crate::document::DocumentId;
use crate::index::{IndexDefinition, IndexSet};

#[derive(Debug, Clone)]
pub struct DocVersion {
    pub version: u64,
    pub doc: Option<Arc<Value>>,
}

/// Committed versions of one document, ascending by version
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: Vec<DocVersion>,
}

impl VersionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, version: u64, doc: Option<Arc<Value>>) {
        debug_assert!(self.latest_version() <= version);
        self.versions.push(DocVersion { version, doc });
    }

    /// Document visible at `snapshot` (None when absent or deleted)
    pub fn visible_at(&self, snapshot: u64) -> Option<&Arc<Value>> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.version <= snapshot)
            .and_then(|v| v.doc.as_ref())
    }

    pub fn latest(&self) -> Option<&Arc<Value>> {
        self.versions.last().and_then(|v| v.doc.as_ref())
    }

    pub fn latest_version(&self) -> u64 {
        self.versions.last().map_or(0, |v| v.version)
    }

    pub fn versions(&self) -> &[DocVersion] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Drop versions no snapshot at or above `horizon` can see.
    ///
    /// Keeps the newest version <= horizon and everything newer. Returns the
    /// number of versions removed.
    pub fn prune(&mut self, horizon: u64) -> usize {
        let keep_from = self
            .versions
            .iter()
            .rposition(|v| v.version <= horizon)
            .unwrap_or(0);
        self.versions.drain(..keep_from).count()
    }

    /// True when the chain holds only a tombstone every snapshot can see
    pub fn is_dead(&self, horizon: u64) -> bool {
        matches!(self.versions.as_slice(), [only] if only.doc.is_none() && only.version <= horizon)
    }
}

/// In-memory state of one collection
#[derive(Debug, Clone)]
pub struct CollectionState {
    pub name: String,
    /// Version at which the collection was (re)created
    pub created_version: u64,
    pub docs: BTreeMap<DocumentId, VersionChain>,
    pub indexes: IndexSet,
    pub schema: Option<Schema>,
    /// Chains whose latest version is a document
    live: usize,
}

impl CollectionState {
    pub fn new(name: impl Into<String>, created_version: u64) -> Self {
        CollectionState {
            name: name.into(),
            created_version,
            docs: BTreeMap::new(),
            indexes: IndexSet::new(),
            schema: None,
            live: 0,
        }
    }

    pub fn visible(&self, id: &DocumentId, snapshot: u64) -> Option<&Arc<Value>> {
        self.docs.get(id).and_then(|chain| chain.visible_at(snapshot))
    }

    /// Live documents at `snapshot`, in id order
    pub fn iter_visible(
        &self,
        snapshot: u64,
    ) -> impl Iterator<Item = (&DocumentId, &Arc<Value>)> + '_ {
        self.docs
            .iter()
            .filter_map(move |(id, chain)| chain.visible_at(snapshot).map(|doc| (id, doc)))
    }

    pub fn count_visible(&self, snapshot: u64) -> usize {
        self.iter_visible(snapshot).count()
    }

    /// Documents live at the latest committed version
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Append a committed version and index it
    pub fn apply(&mut self, id: &DocumentId, version: u64, doc: Option<Arc<Value>>) {
        if let Some(doc) = &doc {
            self.indexes.insert_document(id, doc);
        }
        let chain = self.docs.entry(id.clone()).or_default();
        let was_live = chain.latest().is_some();
        let is_live = doc.is_some();
        chain.push(version, doc);
        match (was_live, is_live) {
            (false, true) => self.live += 1,
            (true, false) => self.live -= 1,
            _ => {}
        }
    }

    /// Populate a freshly created index from every retained version
    pub fn index_all_versions(&mut self, name: &str) {
        let Some(index) = self.indexes.get_mut(name) else {
            return;
        };
        for (id, chain) in &self.docs {
            for version in chain.versions() {
                if let Some(doc) = &version.doc {
                    index.insert(id, doc);
                }
            }
        }
    }

    /// Rebuild every index from the retained versions
    pub fn rebuild_indexes(&mut self) {
        self.indexes.clear();
        for (id, chain) in &self.docs {
            for version in chain.versions() {
                if let Some(doc) = &version.doc {
                    self.indexes.insert_document(id, doc);
                }
            }
        }
    }

    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        self.indexes.definitions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Option<Arc<Value>> {
        Some(Arc::new(v))
    }

    #[test]
    fn test_visibility_by_snapshot() {
        let mut chain = VersionChain::new();
        chain.push(2, doc(json!({"v": 1})));
        chain.push(5, doc(json!({"v": 2})));
        chain.push(7, None);

        assert!(chain.visible_at(1).is_none());
        assert_eq!(chain.visible_at(2).unwrap()["v"], 1);
        assert_eq!(chain.visible_at(6).unwrap()["v"], 2);
        assert!(chain.visible_at(7).is_none());
        assert_eq!(chain.latest_version(), 7);
    }

    #[test]
    fn test_prune_keeps_horizon_version() {
        let mut chain = VersionChain::new();
        chain.push(1, doc(json!({"v": 1})));
        chain.push(3, doc(json!({"v": 2})));
        chain.push(8, doc(json!({"v": 3})));

        assert_eq!(chain.prune(5), 1);
        assert_eq!(chain.visible_at(5).unwrap()["v"], 2);
        assert_eq!(chain.len(), 2);

        assert_eq!(chain.prune(0), 0);
    }

    #[test]
    fn test_dead_chain_detection() {
        let mut chain = VersionChain::new();
        chain.push(1, doc(json!({})));
        chain.push(4, None);
        assert!(!chain.is_dead(10));
        chain.prune(10);
        assert!(chain.is_dead(10));
        assert!(!chain.is_dead(3));
    }

    #[test]
    fn test_apply_and_rebuild_indexes() {
        let mut state = CollectionState::new("users", 1);
        state
            .indexes
            .create(IndexDefinition::single("age", "age", false))
            .unwrap();
        let id = DocumentId::Int(1);
        state.apply(&id, 2, doc(json!({"age": 30})));
        state.apply(&id, 3, doc(json!({"age": 31})));
        assert_eq!(state.indexes.entry_count(), 2);

        for chain in state.docs.values_mut() {
            chain.prune(3);
        }
        state.rebuild_indexes();
        assert_eq!(state.indexes.entry_count(), 1);
        assert_eq!(state.count_visible(3), 1);
        assert_eq!(state.count_visible(1), 0);
    }

    #[test]
    fn test_live_count_follows_latest_versions() {
        let mut state = CollectionState::new("users", 1);
        let (a, b) = (DocumentId::Int(1), DocumentId::Int(2));
        state.apply(&a, 2, doc(json!({})));
        state.apply(&b, 3, doc(json!({})));
        state.apply(&a, 4, doc(json!({"v": 2})));
        assert_eq!(state.live_count(), 2);

        state.apply(&b, 5, None);
        assert_eq!(state.live_count(), 1);
        state.apply(&b, 6, doc(json!({})));
        assert_eq!(state.live_count(), 2);
        assert_eq!(state.live_count(), state.count_visible(6));
    }
}

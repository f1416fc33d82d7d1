//! Scope index: which evaluations read which `(node, property)` pairs.
//!
//! The index is a reverse dependency map in the spirit of a truth maintenance
//! system: a key (a read pair, or "this node is the context") maps to the set of
//! evaluations that depend on it. It is edited only from the delta an evaluator
//! reports after each run; an entry disappears together with its last user.
//!
//! Every entry is mirrored into the store as a `rule:ScopePart` individual:
//!
//! ```text
//! (owner  rule:hasScopePart   part)
//! (part   core:type           rule:ScopePart)
//! (part   rule:scopeProperty  property)     absent for context entries
//! (part   rule:usedBy         evaluation)   one per user
//! ```

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::expr::ScopeElement;
use crate::graph::store::{GraphResult, GraphStore};
use crate::symbol::NodeId;

/// What a scope entry is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScopeKey {
    /// An evaluation read `property` of `node`.
    Property { node: NodeId, property: NodeId },
    /// `node` is the context instance of the using evaluations.
    Context(NodeId),
}

impl ScopeKey {
    pub fn node(self) -> NodeId {
        match self {
            ScopeKey::Property { node, .. } | ScopeKey::Context(node) => node,
        }
    }

    pub fn property(self) -> Option<NodeId> {
        match self {
            ScopeKey::Property { property, .. } => Some(property),
            ScopeKey::Context(_) => None,
        }
    }
}

impl From<ScopeElement> for ScopeKey {
    fn from(e: ScopeElement) -> Self {
        ScopeKey::Property {
            node: e.node,
            property: e.property,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScopeEntry {
    /// The persisted scope-part node.
    part: NodeId,
    used_by: BTreeSet<NodeId>,
}

/// Bidirectional `(node, property)` ↔ evaluation index.
#[derive(Debug, Clone, Default)]
pub struct ScopeIndex {
    entries: HashMap<ScopeKey, ScopeEntry>,
    /// node → keys on that node.
    by_node: HashMap<NodeId, BTreeSet<ScopeKey>>,
    /// evaluation → keys it uses.
    by_evaluation: HashMap<NodeId, BTreeSet<ScopeKey>>,
}

impl ScopeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from persisted scope parts.
    pub fn load_from_model(store: &GraphStore) -> Self {
        let v = store.vocab();
        let mut index = Self::new();
        for part in store.instances_of(v.scope_part) {
            let Some(key) = key_of_part(store, part) else {
                tracing::warn!(part = %part, "scope part without owner, skipping");
                continue;
            };
            for evaluation in store.node_values(part, v.used_by) {
                index.link(key, part, evaluation);
            }
        }
        tracing::debug!(entries = index.len(), "loaded scope index");
        index
    }

    // -----------------------------------------------------------------------
    // Persisted edits
    // -----------------------------------------------------------------------

    /// `evaluation` now reads `(node, property)`.
    pub fn record_read(
        &mut self,
        store: &GraphStore,
        node: NodeId,
        property: NodeId,
        evaluation: NodeId,
    ) -> GraphResult<()> {
        self.record(store, ScopeKey::Property { node, property }, evaluation)
    }

    /// `evaluation` no longer reads `(node, property)`.
    pub fn record_unread(
        &mut self,
        store: &GraphStore,
        node: NodeId,
        property: NodeId,
        evaluation: NodeId,
    ) {
        self.unrecord(store, ScopeKey::Property { node, property }, evaluation);
    }

    /// `node` is the context instance of `evaluation`.
    pub fn record_context(
        &mut self,
        store: &GraphStore,
        node: NodeId,
        evaluation: NodeId,
    ) -> GraphResult<()> {
        self.record(store, ScopeKey::Context(node), evaluation)
    }

    fn record(&mut self, store: &GraphStore, key: ScopeKey, evaluation: NodeId) -> GraphResult<()> {
        let v = store.vocab();
        let part = match self.entries.get(&key) {
            Some(entry) if entry.used_by.contains(&evaluation) => return Ok(()),
            Some(entry) => entry.part,
            None => {
                let part = store.create_typed_node(v.scope_part)?;
                store.add_statement(key.node(), v.has_scope_part, part)?;
                if let Some(property) = key.property() {
                    store.add_statement(part, v.scope_property, property)?;
                }
                part
            }
        };
        store.add_statement(part, v.used_by, evaluation)?;
        self.link(key, part, evaluation);
        tracing::debug!(?key, evaluation = %evaluation, "scope entry recorded");
        Ok(())
    }

    fn unrecord(&mut self, store: &GraphStore, key: ScopeKey, evaluation: NodeId) {
        let v = store.vocab();
        let Some(part) = self.entries.get(&key).map(|e| e.part) else {
            return;
        };
        store.remove_statement(part, v.used_by, evaluation);
        if self.unlink(key, evaluation) {
            for statement in store.list_properties(part) {
                store.remove_statement(statement.subject, statement.predicate, statement.object);
            }
            store.remove_statement(key.node(), v.has_scope_part, part);
            tracing::debug!(?key, "scope entry dropped");
        }
    }

    /// Remove every entry on `node`. Returns the evaluations that used them.
    pub fn drop_all(&mut self, store: &GraphStore, node: NodeId) -> BTreeSet<NodeId> {
        let keys = self.by_node.get(&node).cloned().unwrap_or_default();
        let mut users = BTreeSet::new();
        for key in keys {
            let used_by = self
                .entries
                .get(&key)
                .map(|e| e.used_by.clone())
                .unwrap_or_default();
            for evaluation in used_by {
                self.unrecord(store, key, evaluation);
                users.insert(evaluation);
            }
        }
        users
    }

    /// Remove every membership of `evaluation`.
    pub fn remove_evaluation(&mut self, store: &GraphStore, evaluation: NodeId) {
        let keys = self
            .by_evaluation
            .get(&evaluation)
            .cloned()
            .unwrap_or_default();
        for key in keys {
            self.unrecord(store, key, evaluation);
        }
    }

    /// Apply a read-scope delta reported by the evaluator.
    pub fn apply_delta(
        &mut self,
        store: &GraphStore,
        evaluation: NodeId,
        added: &BTreeSet<ScopeElement>,
        removed: &BTreeSet<ScopeElement>,
    ) -> GraphResult<()> {
        for e in removed {
            self.record_unread(store, e.node, e.property, evaluation);
        }
        for e in added {
            self.record_read(store, e.node, e.property, evaluation)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // In-memory edits
    // -----------------------------------------------------------------------

    fn link(&mut self, key: ScopeKey, part: NodeId, evaluation: NodeId) {
        self.entries
            .entry(key)
            .or_insert_with(|| ScopeEntry {
                part,
                used_by: BTreeSet::new(),
            })
            .used_by
            .insert(evaluation);
        self.by_node.entry(key.node()).or_default().insert(key);
        self.by_evaluation.entry(evaluation).or_default().insert(key);
    }

    /// Returns `true` when the entry lost its last user and was removed.
    fn unlink(&mut self, key: ScopeKey, evaluation: NodeId) -> bool {
        if let Some(keys) = self.by_evaluation.get_mut(&evaluation) {
            keys.remove(&key);
            if keys.is_empty() {
                self.by_evaluation.remove(&evaluation);
            }
        }
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        entry.used_by.remove(&evaluation);
        if !entry.used_by.is_empty() {
            return false;
        }
        self.entries.remove(&key);
        if let Some(keys) = self.by_node.get_mut(&key.node()) {
            keys.remove(&key);
            if keys.is_empty() {
                self.by_node.remove(&key.node());
            }
        }
        true
    }

    /// Make the in-memory memberships of `evaluation` match the store.
    ///
    /// Used on replicas, where scope parts arrive through replicated commits
    /// and the index must follow without writing anything itself.
    pub fn resync_evaluation(&mut self, store: &GraphStore, evaluation: NodeId) {
        let v = store.vocab();
        let mut persisted = HashMap::new();
        for part in store.subjects(v.used_by, &evaluation.into()) {
            if let Some(key) = key_of_part(store, part) {
                persisted.insert(key, part);
            }
        }
        let current = self
            .by_evaluation
            .get(&evaluation)
            .cloned()
            .unwrap_or_default();
        for key in &current {
            if !persisted.contains_key(key) {
                self.unlink(*key, evaluation);
            }
        }
        for (key, part) in persisted {
            if !current.contains(&key) {
                // A replayed part may replace a locally dropped one.
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.part = part;
                }
                self.link(key, part, evaluation);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Evaluations that read `(node, property)`.
    pub fn lookup(&self, node: NodeId, property: NodeId) -> BTreeSet<NodeId> {
        self.users(&ScopeKey::Property { node, property })
    }

    /// Evaluations whose context instance is `node`.
    pub fn lookup_context_users(&self, node: NodeId) -> BTreeSet<NodeId> {
        self.users(&ScopeKey::Context(node))
    }

    /// Evaluations with any entry on `node`, context or read.
    pub fn users_of_node(&self, node: NodeId) -> BTreeSet<NodeId> {
        self.by_node
            .get(&node)
            .into_iter()
            .flatten()
            .flat_map(|key| self.users(key))
            .collect()
    }

    fn users(&self, key: &ScopeKey) -> BTreeSet<NodeId> {
        self.entries
            .get(key)
            .map(|e| e.used_by.clone())
            .unwrap_or_default()
    }

    /// The read pairs currently recorded for `evaluation`.
    pub fn read_scope(&self, evaluation: NodeId) -> BTreeSet<ScopeElement> {
        self.by_evaluation
            .get(&evaluation)
            .into_iter()
            .flatten()
            .filter_map(|key| match *key {
                ScopeKey::Property { node, property } => Some(ScopeElement::new(node, property)),
                ScopeKey::Context(_) => None,
            })
            .collect()
    }

    /// The persisted scope-part node of `key`.
    pub fn part_of(&self, key: &ScopeKey) -> Option<NodeId> {
        self.entries.get(key).map(|e| e.part)
    }

    /// Every entry with its users, sorted by key.
    pub fn entries(&self) -> Vec<(ScopeKey, BTreeSet<NodeId>)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(key, entry)| (*key, entry.used_by.clone()))
            .collect();
        entries.sort_by_key(|(key, _)| *key);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key_of_part(store: &GraphStore, part: NodeId) -> Option<ScopeKey> {
    let v = store.vocab();
    let owner = store
        .subjects(v.has_scope_part, &part.into())
        .into_iter()
        .next()?;
    Some(match store.value(part, v.scope_property).and_then(|o| o.as_node()) {
        Some(property) => ScopeKey::Property {
            node: owner,
            property,
        },
        None => ScopeKey::Context(owner),
    })
}

//! In-memory typed graph store with a pending-commit log.
//!
//! Statements are indexed by subject (`subject → predicate → objects`) and by
//! node object (`object → (subject, predicate)`) in `DashMap`s, so every
//! component can share `&GraphStore` while rule evaluations write their results
//! back. Every effective mutation is appended to the pending [`Commit`]; sealing
//! it with [`GraphStore::commit`] opens the next one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use dashmap::{DashMap, DashSet};

use crate::error::GraphError;
use crate::symbol::{AtomicNodeAllocator, NodeId};
use crate::vocab::Vocabulary;

use super::hierarchy::ClassHierarchy;
use super::{Commit, Object, Statement};

/// Result type for graph store operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Mutable typed graph store.
pub struct GraphStore {
    vocab: Vocabulary,
    allocator: AtomicNodeAllocator,
    /// Every node ever created or replayed into this store.
    nodes: DashSet<NodeId>,
    /// subject → predicate → objects.
    outgoing: DashMap<NodeId, BTreeMap<NodeId, BTreeSet<Object>>>,
    /// node object → (subject, predicate) pairs pointing at it.
    incoming: DashMap<NodeId, BTreeSet<(NodeId, NodeId)>>,
    hierarchy: RwLock<ClassHierarchy>,
    pending: Mutex<Commit>,
    next_commit: AtomicU64,
    statement_count: AtomicUsize,
}

impl GraphStore {
    /// Create a store holding only the bootstrapped vocabulary.
    pub fn new() -> Self {
        let allocator = AtomicNodeAllocator::new();
        // A fresh allocator cannot be exhausted by a fixed vocabulary.
        let vocab = match Vocabulary::allocate(&allocator) {
            Ok(vocab) => vocab,
            Err(e) => unreachable!("vocabulary allocation failed: {e}"),
        };

        let store = Self {
            vocab,
            allocator,
            nodes: DashSet::new(),
            outgoing: DashMap::new(),
            incoming: DashMap::new(),
            hierarchy: RwLock::new(ClassHierarchy::new()),
            pending: Mutex::new(Commit::new(1)),
            next_commit: AtomicU64::new(2),
            statement_count: AtomicUsize::new(0),
        };
        store.bootstrap();
        store
    }

    fn bootstrap(&self) {
        let v = self.vocab.clone();
        let types = [
            v.class,
            v.property,
            v.rule_definition,
            v.rule_evaluation,
            v.scope_part,
            v.repair_node,
        ];
        for (node, label) in v.labels() {
            self.nodes.insert(node);
            self.insert(Statement::new(node, v.label, Object::string(label)), false);
            let meta = if types.contains(&node) { v.class } else { v.property };
            self.insert(Statement::new(node, v.rdf_type, meta), false);
        }
    }

    /// The vocabulary nodes of this store.
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    // -----------------------------------------------------------------------
    // Node creation
    // -----------------------------------------------------------------------

    /// Allocate a bare node with no statements.
    pub fn create_node(&self) -> GraphResult<NodeId> {
        let id = self.allocator.next_id()?;
        self.nodes.insert(id);
        Ok(id)
    }

    /// Allocate a node typed by `ty`, without a label.
    pub fn create_typed_node(&self, ty: NodeId) -> GraphResult<NodeId> {
        self.require_node(ty)?;
        let id = self.create_node()?;
        self.add_statement(id, self.vocab.rdf_type, ty)?;
        Ok(id)
    }

    /// Create a type, optionally as a direct subclass of `superclass`.
    pub fn create_type(&self, label: &str, superclass: Option<NodeId>) -> GraphResult<NodeId> {
        if let Some(sup) = superclass {
            self.require_type(sup)?;
        }
        let id = self.create_typed_node(self.vocab.class)?;
        self.add_statement(id, self.vocab.label, Object::string(label))?;
        if let Some(sup) = superclass {
            self.add_statement(id, self.vocab.sub_class_of, sup)?;
        }
        Ok(id)
    }

    /// Create a property node.
    pub fn create_property(&self, label: &str) -> GraphResult<NodeId> {
        let id = self.create_typed_node(self.vocab.property)?;
        self.add_statement(id, self.vocab.label, Object::string(label))?;
        Ok(id)
    }

    /// Create an individual of type `ty`.
    pub fn create_individual(&self, label: &str, ty: NodeId) -> GraphResult<NodeId> {
        self.require_type(ty)?;
        let id = self.create_typed_node(ty)?;
        self.add_statement(id, self.vocab.label, Object::string(label))?;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Add a statement. Returns `false` if it was already present.
    pub fn add_statement(
        &self,
        subject: NodeId,
        predicate: NodeId,
        object: impl Into<Object>,
    ) -> GraphResult<bool> {
        let statement = Statement::new(subject, predicate, object);
        self.require_node(subject)?;
        self.require_node(predicate)?;
        if let Object::Node(o) = statement.object {
            self.require_node(o)?;
        }
        Ok(self.insert(statement, true))
    }

    /// Remove a statement. Returns `false` if it was not present.
    pub fn remove_statement(
        &self,
        subject: NodeId,
        predicate: NodeId,
        object: impl Into<Object>,
    ) -> bool {
        self.delete(&Statement::new(subject, predicate, object), true)
    }

    /// Replace every object of `(subject, predicate)` with `object`.
    pub fn set_value(
        &self,
        subject: NodeId,
        predicate: NodeId,
        object: impl Into<Object>,
    ) -> GraphResult<()> {
        let object = object.into();
        for old in self.objects(subject, predicate) {
            if old != object {
                self.delete(&Statement::new(subject, predicate, old), true);
            }
        }
        self.add_statement(subject, predicate, object)?;
        Ok(())
    }

    /// Remove every object of `(subject, predicate)`. Returns how many were removed.
    pub fn remove_values(&self, subject: NodeId, predicate: NodeId) -> usize {
        self.objects(subject, predicate)
            .into_iter()
            .filter(|o| self.delete(&Statement::new(subject, predicate, o.clone()), true))
            .count()
    }

    /// Remove every statement mentioning `node` as subject or object.
    ///
    /// The node id stays allocated and is never reused.
    pub fn remove_node(&self, node: NodeId) -> usize {
        let mut removed = 0;
        for statement in self.list_properties(node) {
            if self.delete(&statement, true) {
                removed += 1;
            }
        }
        let referrers: Vec<(NodeId, NodeId)> = self
            .incoming
            .get(&node)
            .map(|r| r.value().iter().copied().collect())
            .unwrap_or_default();
        for (subject, predicate) in referrers {
            if self.delete(&Statement::new(subject, predicate, node), true) {
                removed += 1;
            }
        }
        removed
    }

    fn insert(&self, statement: Statement, record: bool) -> bool {
        let inserted = self
            .outgoing
            .entry(statement.subject)
            .or_default()
            .entry(statement.predicate)
            .or_default()
            .insert(statement.object.clone());
        if !inserted {
            return false;
        }

        if let Object::Node(o) = statement.object {
            self.incoming
                .entry(o)
                .or_default()
                .insert((statement.subject, statement.predicate));
            if statement.predicate == self.vocab.sub_class_of {
                self.hierarchy
                    .write()
                    .expect("hierarchy lock poisoned")
                    .add(statement.subject, o);
            }
        }
        self.statement_count.fetch_add(1, Ordering::Relaxed);
        if record {
            self.pending
                .lock()
                .expect("commit log poisoned")
                .added
                .push(statement);
        }
        true
    }

    fn delete(&self, statement: &Statement, record: bool) -> bool {
        let removed = match self.outgoing.get_mut(&statement.subject) {
            Some(mut by_predicate) => {
                let removed = by_predicate
                    .get_mut(&statement.predicate)
                    .is_some_and(|objects| objects.remove(&statement.object));
                if removed
                    && by_predicate
                        .get(&statement.predicate)
                        .is_some_and(|objects| objects.is_empty())
                {
                    by_predicate.remove(&statement.predicate);
                }
                removed
            }
            None => false,
        };
        if !removed {
            return false;
        }

        if let Object::Node(o) = statement.object {
            if let Some(mut refs) = self.incoming.get_mut(&o) {
                refs.remove(&(statement.subject, statement.predicate));
            }
            if statement.predicate == self.vocab.sub_class_of {
                self.hierarchy
                    .write()
                    .expect("hierarchy lock poisoned")
                    .remove(statement.subject, o);
            }
        }
        self.statement_count.fetch_sub(1, Ordering::Relaxed);
        if record {
            self.pending
                .lock()
                .expect("commit log poisoned")
                .removed
                .push(statement.clone());
        }
        true
    }

    fn require_node(&self, node: NodeId) -> GraphResult<()> {
        if self.nodes.contains(&node) {
            Ok(())
        } else {
            Err(GraphError::NodeNotFound { node: node.get() })
        }
    }

    fn require_type(&self, node: NodeId) -> GraphResult<()> {
        self.require_node(node)?;
        if self.is_type(node) {
            Ok(())
        } else {
            Err(GraphError::NotAType { node: node.get() })
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn contains(&self, subject: NodeId, predicate: NodeId, object: &Object) -> bool {
        self.outgoing.get(&subject).is_some_and(|by_predicate| {
            by_predicate
                .get(&predicate)
                .is_some_and(|objects| objects.contains(object))
        })
    }

    /// All objects of `(subject, predicate)`, in object order.
    pub fn objects(&self, subject: NodeId, predicate: NodeId) -> Vec<Object> {
        self.outgoing
            .get(&subject)
            .and_then(|by_predicate| {
                by_predicate
                    .get(&predicate)
                    .map(|objects| objects.iter().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// The first object of `(subject, predicate)`, if any.
    pub fn value(&self, subject: NodeId, predicate: NodeId) -> Option<Object> {
        self.outgoing.get(&subject).and_then(|by_predicate| {
            by_predicate
                .get(&predicate)
                .and_then(|objects| objects.iter().next().cloned())
        })
    }

    /// Node objects of `(subject, predicate)`; literals are skipped.
    pub fn node_values(&self, subject: NodeId, predicate: NodeId) -> Vec<NodeId> {
        self.objects(subject, predicate)
            .iter()
            .filter_map(Object::as_node)
            .collect()
    }

    /// All subjects with `(subject, predicate, object)`, in id order.
    pub fn subjects(&self, predicate: NodeId, object: &Object) -> Vec<NodeId> {
        match object {
            Object::Node(o) => {
                let mut subjects: Vec<NodeId> = self
                    .incoming
                    .get(o)
                    .map(|refs| {
                        refs.iter()
                            .filter(|(_, p)| *p == predicate)
                            .map(|(s, _)| *s)
                            .collect()
                    })
                    .unwrap_or_default();
                subjects.sort();
                subjects.dedup();
                subjects
            }
            Object::Literal(_) => {
                let mut subjects: Vec<NodeId> = self
                    .outgoing
                    .iter()
                    .filter(|entry| {
                        entry
                            .value()
                            .get(&predicate)
                            .is_some_and(|objects| objects.contains(object))
                    })
                    .map(|entry| *entry.key())
                    .collect();
                subjects.sort();
                subjects
            }
        }
    }

    /// Every statement with `subject` as subject.
    pub fn list_properties(&self, subject: NodeId) -> Vec<Statement> {
        self.outgoing
            .get(&subject)
            .map(|by_predicate| {
                by_predicate
                    .iter()
                    .flat_map(|(p, objects)| {
                        objects
                            .iter()
                            .map(move |o| Statement::new(subject, *p, o.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every statement in the store, sorted.
    pub fn all_statements(&self) -> Vec<Statement> {
        let subjects: Vec<NodeId> = self.outgoing.iter().map(|e| *e.key()).collect();
        let mut all: Vec<Statement> = subjects
            .into_iter()
            .flat_map(|s| self.list_properties(s))
            .collect();
        all.sort();
        all
    }

    /// Direct types of `node`.
    pub fn classes_of(&self, node: NodeId) -> Vec<NodeId> {
        self.node_values(node, self.vocab.rdf_type)
    }

    /// Whether `node` is declared as a type.
    pub fn is_type(&self, node: NodeId) -> bool {
        self.contains(node, self.vocab.rdf_type, &Object::Node(self.vocab.class))
    }

    /// Whether `node` has `ty` or one of its subclasses among its types.
    pub fn is_instance_of(&self, node: NodeId, ty: NodeId) -> bool {
        let hierarchy = self.hierarchy.read().expect("hierarchy lock poisoned");
        self.classes_of(node)
            .into_iter()
            .any(|c| hierarchy.has_subclass(ty, c))
    }

    /// All instances of `ty` or any of its subclasses, in id order.
    pub fn instances_of(&self, ty: NodeId) -> Vec<NodeId> {
        let mut types = self.sub_classes_of(ty);
        types.insert(ty);
        let mut instances: Vec<NodeId> = types
            .into_iter()
            .flat_map(|t| self.subjects(self.vocab.rdf_type, &Object::Node(t)))
            .collect();
        instances.sort();
        instances.dedup();
        instances
    }

    pub fn direct_superclasses(&self, ty: NodeId) -> Vec<NodeId> {
        self.hierarchy
            .read()
            .expect("hierarchy lock poisoned")
            .direct_superclasses(ty)
    }

    pub fn superclasses_of(&self, ty: NodeId) -> BTreeSet<NodeId> {
        self.hierarchy
            .read()
            .expect("hierarchy lock poisoned")
            .superclasses_of(ty)
    }

    pub fn sub_classes_of(&self, ty: NodeId) -> BTreeSet<NodeId> {
        self.hierarchy
            .read()
            .expect("hierarchy lock poisoned")
            .subclasses_of(ty)
    }

    /// Whether `sub` is `sup` or one of its transitive subclasses.
    pub fn has_subclass(&self, sup: NodeId, sub: NodeId) -> bool {
        self.hierarchy
            .read()
            .expect("hierarchy lock poisoned")
            .has_subclass(sup, sub)
    }

    pub fn label(&self, node: NodeId) -> Option<String> {
        self.value(node, self.vocab.label)
            .and_then(|o| o.as_str().map(str::to_owned))
    }

    /// The label of `node`, or its id when it has none.
    pub fn display(&self, node: NodeId) -> String {
        self.label(node).unwrap_or_else(|| node.to_string())
    }

    /// Render an object for humans: node labels, literal values.
    pub fn display_object(&self, object: &Object) -> String {
        match object {
            Object::Node(n) => self.display(*n),
            Object::Literal(l) => l.to_string(),
        }
    }

    /// First node carrying `label`.
    pub fn find_by_label(&self, label: &str) -> Option<NodeId> {
        self.subjects(self.vocab.label, &Object::string(label))
            .into_iter()
            .next()
    }

    /// The property node labelled `name`.
    pub fn find_property(&self, name: &str) -> Option<NodeId> {
        self.subjects(self.vocab.label, &Object::string(name))
            .into_iter()
            .find(|n| self.contains(*n, self.vocab.rdf_type, &Object::Node(self.vocab.property)))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn statement_count(&self) -> usize {
        self.statement_count.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // Commits
    // -----------------------------------------------------------------------

    /// Snapshot of the pending commit.
    pub fn pending(&self) -> Commit {
        self.pending.lock().expect("commit log poisoned").clone()
    }

    /// `(added, removed)` lengths of the pending commit.
    pub fn pending_len(&self) -> (usize, usize) {
        let pending = self.pending.lock().expect("commit log poisoned");
        (pending.added.len(), pending.removed.len())
    }

    /// Seal the pending commit, reduced to its net effect, and open the next one.
    pub fn commit(&self, message: impl Into<String>) -> Commit {
        let next = Commit::new(self.next_commit.fetch_add(1, Ordering::Relaxed));
        let mut sealed = std::mem::replace(
            &mut *self.pending.lock().expect("commit log poisoned"),
            next,
        );
        sealed.message = Some(message.into());
        let sealed = sealed.net();
        tracing::debug!(
            commit = sealed.id,
            added = sealed.added.len(),
            removed = sealed.removed.len(),
            "sealed commit"
        );
        sealed
    }

    /// Replay a commit produced by another branch of this store.
    ///
    /// Removals are applied before additions; nodes first seen here are
    /// registered under their foreign ids.
    pub fn apply(&self, commit: &Commit) -> GraphResult<()> {
        for statement in &commit.removed {
            self.delete(statement, true);
        }
        for statement in &commit.added {
            self.adopt(statement.subject);
            self.adopt(statement.predicate);
            if let Object::Node(o) = statement.object {
                self.adopt(o);
            }
            self.insert(statement.clone(), true);
        }
        tracing::debug!(commit = commit.id, "applied foreign commit");
        Ok(())
    }

    fn adopt(&self, node: NodeId) {
        if self.nodes.insert(node) {
            self.allocator.observe(node);
        }
    }

    /// Create a replica with identical content and an empty pending commit.
    pub fn fork(&self) -> GraphStore {
        let replica = GraphStore::new();
        for node in self.nodes.iter() {
            replica.adopt(*node);
        }
        for statement in self.all_statements() {
            replica.insert(statement, false);
        }
        replica.allocator.advance_to(self.allocator.peek_next());
        replica
            .next_commit
            .store(self.next_commit.load(Ordering::Relaxed), Ordering::Relaxed);
        *replica.pending.lock().expect("commit log poisoned") =
            Commit::new(self.pending.lock().expect("commit log poisoned").id);
        replica
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("nodes", &self.node_count())
            .field("statements", &self.statement_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_query_individuals() {
        let store = GraphStore::new();
        let issue = store.create_type("Issue", None).unwrap();
        let requirements = store.create_property("requirements").unwrap();
        let a = store.create_individual("a", issue).unwrap();
        let b = store.create_individual("b", issue).unwrap();

        store.add_statement(a, requirements, b).unwrap();

        assert_eq!(store.node_values(a, requirements), vec![b]);
        assert_eq!(store.subjects(requirements, &Object::Node(b)), vec![a]);
        assert_eq!(store.classes_of(a), vec![issue]);
        assert_eq!(store.label(a).as_deref(), Some("a"));
        assert_eq!(store.find_property("requirements"), Some(requirements));
        assert_eq!(store.find_property("a"), None);
        assert_eq!(store.instances_of(issue), vec![a, b]);
    }

    #[test]
    fn unknown_nodes_are_rejected() {
        let store = GraphStore::new();
        let ghost = NodeId::new(10_000).unwrap();
        let err = store
            .add_statement(ghost, store.vocab().label, Object::string("x"))
            .unwrap_err();
        assert!(matches!(err, GraphError::NodeNotFound { node: 10_000 }));
    }

    #[test]
    fn individuals_need_a_type() {
        let store = GraphStore::new();
        let prop = store.create_property("p").unwrap();
        let err = store.create_individual("x", prop).unwrap_err();
        assert!(matches!(err, GraphError::NotAType { .. }));
    }

    #[test]
    fn subclass_aware_typing() {
        let store = GraphStore::new();
        let a = store.create_type("A", None).unwrap();
        let b = store.create_type("B", Some(a)).unwrap();
        let c = store.create_type("C", Some(b)).unwrap();
        let x = store.create_individual("x", c).unwrap();

        assert!(store.is_instance_of(x, a));
        assert!(store.is_instance_of(x, c));
        assert!(!store.is_instance_of(x, store.vocab().property));
        assert_eq!(store.instances_of(a), vec![x]);
        assert_eq!(store.direct_superclasses(c), vec![b]);
        assert!(store.has_subclass(a, c));
        assert_eq!(store.sub_classes_of(a), [b, c].into_iter().collect());
    }

    #[test]
    fn pending_commit_records_effective_changes() {
        let store = GraphStore::new();
        assert!(store.pending().is_empty());

        let t = store.create_type("T", None).unwrap();
        let p = store.create_property("p").unwrap();
        let x = store.create_individual("x", t).unwrap();
        let (added, _) = store.pending_len();

        // Duplicate add and missing remove are not recorded.
        store.add_statement(x, p, Object::integer(1)).unwrap();
        assert!(!store.add_statement(x, p, Object::integer(1)).unwrap());
        assert!(!store.remove_statement(x, p, Object::integer(2)));
        assert_eq!(store.pending_len(), (added + 1, 0));

        store.commit("first");

        store.set_value(x, p, Object::integer(2)).unwrap();
        store.add_statement(x, p, Object::integer(3)).unwrap();
        store.remove_statement(x, p, Object::integer(3));
        let commit = store.commit("second");
        assert_eq!(commit.message.as_deref(), Some("second"));
        assert_eq!(commit.removed, vec![Statement::new(x, p, Object::integer(1))]);
        assert_eq!(commit.added, vec![Statement::new(x, p, Object::integer(2))]);
        assert!(store.pending().is_empty());
        assert_eq!(store.pending().id, commit.id + 1);
    }

    #[test]
    fn remove_node_drops_incoming_and_outgoing() {
        let store = GraphStore::new();
        let t = store.create_type("T", None).unwrap();
        let p = store.create_property("p").unwrap();
        let x = store.create_individual("x", t).unwrap();
        let y = store.create_individual("y", t).unwrap();
        store.add_statement(y, p, x).unwrap();

        // type + label + incoming p
        assert_eq!(store.remove_node(x), 3);
        assert!(store.classes_of(x).is_empty());
        assert!(store.node_values(y, p).is_empty());
        assert!(store.contains_node(x));
    }

    #[test]
    fn apply_replays_into_fork() {
        let source = GraphStore::new();
        let t = source.create_type("T", None).unwrap();
        source.commit("schema");
        let replica = source.fork();
        assert_eq!(replica.all_statements(), source.all_statements());

        let x = source.create_individual("x", t).unwrap();
        let commit = source.commit("x");
        replica.apply(&commit).unwrap();

        assert_eq!(replica.classes_of(x), vec![t]);
        assert_eq!(replica.pending().added.len(), commit.added.len());
        // Fresh ids on the replica never collide with replayed ones.
        assert!(replica.create_node().unwrap() > x);
    }

    #[test]
    fn subclass_edges_follow_statements() {
        let store = GraphStore::new();
        let a = store.create_type("A", None).unwrap();
        let b = store.create_type("B", Some(a)).unwrap();
        assert!(store.has_subclass(a, b));
        store.remove_statement(b, store.vocab().sub_class_of, a);
        assert!(!store.has_subclass(a, b));
    }
}

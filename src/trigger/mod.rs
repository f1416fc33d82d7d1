//! Commit triggers: react to the statements of a commit.
//!
//! Both observers share one classification pass over a commit slice. The
//! [`ActiveTrigger`] turns it into evaluations to run and runs them, feeding
//! its own writes back into the loop. The [`PassiveTrigger`] runs on replicas:
//! it never evaluates, it only refreshes cached state and reports what
//! upstream re-evaluated.
//!
//! Removed statements are classified before added ones. Statements whose
//! subject was created or destroyed in the same slice are not treated as
//! independent property changes.

pub mod active;
pub mod passive;

use std::collections::{BTreeSet, HashMap};

use crate::error::GraphError;
use crate::graph::store::GraphStore;
use crate::graph::{Commit, Object, Statement};
use crate::symbol::NodeId;

pub use active::{ActiveTrigger, TriggerReport};
pub use passive::{IterationMetadata, PassiveTrigger, RuleEvaluationListener};

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What one statement means to the rule machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementClass {
    DefinitionCreated(NodeId),
    DefinitionRemoved(NodeId),
    /// Expression or context type of an existing definition was written.
    DefinitionEdited(NodeId),
    EvaluationCreated(NodeId),
    EvaluationRemoved(NodeId),
    /// Result or error of an evaluation was written.
    OutcomeChanged(NodeId),
    /// The enabled marker of an evaluation was written or cleared.
    EvaluationToggled(NodeId),
    /// A scope part gained or lost a user.
    ScopeUsage(NodeId),
    /// An instance gained a non-bookkeeping type.
    Typed(NodeId),
    /// An instance lost a non-bookkeeping type.
    Untyped(NodeId),
    /// Any other statement on a user property.
    Property { subject: NodeId, predicate: NodeId },
    Bookkeeping,
}

/// Classify one added (`added == true`) or removed statement.
pub fn classify(store: &GraphStore, statement: &Statement, added: bool) -> StatementClass {
    let v = store.vocab();
    let subject = statement.subject;
    let predicate = statement.predicate;

    if predicate == v.rdf_type {
        let Object::Node(ty) = statement.object else {
            return StatementClass::Bookkeeping;
        };
        return match (ty, added) {
            (t, true) if t == v.rule_definition => StatementClass::DefinitionCreated(subject),
            (t, false) if t == v.rule_definition => StatementClass::DefinitionRemoved(subject),
            (t, true) if t == v.rule_evaluation => StatementClass::EvaluationCreated(subject),
            (t, false) if t == v.rule_evaluation => StatementClass::EvaluationRemoved(subject),
            (t, _) if v.is_bookkeeping_type(t) => StatementClass::Bookkeeping,
            (_, true) => StatementClass::Typed(subject),
            (_, false) => StatementClass::Untyped(subject),
        };
    }
    if predicate == v.expression || predicate == v.context_type {
        return if added && store.is_instance_of(subject, v.rule_definition) {
            StatementClass::DefinitionEdited(subject)
        } else {
            StatementClass::Bookkeeping
        };
    }
    if predicate == v.result || predicate == v.error {
        return StatementClass::OutcomeChanged(subject);
    }
    if predicate == v.enabled {
        return StatementClass::EvaluationToggled(subject);
    }
    if predicate == v.used_by {
        return match statement.object {
            Object::Node(evaluation) => StatementClass::ScopeUsage(evaluation),
            Object::Literal(_) => StatementClass::Bookkeeping,
        };
    }
    if v.is_bookkeeping_predicate(predicate) {
        return StatementClass::Bookkeeping;
    }
    StatementClass::Property { subject, predicate }
}

/// A commit slice sorted into the buckets the observers act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedBatch {
    pub definitions_created: BTreeSet<NodeId>,
    pub definitions_removed: BTreeSet<NodeId>,
    pub definitions_edited: BTreeSet<NodeId>,
    pub evaluations_created: BTreeSet<NodeId>,
    pub evaluations_removed: BTreeSet<NodeId>,
    pub outcomes_changed: BTreeSet<NodeId>,
    pub evaluations_toggled: BTreeSet<NodeId>,
    pub scope_usage: BTreeSet<NodeId>,
    /// Instances that gained a type.
    pub instances_created: BTreeSet<NodeId>,
    /// Instances that lost their last type.
    pub instances_removed: BTreeSet<NodeId>,
    /// Instances that lost a type but keep others.
    pub instances_retyped: BTreeSet<NodeId>,
    /// Property changes on subjects outside the ignore-set, in commit order.
    pub changes: Vec<(NodeId, NodeId)>,
}

impl ClassifiedBatch {
    /// Classify `removed` then `added` against the current store state.
    pub fn build(store: &GraphStore, removed: &[Statement], added: &[Statement]) -> Self {
        let mut batch = ClassifiedBatch::default();
        let mut untyped = BTreeSet::new();
        let mut changes = Vec::new();

        for statement in removed {
            match classify(store, statement, false) {
                StatementClass::DefinitionRemoved(d) => {
                    batch.definitions_removed.insert(d);
                }
                StatementClass::EvaluationRemoved(e) => {
                    batch.evaluations_removed.insert(e);
                }
                StatementClass::OutcomeChanged(e) => {
                    batch.outcomes_changed.insert(e);
                }
                StatementClass::EvaluationToggled(e) => {
                    batch.evaluations_toggled.insert(e);
                }
                StatementClass::ScopeUsage(e) => {
                    batch.scope_usage.insert(e);
                }
                StatementClass::Untyped(i) => {
                    untyped.insert(i);
                }
                StatementClass::Property { subject, predicate } => {
                    changes.push((subject, predicate));
                }
                _ => {}
            }
        }
        for statement in added {
            match classify(store, statement, true) {
                StatementClass::DefinitionCreated(d) => {
                    batch.definitions_created.insert(d);
                }
                StatementClass::DefinitionEdited(d) => {
                    batch.definitions_edited.insert(d);
                }
                StatementClass::EvaluationCreated(e) => {
                    batch.evaluations_created.insert(e);
                }
                StatementClass::OutcomeChanged(e) => {
                    batch.outcomes_changed.insert(e);
                }
                StatementClass::EvaluationToggled(e) => {
                    batch.evaluations_toggled.insert(e);
                }
                StatementClass::ScopeUsage(e) => {
                    batch.scope_usage.insert(e);
                }
                StatementClass::Typed(i) => {
                    batch.instances_created.insert(i);
                }
                StatementClass::Property { subject, predicate } => {
                    changes.push((subject, predicate));
                }
                _ => {}
            }
        }

        for instance in untyped {
            if store.classes_of(instance).is_empty() {
                batch.instances_removed.insert(instance);
            } else if !batch.instances_created.contains(&instance) {
                batch.instances_retyped.insert(instance);
            }
        }
        let created = &batch.definitions_created;
        batch.definitions_edited.retain(|d| !created.contains(d));
        batch.outcomes_changed.retain(|e| !batch.evaluations_removed.contains(e));
        batch.evaluations_toggled.retain(|e| !batch.evaluations_removed.contains(e));

        let ignore = batch.ignore_set();
        let mut seen = BTreeSet::new();
        batch.changes = changes
            .into_iter()
            .filter(|(s, _)| !ignore.contains(s))
            .filter(|change| seen.insert(*change))
            .collect();
        batch
    }

    /// Subjects created or destroyed in this slice.
    pub fn ignore_set(&self) -> BTreeSet<NodeId> {
        self.definitions_created
            .iter()
            .chain(&self.definitions_removed)
            .chain(&self.evaluations_created)
            .chain(&self.evaluations_removed)
            .chain(&self.instances_created)
            .chain(&self.instances_removed)
            .copied()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Commit cursor
// ---------------------------------------------------------------------------

/// Last-seen `(added, removed)` lengths per commit id.
#[derive(Debug, Clone, Default)]
pub struct CommitCursor {
    seen: HashMap<u64, (usize, usize)>,
}

impl CommitCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offsets already handled in `commit`.
    pub fn offsets(&self, commit: u64) -> (usize, usize) {
        self.seen.get(&commit).copied().unwrap_or((0, 0))
    }

    /// Whether `commit` has statements past the recorded offsets.
    pub fn has_unseen(&self, commit: &Commit) -> bool {
        self.offsets(commit.id) != (commit.added.len(), commit.removed.len())
    }

    /// The unseen `(removed, added)` slices of `commit`.
    pub fn unseen<'c>(&self, commit: &'c Commit) -> Result<(&'c [Statement], &'c [Statement]), GraphError> {
        let (added, removed) = self.offsets(commit.id);
        Ok((commit.removed_since(removed)?, commit.added_since(added)?))
    }

    pub fn mark(&mut self, commit: &Commit) {
        self.seen
            .insert(commit.id, (commit.added.len(), commit.removed.len()));
    }

    /// Drop the record of a sealed commit.
    pub fn forget(&mut self, commit: u64) {
        self.seen.remove(&commit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_of_statement_kinds() {
        let store = GraphStore::new();
        let v = store.vocab().clone();
        let issue = store.create_type("Issue", None).unwrap();
        let requirements = store.create_property("requirements").unwrap();
        let a = store.create_individual("a", issue).unwrap();
        let d = store.create_typed_node(v.rule_definition).unwrap();

        let typed = Statement::new(a, v.rdf_type, issue);
        assert_eq!(classify(&store, &typed, true), StatementClass::Typed(a));
        assert_eq!(classify(&store, &typed, false), StatementClass::Untyped(a));

        let def = Statement::new(d, v.rdf_type, v.rule_definition);
        assert_eq!(classify(&store, &def, true), StatementClass::DefinitionCreated(d));
        assert_eq!(classify(&store, &def, false), StatementClass::DefinitionRemoved(d));

        let edit = Statement::new(d, v.expression, Object::string("true"));
        assert_eq!(classify(&store, &edit, true), StatementClass::DefinitionEdited(d));
        assert_eq!(classify(&store, &edit, false), StatementClass::Bookkeeping);

        let part = Statement::new(a, v.has_scope_part, a);
        assert_eq!(classify(&store, &part, true), StatementClass::Bookkeeping);
        let class = Statement::new(issue, v.rdf_type, v.class);
        assert_eq!(classify(&store, &class, true), StatementClass::Bookkeeping);

        let prop = Statement::new(a, requirements, a);
        assert_eq!(
            classify(&store, &prop, true),
            StatementClass::Property {
                subject: a,
                predicate: requirements
            }
        );
    }

    #[test]
    fn batch_ignores_changes_on_created_subjects() {
        let store = GraphStore::new();
        let issue = store.create_type("Issue", None).unwrap();
        let requirements = store.create_property("requirements").unwrap();
        let a = store.create_individual("a", issue).unwrap();
        let b = store.create_individual("b", issue).unwrap();
        store.add_statement(a, requirements, b).unwrap();
        store.commit("setup");

        let c = store.create_individual("c", issue).unwrap();
        store.add_statement(c, requirements, a).unwrap();
        store.add_statement(b, requirements, a).unwrap();
        store.add_statement(b, requirements, c).unwrap();
        let commit = store.pending();

        let batch = ClassifiedBatch::build(&store, &commit.removed, &commit.added);
        assert_eq!(batch.instances_created, [c].into_iter().collect());
        assert_eq!(batch.changes, vec![(b, requirements)]);
    }

    #[test]
    fn untyped_instances_split_into_removed_and_retyped() {
        let store = GraphStore::new();
        let v = store.vocab().clone();
        let issue = store.create_type("Issue", None).unwrap();
        let task = store.create_type("Task", None).unwrap();
        let a = store.create_individual("a", issue).unwrap();
        let b = store.create_individual("b", issue).unwrap();
        store.add_statement(b, v.rdf_type, task).unwrap();
        store.commit("setup");

        store.remove_node(a);
        store.remove_statement(b, v.rdf_type, issue);
        let commit = store.pending();
        let batch = ClassifiedBatch::build(&store, &commit.removed, &commit.added);
        assert_eq!(batch.instances_removed, [a].into_iter().collect());
        assert_eq!(batch.instances_retyped, [b].into_iter().collect());
        assert!(batch.changes.is_empty());
    }

    #[test]
    fn cursor_tracks_offsets_per_commit() {
        let store = GraphStore::new();
        let issue = store.create_type("Issue", None).unwrap();
        let mut cursor = CommitCursor::new();

        let first = store.pending();
        assert!(cursor.has_unseen(&first));
        cursor.mark(&first);
        assert!(!cursor.has_unseen(&first));

        store.create_individual("a", issue).unwrap();
        let grown = store.pending();
        let (removed, added) = cursor.unseen(&grown).unwrap();
        assert!(removed.is_empty());
        assert_eq!(added.len(), grown.added.len() - first.added.len());

        cursor.forget(grown.id);
        assert_eq!(cursor.offsets(grown.id), (0, 0));
    }
}

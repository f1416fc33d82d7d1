//! Well-known vocabulary nodes.
//!
//! Every [`GraphStore`](crate::graph::store::GraphStore) allocates these nodes
//! first, in a fixed order, so their ids are identical across a store and all
//! of its replicas. Labels use a `prefix:name` convention: `core:` for the
//! typing vocabulary, `rule:` for rule bookkeeping.

use crate::error::GraphError;
use crate::symbol::{AtomicNodeAllocator, NodeId};

/// Resolved ids of the vocabulary nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    // Typing vocabulary.
    pub rdf_type: NodeId,
    pub label: NodeId,
    pub sub_class_of: NodeId,
    pub class: NodeId,
    pub property: NodeId,

    // Bookkeeping types.
    pub rule_definition: NodeId,
    pub rule_evaluation: NodeId,
    pub scope_part: NodeId,
    pub repair_node: NodeId,

    // Rule definition fields.
    pub context_type: NodeId,
    pub expression: NodeId,
    pub title: NodeId,
    pub description: NodeId,
    pub parse_error: NodeId,

    // Rule evaluation fields.
    pub definition: NodeId,
    pub context: NodeId,
    pub enabled: NodeId,
    pub result: NodeId,
    pub error: NodeId,

    // Scope parts.
    pub has_scope_part: NodeId,
    pub scope_property: NodeId,
    pub used_by: NodeId,

    // Repair nodes.
    pub has_repair_node: NodeId,
    pub repair_kind: NodeId,
    pub composite_kind: NodeId,
    pub repair_operator: NodeId,
    pub repair_subject: NodeId,
    pub repair_predicate: NodeId,
    pub repair_value: NodeId,
    pub repair_restriction: NodeId,
    pub repair_parent: NodeId,
    pub position_in_parent: NodeId,

    // Repair declarations.
    pub repairable: NodeId,
}

impl Vocabulary {
    /// Allocate every vocabulary node from a fresh allocator.
    pub(crate) fn allocate(alloc: &AtomicNodeAllocator) -> Result<Self, GraphError> {
        let next = || alloc.next_id();
        Ok(Self {
            rdf_type: next()?,
            label: next()?,
            sub_class_of: next()?,
            class: next()?,
            property: next()?,
            rule_definition: next()?,
            rule_evaluation: next()?,
            scope_part: next()?,
            repair_node: next()?,
            context_type: next()?,
            expression: next()?,
            title: next()?,
            description: next()?,
            parse_error: next()?,
            definition: next()?,
            context: next()?,
            enabled: next()?,
            result: next()?,
            error: next()?,
            has_scope_part: next()?,
            scope_property: next()?,
            used_by: next()?,
            has_repair_node: next()?,
            repair_kind: next()?,
            composite_kind: next()?,
            repair_operator: next()?,
            repair_subject: next()?,
            repair_predicate: next()?,
            repair_value: next()?,
            repair_restriction: next()?,
            repair_parent: next()?,
            position_in_parent: next()?,
            repairable: next()?,
        })
    }

    /// `(node, label)` for every vocabulary node, in allocation order.
    pub fn labels(&self) -> Vec<(NodeId, &'static str)> {
        vec![
            (self.rdf_type, "core:type"),
            (self.label, "core:label"),
            (self.sub_class_of, "core:subClassOf"),
            (self.class, "core:Class"),
            (self.property, "core:Property"),
            (self.rule_definition, "rule:Definition"),
            (self.rule_evaluation, "rule:Evaluation"),
            (self.scope_part, "rule:ScopePart"),
            (self.repair_node, "rule:RepairNode"),
            (self.context_type, "rule:contextType"),
            (self.expression, "rule:expression"),
            (self.title, "rule:title"),
            (self.description, "rule:description"),
            (self.parse_error, "rule:parseError"),
            (self.definition, "rule:definition"),
            (self.context, "rule:context"),
            (self.enabled, "rule:enabled"),
            (self.result, "rule:result"),
            (self.error, "rule:error"),
            (self.has_scope_part, "rule:hasScopePart"),
            (self.scope_property, "rule:scopeProperty"),
            (self.used_by, "rule:usedBy"),
            (self.has_repair_node, "rule:hasRepairNode"),
            (self.repair_kind, "rule:repairKind"),
            (self.composite_kind, "rule:compositeKind"),
            (self.repair_operator, "rule:repairOperator"),
            (self.repair_subject, "rule:repairSubject"),
            (self.repair_predicate, "rule:repairPredicate"),
            (self.repair_value, "rule:repairValue"),
            (self.repair_restriction, "rule:repairRestriction"),
            (self.repair_parent, "rule:repairParent"),
            (self.position_in_parent, "rule:positionInParent"),
            (self.repairable, "rule:repairable"),
        ]
    }

    /// Types whose instances are bookkeeping, not rule contexts.
    pub fn is_bookkeeping_type(&self, ty: NodeId) -> bool {
        ty == self.class
            || ty == self.property
            || ty == self.rule_definition
            || ty == self.rule_evaluation
            || ty == self.scope_part
            || ty == self.repair_node
    }

    /// Predicates written by the rule machinery itself.
    ///
    /// Changes to these never re-trigger evaluations.
    pub fn is_bookkeeping_predicate(&self, predicate: NodeId) -> bool {
        predicate.get() >= self.context_type.get() && predicate.get() <= self.repairable.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_deterministic() {
        let a = Vocabulary::allocate(&AtomicNodeAllocator::new()).unwrap();
        let b = Vocabulary::allocate(&AtomicNodeAllocator::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.rdf_type.get(), 1);
    }

    #[test]
    fn labels_cover_every_node() {
        let alloc = AtomicNodeAllocator::new();
        let vocab = Vocabulary::allocate(&alloc).unwrap();
        assert_eq!(vocab.labels().len() as u64, alloc.peek_next() - 1);
    }

    #[test]
    fn bookkeeping_predicates() {
        let vocab = Vocabulary::allocate(&AtomicNodeAllocator::new()).unwrap();
        assert!(vocab.is_bookkeeping_predicate(vocab.result));
        assert!(vocab.is_bookkeeping_predicate(vocab.used_by));
        assert!(vocab.is_bookkeeping_predicate(vocab.repairable));
        assert!(!vocab.is_bookkeeping_predicate(vocab.label));
        assert!(!vocab.is_bookkeeping_predicate(vocab.rdf_type));
    }

    #[test]
    fn bookkeeping_types() {
        let vocab = Vocabulary::allocate(&AtomicNodeAllocator::new()).unwrap();
        assert!(vocab.is_bookkeeping_type(vocab.scope_part));
        assert!(vocab.is_bookkeeping_type(vocab.rule_evaluation));
        assert!(!vocab.is_bookkeeping_type(vocab.label));
    }
}

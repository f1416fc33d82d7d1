//! Repair trees: persisted decompositions of a failed rule evaluation.
//!
//! A [`RepairPlan`] is the in-memory shape an evaluator derives. Persisting it
//! writes one `rule:RepairNode` individual per plan node; every node links
//! directly to the evaluation through `rule:hasRepairNode`, and depth lives only
//! in the `rule:repairParent` pointers. [`RepairTree::try_load`] rebuilds the
//! arena by grouping nodes under their parents and fails when the stored nodes
//! do not have exactly one root.

pub mod declaration;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::RepairError;
use crate::graph::Object;
use crate::graph::store::GraphStore;
use crate::symbol::NodeId;

pub use declaration::RepairDeclarations;

/// Result type for repair tree operations.
pub type RepairResult<T> = std::result::Result<T, RepairError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairOperator {
    Add,
    Remove,
    Modify,
}

impl RepairOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairOperator::Add => "add",
            RepairOperator::Remove => "remove",
            RepairOperator::Modify => "modify",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "add" => Some(RepairOperator::Add),
            "remove" => Some(RepairOperator::Remove),
            "modify" => Some(RepairOperator::Modify),
            _ => None,
        }
    }
}

/// How the children of a composite combine: all of them, or any one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompositeKind {
    And,
    Or,
}

impl CompositeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CompositeKind::And => "and",
            CompositeKind::Or => "or",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "and" => Some(CompositeKind::And),
            "or" => Some(CompositeKind::Or),
            _ => None,
        }
    }
}

/// A single addressable change: apply `operator` to `(subject, predicate)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicRepair {
    pub operator: RepairOperator,
    pub subject: NodeId,
    pub predicate: NodeId,
    pub value: Option<Object>,
    /// Human-readable constraint the new value must satisfy, e.g. `size() > 1`.
    pub restriction: Option<String>,
}

impl AtomicRepair {
    pub fn new(operator: RepairOperator, subject: NodeId, predicate: NodeId) -> Self {
        Self {
            operator,
            subject,
            predicate,
            value: None,
            restriction: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Object>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_restriction(mut self, restriction: impl Into<String>) -> Self {
        self.restriction = Some(restriction.into());
        self
    }
}

/// In-memory repair suggestion tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairPlan {
    Atomic(AtomicRepair),
    Composite {
        kind: CompositeKind,
        children: Vec<RepairPlan>,
    },
}

impl RepairPlan {
    /// Combine `children` under `kind`.
    ///
    /// No children yields `None`; a single child is returned as is.
    pub fn combine(kind: CompositeKind, mut children: Vec<RepairPlan>) -> Option<RepairPlan> {
        match children.len() {
            0 => None,
            1 => children.pop(),
            _ => Some(RepairPlan::Composite { kind, children }),
        }
    }

    pub fn count_atomic_leaves(&self) -> usize {
        match self {
            RepairPlan::Atomic(_) => 1,
            RepairPlan::Composite { children, .. } => {
                children.iter().map(RepairPlan::count_atomic_leaves).sum()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairNodeKind {
    Atomic(AtomicRepair),
    Composite(CompositeKind),
}

/// One persisted repair node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub position: i64,
    pub kind: RepairNodeKind,
}

/// Writes repair nodes for one evaluation.
pub struct RepairTreeBuilder<'a> {
    store: &'a GraphStore,
    evaluation: NodeId,
}

impl<'a> RepairTreeBuilder<'a> {
    pub fn new(store: &'a GraphStore, evaluation: NodeId) -> Self {
        Self { store, evaluation }
    }

    pub fn composite(
        &self,
        kind: CompositeKind,
        parent: Option<NodeId>,
        position: i64,
    ) -> RepairResult<NodeId> {
        let v = self.store.vocab();
        let node = self.node(parent, position, "composite")?;
        self.store
            .add_statement(node, v.composite_kind, Object::string(kind.as_str()))?;
        Ok(node)
    }

    pub fn atomic(
        &self,
        repair: &AtomicRepair,
        parent: Option<NodeId>,
        position: i64,
    ) -> RepairResult<NodeId> {
        let v = self.store.vocab();
        let node = self.node(parent, position, "atomic")?;
        self.store.add_statement(
            node,
            v.repair_operator,
            Object::string(repair.operator.as_str()),
        )?;
        self.store
            .add_statement(node, v.repair_subject, repair.subject)?;
        self.store
            .add_statement(node, v.repair_predicate, repair.predicate)?;
        if let Some(value) = &repair.value {
            self.store.add_statement(node, v.repair_value, value.clone())?;
        }
        if let Some(restriction) = &repair.restriction {
            self.store.add_statement(
                node,
                v.repair_restriction,
                Object::string(restriction.as_str()),
            )?;
        }
        Ok(node)
    }

    fn node(&self, parent: Option<NodeId>, position: i64, kind: &str) -> RepairResult<NodeId> {
        let v = self.store.vocab();
        let node = self.store.create_typed_node(v.repair_node)?;
        self.store
            .add_statement(self.evaluation, v.has_repair_node, node)?;
        self.store
            .add_statement(node, v.repair_kind, Object::string(kind))?;
        self.store
            .add_statement(node, v.position_in_parent, Object::integer(position))?;
        if let Some(parent) = parent {
            self.store.add_statement(node, v.repair_parent, parent)?;
        }
        Ok(node)
    }

    /// Persist a whole plan depth-first; returns the root node.
    pub fn persist(&self, plan: &RepairPlan) -> RepairResult<NodeId> {
        self.persist_at(plan, None, 0)
    }

    fn persist_at(
        &self,
        plan: &RepairPlan,
        parent: Option<NodeId>,
        position: i64,
    ) -> RepairResult<NodeId> {
        match plan {
            RepairPlan::Atomic(repair) => self.atomic(repair, parent, position),
            RepairPlan::Composite { kind, children } => {
                let node = self.composite(*kind, parent, position)?;
                for (i, child) in children.iter().enumerate() {
                    self.persist_at(child, Some(node), i as i64)?;
                }
                Ok(node)
            }
        }
    }
}

/// A repair tree reconstructed from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairTree {
    evaluation: NodeId,
    root: NodeId,
    nodes: BTreeMap<NodeId, RepairNode>,
    /// parent → children sorted by position.
    children: BTreeMap<NodeId, Vec<NodeId>>,
}

impl RepairTree {
    /// Persist `plan` as the repair tree of `evaluation` and load it back.
    pub fn persist(
        store: &GraphStore,
        evaluation: NodeId,
        plan: &RepairPlan,
    ) -> RepairResult<RepairTree> {
        RepairTreeBuilder::new(store, evaluation).persist(plan)?;
        Self::try_load(store, evaluation)?.ok_or(RepairError::RootCount {
            evaluation: evaluation.get(),
            roots: 0,
        })
    }

    /// Rebuild the tree of `evaluation`.
    ///
    /// `Ok(None)` means the evaluation has no repair nodes at all.
    pub fn try_load(store: &GraphStore, evaluation: NodeId) -> RepairResult<Option<RepairTree>> {
        let v = store.vocab();
        let linked: BTreeSet<NodeId> = store
            .node_values(evaluation, v.has_repair_node)
            .into_iter()
            .collect();
        if linked.is_empty() {
            return Ok(None);
        }

        let mut nodes = BTreeMap::new();
        for &id in &linked {
            let node = read_node(store, id)?;
            if let Some(parent) = node.parent
                && !linked.contains(&parent)
            {
                return Err(RepairError::DanglingParent {
                    node: id.get(),
                    parent: parent.get(),
                });
            }
            nodes.insert(id, node);
        }

        let roots: Vec<NodeId> = nodes
            .values()
            .filter(|n| n.parent.is_none())
            .map(|n| n.id)
            .collect();
        if roots.len() != 1 {
            return Err(RepairError::RootCount {
                evaluation: evaluation.get(),
                roots: roots.len(),
            });
        }

        let mut children: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for node in nodes.values() {
            if let Some(parent) = node.parent {
                children.entry(parent).or_default().push(node.id);
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(|id| (nodes[id].position, *id));
        }

        let root = roots[0];
        let mut reached = BTreeSet::from([root]);
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for &child in children.get(&id).into_iter().flatten() {
                if reached.insert(child) {
                    stack.push(child);
                }
            }
        }
        if let Some(&stray) = nodes.keys().find(|id| !reached.contains(id)) {
            return Err(RepairError::Unreachable {
                evaluation: evaluation.get(),
                node: stray.get(),
            });
        }

        Ok(Some(RepairTree {
            evaluation,
            root,
            nodes,
            children,
        }))
    }

    /// Like [`try_load`](Self::try_load), but a corrupt tree is logged and
    /// treated as absent.
    pub fn load(store: &GraphStore, evaluation: NodeId) -> Option<RepairTree> {
        match Self::try_load(store, evaluation) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::error!(evaluation = %evaluation, error = %e, "discarding repair tree");
                None
            }
        }
    }

    /// Delete every repair node of `evaluation`. Returns how many were linked.
    pub fn remove(store: &GraphStore, evaluation: NodeId) -> usize {
        let v = store.vocab();
        let linked = store.node_values(evaluation, v.has_repair_node);
        for &node in &linked {
            for statement in store.list_properties(node) {
                store.remove_statement(statement.subject, statement.predicate, statement.object);
            }
        }
        for &node in &linked {
            store.remove_statement(evaluation, v.has_repair_node, node);
        }
        linked.len()
    }

    pub fn evaluation(&self) -> NodeId {
        self.evaluation
    }

    pub fn root(&self) -> &RepairNode {
        &self.nodes[&self.root]
    }

    pub fn node(&self, id: NodeId) -> Option<&RepairNode> {
        self.nodes.get(&id)
    }

    /// Children of `id`, ordered by position.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &RepairNode> {
        self.children
            .get(&id)
            .into_iter()
            .flatten()
            .map(|c| &self.nodes[c])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn count_atomic_leaves(&self) -> usize {
        self.count_below(self.root)
    }

    fn count_below(&self, id: NodeId) -> usize {
        match self.nodes[&id].kind {
            RepairNodeKind::Atomic(_) => 1,
            RepairNodeKind::Composite(_) => self
                .children(id)
                .map(|child| self.count_below(child.id))
                .sum(),
        }
    }

    /// Convert back into the in-memory plan shape.
    pub fn to_plan(&self) -> RepairPlan {
        self.plan_below(self.root)
    }

    fn plan_below(&self, id: NodeId) -> RepairPlan {
        match &self.nodes[&id].kind {
            RepairNodeKind::Atomic(repair) => RepairPlan::Atomic(repair.clone()),
            RepairNodeKind::Composite(kind) => RepairPlan::Composite {
                kind: *kind,
                children: self
                    .children(id)
                    .map(|child| self.plan_below(child.id))
                    .collect(),
            },
        }
    }

    /// Pre-order walk yielding `(depth, node)`.
    pub fn walk(&self) -> Vec<(usize, &RepairNode)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(0, self.root)];
        while let Some((depth, id)) = stack.pop() {
            out.push((depth, &self.nodes[&id]));
            if let Some(children) = self.children.get(&id) {
                for child in children.iter().rev() {
                    stack.push((depth + 1, *child));
                }
            }
        }
        out
    }
}

fn read_node(store: &GraphStore, id: NodeId) -> RepairResult<RepairNode> {
    let v = store.vocab();
    let malformed = |message: &str| RepairError::Malformed {
        node: id.get(),
        message: message.to_string(),
    };

    let position = store
        .value(id, v.position_in_parent)
        .and_then(|o| o.as_integer())
        .ok_or_else(|| malformed("missing position"))?;
    let parent = store.value(id, v.repair_parent).and_then(|o| o.as_node());
    let kind_label = store
        .value(id, v.repair_kind)
        .ok_or_else(|| malformed("missing repair kind"))?;

    let kind = match kind_label.as_str() {
        Some("composite") => {
            let kind = store
                .value(id, v.composite_kind)
                .and_then(|o| o.as_str().and_then(CompositeKind::from_label))
                .ok_or_else(|| malformed("missing composite kind"))?;
            RepairNodeKind::Composite(kind)
        }
        Some("atomic") => {
            let operator = store
                .value(id, v.repair_operator)
                .and_then(|o| o.as_str().and_then(RepairOperator::from_label))
                .ok_or_else(|| malformed("missing operator"))?;
            let subject = store
                .value(id, v.repair_subject)
                .and_then(|o| o.as_node())
                .ok_or_else(|| malformed("missing subject"))?;
            let predicate = store
                .value(id, v.repair_predicate)
                .and_then(|o| o.as_node())
                .ok_or_else(|| malformed("missing predicate"))?;
            RepairNodeKind::Atomic(AtomicRepair {
                operator,
                subject,
                predicate,
                value: store.value(id, v.repair_value),
                restriction: store
                    .value(id, v.repair_restriction)
                    .and_then(|o| o.as_str().map(str::to_owned)),
            })
        }
        _ => return Err(malformed("unknown repair kind")),
    };

    Ok(RepairNode {
        id,
        parent,
        position,
        kind,
    })
}

//! Read-only views over a [`RuleRepository`] for diagnostics and the CLI.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::graph::store::GraphStore;
use crate::repair::{RepairNodeKind, RepairTree};
use crate::symbol::NodeId;

use super::evaluation::RuleEvaluation;
use super::repository::RuleRepository;
use super::scope::ScopeKey;

/// One line of a flattened repair tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairLine {
    pub depth: usize,
    pub node: u64,
    pub text: String,
}

impl fmt::Display for RepairLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.text, indent = self.depth * 2)
    }
}

/// A scope entry rendered with labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeLine {
    pub node: String,
    /// `None` for context entries.
    pub property: Option<String>,
    pub users: Vec<u64>,
}

pub struct RuleRepositoryInspector<'a> {
    repository: &'a RuleRepository,
}

impl<'a> RuleRepositoryInspector<'a> {
    pub fn new(repository: &'a RuleRepository) -> Self {
        Self { repository }
    }

    /// Every scope entry with its users.
    pub fn scope_entries(&self) -> Vec<(ScopeKey, BTreeSet<NodeId>)> {
        self.repository.scope().entries()
    }

    /// Scope entries with node and property labels resolved.
    pub fn scope_lines(&self, store: &GraphStore) -> Vec<ScopeLine> {
        self.scope_entries()
            .into_iter()
            .map(|(key, users)| ScopeLine {
                node: store.display(key.node()),
                property: key.property().map(|p| store.display(p)),
                users: users.into_iter().map(NodeId::get).collect(),
            })
            .collect()
    }

    /// Enabled cached evaluations in id order.
    pub fn evaluations(&self) -> Vec<&'a RuleEvaluation> {
        self.repository.evaluations().filter(|e| e.enabled).collect()
    }

    /// Enabled cached evaluations whose last run was inconsistent.
    pub fn inconsistent(&self) -> Vec<&'a RuleEvaluation> {
        self.repository
            .evaluations()
            .filter(|e| e.enabled && e.result == Some(false))
            .collect()
    }

    /// Pre-order rendering of the repair tree of `evaluation`.
    pub fn flatten_repair_tree(&self, store: &GraphStore, evaluation: NodeId) -> Vec<RepairLine> {
        let Some(tree) = RepairTree::load(store, evaluation) else {
            return Vec::new();
        };
        tree.walk()
            .into_iter()
            .map(|(depth, node)| RepairLine {
                depth,
                node: node.id.get(),
                text: match &node.kind {
                    RepairNodeKind::Composite(kind) => kind.as_str().to_string(),
                    RepairNodeKind::Atomic(repair) => {
                        let mut text = format!(
                            "{} {}.{}",
                            repair.operator.as_str(),
                            store.display(repair.subject),
                            store.display(repair.predicate)
                        );
                        if let Some(value) = &repair.value {
                            text.push_str(&format!(" = {}", store.display_object(value)));
                        }
                        if let Some(restriction) = &repair.restriction {
                            text.push_str(&format!(" [{restriction}]"));
                        }
                        text
                    }
                },
            })
            .collect()
    }
}

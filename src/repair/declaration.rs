//! Repair declarations: which properties may be suggested as repair targets.
//!
//! A declaration is the statement `(type rule:repairable property)`. It is
//! inherited by every subclass of `type`. There is no negative form: removing
//! the marker is the only way to retract it, and an ancestor's marker still
//! applies afterwards.

use std::collections::HashSet;

use crate::graph::store::{GraphResult, GraphStore};
use crate::symbol::NodeId;

use super::RepairPlan;

/// Read/write access to repair declarations in one store.
#[derive(Debug, Clone, Copy)]
pub struct RepairDeclarations<'a> {
    store: &'a GraphStore,
}

impl<'a> RepairDeclarations<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Whether `property` is repairable on `ty`, directly or through a superclass.
    pub fn is_repairable(&self, ty: NodeId, property: NodeId) -> bool {
        let mut visited = HashSet::new();
        self.search(ty, property, &mut visited)
    }

    fn search(&self, ty: NodeId, property: NodeId, visited: &mut HashSet<NodeId>) -> bool {
        if !visited.insert(ty) {
            return false;
        }
        if self.is_declared(ty, property) {
            return true;
        }
        self.store
            .direct_superclasses(ty)
            .into_iter()
            .any(|sup| self.search(sup, property, visited))
    }

    /// Whether the marker is present on `ty` itself.
    pub fn is_declared(&self, ty: NodeId, property: NodeId) -> bool {
        self.store
            .contains(ty, self.store.vocab().repairable, &property.into())
    }

    /// Add (`true`) or remove (`false`) the marker on `ty`.
    pub fn set_repairable(&self, ty: NodeId, property: NodeId, repairable: bool) -> GraphResult<()> {
        let marker = self.store.vocab().repairable;
        if repairable {
            self.store.add_statement(ty, marker, property)?;
        } else {
            self.store.remove_statement(ty, marker, property);
        }
        tracing::debug!(ty = %ty, property = %property, repairable, "repair declaration set");
        Ok(())
    }

    /// Whether some type of `subject` declares `property` repairable.
    pub fn is_repairable_on(&self, subject: NodeId, property: NodeId) -> bool {
        self.store
            .classes_of(subject)
            .into_iter()
            .any(|ty| self.is_repairable(ty, property))
    }

    /// Drop atomic repairs on undeclared targets, then any composite left empty.
    pub fn prune(&self, plan: RepairPlan) -> Option<RepairPlan> {
        match plan {
            RepairPlan::Atomic(repair) => self
                .is_repairable_on(repair.subject, repair.predicate)
                .then_some(RepairPlan::Atomic(repair)),
            RepairPlan::Composite { kind, children } => {
                let mut kept = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(child) = self.prune(child) {
                        kept.push(child);
                    }
                }
                RepairPlan::combine(kind, kept)
            }
        }
    }
}

//! Class hierarchy: the `core:subClassOf` lattice.
//!
//! Edges point from the subclass to its direct superclass. Types usually form a
//! single-inheritance tree, but multiple direct superclasses are allowed and
//! every query walks all of them.

use std::collections::BTreeSet;

use petgraph::Direction;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Bfs, Reversed};

use crate::symbol::NodeId;

/// Cached `subClassOf` edges as a directed graph map.
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    graph: DiGraphMap<NodeId, ()>,
}

impl ClassHierarchy {
    /// Create an empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `sub` is a direct subclass of `sup`.
    pub fn add(&mut self, sub: NodeId, sup: NodeId) {
        self.graph.add_edge(sub, sup, ());
    }

    /// Forget a direct subclass edge. Returns whether it existed.
    pub fn remove(&mut self, sub: NodeId, sup: NodeId) -> bool {
        self.graph.remove_edge(sub, sup).is_some()
    }

    /// Direct superclasses of `ty`, in id order.
    pub fn direct_superclasses(&self, ty: NodeId) -> Vec<NodeId> {
        if !self.graph.contains_node(ty) {
            return Vec::new();
        }
        let mut sups: Vec<NodeId> = self
            .graph
            .neighbors_directed(ty, Direction::Outgoing)
            .collect();
        sups.sort();
        sups
    }

    /// All transitive superclasses of `ty`, excluding `ty` itself.
    pub fn superclasses_of(&self, ty: NodeId) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        if !self.graph.contains_node(ty) {
            return found;
        }
        let mut bfs = Bfs::new(&self.graph, ty);
        while let Some(next) = bfs.next(&self.graph) {
            if next != ty {
                found.insert(next);
            }
        }
        found
    }

    /// All transitive subclasses of `ty`, excluding `ty` itself.
    pub fn subclasses_of(&self, ty: NodeId) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        if !self.graph.contains_node(ty) {
            return found;
        }
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, ty);
        while let Some(next) = bfs.next(reversed) {
            if next != ty {
                found.insert(next);
            }
        }
        found
    }

    /// Whether `sub` equals `sup` or inherits from it.
    pub fn has_subclass(&self, sup: NodeId, sub: NodeId) -> bool {
        sub == sup || self.superclasses_of(sub).contains(&sup)
    }

    /// Whether the declared hierarchy contains a `subClassOf` cycle.
    pub fn has_cycle(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Number of `subClassOf` edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn transitive_superclasses() {
        // C → B → A
        let mut h = ClassHierarchy::new();
        h.add(node(3), node(2));
        h.add(node(2), node(1));

        assert_eq!(h.direct_superclasses(node(3)), vec![node(2)]);
        assert_eq!(
            h.superclasses_of(node(3)),
            [node(1), node(2)].into_iter().collect()
        );
        assert!(h.superclasses_of(node(1)).is_empty());
        assert!(h.superclasses_of(node(99)).is_empty());
    }

    #[test]
    fn transitive_subclasses() {
        let mut h = ClassHierarchy::new();
        h.add(node(3), node(2));
        h.add(node(2), node(1));
        h.add(node(4), node(1));

        assert_eq!(
            h.subclasses_of(node(1)),
            [node(2), node(3), node(4)].into_iter().collect()
        );
        assert!(h.has_subclass(node(1), node(3)));
        assert!(h.has_subclass(node(3), node(3)));
        assert!(!h.has_subclass(node(3), node(1)));
    }

    #[test]
    fn remove_edge() {
        let mut h = ClassHierarchy::new();
        h.add(node(2), node(1));
        assert!(h.remove(node(2), node(1)));
        assert!(!h.remove(node(2), node(1)));
        assert!(!h.has_subclass(node(1), node(2)));
        assert_eq!(h.edge_count(), 0);
    }

    #[test]
    fn cycle_detection() {
        let mut h = ClassHierarchy::new();
        h.add(node(2), node(1));
        assert!(!h.has_cycle());
        h.add(node(1), node(2));
        assert!(h.has_cycle());
        // Traversal terminates on cycles.
        assert_eq!(h.superclasses_of(node(1)), [node(2)].into_iter().collect());
    }
}

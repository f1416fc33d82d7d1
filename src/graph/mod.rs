//! Typed graph store: statements, commits, and the subclass hierarchy.
//!
//! - **Statements** ([`Statement`]): `(subject, predicate, object)` where the
//!   object is either another node or a literal value.
//! - **Commits** ([`Commit`]): ordered, append-only lists of added and removed
//!   statements describing one transition of the store.
//! - **Store** ([`store::GraphStore`]): in-memory indices plus the pending commit.
//! - **Hierarchy** ([`hierarchy::ClassHierarchy`]): the `subClassOf` lattice.

pub mod hierarchy;
pub mod store;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::symbol::NodeId;

/// A literal value stored in the object position of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Literal {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{s}'"),
            Literal::Integer(i) => write!(f, "{i}"),
            Literal::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// The object of a statement: a node reference or a literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Object {
    Node(NodeId),
    Literal(Literal),
}

impl Object {
    /// Shorthand for a string literal.
    pub fn string(value: impl Into<String>) -> Self {
        Object::Literal(Literal::String(value.into()))
    }

    /// Shorthand for an integer literal.
    pub fn integer(value: i64) -> Self {
        Object::Literal(Literal::Integer(value))
    }

    /// Shorthand for a boolean literal.
    pub fn boolean(value: bool) -> Self {
        Object::Literal(Literal::Boolean(value))
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Object::Node(n) => Some(*n),
            Object::Literal(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::Literal(Literal::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Literal(Literal::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Literal(Literal::Boolean(b)) => Some(*b),
            _ => None,
        }
    }
}

impl From<NodeId> for Object {
    fn from(node: NodeId) -> Self {
        Object::Node(node)
    }
}

impl From<Literal> for Object {
    fn from(literal: Literal) -> Self {
        Object::Literal(literal)
    }
}

impl std::fmt::Display for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Object::Node(n) => write!(f, "{n}"),
            Object::Literal(l) => write!(f, "{l}"),
        }
    }
}

/// A statement (subject, predicate, object) in the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Statement {
    pub subject: NodeId,
    pub predicate: NodeId,
    pub object: Object,
}

impl Statement {
    pub fn new(subject: NodeId, predicate: NodeId, object: impl Into<Object>) -> Self {
        Self {
            subject,
            predicate,
            object: object.into(),
        }
    }
}

/// One transition of the store: ordered added and removed statements.
///
/// Both lists are append-only while the commit is pending. Handlers remember
/// how far into each list they have read and only look at the tail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Monotonic per-store commit number.
    pub id: u64,
    /// Optional human-readable message, set when the commit is sealed.
    pub message: Option<String>,
    pub added: Vec<Statement>,
    pub removed: Vec<Statement>,
}

impl Commit {
    /// Create an empty commit with the given id.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Statements added after `offset`.
    pub fn added_since(&self, offset: usize) -> Result<&[Statement], GraphError> {
        self.added.get(offset..).ok_or(GraphError::CommitOffset {
            commit: self.id,
            offset,
            len: self.added.len(),
        })
    }

    /// Statements removed after `offset`.
    pub fn removed_since(&self, offset: usize) -> Result<&[Statement], GraphError> {
        self.removed.get(offset..).ok_or(GraphError::CommitOffset {
            commit: self.id,
            offset,
            len: self.removed.len(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Collapse add/remove pairs of the same statement.
    ///
    /// The store only records effective changes, so events on one statement
    /// alternate; the sign of `adds - removes` is its net effect. Order of
    /// first occurrence is kept.
    pub fn net(self) -> Commit {
        let mut balance: HashMap<&Statement, i64> = HashMap::new();
        for statement in &self.added {
            *balance.entry(statement).or_default() += 1;
        }
        for statement in &self.removed {
            *balance.entry(statement).or_default() -= 1;
        }
        let keep = |list: &[Statement], sign: i64| {
            let mut seen = HashSet::new();
            list.iter()
                .filter(|s| balance[s] == sign && seen.insert(*s))
                .cloned()
                .collect::<Vec<_>>()
        };
        let added = keep(&self.added, 1);
        let removed = keep(&self.removed, -1);
        Commit {
            id: self.id,
            message: self.message,
            added,
            removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn commit_slices_tail() {
        let mut commit = Commit::new(1);
        commit.added.push(Statement::new(node(1), node(2), node(3)));
        commit.added.push(Statement::new(node(1), node(2), Object::integer(4)));

        assert_eq!(commit.added_since(0).unwrap().len(), 2);
        assert_eq!(commit.added_since(1).unwrap().len(), 1);
        assert!(commit.added_since(2).unwrap().is_empty());
        assert!(commit.removed_since(0).unwrap().is_empty());
    }

    #[test]
    fn net_drops_transient_statements() {
        let transient = Statement::new(node(1), node(2), Object::integer(1));
        let kept = Statement::new(node(1), node(2), Object::integer(2));
        let gone = Statement::new(node(1), node(2), Object::integer(3));
        let commit = Commit {
            id: 4,
            message: None,
            added: vec![transient.clone(), kept.clone()],
            removed: vec![transient, gone.clone()],
        };
        let net = commit.net();
        assert_eq!(net.added, vec![kept]);
        assert_eq!(net.removed, vec![gone]);
    }

    #[test]
    fn net_keeps_readded_statements_once() {
        let readded = Statement::new(node(1), node(2), Object::integer(1));
        let commit = Commit {
            id: 5,
            message: None,
            added: vec![readded.clone(), readded.clone()],
            removed: vec![readded.clone()],
        };
        let net = commit.net();
        assert_eq!(net.added, vec![readded]);
        assert!(net.removed.is_empty());
    }

    #[test]
    fn commit_offset_past_end_is_error() {
        let commit = Commit::new(3);
        let err = commit.added_since(1).unwrap_err();
        assert!(matches!(
            err,
            GraphError::CommitOffset {
                commit: 3,
                offset: 1,
                len: 0
            }
        ));
    }

    #[test]
    fn object_accessors() {
        assert_eq!(Object::from(node(5)).as_node(), Some(node(5)));
        assert_eq!(Object::string("x").as_str(), Some("x"));
        assert_eq!(Object::integer(3).as_integer(), Some(3));
        assert_eq!(Object::boolean(true).as_bool(), Some(true));
        assert_eq!(Object::integer(3).as_node(), None);
    }

    #[test]
    fn literal_display() {
        assert_eq!(Object::string("abc").to_string(), "'abc'");
        assert_eq!(Object::integer(-2).to_string(), "-2");
        assert_eq!(Object::from(node(9)).to_string(), "node:9");
    }
}

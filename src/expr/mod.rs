//! Expression evaluation for rule bodies.
//!
//! The rule machinery only talks to the [`ExpressionEvaluator`] trait: parse a
//! rule body against its context type, evaluate a syntax tree against one
//! context instance, derive repair suggestions, and release per-evaluation state.
//! [`ArlEvaluator`](eval::ArlEvaluator) is the built-in implementation for a small
//! navigation language:
//!
//! ```text
//! self.requirements.size() > 1
//! self.owner.notEmpty() and not (self.state = 'closed')
//! ```

pub mod eval;
pub mod lexer;
pub mod parser;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::graph::Literal;
use crate::graph::Object;
use crate::graph::store::GraphStore;
use crate::repair::RepairPlan;
use crate::symbol::NodeId;

pub use eval::ArlEvaluator;
pub use parser::{BinaryOp, CollectionOp, Expr, ExprType};

/// A `(node, property)` pair read during an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeElement {
    pub node: NodeId,
    pub property: NodeId,
}

impl ScopeElement {
    pub fn new(node: NodeId, property: NodeId) -> Self {
        Self { node, property }
    }
}

/// A compiled rule body.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxTree {
    pub root: Expr,
    pub context_type: NodeId,
}

impl SyntaxTree {
    /// Whether the rule body yields a boolean.
    pub fn is_boolean(&self) -> bool {
        self.root.static_type() == ExprType::Boolean
    }
}

/// A rule body that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    /// 1-based line, when the failure has a source position.
    pub line: Option<usize>,
    /// 1-based column, when the failure has a source position.
    pub column: Option<usize>,
}

impl ParseError {
    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "{} (line {line}, column {column})", self.message)
            }
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Why [`ExpressionEvaluator::parse`] produced no syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// The rule body is malformed.
    Syntax(ParseError),
    /// The evaluator itself failed; the message is not shown to rule authors.
    Internal(String),
}

/// A runtime value produced by a rule body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    String(String),
    Collection(Vec<Object>),
}

impl Value {
    /// Collapse a single-element collection of a literal into that literal.
    pub fn singleton(self) -> Value {
        match self {
            Value::Collection(items) if items.len() == 1 => match items[0].clone() {
                Object::Literal(literal) => Value::from(&literal),
                Object::Node(_) => Value::Collection(items),
            },
            other => other,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::String(_) => "string",
            Value::Collection(_) => "collection",
        }
    }
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::String(s) => Value::String(s.clone()),
            Literal::Integer(i) => Value::Integer(*i),
            Literal::Boolean(b) => Value::Boolean(*b),
        }
    }
}

/// Everything an evaluator needs to run one rule evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub evaluation: NodeId,
    pub tree: &'a SyntaxTree,
    pub context: NodeId,
    /// The read scope recorded by the last run, possibly from persisted state.
    pub prior_scope: &'a BTreeSet<ScopeElement>,
}

/// Result of one evaluation run plus the read-scope delta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationOutcome {
    pub value: Option<Value>,
    pub error: Option<String>,
    pub added_scope: BTreeSet<ScopeElement>,
    pub removed_scope: BTreeSet<ScopeElement>,
}

/// The expression evaluator seam.
pub trait ExpressionEvaluator: Send {
    /// Compile `text` against `context_type`.
    fn parse(
        &self,
        store: &GraphStore,
        text: &str,
        context_type: NodeId,
    ) -> Result<SyntaxTree, ParseFailure>;

    /// Run a compiled rule body against one context instance.
    ///
    /// The evaluator is authoritative about what it read: the returned delta is
    /// relative to the previous run of the same evaluation.
    fn evaluate(
        &mut self,
        store: &GraphStore,
        request: &EvaluationRequest<'_>,
    ) -> EvaluationOutcome;

    /// Re-derive repair suggestions for an inconsistent evaluation.
    fn repair_plan(
        &self,
        store: &GraphStore,
        request: &EvaluationRequest<'_>,
    ) -> Option<RepairPlan>;

    /// Release evaluator-side state for a deleted evaluation.
    fn release(&mut self, evaluation: NodeId);
}

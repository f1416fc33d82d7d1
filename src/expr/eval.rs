//! Interpreter and repair derivation for the built-in rule language.

use std::collections::{BTreeSet, HashMap};

use crate::graph::store::GraphStore;
use crate::graph::{Literal, Object};
use crate::repair::{AtomicRepair, CompositeKind, RepairOperator, RepairPlan};
use crate::symbol::NodeId;

use super::parser::{self, BinaryOp, CollectionOp, Expr};
use super::{
    EvaluationOutcome, EvaluationRequest, ExpressionEvaluator, ParseError, ParseFailure,
    ScopeElement, SyntaxTree, Value,
};

/// The built-in [`ExpressionEvaluator`].
///
/// Deltas are computed against the caller's prior scope, which is the
/// scope index's view of the evaluation. The last read set of every run is
/// kept for inspection.
#[derive(Debug, Default)]
pub struct ArlEvaluator {
    scopes: HashMap<NodeId, BTreeSet<ScopeElement>>,
}

impl ArlEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The read set of the last run of `evaluation`, if any.
    pub fn scope_of(&self, evaluation: NodeId) -> Option<&BTreeSet<ScopeElement>> {
        self.scopes.get(&evaluation)
    }
}

impl ExpressionEvaluator for ArlEvaluator {
    fn parse(
        &self,
        store: &GraphStore,
        text: &str,
        context_type: NodeId,
    ) -> Result<SyntaxTree, ParseFailure> {
        if !store.is_type(context_type) {
            return Err(ParseFailure::Syntax(ParseError::at(
                format!("context {} is not a type", store.display(context_type)),
                1,
                1,
            )));
        }
        let root = parser::parse(store, text).map_err(ParseFailure::Syntax)?;
        Ok(SyntaxTree { root, context_type })
    }

    fn evaluate(&mut self, store: &GraphStore, request: &EvaluationRequest<'_>) -> EvaluationOutcome {
        let mut interp = Interpreter::new(store, request.context);
        let result = interp.eval(&request.tree.root);
        let reads = interp.reads;

        let previous = request.prior_scope;
        let added_scope = reads.difference(previous).copied().collect();
        let removed_scope = previous.difference(&reads).copied().collect();
        self.scopes.insert(request.evaluation, reads);

        let (value, error) = match result {
            Ok(value) => (Some(value), None),
            Err(message) => (None, Some(message)),
        };
        tracing::trace!(evaluation = %request.evaluation, ?value, ?error, "evaluated rule body");
        EvaluationOutcome {
            value,
            error,
            added_scope,
            removed_scope,
        }
    }

    fn repair_plan(&self, store: &GraphStore, request: &EvaluationRequest<'_>) -> Option<RepairPlan> {
        if !request.tree.is_boolean() {
            return None;
        }
        let mut interp = Interpreter::new(store, request.context);
        interp.derive(&request.tree.root, true)
    }

    fn release(&mut self, evaluation: NodeId) {
        self.scopes.remove(&evaluation);
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

type EvalResult = Result<Value, String>;

struct Interpreter<'a> {
    store: &'a GraphStore,
    context: NodeId,
    reads: BTreeSet<ScopeElement>,
}

impl<'a> Interpreter<'a> {
    fn new(store: &'a GraphStore, context: NodeId) -> Self {
        Self {
            store,
            context,
            reads: BTreeSet::new(),
        }
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::SelfRef => Ok(Value::Collection(vec![Object::Node(self.context)])),
            Expr::Literal(literal) => Ok(Value::from(literal)),
            Expr::Navigate {
                source, property, ..
            } => {
                let items = self.collection(source)?;
                let mut out = Vec::new();
                for item in items {
                    if let Object::Node(node) = item {
                        self.reads.insert(ScopeElement::new(node, *property));
                        out.extend(self.store.objects(node, *property));
                    }
                }
                Ok(Value::Collection(out))
            }
            Expr::Call { target, op } => {
                let items = self.collection(target)?;
                Ok(match op {
                    CollectionOp::Size => Value::Integer(items.len() as i64),
                    CollectionOp::IsEmpty => Value::Boolean(items.is_empty()),
                    CollectionOp::NotEmpty => Value::Boolean(!items.is_empty()),
                })
            }
            Expr::Not(inner) => Ok(Value::Boolean(!self.truth(inner)?)),
            Expr::Binary { op, lhs, rhs } if !op.is_comparison() => {
                // Both sides always run so the read set covers every operand.
                let l = self.truth(lhs);
                let r = self.truth(rhs);
                let (l, r) = (l?, r?);
                Ok(Value::Boolean(match op {
                    BinaryOp::And => l && r,
                    BinaryOp::Or => l || r,
                    _ => !l || r,
                }))
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs);
                let r = self.eval(rhs);
                compare(*op, l?.singleton(), r?.singleton()).map(Value::Boolean)
            }
        }
    }

    fn collection(&mut self, expr: &Expr) -> Result<Vec<Object>, String> {
        match self.eval(expr)? {
            Value::Collection(items) => Ok(items),
            other => Err(format!("expected a collection, found {}", other.kind())),
        }
    }

    fn truth(&mut self, expr: &Expr) -> Result<bool, String> {
        let value = self.eval(expr)?.singleton();
        value
            .as_bool()
            .ok_or_else(|| format!("expected a boolean, found {}", describe(&value)))
    }

    // -----------------------------------------------------------------------
    // Repair derivation
    // -----------------------------------------------------------------------

    /// Changes that would make `expr` evaluate to `desired`, or `None` when it
    /// already does or no change can be suggested.
    fn derive(&mut self, expr: &Expr, desired: bool) -> Option<RepairPlan> {
        if self.truth(expr).ok() == Some(desired) {
            return None;
        }
        match expr {
            Expr::Not(inner) => self.derive(inner, !desired),
            Expr::Binary { op, lhs, rhs } if !op.is_comparison() => {
                // (kind, lhs polarity, rhs polarity) after De Morgan.
                let (kind, lp, rp) = match (op, desired) {
                    (BinaryOp::And, true) => (CompositeKind::And, true, true),
                    (BinaryOp::And, false) => (CompositeKind::Or, false, false),
                    (BinaryOp::Or, true) => (CompositeKind::Or, true, true),
                    (BinaryOp::Or, false) => (CompositeKind::And, false, false),
                    (_, true) => (CompositeKind::Or, false, true),
                    (_, false) => (CompositeKind::And, true, false),
                };
                let children = [self.derive(lhs, lp), self.derive(rhs, rp)]
                    .into_iter()
                    .flatten()
                    .collect();
                RepairPlan::combine(kind, children)
            }
            Expr::Binary { op, lhs, rhs } => {
                let op = if desired { *op } else { op.negated() };
                match (lhs.as_ref(), rhs.as_ref()) {
                    (target, Expr::Literal(literal)) => self.comparison_repair(target, op, literal),
                    (Expr::Literal(literal), target) => {
                        self.comparison_repair(target, op.flipped(), literal)
                    }
                    _ => None,
                }
            }
            Expr::Call {
                target,
                op: CollectionOp::IsEmpty,
            } => self.collection_repair(target, !desired),
            Expr::Call {
                target,
                op: CollectionOp::NotEmpty,
            } => self.collection_repair(target, desired),
            Expr::Navigate { .. } => {
                let restriction = format!("= {desired}");
                self.atomic_on(expr, |subject, predicate| {
                    AtomicRepair::new(RepairOperator::Modify, subject, predicate)
                        .with_value(Object::boolean(desired))
                        .with_restriction(restriction.clone())
                })
            }
            _ => None,
        }
    }

    /// `target op literal` must hold.
    fn comparison_repair(&mut self, target: &Expr, op: BinaryOp, literal: &Literal) -> Option<RepairPlan> {
        match (target, literal) {
            (
                Expr::Call {
                    target: collection,
                    op: CollectionOp::Size,
                },
                Literal::Integer(n),
            ) => {
                let size = self.collection(collection).ok()?.len() as i64;
                let grow = match op {
                    BinaryOp::Gt | BinaryOp::Ge => true,
                    BinaryOp::Lt | BinaryOp::Le => false,
                    BinaryOp::Eq => size < *n,
                    _ => size <= *n,
                };
                let operator = if grow {
                    RepairOperator::Add
                } else {
                    RepairOperator::Remove
                };
                let restriction = format!("size() {} {n}", op.symbol());
                self.atomic_on(collection, |subject, predicate| {
                    AtomicRepair::new(operator, subject, predicate).with_restriction(restriction.clone())
                })
            }
            (Expr::Navigate { .. }, _) => {
                let restriction = format!("{} {literal}", op.symbol());
                self.atomic_on(target, |subject, predicate| {
                    let repair = AtomicRepair::new(RepairOperator::Modify, subject, predicate)
                        .with_restriction(restriction.clone());
                    if op == BinaryOp::Eq {
                        repair.with_value(literal.clone())
                    } else {
                        repair
                    }
                })
            }
            _ => None,
        }
    }

    /// `target` must become non-empty (`grow`) or empty.
    fn collection_repair(&mut self, target: &Expr, grow: bool) -> Option<RepairPlan> {
        let (operator, restriction) = if grow {
            (RepairOperator::Add, "notEmpty()")
        } else {
            (RepairOperator::Remove, "isEmpty()")
        };
        self.atomic_on(target, |subject, predicate| {
            AtomicRepair::new(operator, subject, predicate).with_restriction(restriction)
        })
    }

    /// One atomic repair per source node of the navigation `nav`, OR-combined.
    fn atomic_on(
        &mut self,
        nav: &Expr,
        make: impl Fn(NodeId, NodeId) -> AtomicRepair,
    ) -> Option<RepairPlan> {
        let Expr::Navigate {
            source, property, ..
        } = nav
        else {
            return None;
        };
        let subjects = self.collection(source).ok()?;
        let children = subjects
            .iter()
            .filter_map(Object::as_node)
            .map(|subject| RepairPlan::Atomic(make(subject, *property)))
            .collect();
        RepairPlan::combine(CompositeKind::Or, children)
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Collection(items) if items.is_empty() => "an empty collection".into(),
        Value::Collection(items) => format!("a collection of {}", items.len()),
        other => other.kind().into(),
    }
}

fn compare(op: BinaryOp, lhs: Value, rhs: Value) -> Result<bool, String> {
    use std::cmp::Ordering;

    let ordering: Option<Ordering> = match (&lhs, &rhs) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => {
            return equality(op, a == b, &lhs);
        }
        (Value::Collection(a), Value::Collection(b)) => {
            return equality(op, a == b, &lhs);
        }
        // An absent value equals nothing.
        (Value::Collection(items), _) | (_, Value::Collection(items)) if items.is_empty() => {
            return equality(op, false, &lhs);
        }
        _ => None,
    };
    let ordering = ordering.ok_or_else(|| {
        format!(
            "cannot compare {} with {} using '{}'",
            describe(&lhs),
            describe(&rhs),
            op.symbol()
        )
    })?;
    Ok(match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::Ne => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

fn equality(op: BinaryOp, equal: bool, operand: &Value) -> Result<bool, String> {
    match op {
        BinaryOp::Eq => Ok(equal),
        BinaryOp::Ne => Ok(!equal),
        other => Err(format!(
            "'{}' is not defined on {}",
            other.symbol(),
            describe(operand)
        )),
    }
}

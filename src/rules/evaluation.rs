//! Rule evaluations: one rule definition applied to one context instance.

use std::collections::BTreeSet;

use crate::config::RepairConfig;
use crate::error::{RuleError, RuleGraphResult};
use crate::expr::{EvaluationRequest, ExpressionEvaluator, ScopeElement, Value};
use crate::graph::Object;
use crate::graph::store::GraphStore;
use crate::repair::{RepairDeclarations, RepairTree};
use crate::symbol::NodeId;

use super::RuleResult;
use super::definition::RuleDefinition;
use super::scope::ScopeIndex;

/// Cached state of one `(definition, context)` pairing.
///
/// Persisted as:
///
/// ```text
/// (e core:type rule:Evaluation) (e rule:definition d) (e rule:context i)
/// (e rule:enabled true) (e rule:result bool)? (e rule:error 'text')?
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEvaluation {
    pub id: NodeId,
    pub definition: NodeId,
    pub context: NodeId,
    /// `false` once deleted, or when loaded without an enabled marker.
    pub enabled: bool,
    pub result: Option<bool>,
    pub error: Option<String>,
    /// Read pairs of the last run.
    pub read_scope: BTreeSet<ScopeElement>,
}

impl RuleEvaluation {
    /// Create and persist a fresh evaluation, registering its context entry.
    pub fn create(
        store: &GraphStore,
        scope: &mut ScopeIndex,
        definition: NodeId,
        context: NodeId,
    ) -> RuleResult<RuleEvaluation> {
        let v = store.vocab();
        let id = store.create_typed_node(v.rule_evaluation)?;
        store.add_statement(id, v.definition, definition)?;
        store.add_statement(id, v.context, context)?;
        store.add_statement(id, v.enabled, Object::boolean(true))?;
        scope.record_context(store, context, id)?;
        tracing::debug!(evaluation = %id, rule = %definition, context = %store.display(context), "created evaluation");
        Ok(RuleEvaluation {
            id,
            definition,
            context,
            enabled: true,
            result: None,
            error: None,
            read_scope: BTreeSet::new(),
        })
    }

    /// Reconstruct a persisted evaluation.
    ///
    /// Fails when the node is not an evaluation or its definition or context
    /// cannot be resolved.
    pub fn load(store: &GraphStore, scope: &ScopeIndex, id: NodeId) -> RuleResult<RuleEvaluation> {
        let v = store.vocab();
        if !store.is_instance_of(id, v.rule_evaluation) {
            return Err(RuleError::EvaluationNotFound { node: id.get() });
        }
        let definition = store
            .value(id, v.definition)
            .and_then(|o| o.as_node())
            .filter(|d| store.is_instance_of(*d, v.rule_definition))
            .ok_or(RuleError::DefinitionNotFound { node: id.get() })?;
        let context = store
            .value(id, v.context)
            .and_then(|o| o.as_node())
            .filter(|c| !store.classes_of(*c).is_empty())
            .ok_or(RuleError::ContextNotFound {
                evaluation: id.get(),
            })?;

        Ok(RuleEvaluation {
            id,
            definition,
            context,
            enabled: store.value(id, v.enabled).and_then(|o| o.as_bool()) == Some(true),
            result: store.value(id, v.result).and_then(|o| o.as_bool()),
            error: store
                .value(id, v.error)
                .and_then(|o| o.as_str().map(str::to_owned)),
            read_scope: scope.read_scope(id),
        })
    }

    /// Re-read result and error from the store, e.g. after replication.
    ///
    /// Returns the previously cached result.
    pub fn refresh(&mut self, store: &GraphStore) -> Option<bool> {
        let v = store.vocab();
        let previous = self.result;
        self.result = store.value(self.id, v.result).and_then(|o| o.as_bool());
        self.error = store
            .value(self.id, v.error)
            .and_then(|o| o.as_str().map(str::to_owned));
        self.enabled = store.value(self.id, v.enabled).and_then(|o| o.as_bool()) == Some(true);
        previous
    }

    /// Run the rule body, write result and error back, apply the scope delta,
    /// and rebuild the repair tree.
    ///
    /// Disabled evaluations and errored definitions are left untouched.
    pub fn evaluate(
        &mut self,
        store: &GraphStore,
        scope: &mut ScopeIndex,
        evaluator: &mut dyn ExpressionEvaluator,
        definition: &RuleDefinition,
        repair: &RepairConfig,
    ) -> RuleGraphResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let Some(tree) = definition.syntax_tree.as_ref() else {
            return Ok(());
        };

        let prior_scope = self.read_scope.clone();
        let request = EvaluationRequest {
            evaluation: self.id,
            tree,
            context: self.context,
            prior_scope: &prior_scope,
        };
        let outcome = evaluator.evaluate(store, &request);

        scope.apply_delta(store, self.id, &outcome.added_scope, &outcome.removed_scope)?;
        for e in &outcome.removed_scope {
            self.read_scope.remove(e);
        }
        self.read_scope.extend(outcome.added_scope.iter().copied());

        self.error = outcome.error;
        self.result = match (&outcome.value, &self.error) {
            (Some(Value::Boolean(b)), None) => Some(*b),
            (_, Some(_)) if tree.is_boolean() => Some(false),
            _ => None,
        };
        self.persist_outcome(store)?;

        let mut plan = None;
        if self.result == Some(false) && self.error.is_none() && repair.enabled {
            plan = evaluator.repair_plan(store, &request);
            if repair.require_declaration {
                let declarations = RepairDeclarations::new(store);
                plan = plan.and_then(|p| declarations.prune(p));
            }
        }
        // An identical tree stays in place so re-runs add nothing to the commit.
        let current = RepairTree::load(store, self.id).map(|t| t.to_plan());
        if current != plan {
            RepairTree::remove(store, self.id);
            if let Some(plan) = &plan {
                RepairTree::persist(store, self.id, plan)?;
            }
        }

        tracing::debug!(
            evaluation = %self.id,
            result = ?self.result,
            error = ?self.error,
            reads = self.read_scope.len(),
            "evaluated"
        );
        Ok(())
    }

    fn persist_outcome(&self, store: &GraphStore) -> RuleResult<()> {
        let v = store.vocab();
        match self.result {
            Some(b) => store.set_value(self.id, v.result, Object::boolean(b))?,
            None => {
                store.remove_values(self.id, v.result);
            }
        }
        match &self.error {
            Some(e) => store.set_value(self.id, v.error, Object::string(e.as_str()))?,
            None => {
                store.remove_values(self.id, v.error);
            }
        }
        Ok(())
    }

    /// Drop scope memberships, repair tree, evaluator state, and persisted
    /// statements. The context instance is not touched.
    pub fn delete(
        &mut self,
        store: &GraphStore,
        scope: &mut ScopeIndex,
        evaluator: &mut dyn ExpressionEvaluator,
    ) {
        self.enabled = false;
        scope.remove_evaluation(store, self.id);
        RepairTree::remove(store, self.id);
        evaluator.release(self.id);
        store.remove_node(self.id);
        self.read_scope.clear();
        tracing::debug!(evaluation = %self.id, "deleted evaluation");
    }

    /// Soft-delete: clear the enabled marker, outcome, scope memberships and
    /// repair tree, but keep the node so the pairing can be re-enabled.
    pub fn disable(
        &mut self,
        store: &GraphStore,
        scope: &mut ScopeIndex,
        evaluator: &mut dyn ExpressionEvaluator,
    ) {
        let v = store.vocab();
        self.enabled = false;
        self.result = None;
        self.error = None;
        self.read_scope.clear();
        scope.remove_evaluation(store, self.id);
        RepairTree::remove(store, self.id);
        evaluator.release(self.id);
        store.remove_values(self.id, v.enabled);
        store.remove_values(self.id, v.result);
        store.remove_values(self.id, v.error);
        tracing::debug!(evaluation = %self.id, "disabled evaluation");
    }

    /// Re-enable a disabled evaluation. It has no reads until its next run.
    pub fn enable(&mut self, store: &GraphStore, scope: &mut ScopeIndex) -> RuleResult<()> {
        let v = store.vocab();
        store.set_value(self.id, v.enabled, Object::boolean(true))?;
        scope.record_context(store, self.context, self.id)?;
        self.enabled = true;
        tracing::debug!(evaluation = %self.id, "re-enabled evaluation");
        Ok(())
    }

    /// Number of atomic repairs currently suggested for this evaluation.
    pub fn repair_leaves(&self, store: &GraphStore) -> usize {
        RepairTree::load(store, self.id).map_or(0, |t| t.count_atomic_leaves())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ArlEvaluator;

    struct Fixture {
        store: GraphStore,
        issue: NodeId,
        requirements: NodeId,
        scope: ScopeIndex,
        evaluator: ArlEvaluator,
    }

    fn fixture() -> Fixture {
        let store = GraphStore::new();
        let issue = store.create_type("Issue", None).unwrap();
        let requirements = store.create_property("requirements").unwrap();
        Fixture {
            store,
            issue,
            requirements,
            scope: ScopeIndex::new(),
            evaluator: ArlEvaluator::new(),
        }
    }

    fn rule(f: &Fixture, text: &str) -> RuleDefinition {
        RuleDefinition::builder()
            .context_type(f.issue)
            .expression(text)
            .build(&f.store, &f.evaluator)
            .unwrap()
    }

    #[test]
    fn evaluate_writes_result_scope_and_repair() {
        let mut f = fixture();
        let def = rule(&f, "self.requirements.size() > 1");
        let a = f.store.create_individual("a", f.issue).unwrap();
        let c = f.store.create_individual("c", f.issue).unwrap();
        f.store.add_statement(c, f.requirements, a).unwrap();

        let mut eval = RuleEvaluation::create(&f.store, &mut f.scope, def.id, c).unwrap();
        eval.evaluate(
            &f.store,
            &mut f.scope,
            &mut f.evaluator,
            &def,
            &RepairConfig::default(),
        )
        .unwrap();

        assert_eq!(eval.result, Some(false));
        assert_eq!(
            f.store.value(eval.id, f.store.vocab().result),
            Some(Object::boolean(false))
        );
        assert_eq!(f.scope.lookup(c, f.requirements), [eval.id].into_iter().collect());
        assert_eq!(f.scope.lookup_context_users(c), [eval.id].into_iter().collect());
        assert_eq!(eval.repair_leaves(&f.store), 1);

        // Satisfying the rule clears the repair tree.
        let b = f.store.create_individual("b", f.issue).unwrap();
        f.store.add_statement(c, f.requirements, b).unwrap();
        eval.evaluate(
            &f.store,
            &mut f.scope,
            &mut f.evaluator,
            &def,
            &RepairConfig::default(),
        )
        .unwrap();
        assert_eq!(eval.result, Some(true));
        assert!(RepairTree::load(&f.store, eval.id).is_none());
    }

    #[test]
    fn runtime_error_on_boolean_body_is_inconsistent() {
        let mut f = fixture();
        let state = f.store.create_property("state").unwrap();
        let def = rule(&f, "self.state > 2");
        let a = f.store.create_individual("a", f.issue).unwrap();
        f.store.add_statement(a, state, Object::string("x")).unwrap();

        let mut eval = RuleEvaluation::create(&f.store, &mut f.scope, def.id, a).unwrap();
        eval.evaluate(
            &f.store,
            &mut f.scope,
            &mut f.evaluator,
            &def,
            &RepairConfig::default(),
        )
        .unwrap();
        assert_eq!(eval.result, Some(false));
        assert!(eval.error.is_some());
        assert!(RepairTree::load(&f.store, eval.id).is_none());
    }

    #[test]
    fn non_boolean_body_has_no_result() {
        let mut f = fixture();
        let def = rule(&f, "self.requirements.size()");
        let a = f.store.create_individual("a", f.issue).unwrap();
        let mut eval = RuleEvaluation::create(&f.store, &mut f.scope, def.id, a).unwrap();
        eval.evaluate(
            &f.store,
            &mut f.scope,
            &mut f.evaluator,
            &def,
            &RepairConfig::default(),
        )
        .unwrap();
        assert_eq!(eval.result, None);
        assert_eq!(eval.error, None);
    }

    #[test]
    fn repairs_can_be_disabled() {
        let mut f = fixture();
        let def = rule(&f, "self.requirements.notEmpty()");
        let a = f.store.create_individual("a", f.issue).unwrap();
        let mut eval = RuleEvaluation::create(&f.store, &mut f.scope, def.id, a).unwrap();
        let config = RepairConfig {
            enabled: false,
            ..Default::default()
        };
        eval.evaluate(&f.store, &mut f.scope, &mut f.evaluator, &def, &config)
            .unwrap();
        assert_eq!(eval.result, Some(false));
        assert_eq!(eval.repair_leaves(&f.store), 0);
    }

    #[test]
    fn load_and_lookup_errors() {
        let mut f = fixture();
        let def = rule(&f, "self.requirements.notEmpty()");
        let a = f.store.create_individual("a", f.issue).unwrap();
        let eval = RuleEvaluation::create(&f.store, &mut f.scope, def.id, a).unwrap();

        let loaded = RuleEvaluation::load(&f.store, &f.scope, eval.id).unwrap();
        assert_eq!(loaded, eval);

        assert!(matches!(
            RuleEvaluation::load(&f.store, &f.scope, a),
            Err(RuleError::EvaluationNotFound { .. })
        ));

        // Remove the context instance: the evaluation can no longer be built.
        f.store.remove_node(a);
        assert!(matches!(
            RuleEvaluation::load(&f.store, &f.scope, eval.id),
            Err(RuleError::ContextNotFound { .. })
        ));
    }

    #[test]
    fn missing_enabled_marker_loads_disabled() {
        let mut f = fixture();
        let def = rule(&f, "true");
        let a = f.store.create_individual("a", f.issue).unwrap();
        let eval = RuleEvaluation::create(&f.store, &mut f.scope, def.id, a).unwrap();
        f.store.remove_values(eval.id, f.store.vocab().enabled);
        assert!(!RuleEvaluation::load(&f.store, &f.scope, eval.id).unwrap().enabled);
    }

    #[test]
    fn delete_clears_state_but_keeps_context() {
        let mut f = fixture();
        let def = rule(&f, "self.requirements.notEmpty()");
        let a = f.store.create_individual("a", f.issue).unwrap();
        let mut eval = RuleEvaluation::create(&f.store, &mut f.scope, def.id, a).unwrap();
        eval.evaluate(
            &f.store,
            &mut f.scope,
            &mut f.evaluator,
            &def,
            &RepairConfig::default(),
        )
        .unwrap();

        eval.delete(&f.store, &mut f.scope, &mut f.evaluator);
        assert!(!eval.enabled);
        assert!(f.scope.is_empty());
        assert!(f.store.list_properties(eval.id).is_empty());
        assert!(f.evaluator.scope_of(eval.id).is_none());
        assert_eq!(f.store.classes_of(a), vec![f.issue]);
    }

    #[test]
    fn disable_keeps_the_node_and_enable_restores_the_context() {
        let mut f = fixture();
        let def = rule(&f, "self.requirements.notEmpty()");
        let a = f.store.create_individual("a", f.issue).unwrap();
        let mut eval = RuleEvaluation::create(&f.store, &mut f.scope, def.id, a).unwrap();
        eval.evaluate(
            &f.store,
            &mut f.scope,
            &mut f.evaluator,
            &def,
            &RepairConfig::default(),
        )
        .unwrap();
        assert_eq!(eval.repair_leaves(&f.store), 1);

        eval.disable(&f.store, &mut f.scope, &mut f.evaluator);
        let v = f.store.vocab();
        assert!(f.scope.is_empty());
        assert!(f.store.is_instance_of(eval.id, v.rule_evaluation));
        assert_eq!(f.store.value(eval.id, v.enabled), None);
        assert_eq!(f.store.value(eval.id, v.result), None);
        assert_eq!(eval.repair_leaves(&f.store), 0);
        let loaded = RuleEvaluation::load(&f.store, &f.scope, eval.id).unwrap();
        assert!(!loaded.enabled);

        // Disabled evaluations ignore evaluate.
        eval.evaluate(
            &f.store,
            &mut f.scope,
            &mut f.evaluator,
            &def,
            &RepairConfig::default(),
        )
        .unwrap();
        assert_eq!(eval.result, None);

        eval.enable(&f.store, &mut f.scope).unwrap();
        assert_eq!(f.scope.lookup_context_users(a), [eval.id].into_iter().collect());
        eval.evaluate(
            &f.store,
            &mut f.scope,
            &mut f.evaluator,
            &def,
            &RepairConfig::default(),
        )
        .unwrap();
        assert_eq!(eval.result, Some(false));
        assert_eq!(f.scope.lookup(a, f.requirements), [eval.id].into_iter().collect());
    }
}

//! The rule repository: in-memory authority over definitions and evaluations.
//!
//! Both maps are caches over the persisted statements. They are filled
//! explicitly by [`RuleRepository::load_from_model`] or lazily through the
//! `get_or_load_*` methods. Every `on_*` method answers one question: given this
//! graph mutation, which evaluations must run, be created, or be destroyed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::RuleGraphConfig;
use crate::error::{RuleError, RuleGraphResult};
use crate::expr::ExpressionEvaluator;
use crate::graph::store::GraphStore;
use crate::repair::RepairTree;
use crate::symbol::NodeId;

use super::RuleResult;
use super::definition::{RuleDefinition, RuleDefinitionBuilder};
use super::evaluation::RuleEvaluation;
use super::inspector::RuleRepositoryInspector;
use super::scope::ScopeIndex;

/// Definitions, evaluations, and the scope index of one store.
pub struct RuleRepository {
    config: RuleGraphConfig,
    evaluator: Box<dyn ExpressionEvaluator>,
    definitions: BTreeMap<NodeId, RuleDefinition>,
    evaluations: BTreeMap<NodeId, RuleEvaluation>,
    /// (definition, context) → enabled evaluation.
    pairs: HashMap<(NodeId, NodeId), NodeId>,
    scope: ScopeIndex,
}

impl RuleRepository {
    /// An empty repository; nothing is loaded from the store.
    pub fn new(config: RuleGraphConfig, evaluator: Box<dyn ExpressionEvaluator>) -> Self {
        Self {
            config,
            evaluator,
            definitions: BTreeMap::new(),
            evaluations: BTreeMap::new(),
            pairs: HashMap::new(),
            scope: ScopeIndex::new(),
        }
    }

    /// Rebuild definitions, evaluations, and the scope index from persisted
    /// statements. Objects that fail to load are skipped with a warning.
    pub fn load_from_model(
        store: &GraphStore,
        config: RuleGraphConfig,
        evaluator: Box<dyn ExpressionEvaluator>,
    ) -> Self {
        let mut repo = Self::new(config, evaluator);
        repo.scope = ScopeIndex::load_from_model(store);
        let v = store.vocab();

        for id in store.instances_of(v.rule_definition) {
            match RuleDefinition::load(store, repo.evaluator.as_ref(), id) {
                Ok(def) => {
                    repo.definitions.insert(id, def);
                }
                Err(e) => tracing::warn!(rule = %id, error = %e, "skipping rule definition"),
            }
        }
        for id in store.instances_of(v.rule_evaluation) {
            match RuleEvaluation::load(store, &repo.scope, id) {
                Ok(eval) => repo.register(eval),
                Err(e) => tracing::warn!(evaluation = %id, error = %e, "skipping evaluation"),
            }
        }
        tracing::info!(
            definitions = repo.definitions.len(),
            evaluations = repo.evaluations.len(),
            scope_entries = repo.scope.len(),
            "loaded rule repository"
        );
        repo
    }

    fn register(&mut self, eval: RuleEvaluation) {
        if eval.enabled {
            self.pairs.insert((eval.definition, eval.context), eval.id);
        }
        self.evaluations.insert(eval.id, eval);
    }

    pub fn config(&self) -> &RuleGraphConfig {
        &self.config
    }

    pub fn scope(&self) -> &ScopeIndex {
        &self.scope
    }

    pub fn inspector(&self) -> RuleRepositoryInspector<'_> {
        RuleRepositoryInspector::new(self)
    }

    // -----------------------------------------------------------------------
    // Cache access
    // -----------------------------------------------------------------------

    pub fn definition(&self, id: NodeId) -> Option<&RuleDefinition> {
        self.definitions.get(&id)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.definitions.values()
    }

    pub fn evaluation(&self, id: NodeId) -> Option<&RuleEvaluation> {
        self.evaluations.get(&id)
    }

    pub fn evaluations(&self) -> impl Iterator<Item = &RuleEvaluation> {
        self.evaluations.values()
    }

    /// The enabled evaluation of `definition` on `context`, if cached.
    pub fn evaluation_for(&self, definition: NodeId, context: NodeId) -> Option<&RuleEvaluation> {
        self.pairs
            .get(&(definition, context))
            .and_then(|id| self.evaluations.get(id))
    }

    /// Cached evaluations of `definition`, in id order, including
    /// soft-deleted ones.
    pub fn evaluations_of(&self, definition: NodeId) -> Vec<NodeId> {
        self.evaluations
            .values()
            .filter(|e| e.definition == definition)
            .map(|e| e.id)
            .collect()
    }

    pub fn is_cached(&self, evaluation: NodeId) -> bool {
        self.evaluations.contains_key(&evaluation)
    }

    pub fn get_or_load_definition(
        &mut self,
        store: &GraphStore,
        id: NodeId,
    ) -> RuleResult<&RuleDefinition> {
        if !self.definitions.contains_key(&id) {
            let def = RuleDefinition::load(store, self.evaluator.as_ref(), id)?;
            self.definitions.insert(id, def);
        }
        self.definitions
            .get(&id)
            .ok_or(RuleError::DefinitionNotFound { node: id.get() })
    }

    pub fn get_or_load_evaluation(
        &mut self,
        store: &GraphStore,
        id: NodeId,
    ) -> RuleResult<&mut RuleEvaluation> {
        if !self.evaluations.contains_key(&id) {
            let eval = RuleEvaluation::load(store, &self.scope, id)?;
            tracing::debug!(evaluation = %id, "loaded evaluation on demand");
            self.register(eval);
        }
        self.evaluations
            .get_mut(&id)
            .ok_or(RuleError::EvaluationNotFound { node: id.get() })
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Persist and cache a new definition. Activation happens when the commit
    /// carrying it is processed, or through [`on_definition_created`](Self::on_definition_created).
    pub fn define(
        &mut self,
        store: &GraphStore,
        builder: RuleDefinitionBuilder,
    ) -> RuleResult<NodeId> {
        let def = builder.build(store, self.evaluator.as_ref())?;
        let id = def.id;
        tracing::info!(rule = %id, errored = def.is_errored(), "defined rule");
        self.definitions.insert(id, def);
        Ok(id)
    }

    /// Activate a new definition: one evaluation per instance of its context
    /// type. Errored definitions activate nothing.
    pub fn on_definition_created(
        &mut self,
        store: &GraphStore,
        definition: NodeId,
    ) -> RuleGraphResult<BTreeSet<NodeId>> {
        self.get_or_load_definition(store, definition)?;
        self.activate(store, definition)
    }

    fn activate(&mut self, store: &GraphStore, definition: NodeId) -> RuleGraphResult<BTreeSet<NodeId>> {
        let Some(def) = self.definitions.get(&definition) else {
            return Ok(BTreeSet::new());
        };
        if def.is_errored() {
            return Ok(BTreeSet::new());
        }
        let context_type = def.context_type;
        let mut activated = BTreeSet::new();
        for instance in store.instances_of(context_type) {
            activated.insert(self.ensure_evaluation(store, definition, instance)?);
        }
        tracing::info!(
            rule = %definition,
            context_type = %store.display(context_type),
            evaluations = activated.len(),
            "activated rule"
        );
        Ok(activated)
    }

    /// Find or create the enabled evaluation of `(definition, instance)`.
    fn ensure_evaluation(
        &mut self,
        store: &GraphStore,
        definition: NodeId,
        instance: NodeId,
    ) -> RuleGraphResult<NodeId> {
        if let Some(&id) = self.pairs.get(&(definition, instance)) {
            return Ok(id);
        }
        // A persisted pairing, enabled or soft-deleted, is reused.
        let v = store.vocab();
        let persisted: Vec<NodeId> = store
            .subjects(v.context, &instance.into())
            .into_iter()
            .filter(|e| store.contains(*e, v.definition, &definition.into()))
            .collect();
        for id in persisted {
            if !self.evaluations.contains_key(&id) {
                match RuleEvaluation::load(store, &self.scope, id) {
                    Ok(eval) => self.evaluations.insert(id, eval),
                    Err(_) => continue,
                };
            }
            let Some(eval) = self.evaluations.get_mut(&id) else {
                continue;
            };
            if !eval.enabled {
                eval.enable(store, &mut self.scope)?;
            }
            self.pairs.insert((definition, instance), id);
            return Ok(id);
        }
        let eval = RuleEvaluation::create(store, &mut self.scope, definition, instance)?;
        let id = eval.id;
        self.register(eval);
        Ok(id)
    }

    /// Delete a definition and all of its evaluations.
    ///
    /// Returns the deleted evaluations.
    pub fn remove_definition(
        &mut self,
        store: &GraphStore,
        definition: NodeId,
    ) -> RuleGraphResult<BTreeSet<NodeId>> {
        let deleted = self.purge(store, definition);
        self.definitions.remove(&definition);
        store.remove_node(definition);
        tracing::info!(rule = %definition, evaluations = deleted.len(), "removed rule");
        Ok(deleted)
    }

    /// Every evaluation of `definition`, cached or only persisted.
    fn all_evaluations_of(&self, store: &GraphStore, definition: NodeId) -> BTreeSet<NodeId> {
        let v = store.vocab();
        let mut all: BTreeSet<NodeId> = self.evaluations_of(definition).into_iter().collect();
        all.extend(
            store
                .subjects(v.definition, &definition.into())
                .into_iter()
                .filter(|e| store.is_instance_of(*e, v.rule_evaluation)),
        );
        all
    }

    /// Hard-delete every evaluation of `definition`.
    fn purge(&mut self, store: &GraphStore, definition: NodeId) -> BTreeSet<NodeId> {
        let doomed = self.all_evaluations_of(store, definition);
        for &id in &doomed {
            self.delete_evaluation(store, id);
        }
        doomed
    }

    /// Soft-delete every enabled evaluation of `definition`.
    ///
    /// Returns the evaluations that were disabled.
    fn deactivate(&mut self, store: &GraphStore, definition: NodeId) -> RuleGraphResult<BTreeSet<NodeId>> {
        let mut disabled = BTreeSet::new();
        for id in self.all_evaluations_of(store, definition) {
            let eval = match self.get_or_load_evaluation(store, id) {
                Ok(eval) => eval,
                Err(e) => {
                    tracing::warn!(evaluation = %id, error = %e, "unloadable evaluation deleted");
                    self.delete_evaluation(store, id);
                    continue;
                }
            };
            if !eval.enabled {
                continue;
            }
            let pair = (eval.definition, eval.context);
            let Self {
                evaluations,
                evaluator,
                scope,
                pairs,
                ..
            } = self;
            if let Some(eval) = evaluations.get_mut(&id) {
                eval.disable(store, scope, evaluator.as_mut());
            }
            if pairs.get(&pair) == Some(&id) {
                pairs.remove(&pair);
            }
            disabled.insert(id);
        }
        tracing::info!(rule = %definition, evaluations = disabled.len(), "deactivated rule");
        Ok(disabled)
    }

    /// Replace the body of `definition`.
    ///
    /// Errored bodies leave existing evaluations untouched and return nothing;
    /// otherwise returns one evaluation per instance of the context type.
    pub fn set_expression(
        &mut self,
        store: &GraphStore,
        definition: NodeId,
        expression: &str,
    ) -> RuleGraphResult<BTreeSet<NodeId>> {
        self.get_or_load_definition(store, definition)?;
        let Self {
            definitions,
            evaluator,
            ..
        } = self;
        let def = definitions
            .get_mut(&definition)
            .ok_or(RuleError::DefinitionNotFound {
                node: definition.get(),
            })?;
        def.set_expression(store, evaluator.as_ref(), expression)?;
        if def.is_errored() {
            return Ok(BTreeSet::new());
        }
        self.activate(store, definition)
    }

    /// Rebind `definition` to another context type.
    ///
    /// Evaluations of the old type are soft-deleted; only the newly activated
    /// set is returned.
    pub fn set_context_type(
        &mut self,
        store: &GraphStore,
        definition: NodeId,
        context_type: NodeId,
    ) -> RuleGraphResult<BTreeSet<NodeId>> {
        self.get_or_load_definition(store, definition)?;
        self.deactivate(store, definition)?;
        let Self {
            definitions,
            evaluator,
            ..
        } = self;
        let def = definitions
            .get_mut(&definition)
            .ok_or(RuleError::DefinitionNotFound {
                node: definition.get(),
            })?;
        def.set_context_type(store, evaluator.as_ref(), context_type)?;
        self.activate(store, definition)
    }

    /// A definition's expression or context type changed in the store.
    ///
    /// Re-reads the definition and applies the same policy as
    /// [`set_expression`](Self::set_expression) and
    /// [`set_context_type`](Self::set_context_type).
    pub fn on_definition_edited(
        &mut self,
        store: &GraphStore,
        definition: NodeId,
    ) -> RuleGraphResult<BTreeSet<NodeId>> {
        let fresh = RuleDefinition::load(store, self.evaluator.as_ref(), definition)?;
        let old_context = self.definitions.get(&definition).map(|d| d.context_type);
        let errored = fresh.is_errored();
        let context_changed = old_context.is_some_and(|c| c != fresh.context_type);
        self.definitions.insert(definition, fresh);
        if context_changed {
            self.deactivate(store, definition)?;
        }
        if errored {
            return Ok(BTreeSet::new());
        }
        self.activate(store, definition)
    }

    /// Refresh the cached copy of a definition without touching evaluations.
    pub fn reload_definition(&mut self, store: &GraphStore, definition: NodeId) -> RuleResult<()> {
        let fresh = RuleDefinition::load(store, self.evaluator.as_ref(), definition)?;
        self.definitions.insert(definition, fresh);
        Ok(())
    }

    /// Drop a definition and its evaluations from the caches only.
    pub fn forget_definition(&mut self, definition: NodeId) {
        self.definitions.remove(&definition);
        for id in self.evaluations_of(definition) {
            self.forget_evaluation(id);
        }
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// An instance appeared, or gained a type.
    ///
    /// Returns evaluations already scoped to it plus evaluations of every
    /// definition whose context type it now matches.
    pub fn on_instance_created(
        &mut self,
        store: &GraphStore,
        instance: NodeId,
    ) -> RuleGraphResult<BTreeSet<NodeId>> {
        let mut affected = self.loaded(store, self.scope.users_of_node(instance));
        let matching: Vec<NodeId> = self
            .definitions
            .values()
            .filter(|d| !d.is_errored() && store.is_instance_of(instance, d.context_type))
            .map(|d| d.id)
            .collect();
        for definition in matching {
            affected.insert(self.ensure_evaluation(store, definition, instance)?);
        }
        Ok(affected)
    }

    /// Evaluations that read `(subject, predicate)`.
    pub fn affected_by_change(
        &mut self,
        store: &GraphStore,
        subject: NodeId,
        predicate: NodeId,
    ) -> BTreeSet<NodeId> {
        let users = self.scope.lookup(subject, predicate);
        self.loaded(store, users)
    }

    /// An instance lost its last type. Its evaluations are deleted and every
    /// scope entry on it is dropped.
    ///
    /// Returns the deleted evaluations.
    pub fn on_instance_removed(&mut self, store: &GraphStore, instance: NodeId) -> BTreeSet<NodeId> {
        let mut doomed = self.scope.lookup_context_users(instance);
        // Soft-deleted evaluations have no context entry.
        doomed.extend(
            self.evaluations
                .values()
                .filter(|e| !e.enabled && e.context == instance)
                .map(|e| e.id),
        );
        for &id in &doomed {
            self.delete_evaluation(store, id);
        }
        let readers = self.scope.drop_all(store, instance);
        for id in readers {
            if let Some(eval) = self.evaluations.get_mut(&id) {
                eval.read_scope.retain(|e| e.node != instance);
            }
        }
        tracing::debug!(instance = %instance, deleted = doomed.len(), "instance removed");
        doomed
    }

    /// An instance lost a type but keeps others: re-run everything scoped to it.
    pub fn on_instance_retyped(&mut self, store: &GraphStore, instance: NodeId) -> BTreeSet<NodeId> {
        let users = self.scope.users_of_node(instance);
        self.loaded(store, users)
    }

    /// Keep the ids that are cached or loadable; log the rest.
    fn loaded(&mut self, store: &GraphStore, ids: BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        ids.into_iter()
            .filter(|&id| match self.get_or_load_evaluation(store, id) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(evaluation = %id, error = %e, "scoped evaluation cannot be loaded");
                    false
                }
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Evaluations
    // -----------------------------------------------------------------------

    /// Run one evaluation.
    pub fn evaluate(&mut self, store: &GraphStore, evaluation: NodeId) -> RuleGraphResult<()> {
        let definition = self.get_or_load_evaluation(store, evaluation)?.definition;
        self.get_or_load_definition(store, definition)?;
        let Self {
            config,
            evaluator,
            definitions,
            evaluations,
            scope,
            ..
        } = self;
        let (Some(def), Some(eval)) = (definitions.get(&definition), evaluations.get_mut(&evaluation))
        else {
            return Ok(());
        };
        eval.evaluate(store, scope, evaluator.as_mut(), def, &config.repair)
    }

    /// Delete an evaluation and everything it persisted.
    pub fn delete_evaluation(&mut self, store: &GraphStore, evaluation: NodeId) {
        let cached = match self.evaluations.remove(&evaluation) {
            Some(eval) => Some(eval),
            None => RuleEvaluation::load(store, &self.scope, evaluation).ok(),
        };
        match cached {
            Some(mut eval) => {
                if self.pairs.get(&(eval.definition, eval.context)) == Some(&evaluation) {
                    self.pairs.remove(&(eval.definition, eval.context));
                }
                eval.delete(store, &mut self.scope, self.evaluator.as_mut());
            }
            None => {
                // Unloadable leftovers still get their persisted state removed.
                self.scope.remove_evaluation(store, evaluation);
                RepairTree::remove(store, evaluation);
                self.evaluator.release(evaluation);
                store.remove_node(evaluation);
            }
        }
    }

    /// An evaluation's marker vanished from the store: drop it from the caches.
    pub fn forget_evaluation(&mut self, evaluation: NodeId) {
        if let Some(eval) = self.evaluations.remove(&evaluation) {
            if self.pairs.get(&(eval.definition, eval.context)) == Some(&evaluation) {
                self.pairs.remove(&(eval.definition, eval.context));
            }
            self.evaluator.release(evaluation);
        }
    }

    /// An evaluation's marker was removed by someone else: drop it from the
    /// caches and release the scope parts it still holds.
    pub fn on_evaluation_removed(&mut self, store: &GraphStore, evaluation: NodeId) {
        self.forget_evaluation(evaluation);
        self.scope.remove_evaluation(store, evaluation);
    }

    /// Re-read the enabled marker of a cached evaluation, e.g. after
    /// replication, and update the pairing table to match.
    pub fn sync_enabled(&mut self, store: &GraphStore, evaluation: NodeId) {
        let Some(eval) = self.evaluations.get_mut(&evaluation) else {
            return;
        };
        let v = store.vocab();
        eval.enabled = store.value(evaluation, v.enabled).and_then(|o| o.as_bool()) == Some(true);
        let pair = (eval.definition, eval.context);
        if eval.enabled {
            self.pairs.insert(pair, evaluation);
        } else if self.pairs.get(&pair) == Some(&evaluation) {
            self.pairs.remove(&pair);
        }
    }

    /// Mirror the persisted scope of `evaluation` into the index.
    pub fn resync_scope(&mut self, store: &GraphStore, evaluation: NodeId) {
        self.scope.resync_evaluation(store, evaluation);
        if let Some(eval) = self.evaluations.get_mut(&evaluation) {
            eval.read_scope = self.scope.read_scope(evaluation);
        }
    }
}

impl std::fmt::Debug for RuleRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRepository")
            .field("definitions", &self.definitions.len())
            .field("evaluations", &self.evaluations.len())
            .field("scope_entries", &self.scope.len())
            .finish()
    }
}

//! The passive observer: keeps a replica's caches in step with replicated
//! commits and reports what upstream re-evaluated.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::RuleGraphResult;
use crate::graph::Commit;
use crate::graph::store::GraphStore;
use crate::rules::RuleRepository;
use crate::symbol::NodeId;

use super::{ClassifiedBatch, CommitCursor};

/// Per-evaluation summary of one handled commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationMetadata {
    pub evaluation: NodeId,
    pub definition: NodeId,
    pub context: NodeId,
    pub result: Option<bool>,
    pub previous_result: Option<bool>,
    pub has_evaluation_outcome_changed: bool,
    /// Atomic repairs currently suggested for the evaluation.
    pub repair_leaves: usize,
}

/// Notified after the passive observer has handled a commit.
pub trait RuleEvaluationListener: Send {
    fn signal_rule_evaluation_finished(&mut self, metadata: &[IterationMetadata]);
}

/// Replica-side commit handler. Never evaluates and never writes to the store.
#[derive(Default)]
pub struct PassiveTrigger {
    cursor: CommitCursor,
    listeners: Vec<Box<dyn RuleEvaluationListener>>,
}

impl PassiveTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: Box<dyn RuleEvaluationListener>) {
        self.listeners.push(listener);
    }

    /// Handle a whole replicated commit.
    pub fn handle(
        &mut self,
        store: &GraphStore,
        repo: &mut RuleRepository,
        commit: &Commit,
    ) -> RuleGraphResult<Vec<IterationMetadata>> {
        self.handle_from(store, repo, commit, 0, 0)
    }

    /// Handle the statements of `commit` past the given offsets.
    pub fn handle_from(
        &mut self,
        store: &GraphStore,
        repo: &mut RuleRepository,
        commit: &Commit,
        added_offset: usize,
        removed_offset: usize,
    ) -> RuleGraphResult<Vec<IterationMetadata>> {
        let removed = commit.removed_since(removed_offset)?;
        let added = commit.added_since(added_offset)?;
        let batch = ClassifiedBatch::build(store, removed, added);
        let cached_before: BTreeSet<NodeId> = repo.evaluations().map(|e| e.id).collect();

        for &definition in &batch.definitions_removed {
            repo.forget_definition(definition);
        }
        for &evaluation in &batch.evaluations_removed {
            repo.forget_evaluation(evaluation);
        }
        for &evaluation in &batch.evaluations_toggled {
            repo.sync_enabled(store, evaluation);
        }
        for &definition in batch.definitions_created.iter().chain(&batch.definitions_edited) {
            if let Err(e) = repo.reload_definition(store, definition) {
                tracing::warn!(rule = %definition, error = %e, "replicated rule does not load");
            }
        }

        // Triggered sets are computed against the scope as it was before this
        // commit; memberships are resynced afterwards.
        let mut triggered = BTreeSet::new();
        for &evaluation in &batch.evaluations_created {
            match repo.get_or_load_evaluation(store, evaluation) {
                Ok(_) => {
                    triggered.insert(evaluation);
                }
                Err(e) => tracing::warn!(evaluation = %evaluation, error = %e, "replicated evaluation does not load"),
            }
        }
        for &instance in batch.instances_created.iter().chain(&batch.instances_retyped) {
            triggered.extend(repo.on_instance_retyped(store, instance));
        }
        for &(subject, predicate) in &batch.changes {
            triggered.extend(repo.affected_by_change(store, subject, predicate));
        }
        triggered.extend(batch.outcomes_changed.iter().copied());

        for &evaluation in &batch.scope_usage {
            repo.resync_scope(store, evaluation);
        }

        let metadata: Vec<IterationMetadata> = triggered
            .into_iter()
            .filter(|e| !batch.evaluations_removed.contains(e))
            .filter_map(|id| {
                let was_cached = cached_before.contains(&id);
                let eval = match repo.get_or_load_evaluation(store, id) {
                    Ok(eval) => eval,
                    Err(e) => {
                        tracing::warn!(evaluation = %id, error = %e, "triggered evaluation does not load");
                        return None;
                    }
                };
                let refreshed = eval.refresh(store);
                if !eval.enabled {
                    return None;
                }
                let previous_result = if was_cached { refreshed } else { None };
                Some(IterationMetadata {
                    evaluation: id,
                    definition: eval.definition,
                    context: eval.context,
                    result: eval.result,
                    previous_result,
                    has_evaluation_outcome_changed: eval.result != previous_result,
                    repair_leaves: eval.repair_leaves(store),
                })
            })
            .collect();

        tracing::debug!(
            commit = commit.id,
            triggered = metadata.len(),
            "handled replicated commit"
        );
        if !metadata.is_empty() {
            for listener in &mut self.listeners {
                listener.signal_rule_evaluation_finished(&metadata);
            }
        }
        Ok(metadata)
    }

    /// Handle whatever part of the store's pending commit is new.
    pub fn handle_pending(
        &mut self,
        store: &GraphStore,
        repo: &mut RuleRepository,
    ) -> RuleGraphResult<Vec<IterationMetadata>> {
        let commit = store.pending();
        if !self.cursor.has_unseen(&commit) {
            return Ok(Vec::new());
        }
        let (added, removed) = self.cursor.offsets(commit.id);
        let metadata = self.handle_from(store, repo, &commit, added, removed)?;
        self.cursor.mark(&commit);
        Ok(metadata)
    }

    /// Replay an upstream commit into the replica and handle it.
    pub fn replicate(
        &mut self,
        store: &GraphStore,
        repo: &mut RuleRepository,
        commit: &Commit,
    ) -> RuleGraphResult<Vec<IterationMetadata>> {
        store.apply(commit)?;
        self.handle(store, repo, commit)
    }
}

impl std::fmt::Debug for PassiveTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassiveTrigger")
            .field("cursor", &self.cursor)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::config::RuleGraphConfig;
    use crate::expr::ArlEvaluator;
    use crate::rules::RuleDefinition;
    use crate::trigger::ActiveTrigger;

    struct Recorder(Arc<Mutex<Vec<Vec<IterationMetadata>>>>);

    impl RuleEvaluationListener for Recorder {
        fn signal_rule_evaluation_finished(&mut self, metadata: &[IterationMetadata]) {
            self.0.lock().unwrap().push(metadata.to_vec());
        }
    }

    fn repo() -> RuleRepository {
        RuleRepository::new(RuleGraphConfig::default(), Box::new(ArlEvaluator::new()))
    }

    #[test]
    fn replica_follows_upstream_without_writing() {
        let upstream = GraphStore::new();
        let issue = upstream.create_type("Issue", None).unwrap();
        let requirements = upstream.create_property("requirements").unwrap();
        let a = upstream.create_individual("a", issue).unwrap();
        upstream.commit("schema");
        let replica = upstream.fork();

        let mut up_repo = repo();
        let mut active = ActiveTrigger::new(16);
        let rule = up_repo
            .define(
                &upstream,
                RuleDefinition::builder()
                    .context_type(issue)
                    .expression("self.requirements.notEmpty()"),
            )
            .unwrap();
        let (first, _) = active.commit(&upstream, &mut up_repo, "rule").unwrap();

        let mut replica_repo = repo();
        let mut passive = PassiveTrigger::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        passive.add_listener(Box::new(Recorder(seen.clone())));

        let metadata = passive.replicate(&replica, &mut replica_repo, &first).unwrap();
        let eval = up_repo.evaluation_for(rule, a).unwrap().id;
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].evaluation, eval);
        assert_eq!(metadata[0].result, Some(false));
        assert_eq!(metadata[0].previous_result, None);
        assert!(metadata[0].has_evaluation_outcome_changed);
        assert_eq!(metadata[0].repair_leaves, 1);
        assert_eq!(replica_repo.scope().entries(), up_repo.scope().entries());

        upstream.add_statement(a, requirements, a).unwrap();
        let (second, _) = active.commit(&upstream, &mut up_repo, "link").unwrap();
        let metadata = passive.replicate(&replica, &mut replica_repo, &second).unwrap();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].previous_result, Some(false));
        assert_eq!(metadata[0].result, Some(true));
        assert_eq!(metadata[0].repair_leaves, 0);

        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(replica.all_statements(), upstream.all_statements());
        // The replica wrote nothing of its own.
        let pending = replica.pending();
        assert_eq!(pending.added.len(), first.added.len() + second.added.len());
    }

    #[test]
    fn unchanged_outcome_is_reported_as_such() {
        let upstream = GraphStore::new();
        let issue = upstream.create_type("Issue", None).unwrap();
        let state = upstream.create_property("state").unwrap();
        let a = upstream.create_individual("a", issue).unwrap();
        upstream
            .add_statement(a, state, crate::graph::Object::string("open"))
            .unwrap();
        let replica = upstream.fork();

        let mut up_repo = repo();
        let mut active = ActiveTrigger::new(16);
        up_repo
            .define(
                &upstream,
                RuleDefinition::builder()
                    .context_type(issue)
                    .expression("self.state.notEmpty()"),
            )
            .unwrap();
        let (first, _) = active.commit(&upstream, &mut up_repo, "rule").unwrap();
        let mut replica_repo = repo();
        let mut passive = PassiveTrigger::new();
        passive.replicate(&replica, &mut replica_repo, &first).unwrap();

        upstream
            .set_value(a, state, crate::graph::Object::string("closed"))
            .unwrap();
        let (second, _) = active.commit(&upstream, &mut up_repo, "close").unwrap();
        let metadata = passive.replicate(&replica, &mut replica_repo, &second).unwrap();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].result, Some(true));
        assert!(!metadata[0].has_evaluation_outcome_changed);
    }
}

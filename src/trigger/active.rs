//! The active observer: evaluates affected rules inside the commit.

use std::collections::BTreeSet;

use crate::error::RuleGraphResult;
use crate::graph::Commit;
use crate::graph::store::GraphStore;
use crate::rules::RuleRepository;
use crate::symbol::NodeId;

use super::{ClassifiedBatch, CommitCursor};

/// What one or more passes over a commit did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub evaluated: BTreeSet<NodeId>,
    pub deleted: BTreeSet<NodeId>,
    pub passes: usize,
}

impl TriggerReport {
    fn merge(&mut self, other: TriggerReport) {
        self.deleted.extend(other.deleted);
        self.evaluated.extend(other.evaluated);
        self.evaluated.retain(|e| !self.deleted.contains(e));
        self.passes += other.passes;
    }
}

/// Runs rule evaluations for the statements of a commit.
///
/// Evaluations write their results back into the same commit. Those writes
/// only use bookkeeping predicates and types, so the next pass over the
/// grown commit finds nothing new to do.
#[derive(Debug, Default)]
pub struct ActiveTrigger {
    cursor: CommitCursor,
    max_passes: usize,
}

impl ActiveTrigger {
    pub fn new(max_passes: usize) -> Self {
        Self {
            cursor: CommitCursor::new(),
            max_passes: max_passes.max(1),
        }
    }

    /// Handle a whole commit.
    pub fn handle(
        &mut self,
        store: &GraphStore,
        repo: &mut RuleRepository,
        commit: &Commit,
    ) -> RuleGraphResult<TriggerReport> {
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
    ) -> RuleGraphResult<TriggerReport> {
        let removed = commit.removed_since(removed_offset)?;
        let added = commit.added_since(added_offset)?;
        let batch = ClassifiedBatch::build(store, removed, added);
        let work = Self::worklist(store, repo, &batch)?;

        for &evaluation in &work.evaluated {
            repo.evaluate(store, evaluation)?;
        }
        tracing::debug!(
            commit = commit.id,
            removed = removed.len(),
            added = added.len(),
            evaluated = work.evaluated.len(),
            deleted = work.deleted.len(),
            "handled commit slice"
        );
        Ok(TriggerReport { passes: 1, ..work })
    }

    /// Apply the repository policy for every bucket and collect the evaluations
    /// to run. Nothing is evaluated here.
    fn worklist(
        store: &GraphStore,
        repo: &mut RuleRepository,
        batch: &ClassifiedBatch,
    ) -> RuleGraphResult<TriggerReport> {
        let mut work = BTreeSet::new();
        let mut deleted = BTreeSet::new();

        for &definition in &batch.definitions_removed {
            deleted.extend(repo.remove_definition(store, definition)?);
        }
        for &evaluation in &batch.evaluations_removed {
            repo.on_evaluation_removed(store, evaluation);
            deleted.insert(evaluation);
        }
        for &instance in &batch.instances_removed {
            deleted.extend(repo.on_instance_removed(store, instance));
        }
        for &instance in &batch.instances_retyped {
            work.extend(repo.on_instance_retyped(store, instance));
        }

        for &definition in &batch.definitions_created {
            work.extend(repo.on_definition_created(store, definition)?);
        }
        for &definition in &batch.definitions_edited {
            work.extend(repo.on_definition_edited(store, definition)?);
        }
        for &evaluation in &batch.evaluations_created {
            // Our own creations are already in some activation set.
            if repo.is_cached(evaluation) {
                continue;
            }
            match repo.get_or_load_evaluation(store, evaluation) {
                Ok(_) => {
                    work.insert(evaluation);
                }
                Err(e) => tracing::warn!(evaluation = %evaluation, error = %e, "ignoring new evaluation"),
            }
        }
        for &instance in &batch.instances_created {
            work.extend(repo.on_instance_created(store, instance)?);
        }
        for &(subject, predicate) in &batch.changes {
            work.extend(repo.affected_by_change(store, subject, predicate));
        }

        work.retain(|e| !deleted.contains(e));
        Ok(TriggerReport {
            evaluated: work,
            deleted,
            passes: 0,
        })
    }

    /// Process the store's pending commit until it stops growing.
    ///
    /// Gives up with a warning after the configured number of passes.
    pub fn process_pending(
        &mut self,
        store: &GraphStore,
        repo: &mut RuleRepository,
    ) -> RuleGraphResult<TriggerReport> {
        let mut report = TriggerReport::default();
        for _ in 0..self.max_passes {
            let commit = store.pending();
            if !self.cursor.has_unseen(&commit) {
                return Ok(report);
            }
            let (added, removed) = self.cursor.offsets(commit.id);
            let pass = self.handle_from(store, repo, &commit, added, removed)?;
            self.cursor.mark(&commit);
            report.merge(pass);
        }
        if self.cursor.has_unseen(&store.pending()) {
            tracing::warn!(
                max_passes = self.max_passes,
                "pending commit still growing; stopped re-reading it"
            );
        }
        Ok(report)
    }

    /// Process everything pending, then seal the commit.
    pub fn commit(
        &mut self,
        store: &GraphStore,
        repo: &mut RuleRepository,
        message: &str,
    ) -> RuleGraphResult<(Commit, TriggerReport)> {
        let report = self.process_pending(store, repo)?;
        let sealed = store.commit(message);
        self.cursor.forget(sealed.id);
        tracing::info!(
            commit = sealed.id,
            evaluated = report.evaluated.len(),
            deleted = report.deleted.len(),
            passes = report.passes,
            "committed"
        );
        Ok((sealed, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleGraphConfig;
    use crate::expr::ArlEvaluator;
    use crate::graph::Object;
    use crate::rules::RuleDefinition;

    fn setup() -> (GraphStore, RuleRepository, NodeId, NodeId) {
        let store = GraphStore::new();
        let issue = store.create_type("Issue", None).unwrap();
        let requirements = store.create_property("requirements").unwrap();
        let repo = RuleRepository::new(RuleGraphConfig::default(), Box::new(ArlEvaluator::new()));
        (store, repo, issue, requirements)
    }

    #[test]
    fn writes_of_evaluations_settle_within_a_few_passes() {
        let (store, mut repo, issue, requirements) = setup();
        let a = store.create_individual("a", issue).unwrap();
        let b = store.create_individual("b", issue).unwrap();
        store.add_statement(b, requirements, a).unwrap();
        repo.define(
            &store,
            RuleDefinition::builder()
                .context_type(issue)
                .expression("self.requirements.notEmpty()"),
        )
        .unwrap();

        let mut trigger = ActiveTrigger::new(16);
        let report = trigger.process_pending(&store, &mut repo).unwrap();
        assert_eq!(report.evaluated.len(), 2);
        assert!(report.passes >= 2 && report.passes < 16);

        // Nothing left to do.
        let again = trigger.process_pending(&store, &mut repo).unwrap();
        assert_eq!(again.passes, 0);

        let results: Vec<Option<bool>> = repo.evaluations().map(|e| e.result).collect();
        assert_eq!(results, vec![Some(false), Some(true)]);
    }

    #[test]
    fn external_property_change_reevaluates_reader() {
        let (store, mut repo, issue, requirements) = setup();
        let a = store.create_individual("a", issue).unwrap();
        let rule = repo
            .define(
                &store,
                RuleDefinition::builder()
                    .context_type(issue)
                    .expression("self.requirements.notEmpty()"),
            )
            .unwrap();
        let mut trigger = ActiveTrigger::new(16);
        trigger.commit(&store, &mut repo, "setup").unwrap();
        let eval = repo.evaluation_for(rule, a).unwrap().id;
        assert_eq!(repo.evaluation(eval).unwrap().result, Some(false));

        store.add_statement(a, requirements, a).unwrap();
        let (_, report) = trigger.commit(&store, &mut repo, "link").unwrap();
        assert_eq!(report.evaluated, [eval].into_iter().collect());
        assert_eq!(
            store.value(eval, store.vocab().result),
            Some(Object::boolean(true))
        );
    }

    #[test]
    fn handling_the_same_slice_twice_gives_the_same_work() {
        let (store, mut repo, issue, requirements) = setup();
        let a = store.create_individual("a", issue).unwrap();
        repo.define(
            &store,
            RuleDefinition::builder()
                .context_type(issue)
                .expression("self.requirements.size() > 1"),
        )
        .unwrap();
        let mut trigger = ActiveTrigger::new(16);
        trigger.commit(&store, &mut repo, "setup").unwrap();

        store.add_statement(a, requirements, a).unwrap();
        let commit = store.pending();
        let first = trigger.handle(&store, &mut repo, &commit).unwrap();
        let second = trigger.handle(&store, &mut repo, &commit).unwrap();
        assert_eq!(first.evaluated, second.evaluated);
        assert_eq!(first.deleted, second.deleted);
    }

    #[test]
    fn pass_limit_stops_processing() {
        let (store, mut repo, issue, _) = setup();
        store.create_individual("a", issue).unwrap();
        repo.define(
            &store,
            RuleDefinition::builder()
                .context_type(issue)
                .expression("self.requirements.isEmpty()"),
        )
        .unwrap();
        let mut trigger = ActiveTrigger::new(1);
        let report = trigger.process_pending(&store, &mut repo).unwrap();
        assert_eq!(report.passes, 1);
        assert_eq!(report.evaluated.len(), 1);
    }
}

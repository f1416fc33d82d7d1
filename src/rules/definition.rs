//! Rule definitions: a rule body bound to a context type.

use crate::error::RuleError;
use crate::expr::{ExpressionEvaluator, ParseFailure, SyntaxTree};
use crate::graph::Object;
use crate::graph::store::GraphStore;
use crate::symbol::NodeId;

use super::RuleResult;

/// Shown instead of evaluator-internal failure text.
const INTERNAL_PARSE_ERROR: &str = "internal error while compiling the rule expression";

/// A named, typed rule body.
///
/// Either `syntax_tree` is present (parsed) or `error` is (errored), never both.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDefinition {
    pub id: NodeId,
    pub context_type: NodeId,
    pub expression: String,
    pub syntax_tree: Option<SyntaxTree>,
    pub error: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl RuleDefinition {
    pub fn builder() -> RuleDefinitionBuilder {
        RuleDefinitionBuilder::default()
    }

    pub fn is_errored(&self) -> bool {
        self.syntax_tree.is_none()
    }

    /// Reconstruct a persisted definition and re-compile its body.
    pub fn load(
        store: &GraphStore,
        evaluator: &dyn ExpressionEvaluator,
        id: NodeId,
    ) -> RuleResult<RuleDefinition> {
        let v = store.vocab();
        if !store.is_instance_of(id, v.rule_definition) {
            return Err(RuleError::DefinitionNotFound { node: id.get() });
        }
        let missing = |field: &str| RuleError::MissingField {
            node: id.get(),
            field: field.to_string(),
        };
        let context_type = store
            .value(id, v.context_type)
            .and_then(|o| o.as_node())
            .ok_or_else(|| missing("context type"))?;
        let expression = store
            .value(id, v.expression)
            .and_then(|o| o.as_str().map(str::to_owned))
            .ok_or_else(|| missing("expression"))?;
        let text = |p| store.value(id, p).and_then(|o| o.as_str().map(str::to_owned));

        let (syntax_tree, error) = compile(store, evaluator, &expression, context_type);
        Ok(RuleDefinition {
            id,
            context_type,
            expression,
            syntax_tree,
            error,
            title: text(v.title),
            description: text(v.description),
        })
    }

    /// Replace the rule body and re-compile it.
    pub fn set_expression(
        &mut self,
        store: &GraphStore,
        evaluator: &dyn ExpressionEvaluator,
        expression: &str,
    ) -> RuleResult<()> {
        store.set_value(self.id, store.vocab().expression, Object::string(expression))?;
        self.expression = expression.to_string();
        self.recompile(store, evaluator)
    }

    /// Rebind the rule to another context type and re-compile its body.
    pub fn set_context_type(
        &mut self,
        store: &GraphStore,
        evaluator: &dyn ExpressionEvaluator,
        context_type: NodeId,
    ) -> RuleResult<()> {
        store.set_value(self.id, store.vocab().context_type, context_type)?;
        self.context_type = context_type;
        self.recompile(store, evaluator)
    }

    fn recompile(
        &mut self,
        store: &GraphStore,
        evaluator: &dyn ExpressionEvaluator,
    ) -> RuleResult<()> {
        let (tree, error) = compile(store, evaluator, &self.expression, self.context_type);
        self.syntax_tree = tree;
        self.error = error;
        persist_error(store, self.id, self.error.as_deref())?;
        Ok(())
    }
}

fn compile(
    store: &GraphStore,
    evaluator: &dyn ExpressionEvaluator,
    expression: &str,
    context_type: NodeId,
) -> (Option<SyntaxTree>, Option<String>) {
    match evaluator.parse(store, expression, context_type) {
        Ok(tree) => (Some(tree), None),
        Err(ParseFailure::Syntax(e)) => (None, Some(e.to_string())),
        Err(ParseFailure::Internal(message)) => {
            tracing::warn!(%message, "rule expression compiler failed");
            (None, Some(INTERNAL_PARSE_ERROR.to_string()))
        }
    }
}

fn persist_error(store: &GraphStore, id: NodeId, error: Option<&str>) -> RuleResult<()> {
    let p = store.vocab().parse_error;
    match error {
        Some(message) => store.set_value(id, p, Object::string(message))?,
        None => {
            store.remove_values(id, p);
        }
    }
    Ok(())
}

/// Builder for [`RuleDefinition`]; context type and expression are required.
#[derive(Debug, Clone, Default)]
pub struct RuleDefinitionBuilder {
    context_type: Option<NodeId>,
    expression: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

impl RuleDefinitionBuilder {
    pub fn context_type(mut self, context_type: NodeId) -> Self {
        self.context_type = Some(context_type);
        self
    }

    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Persist the definition and compile its body.
    ///
    /// A body that fails to compile still yields a definition, in the errored
    /// state.
    pub fn build(
        self,
        store: &GraphStore,
        evaluator: &dyn ExpressionEvaluator,
    ) -> RuleResult<RuleDefinition> {
        let context_type = self.context_type.ok_or(RuleError::Incomplete {
            field: "context type".into(),
        })?;
        let expression = self.expression.ok_or(RuleError::Incomplete {
            field: "expression".into(),
        })?;

        let v = store.vocab();
        let id = store.create_typed_node(v.rule_definition)?;
        store.add_statement(id, v.context_type, context_type)?;
        store.add_statement(id, v.expression, Object::string(expression.as_str()))?;
        if let Some(title) = &self.title {
            store.add_statement(id, v.label, Object::string(title.as_str()))?;
            store.add_statement(id, v.title, Object::string(title.as_str()))?;
        }
        if let Some(description) = &self.description {
            store.add_statement(id, v.description, Object::string(description.as_str()))?;
        }

        let (syntax_tree, error) = compile(store, evaluator, &expression, context_type);
        persist_error(store, id, error.as_deref())?;
        if let Some(error) = &error {
            tracing::info!(rule = %id, %error, "rule definition does not compile");
        }
        Ok(RuleDefinition {
            id,
            context_type,
            expression,
            syntax_tree,
            error,
            title: self.title,
            description: self.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ArlEvaluator;

    fn setup() -> (GraphStore, NodeId) {
        let store = GraphStore::new();
        let issue = store.create_type("Issue", None).unwrap();
        store.create_property("requirements").unwrap();
        (store, issue)
    }

    #[test]
    fn builder_requires_context_and_expression() {
        let (store, issue) = setup();
        let evaluator = ArlEvaluator::new();

        let err = RuleDefinition::builder()
            .expression("true")
            .build(&store, &evaluator)
            .unwrap_err();
        assert!(matches!(err, RuleError::Incomplete { .. }));

        let err = RuleDefinition::builder()
            .context_type(issue)
            .build(&store, &evaluator)
            .unwrap_err();
        assert!(matches!(err, RuleError::Incomplete { field } if field == "expression"));
    }

    #[test]
    fn parse_failure_yields_errored_definition() {
        let (store, issue) = setup();
        let evaluator = ArlEvaluator::new();
        let def = RuleDefinition::builder()
            .context_type(issue)
            .expression("self.requirments.size() > 1")
            .build(&store, &evaluator)
            .unwrap();

        assert!(def.is_errored());
        let error = def.error.as_deref().unwrap();
        assert!(error.contains("requirments"));
        assert!(error.contains("line 1, column 6"));
        assert_eq!(
            store.value(def.id, store.vocab().parse_error),
            Some(Object::string(error))
        );
    }

    #[test]
    fn set_expression_moves_between_states() {
        let (store, issue) = setup();
        let evaluator = ArlEvaluator::new();
        let mut def = RuleDefinition::builder()
            .context_type(issue)
            .expression("self.requirements.size() > 1")
            .title("needs two")
            .build(&store, &evaluator)
            .unwrap();
        assert!(!def.is_errored());

        def.set_expression(&store, &evaluator, "self.requirements.size( > 1")
            .unwrap();
        assert!(def.is_errored());

        def.set_expression(&store, &evaluator, "self.requirements.notEmpty()")
            .unwrap();
        assert!(!def.is_errored());
        assert!(store.value(def.id, store.vocab().parse_error).is_none());
    }

    #[test]
    fn load_round_trips_persisted_fields() {
        let (store, issue) = setup();
        let evaluator = ArlEvaluator::new();
        let def = RuleDefinition::builder()
            .context_type(issue)
            .expression("self.requirements.size() > 1")
            .title("needs two")
            .description("an issue needs at least two requirements")
            .build(&store, &evaluator)
            .unwrap();

        let loaded = RuleDefinition::load(&store, &evaluator, def.id).unwrap();
        assert_eq!(loaded, def);

        let err = RuleDefinition::load(&store, &evaluator, issue).unwrap_err();
        assert!(matches!(err, RuleError::DefinitionNotFound { .. }));
    }

    #[test]
    fn set_context_type_recompiles() {
        let (store, issue) = setup();
        let evaluator = ArlEvaluator::new();
        let other = store.create_type("Task", None).unwrap();
        let mut def = RuleDefinition::builder()
            .context_type(issue)
            .expression("self.requirements.isEmpty()")
            .build(&store, &evaluator)
            .unwrap();

        def.set_context_type(&store, &evaluator, other).unwrap();
        assert_eq!(def.context_type, other);
        assert_eq!(def.syntax_tree.as_ref().unwrap().context_type, other);
        assert_eq!(
            store.value(def.id, store.vocab().context_type),
            Some(Object::Node(other))
        );
    }
}

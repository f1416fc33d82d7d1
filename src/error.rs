//! Rich diagnostic error types for rulegraph.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Rule-body parse and runtime failures are
//! *not* errors in this sense: they are recorded on the rule definition or the
//! evaluation as data, so a malformed rule never blocks commit processing.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for rulegraph.
#[derive(Debug, Error, Diagnostic)]
pub enum RuleGraphError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Repair(#[from] RepairError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Graph store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("node not found: {node}")]
    #[diagnostic(
        code(rulegraph::graph::node_not_found),
        help(
            "Statements may only mention nodes that exist in this store. \
             Create the node first, or replay the commit that created it."
        )
    )]
    NodeNotFound { node: u64 },

    #[error("node {node} is not a type")]
    #[diagnostic(
        code(rulegraph::graph::not_a_type),
        help("Individuals must be typed by a node created with `create_type`.")
    )]
    NotAType { node: u64 },

    #[error("node allocator exhausted")]
    #[diagnostic(
        code(rulegraph::graph::exhausted),
        help("The node id space is exhausted. Check for allocation loops.")
    )]
    AllocatorExhausted,

    #[error("offset {offset} is past the end of commit {commit} ({len} statements)")]
    #[diagnostic(
        code(rulegraph::graph::commit_offset),
        help(
            "Commit statement lists only grow. An offset larger than the list means \
             the handler was given a cursor from a different commit."
        )
    )]
    CommitOffset { commit: u64, offset: usize, len: usize },
}

// ---------------------------------------------------------------------------
// Rule lookup errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("rule definition not found: {node}")]
    #[diagnostic(
        code(rulegraph::rule::definition_not_found),
        help("The node is not typed as a rule definition in this store.")
    )]
    DefinitionNotFound { node: u64 },

    #[error("rule evaluation not found: {node}")]
    #[diagnostic(
        code(rulegraph::rule::evaluation_not_found),
        help("The node is not typed as a rule evaluation in this store.")
    )]
    EvaluationNotFound { node: u64 },

    #[error("evaluation {evaluation} has no resolvable context instance")]
    #[diagnostic(
        code(rulegraph::rule::context_not_found),
        help(
            "An evaluation must point at an existing context instance. \
             The instance may have been removed without cleaning up the evaluation."
        )
    )]
    ContextNotFound { evaluation: u64 },

    #[error("rule definition {node} is missing its {field}")]
    #[diagnostic(
        code(rulegraph::rule::missing_field),
        help("Rule definitions need both a context type and an expression.")
    )]
    MissingField { node: u64, field: String },

    #[error("cannot build a rule definition without its {field}")]
    #[diagnostic(
        code(rulegraph::rule::incomplete),
        help("Call `context_type(..)` and `expression(..)` on the builder before `build`.")
    )]
    Incomplete { field: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Repair tree errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RepairError {
    #[error("repair tree of evaluation {evaluation} has {roots} parentless nodes, expected exactly 1")]
    #[diagnostic(
        code(rulegraph::repair::root_count),
        help(
            "The persisted repair tree is corrupt. Re-evaluate the rule to \
             regenerate its repair suggestions."
        )
    )]
    RootCount { evaluation: u64, roots: usize },

    #[error("repair node {node} points at parent {parent}, which is not part of the tree")]
    #[diagnostic(
        code(rulegraph::repair::dangling_parent),
        help("The persisted repair tree is corrupt. Re-evaluate the rule to regenerate it.")
    )]
    DanglingParent { node: u64, parent: u64 },

    #[error("repair node {node} of evaluation {evaluation} cannot be reached from the root")]
    #[diagnostic(
        code(rulegraph::repair::unreachable),
        help(
            "Some repair nodes form a parent cycle detached from the root. \
             Re-evaluate the rule to regenerate the tree."
        )
    )]
    Unreachable { evaluation: u64, node: u64 },

    #[error("repair node {node} is malformed: {message}")]
    #[diagnostic(
        code(rulegraph::repair::malformed),
        help("A repair node is missing one of its required fields.")
    )]
    Malformed { node: u64, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(rulegraph::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}: {message}")]
    #[diagnostic(
        code(rulegraph::config::parse),
        help("Check the TOML syntax and the [trigger] / [repair] section keys.")
    )]
    Parse { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid model: {message}")]
    #[diagnostic(
        code(rulegraph::engine::invalid_model),
        help("Every type, property, and rule context must be declared before use.")
    )]
    InvalidModel { message: String },

    #[error("failed to read model file: {path}")]
    #[diagnostic(
        code(rulegraph::engine::io),
        help("Ensure the model file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for functions returning rulegraph results.
pub type RuleGraphResult<T> = std::result::Result<T, RuleGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_converts_to_top_level() {
        let err: RuleGraphError = GraphError::NodeNotFound { node: 9 }.into();
        assert!(matches!(
            err,
            RuleGraphError::Graph(GraphError::NodeNotFound { node: 9 })
        ));
    }

    #[test]
    fn repair_error_wraps_graph_error() {
        let err: RepairError = GraphError::AllocatorExhausted.into();
        assert!(matches!(err, RepairError::Graph(GraphError::AllocatorExhausted)));
    }

    #[test]
    fn root_count_message_is_descriptive() {
        let msg = RepairError::RootCount {
            evaluation: 12,
            roots: 2,
        }
        .to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("2 parentless"));
    }
}

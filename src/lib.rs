// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # rulegraph
//!
//! Incremental rule evaluation over a typed graph store.
//!
//! Rules are boolean expressions bound to a context type. Every instance of
//! that type gets a rule evaluation; each evaluation remembers which
//! `(node, property)` pairs it read, and only changes to those pairs re-run it.
//! Inconsistent evaluations carry a persisted tree of suggested repairs.
//!
//! ## Architecture
//!
//! - **Graph store** (`graph`): typed statements, subclass hierarchy, commit log
//! - **Expressions** (`expr`): the evaluator seam and a small navigation language
//! - **Rules** (`rules`): definitions, evaluations, scope index, repository
//! - **Triggers** (`trigger`): active and passive commit observers
//! - **Repairs** (`repair`): repair tree persistence and repairable declarations
//!
//! ## Library usage
//!
//! ```no_run
//! use rulegraph::config::RuleGraphConfig;
//! use rulegraph::engine::RuleEngine;
//! use rulegraph::rules::RuleDefinition;
//!
//! let mut engine = RuleEngine::new(RuleGraphConfig::default());
//! let store = engine.store();
//! let issue = store.create_type("Issue", None).unwrap();
//! store.create_property("requirements").unwrap();
//! store.create_individual("issue1", issue).unwrap();
//! engine
//!     .define_rule(
//!         RuleDefinition::builder()
//!             .context_type(issue)
//!             .expression("self.requirements.size() > 1"),
//!     )
//!     .unwrap();
//! let (_, report) = engine.commit("initial model").unwrap();
//! assert_eq!(report.evaluated.len(), 1);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod graph;
pub mod repair;
pub mod rules;
pub mod symbol;
pub mod trigger;
pub mod vocab;

//! Rule definitions, evaluations, the scope index, and the repository that
//! decides which evaluations a graph change affects.

pub mod definition;
pub mod evaluation;
pub mod inspector;
pub mod repository;
pub mod scope;

use crate::error::RuleError;

pub use definition::{RuleDefinition, RuleDefinitionBuilder};
pub use evaluation::RuleEvaluation;
pub use inspector::{RepairLine, RuleRepositoryInspector};
pub use repository::RuleRepository;
pub use scope::{ScopeIndex, ScopeKey};

/// Result type for rule lookups and definition edits.
pub type RuleResult<T> = std::result::Result<T, RuleError>;

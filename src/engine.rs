//! Engine facade: a graph store, its rule repository, and the active trigger.
//!
//! The `RuleEngine` owns all three and routes every commit through the
//! trigger, so callers only mutate the store and call [`RuleEngine::commit`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::RuleGraphConfig;
use crate::error::{EngineError, RuleGraphResult};
use crate::expr::ArlEvaluator;
use crate::graph::store::GraphStore;
use crate::graph::{Commit, Object};
use crate::repair::RepairDeclarations;
use crate::rules::{RuleDefinitionBuilder, RuleRepository, RuleRepositoryInspector};
use crate::symbol::NodeId;
use crate::trigger::{ActiveTrigger, TriggerReport};

/// The rule engine.
pub struct RuleEngine {
    config: RuleGraphConfig,
    store: GraphStore,
    repository: RuleRepository,
    trigger: ActiveTrigger,
}

impl RuleEngine {
    /// An engine over a fresh store.
    pub fn new(config: RuleGraphConfig) -> Self {
        Self::with_store(GraphStore::new(), config)
    }

    /// An engine over an existing store; rule state is rebuilt from it.
    pub fn with_store(store: GraphStore, config: RuleGraphConfig) -> Self {
        tracing::info!(
            max_passes = config.trigger.max_passes,
            repairs = config.repair.enabled,
            "initializing rule engine"
        );
        let repository =
            RuleRepository::load_from_model(&store, config.clone(), Box::new(ArlEvaluator::new()));
        let trigger = ActiveTrigger::new(config.trigger.max_passes);
        Self {
            config,
            store,
            repository,
            trigger,
        }
    }

    pub fn config(&self) -> &RuleGraphConfig {
        &self.config
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn repository(&self) -> &RuleRepository {
        &self.repository
    }

    pub fn inspector(&self) -> RuleRepositoryInspector<'_> {
        self.repository.inspector()
    }

    pub fn declarations(&self) -> RepairDeclarations<'_> {
        RepairDeclarations::new(&self.store)
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    /// Persist a rule definition. It is activated by the next
    /// [`process`](Self::process) or [`commit`](Self::commit).
    pub fn define_rule(&mut self, builder: RuleDefinitionBuilder) -> RuleGraphResult<NodeId> {
        Ok(self.repository.define(&self.store, builder)?)
    }

    pub fn set_expression(&mut self, rule: NodeId, expression: &str) -> RuleGraphResult<BTreeSet<NodeId>> {
        self.repository.set_expression(&self.store, rule, expression)
    }

    pub fn set_context_type(&mut self, rule: NodeId, context_type: NodeId) -> RuleGraphResult<BTreeSet<NodeId>> {
        self.repository.set_context_type(&self.store, rule, context_type)
    }

    pub fn remove_rule(&mut self, rule: NodeId) -> RuleGraphResult<BTreeSet<NodeId>> {
        self.repository.remove_definition(&self.store, rule)
    }

    // -----------------------------------------------------------------------
    // Commits
    // -----------------------------------------------------------------------

    /// Run the active trigger over the pending commit until it settles.
    pub fn process(&mut self) -> RuleGraphResult<TriggerReport> {
        self.trigger.process_pending(&self.store, &mut self.repository)
    }

    /// Process and seal the pending commit.
    pub fn commit(&mut self, message: &str) -> RuleGraphResult<(Commit, TriggerReport)> {
        self.trigger.commit(&self.store, &mut self.repository, message)
    }

    // -----------------------------------------------------------------------
    // Model files
    // -----------------------------------------------------------------------

    /// Read a JSON model file and load it into the store.
    pub fn load_model_file(&mut self, path: &Path) -> RuleGraphResult<ModelReport> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let model: ModelSpec =
            serde_json::from_str(&content).map_err(|e| EngineError::InvalidModel {
                message: format!("{}: {e}", path.display()),
            })?;
        self.load_model(&model)
    }

    /// Create the types, properties, individuals, and rules of `model`.
    ///
    /// Nothing is processed; call [`commit`](Self::commit) afterwards.
    pub fn load_model(&mut self, model: &ModelSpec) -> RuleGraphResult<ModelReport> {
        let store = &self.store;
        let mut types: BTreeMap<&str, NodeId> = BTreeMap::new();
        for ty in &model.types {
            let superclass = match &ty.superclass {
                Some(name) => Some(*types.get(name.as_str()).ok_or_else(|| invalid(format!(
                    "type `{}` extends undeclared type `{name}`",
                    ty.name
                )))?),
                None => None,
            };
            types.insert(&ty.name, store.create_type(&ty.name, superclass)?);
        }

        let mut properties: BTreeMap<&str, NodeId> = BTreeMap::new();
        for name in &model.properties {
            properties.insert(name, store.create_property(name)?);
        }

        let lookup = |map: &BTreeMap<&str, NodeId>, kind: &str, name: &str| {
            map.get(name)
                .copied()
                .ok_or_else(|| invalid(format!("undeclared {kind} `{name}`")))
        };

        for decl in &model.repairable {
            let ty = lookup(&types, "type", &decl.type_name)?;
            let property = lookup(&properties, "property", &decl.property)?;
            RepairDeclarations::new(store).set_repairable(ty, property, true)?;
        }

        let mut individuals: BTreeMap<&str, NodeId> = BTreeMap::new();
        for individual in &model.individuals {
            let ty = lookup(&types, "type", &individual.type_name)?;
            individuals.insert(&individual.name, store.create_individual(&individual.name, ty)?);
        }
        for individual in &model.individuals {
            let subject = individuals[individual.name.as_str()];
            for (name, values) in &individual.values {
                let property = lookup(&properties, "property", name)?;
                for value in values.iter() {
                    let object = match value {
                        ModelValue::Reference { reference } => {
                            Object::Node(lookup(&individuals, "individual", reference)?)
                        }
                        ModelValue::Boolean(b) => Object::boolean(*b),
                        ModelValue::Integer(i) => Object::integer(*i),
                        ModelValue::String(s) => Object::string(s.as_str()),
                    };
                    store.add_statement(subject, property, object)?;
                }
            }
        }

        let mut rules = Vec::with_capacity(model.rules.len());
        for rule in &model.rules {
            let context_type = lookup(&types, "type", &rule.context)?;
            let mut builder = crate::rules::RuleDefinition::builder()
                .context_type(context_type)
                .expression(rule.expression.as_str());
            if let Some(title) = &rule.title {
                builder = builder.title(title.as_str());
            }
            if let Some(description) = &rule.description {
                builder = builder.description(description.as_str());
            }
            rules.push(self.define_rule(builder)?);
        }

        tracing::info!(
            types = types.len(),
            properties = properties.len(),
            individuals = individuals.len(),
            rules = rules.len(),
            "loaded model"
        );
        Ok(ModelReport {
            individuals: individuals
                .into_iter()
                .map(|(name, id)| (name.to_string(), id))
                .collect(),
            rules,
        })
    }

    /// Counts for status output.
    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            nodes: self.store.node_count(),
            statements: self.store.statement_count(),
            rules: self.repository.definitions().count(),
            evaluations: self.repository.evaluations().filter(|e| e.enabled).count(),
            scope_entries: self.repository.scope().len(),
        }
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("store", &self.store)
            .field("repository", &self.repository)
            .finish()
    }
}

fn invalid(message: String) -> EngineError {
    EngineError::InvalidModel { message }
}

/// Summary counts of an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub nodes: usize,
    pub statements: usize,
    pub rules: usize,
    pub evaluations: usize,
    pub scope_entries: usize,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "nodes:         {}", self.nodes)?;
        writeln!(f, "statements:    {}", self.statements)?;
        writeln!(f, "rules:         {}", self.rules)?;
        writeln!(f, "evaluations:   {}", self.evaluations)?;
        write!(f, "scope entries: {}", self.scope_entries)
    }
}

// ---------------------------------------------------------------------------
// Model file format
// ---------------------------------------------------------------------------

/// A JSON model: schema, data, and rules.
///
/// ```json
/// {
///   "types": [{ "name": "Issue" }],
///   "properties": ["requirements"],
///   "individuals": [
///     { "name": "req1", "type": "Issue" },
///     { "name": "issue1", "type": "Issue", "values": { "requirements": [{ "ref": "req1" }] } }
///   ],
///   "rules": [{ "context": "Issue", "expression": "self.requirements.size() > 1" }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(default)]
    pub types: Vec<TypeSpec>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub repairable: Vec<RepairableSpec>,
    #[serde(default)]
    pub individuals: Vec<IndividualSpec>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub name: String,
    #[serde(default)]
    pub superclass: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairableSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    pub property: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub values: BTreeMap<String, Vec<ModelValue>>,
}

/// A property value: a reference to another individual or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelValue {
    Reference {
        #[serde(rename = "ref")]
        reference: String,
    },
    Boolean(bool),
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub context: String,
    pub expression: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Ids created by [`RuleEngine::load_model`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReport {
    pub individuals: BTreeMap<String, NodeId>,
    pub rules: Vec<NodeId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleGraphError;

    const MODEL: &str = r#"{
        "types": [{ "name": "Item" }, { "name": "Issue", "superclass": "Item" }],
        "properties": ["requirements", "state"],
        "repairable": [{ "type": "Item", "property": "requirements" }],
        "individuals": [
            { "name": "req1", "type": "Item" },
            { "name": "issue1", "type": "Issue",
              "values": { "requirements": [{ "ref": "req1" }], "state": ["open"] } }
        ],
        "rules": [{ "context": "Issue", "expression": "self.requirements.size() > 1", "title": "two requirements" }]
    }"#;

    #[test]
    fn model_loads_and_evaluates() {
        let mut engine = RuleEngine::new(RuleGraphConfig::default());
        let model: ModelSpec = serde_json::from_str(MODEL).unwrap();
        let report = engine.load_model(&model).unwrap();
        engine.commit("model").unwrap();

        let issue1 = report.individuals["issue1"];
        let rule = report.rules[0];
        let eval = engine.repository().evaluation_for(rule, issue1).unwrap();
        assert_eq!(eval.result, Some(false));
        assert_eq!(
            engine.store().value(issue1, engine.store().find_property("state").unwrap()),
            Some(Object::string("open"))
        );
        let item = engine.store().find_by_label("Item").unwrap();
        let requirements = engine.store().find_property("requirements").unwrap();
        assert!(engine.declarations().is_repairable(item, requirements));
        assert_eq!(engine.info().rules, 1);
    }

    #[test]
    fn undeclared_names_are_rejected() {
        let mut engine = RuleEngine::new(RuleGraphConfig::default());
        let model = ModelSpec {
            individuals: vec![IndividualSpec {
                name: "x".into(),
                type_name: "Missing".into(),
                values: BTreeMap::new(),
            }],
            ..Default::default()
        };
        let err = engine.load_model(&model).unwrap_err();
        assert!(matches!(
            err,
            RuleGraphError::Engine(EngineError::InvalidModel { .. })
        ));
    }

    #[test]
    fn model_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = RuleEngine::new(RuleGraphConfig::default());
        let err = engine
            .load_model_file(&dir.path().join("missing.json"))
            .unwrap_err();
        assert!(matches!(err, RuleGraphError::Engine(EngineError::Io { .. })));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        let err = engine.load_model_file(&bad).unwrap_err();
        assert!(matches!(
            err,
            RuleGraphError::Engine(EngineError::InvalidModel { .. })
        ));
    }

    #[test]
    fn reopening_a_store_keeps_rule_state() {
        let mut engine = RuleEngine::new(RuleGraphConfig::default());
        let model: ModelSpec = serde_json::from_str(MODEL).unwrap();
        engine.load_model(&model).unwrap();
        engine.commit("model").unwrap();
        let before = engine.inspector().scope_entries();

        let replica = engine.store().fork();
        let reopened = RuleEngine::with_store(replica, RuleGraphConfig::default());
        assert_eq!(reopened.inspector().scope_entries(), before);
        assert_eq!(reopened.info().evaluations, 1);
    }
}

//! rulegraph CLI: evaluate rule models and inspect incremental state.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use rulegraph::config::RuleGraphConfig;
use rulegraph::engine::RuleEngine;

#[derive(Parser)]
#[command(name = "rulegraph", version, about = "Incremental rule evaluation over a typed graph")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a JSON model, evaluate every rule, and print results with repairs.
    Check {
        /// Path to the JSON model.
        #[arg(long)]
        model: PathBuf,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Load a JSON model and print the scope index.
    InspectScope {
        /// Path to the JSON model.
        #[arg(long)]
        model: PathBuf,
    },

    /// Load a JSON model and print summary counts.
    Info {
        /// Path to the JSON model.
        #[arg(long)]
        model: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RuleGraphConfig::load(path)?,
        None => RuleGraphConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check { model, json } => {
            let engine = load(&model, config)?;
            let store = engine.store();
            let inspector = engine.inspector();

            if json {
                let rows: Vec<serde_json::Value> = inspector
                    .evaluations()
                    .into_iter()
                    .map(|e| {
                        serde_json::json!({
                            "evaluation": e.id.get(),
                            "rule": rule_name(&engine, e.definition),
                            "context": store.display(e.context),
                            "result": e.result,
                            "error": e.error,
                            "repairs": inspector.flatten_repair_tree(store, e.id),
                        })
                    })
                    .collect();
                let out = serde_json::to_string_pretty(&rows).into_diagnostic()?;
                println!("{out}");
                return Ok(());
            }

            for definition in engine.repository().definitions() {
                if let Some(error) = &definition.error {
                    println!("rule {}: does not compile: {error}", rule_name(&engine, definition.id));
                }
            }
            for eval in inspector.evaluations() {
                let verdict = match (eval.result, &eval.error) {
                    (_, Some(error)) => format!("error: {error}"),
                    (Some(true), None) => "consistent".to_string(),
                    (Some(false), None) => "inconsistent".to_string(),
                    (None, None) => "no result".to_string(),
                };
                println!(
                    "{} on {}: {verdict}",
                    rule_name(&engine, eval.definition),
                    store.display(eval.context)
                );
                for line in inspector.flatten_repair_tree(store, eval.id) {
                    println!("    {line}");
                }
            }
            let inconsistent = inspector.inconsistent().len();
            println!(
                "{} evaluations, {inconsistent} inconsistent",
                inspector.evaluations().len()
            );
        }

        Commands::InspectScope { model } => {
            let engine = load(&model, config)?;
            for line in engine.inspector().scope_lines(engine.store()) {
                let users: Vec<String> = line.users.iter().map(|u| u.to_string()).collect();
                match &line.property {
                    Some(property) => println!("{}.{} <- [{}]", line.node, property, users.join(", ")),
                    None => println!("{} (context) <- [{}]", line.node, users.join(", ")),
                }
            }
        }

        Commands::Info { model } => {
            let engine = load(&model, config)?;
            println!("{}", engine.info());
        }
    }

    Ok(())
}

fn load(model: &Path, config: RuleGraphConfig) -> Result<RuleEngine> {
    let mut engine = RuleEngine::new(config);
    engine.load_model_file(model)?;
    engine.commit("load model")?;
    Ok(engine)
}

fn rule_name(engine: &RuleEngine, definition: rulegraph::symbol::NodeId) -> String {
    engine
        .repository()
        .definition(definition)
        .and_then(|d| d.title.clone())
        .unwrap_or_else(|| definition.to_string())
}

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use kiln_core::config::AppConfig;
use kiln_core::GlobalValue;
use kiln_graph::{path, EvaluationReport, Workspace};

#[derive(Parser)]
#[command(name = "kiln", version, about = "Node-graph workflows for text and LLM processing")]
struct Cli {
    /// Path to config file (defaults to ./kiln.toml, then ~/.kiln/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a workspace and evaluate one node
    Run {
        /// Workspace JSON file
        workspace: PathBuf,
        /// Node path, e.g. /loop
        node: String,
        /// Recook the node even if its output is current
        #[arg(long)]
        force: bool,
        /// Set a global variable before evaluating (repeatable)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
        /// Print the full evaluation report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the nodes and connections of a workspace
    Inspect {
        workspace: PathBuf,
        /// Only show nodes under this path
        #[arg(long, default_value = "/")]
        prefix: String,
    },
    /// List available node types
    Types,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "kiln", &mut std::io::stdout());
        return Ok(());
    }

    let (config, config_path) = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KILN_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &config_path {
        Some(path) => debug!(path = %path.display(), "Loaded config"),
        None => debug!("No config file found, using defaults"),
    }

    match cli.command {
        Commands::Run {
            workspace,
            node,
            force,
            set,
            json,
        } => run(&config, &workspace, &node, force, &set, json),
        Commands::Inspect { workspace, prefix } => inspect(&config, &workspace, &prefix),
        Commands::Types => {
            let catalog = kiln_nodes::catalog(&config.engine);
            for ty in catalog.list() {
                if !ty.creatable {
                    continue;
                }
                println!("{:<2} {:<14} {:<8} {}", ty.glyph, ty.name, ty.group, ty.description);
            }
            Ok(())
        }
        Commands::Config => {
            let mut shown = config.clone();
            // Keep secrets out of terminals and logs
            for model in shown.model.iter_mut().chain(shown.fallback_models.iter_mut()) {
                if model.api_key.is_some() {
                    model.api_key = Some("***".to_string());
                }
            }
            println!("{}", toml::to_string_pretty(&shown)?);
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

/// Explicit path must exist; otherwise try ./kiln.toml, then the home config.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<(AppConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = AppConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?;
        return Ok((config, Some(path.to_path_buf())));
    }
    let candidates = std::iter::once(PathBuf::from("kiln.toml")).chain(AppConfig::home_config_path());
    for path in candidates {
        if path.is_file() {
            let config = AppConfig::load(&path)
                .with_context(|| format!("loading config {}", path.display()))?;
            return Ok((config, Some(path)));
        }
    }
    Ok((AppConfig::default(), None))
}

fn open_workspace(config: &AppConfig, file: &Path) -> anyhow::Result<Workspace> {
    let catalog = kiln_nodes::catalog(&config.engine);
    let mut ws = Workspace::load(file, catalog, config.engine.clone())
        .with_context(|| format!("loading workspace {}", file.display()))?;

    for (name, value) in &config.globals {
        ws.set_global(name, value.clone())?;
    }

    if let Some(model) = &config.model {
        let client = kiln_llm::create_model(model, &config.fallback_models)?;
        info!(model = %client.name(), "Language model attached");
        ws.set_model(Some(client));
    }
    Ok(ws)
}

fn parse_assignment(raw: &str) -> anyhow::Result<(&str, GlobalValue)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim(), GlobalValue::parse_loose(value)))
        }
        _ => bail!("expected NAME=VALUE, got '{}'", raw),
    }
}

fn run(
    config: &AppConfig,
    file: &Path,
    node: &str,
    force: bool,
    assignments: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let mut ws = open_workspace(config, file)?;
    for raw in assignments {
        let (name, value) = parse_assignment(raw)?;
        ws.set_global(name, value)?;
    }

    let report = ws.evaluate(node, force)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.success {
        bail!("evaluation of {} failed", report.path);
    }
    Ok(())
}

fn print_report(report: &EvaluationReport) {
    let multi = report.output.len() > 1;
    for (port, items) in report.output.iter().enumerate() {
        if multi {
            println!("── output {} ({} items)", port, items.len());
        }
        for item in items {
            println!("{}", item);
        }
    }
    for warning in &report.warnings {
        warn!(node = %report.path, "{}", warning);
    }
    for error in &report.errors {
        eprintln!("error: {}", error);
    }
    info!(
        node = %report.path,
        cook_count = report.cook_count,
        elapsed_ms = (report.elapsed_secs * 1000.0) as u64,
        "Evaluated"
    );
}

fn inspect(config: &AppConfig, file: &Path, prefix: &str) -> anyhow::Result<()> {
    let ws = open_workspace(config, file)?;
    let nodes = ws.list(prefix);
    if nodes.is_empty() {
        println!("No nodes under {}", prefix);
        return Ok(());
    }
    for node in &nodes {
        let flags = match (node.time_dependent, node.protected) {
            (true, true) => " [dynamic, protected]",
            (true, false) => " [dynamic]",
            (false, true) => " [protected]",
            (false, false) => "",
        };
        println!("{} {} ({}){}", node.glyph, node.path, node.node_type, flags);
        for param in &node.parameters {
            let raw = serde_json::to_string(&param.raw).unwrap_or_default();
            println!("    {} = {}", param.name, raw);
        }
    }

    let connections: Vec<_> = ws
        .connections()
        .into_iter()
        .filter(|c| path::matches_prefix(&c.from, prefix) || path::matches_prefix(&c.to, prefix))
        .collect();
    if !connections.is_empty() {
        println!();
        for c in connections {
            println!("{}[{}] -> {}[{}]", c.from, c.from_output, c.to, c.to_input);
        }
    }
    Ok(())
}

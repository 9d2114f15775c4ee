//! Binary entry point for bcfs.
//!
//! A thin command-line front end over the configured graph backend. Results
//! are printed as JSON on stdout.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use bcfs::config::BcfsConfig;
use bcfs::models::{Edges, Nodes};
use bcfs::observability::{self, LoggingConfig};
use bcfs::storage::{Graph, KvGraphBackend, resolve_backend};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// bcfs - graph storage over pluggable backends.
#[derive(Parser)]
#[command(name = "bcfs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "BCFS_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Check that the backend is reachable and provisioned.
    Ping,

    /// Create the key-value tables if they are missing.
    CreateTables,

    /// Fetch nodes by id.
    GetNodes {
        /// Source namespace.
        #[arg(short, long)]
        source: String,

        /// Node ids.
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Fetch edges by `FROM:TO` pair.
    GetOutEdges {
        /// Source namespace.
        #[arg(short, long)]
        source: String,

        /// Edge pairs as `FROM:TO`.
        #[arg(required = true, value_parser = parse_pair)]
        pairs: Vec<(String, String)>,
    },

    /// Fetch every edge pointing at the given nodes.
    GetInEdges {
        /// Source namespace.
        #[arg(short, long)]
        source: String,

        /// Target node ids.
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

/// Main entry point.
fn main() -> ExitCode {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let logging = LoggingConfig::new(
        &config.log_level,
        config.log_format,
        config.log_file.clone(),
        cli.verbose,
    );
    if let Err(e) = observability::init(logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: &BcfsConfig) -> anyhow::Result<()> {
    match command {
        Commands::Ping => {
            resolve_backend(&config.backend)?.ping()?;
            print_json(&serde_json::json!({ "status": "ok" }))
        },
        Commands::CreateTables => cmd_create_tables(config),
        Commands::GetNodes { source, ids } => cmd_get_nodes(config, source, ids),
        Commands::GetOutEdges { source, pairs } => cmd_get_out_edges(config, source, pairs),
        Commands::GetInEdges { source, ids } => cmd_get_in_edges(config, source, ids),
    }
}

/// Loads configuration from the given path or the default location.
fn load_config(path: Option<&Path>) -> anyhow::Result<BcfsConfig> {
    if let Some(path) = path {
        return BcfsConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()));
    }
    match BcfsConfig::default_path() {
        Some(path) if path.exists() => BcfsConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display())),
        _ => bail!("no configuration file given and none found at the default location"),
    }
}

fn cmd_create_tables(config: &BcfsConfig) -> anyhow::Result<()> {
    let backend = KvGraphBackend::from_config(&config.backend)?;
    backend.ensure_tables()?;
    let settings = backend.settings();
    print_json(&serde_json::json!({
        "node_table": settings.node_table,
        "edge_table": settings.edge_table,
        "reverse_index": settings.reverse_index,
    }))
}

fn cmd_get_nodes(config: &BcfsConfig, source: String, ids: Vec<String>) -> anyhow::Result<()> {
    let graph = resolve_backend(&config.backend)?;
    let mut request = Nodes::with_source(source);
    for id in ids {
        request.get_or_create(id);
    }
    let nodes = graph.get_nodes(request)?;
    print_json(&nodes.iter().collect::<BTreeMap<_, _>>())
}

fn cmd_get_out_edges(
    config: &BcfsConfig,
    source: String,
    pairs: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let graph = resolve_backend(&config.backend)?;
    let mut request = Edges::with_source(source);
    for (from, to) in pairs {
        request.get_or_create(from, to);
    }
    print_edges(&graph.get_out_edges(request)?)
}

fn cmd_get_in_edges(config: &BcfsConfig, source: String, ids: Vec<String>) -> anyhow::Result<()> {
    let graph = resolve_backend(&config.backend)?;
    let mut request = Edges::with_source(source);
    for id in ids {
        request.add_endpoint(id);
    }
    print_edges(&graph.get_in_edges(request)?)
}

/// Prints edges as `{outer: {inner: properties}}`, without the source entry.
fn print_edges(edges: &Edges) -> anyhow::Result<()> {
    let mut out: BTreeMap<&str, BTreeMap<&str, _>> =
        edges.endpoints().map(|id| (id, BTreeMap::new())).collect();
    for (outer, inner, properties) in edges.pairs() {
        out.entry(outer).or_default().insert(inner, properties);
    }
    print_json(&out)
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parses a `FROM:TO` edge argument. Splits on the last `:`.
fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.rsplit_once(':') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() => {
            Ok((from.to_string(), to.to_string()))
        },
        _ => Err(format!("expected FROM:TO, got '{s}'")),
    }
}

//! Sumi-Tide main entry point
//!
//! This is the command-line interface for the Sumi-Tide crawl engine.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_tide::config::{list_models, load_model_with_hash, CrawlModel, SinkKind};
use sumi_tide::crawler::crawl;
use sumi_tide::output::print_run_report;
use tracing_subscriber::EnvFilter;

/// Sumi-Tide: a declarative, phased crawl engine
///
/// Sumi-Tide runs a named crawl model: ordered phases of fetch workers,
/// record extraction, and forwarding of newly discovered work until no work
/// remains.
#[derive(Parser, Debug)]
#[command(name = "sumi-tide")]
#[command(version)]
#[command(about = "A declarative, phased crawl engine", long_about = None)]
struct Cli {
    /// Name of the crawl model to run
    #[arg(value_name = "MODEL", required_unless_present = "list")]
    model: Option<String>,

    /// Directory holding <name>.toml model files
    #[arg(long, value_name = "DIR", default_value = "models")]
    models_dir: PathBuf,

    /// One worker per phase and no persistence (records are logged)
    #[arg(long)]
    dummy: bool,

    /// Validate the model, print it and exit
    #[arg(long, conflicts_with = "list")]
    check: bool,

    /// List the models in the models directory and exit
    #[arg(long)]
    list: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    if cli.list {
        return handle_list(&cli.models_dir);
    }

    let Some(name) = cli.model.as_deref() else {
        anyhow::bail!("a model name is required");
    };

    tracing::info!("Loading model {} from {}", name, cli.models_dir.display());
    let (model, hash) = load_model_with_hash(&cli.models_dir, name)
        .with_context(|| format!("Failed to load model '{}'", name))?;
    tracing::info!("Model loaded successfully (hash: {})", hash);

    let model = if cli.dummy {
        tracing::info!("Dummy mode: one worker per phase, records are only logged");
        model.into_dummy()
    } else {
        model
    };

    if cli.check {
        handle_check(&model, &hash);
        return Ok(());
    }

    let report = crawl(model).await.context("Crawl failed")?;
    if !cli.quiet {
        print_run_report(&report);
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_tide=info,warn"),
            1 => EnvFilter::new("sumi_tide=debug,info"),
            2 => EnvFilter::new("sumi_tide=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --list: prints the model names found in the directory
fn handle_list(dir: &Path) -> anyhow::Result<()> {
    let names = list_models(dir)
        .with_context(|| format!("Failed to list models in {}", dir.display()))?;

    if names.is_empty() {
        println!("No models in {}", dir.display());
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

/// Handles --check: prints the validated model
fn handle_check(model: &CrawlModel, hash: &str) {
    println!("=== Sumi-Tide Model Check: {} ===\n", model.name);
    println!("Hash: {}\n", hash);

    let s = &model.settings;
    println!("Engine:");
    println!("  Workers per phase: {}", s.workers);
    println!("  Delay: {:?}", s.delay);
    println!("  Request timeout: {:?}", s.request_timeout);
    println!("  Max retries: {}", s.max_retries);
    println!("  Parse timeout: {:?}", s.parse_timeout);
    println!(
        "  Queue capacities: parse {}, sink {}",
        s.parse_queue_capacity, s.sink_queue_capacity
    );

    println!("\nUser Agent:");
    println!("  Name: {}", model.user_agent.crawler_name);
    println!("  Version: {}", model.user_agent.crawler_version);
    println!("  Contact URL: {}", model.user_agent.contact_url);
    println!("  Contact Email: {}", model.user_agent.contact_email);

    println!("\nSinks ({}):", model.sinks.len());
    for sink in &model.sinks {
        let detail = match &sink.kind {
            SinkKind::Sqlite { path } | SinkKind::Jsonl { path } => path.display().to_string(),
            SinkKind::Command { command } => command.clone(),
            SinkKind::Log => String::new(),
        };
        println!("  - {} [{}] {}", sink.name, sink.kind.as_str(), detail);
    }

    println!("\nPhases ({}):", model.phases.len());
    for (i, phase) in model.phases.iter().enumerate() {
        let mut flags = Vec::new();
        if !phase.active {
            flags.push("inactive");
        }
        if phase.repeat {
            flags.push("repeat");
        }
        if !phase.synchronize {
            flags.push("unsynchronized");
        }
        if !phase.inherit {
            flags.push("no-inherit");
        }
        println!(
            "  {}. {} (workers: {}, queued seeds: {}) {}",
            i + 1,
            phase.name,
            phase.workers.unwrap_or(s.workers),
            phase.source.pending(),
            flags.join(", ")
        );
        for schema in &phase.schemas {
            let sinks = if schema.sinks.is_empty() {
                "all sinks".to_string()
            } else {
                schema.sinks.join(", ")
            };
            println!(
                "     schema {}: {} fields -> {}{}",
                schema.name,
                schema.fields.len(),
                sinks,
                if schema.required { " (required)" } else { "" }
            );
        }
    }

    println!("\n✓ Model is valid");
}

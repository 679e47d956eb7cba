//! Switchyard CLI - inspect transform routing

mod config;
mod fragments;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use config::Config;
use rhi_switchyard_core::{
    ExecutionContext, MergedConfig, Planner, TransformIndex, TransformOptions, TransformerKind,
    detect_format,
};
use std::path::{Path, PathBuf};

/// Parse a `name=value` option.
fn parse_option(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid option '{}'. Use: name=value", s)),
    }
}

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Transform routing: merge, select, plan", long_about = None)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file (default: ~/.config/switchyard/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Fragment file, directory or glob. Replaces the config's fragment list.
    #[arg(short, long = "fragment", global = true)]
    fragments: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Arguments shared by the routing queries.
#[derive(clap::Args)]
struct Query {
    /// Source media type
    source: String,
    /// Target media type
    target: String,
    /// Transform option (repeatable)
    #[arg(short = 'o', long = "option", value_parser = parse_option)]
    options: Vec<(String, String)>,
    /// Rendition name; its configured options apply beneath --option
    #[arg(long)]
    rendition: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List merged transformers
    List,

    /// Print the merged config
    Merge {
        /// Output format: json, yaml or toml
        #[arg(long)]
        format: Option<String>,
    },

    /// Find the transformer for a conversion
    Find {
        #[command(flatten)]
        query: Query,
        /// Source size in bytes
        #[arg(long, default_value_t = 0)]
        size: i64,
    },

    /// Largest source size any transformer accepts (-1 for unlimited)
    MaxSize {
        #[command(flatten)]
        query: Query,
    },

    /// Show the steps a conversion would take
    Plan {
        #[command(flatten)]
        query: Query,
        /// Source size in bytes
        #[arg(long, default_value_t = 0)]
        size: i64,
    },

    /// Validate an encoded execution context
    CheckContext {
        /// Context file (JSON or YAML)
        file: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config file
    let config = if let Some(ref path) = cli.config {
        Config::load_from_path(Some(path.clone()))
    } else {
        Config::load()
    };

    let verbose = cli.verbose || config.defaults.verbose;
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            "switchyard=debug,rhi_switchyard_core=debug".into()
        } else {
            "warn".into()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let load = || -> Result<MergedConfig> {
        let sources = if cli.fragments.is_empty() {
            &config.fragments
        } else {
            &cli.fragments
        };
        let files = fragments::collect_fragments(sources);
        tracing::debug!(fragments = files.len(), "loading fragments");
        fragments::load_merged(&files)
    };

    match &cli.command {
        Commands::List => cmd_list(&load()?),
        Commands::Merge { format } => {
            let format = format
                .clone()
                .or_else(|| config.defaults.format.clone())
                .unwrap_or_else(|| "json".to_string());
            cmd_merge(&load()?, &format)
        }
        Commands::Find { query, size } => cmd_find(&load()?, &config, query, *size),
        Commands::MaxSize { query } => cmd_max_size(&load()?, &config, query),
        Commands::Plan { query, size } => cmd_plan(&load()?, &config, query, *size),
        Commands::CheckContext { file } => cmd_check_context(file),
        Commands::Completions { shell } => {
            generate(*shell, &mut Cli::command(), "switchyard", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Request options: the rendition's configured options, then `--option`s.
fn request_options(config: &Config, query: &Query) -> TransformOptions {
    let mut options = TransformOptions::new();
    if let Some(rendition) = &query.rendition {
        match config.rendition_options(rendition) {
            Some(configured) => options.extend(configured.clone()),
            None => tracing::debug!(rendition, "rendition has no configured options"),
        }
    }
    options.extend(query.options.iter().cloned());
    options
}

fn cmd_list(merged: &MergedConfig) -> Result<()> {
    println!("Transformers:\n");

    for transformer in &merged.transformers {
        println!("  {} [{}]", transformer.name, transformer.kind.label());
        match &transformer.kind {
            TransformerKind::Engine => {}
            TransformerKind::Pipeline { steps } => {
                let names: Vec<_> = steps.iter().map(|s| s.transformer_name.as_str()).collect();
                println!("    steps: {}", names.join(" -> "));
            }
            TransformerKind::Failover { alternatives } => {
                println!("    alternatives: {}", alternatives.join(", "));
            }
        }
        for supported in &transformer.supported {
            println!("    {}", supported);
        }
        println!("    read from: {}", transformer.read_from);
        println!();
    }

    println!("Total: {} transformers", merged.transformers.len());
    Ok(())
}

fn cmd_merge(merged: &MergedConfig, format: &str) -> Result<()> {
    let bytes = merged
        .to_config()
        .to_bytes(format)
        .context("Failed to write merged config")?;
    print!("{}", String::from_utf8_lossy(&bytes));
    if format == "json" {
        println!();
    }
    Ok(())
}

fn cmd_find(merged: &MergedConfig, config: &Config, query: &Query, size: i64) -> Result<()> {
    let index = TransformIndex::build(merged);
    let options = request_options(config, query);
    match index.find_transformer_name(
        &query.source,
        size,
        &query.target,
        &options,
        query.rendition.as_deref(),
    ) {
        Some(name) => {
            println!("{}", name);
            Ok(())
        }
        None => {
            println!("none");
            std::process::exit(1);
        }
    }
}

fn cmd_max_size(merged: &MergedConfig, config: &Config, query: &Query) -> Result<()> {
    let index = TransformIndex::build(merged);
    let options = request_options(config, query);
    let max = index.find_max_size(
        &query.source,
        &query.target,
        &options,
        query.rendition.as_deref(),
    );
    println!("{}", max);
    Ok(())
}

fn cmd_plan(merged: &MergedConfig, config: &Config, query: &Query, size: i64) -> Result<()> {
    let index = TransformIndex::build(merged);
    let options = request_options(config, query);
    let plan = Planner::new(&index)
        .plan(
            &query.source,
            size,
            &query.target,
            &options,
            query.rendition.as_deref(),
        )
        .context("Failed to expand plan")?;

    match plan {
        Some(plan) => {
            println!("Planning: {} -> {}", query.source, query.target);
            println!();
            print!("{}", plan);
            println!();
            println!("Engine steps: {}", plan.root.engine_steps());
            Ok(())
        }
        None => {
            println!("none");
            std::process::exit(1);
        }
    }
}

fn cmd_check_context(file: &Path) -> Result<()> {
    let data = std::fs::read(file).context("Failed to read context file")?;
    let format = detect_format(&file.to_string_lossy())
        .filter(|f| *f != "toml")
        .unwrap_or("json");
    let ctx = ExecutionContext::from_bytes_format(&data, format).context("Invalid execution context")?;

    println!("reference: {}", ctx.reference());
    println!("depth: {}", ctx.depth());
    if let Some(step) = ctx.current_step() {
        println!("current step: {}", step);
    }
    if let Some(parent) = ctx.parent_name() {
        println!(
            "parent: {} ({})",
            parent,
            if ctx.is_parent_a_failover() { "failover" } else { "pipeline" }
        );
    }
    println!("retries: {}", ctx.attempted_retries());
    if let Some(source) = ctx.source_reference() {
        println!("source reference: {}", source);
    }
    if !ctx.options().is_empty() {
        println!("options:");
        for (name, value) in ctx.options() {
            println!("  {} = {}", name, value);
        }
    }
    Ok(())
}

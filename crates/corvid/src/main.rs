//! Corvid - tool-using agent engine.
//!
//! Main entry point for the Corvid CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;
mod services;

use commands::{ask, guard, pipeline, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Corvid - tool-using agent engine with guarded tools and node pipelines
#[derive(Parser)]
#[command(name = "corvid")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: $CORVID_CONFIG_DIR/corvid.toml or the platform config dir)
    #[arg(short, long, global = true, env = "CORVID_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask the agent a question using the built-in tools
    Ask(ask::AskArgs),

    /// Evaluate an arithmetic expression safely
    Eval(guard::EvalArgs),

    /// Check whether an outbound URL is allowed
    CheckUrl(guard::CheckUrlArgs),

    /// Validate a SQL query and apply the row limit
    CheckSql(guard::CheckSqlArgs),

    /// List the built-in tools
    Tools(tools::ToolsArgs),

    /// Run or validate a pipeline definition
    Pipeline(pipeline::PipelineArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = corvid_config::discover_settings(cli.config.as_deref())?;
    let _guard = logging::init(&loaded.settings.logging, cli.verbose);
    let settings = loaded.settings.finalize()?;

    tracing::debug!(
        source = ?loaded.source,
        environment = %settings.environment,
        "Configuration ready"
    );

    let ctx = commands::Context {
        settings,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Ask(args) => ask::run(args, &ctx).await,
        Commands::Eval(args) => guard::eval(args, &ctx),
        Commands::CheckUrl(args) => guard::check_url(args, &ctx).await,
        Commands::CheckSql(args) => guard::check_sql(args, &ctx),
        Commands::Tools(args) => tools::run(args, &ctx),
        Commands::Pipeline(args) => pipeline::run(args, &ctx).await,
    }
}

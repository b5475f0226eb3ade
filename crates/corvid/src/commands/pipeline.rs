//! Pipeline commands.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use corvid_agent::CancellationToken;
use corvid_pipeline::PipelineDefinition;
use serde_json::Value;

use super::{Context, print_json};
use crate::services;

#[derive(Args, Debug)]
pub struct PipelineArgs {
    #[command(subcommand)]
    pub command: PipelineCommand,
}

#[derive(Subcommand, Debug)]
pub enum PipelineCommand {
    /// Execute a pipeline definition (TOML or JSON)
    Run {
        /// Path to the definition file
        definition: PathBuf,

        /// Request payload as JSON, available as `_initial_input`
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Check a definition without running it
    Validate {
        /// Path to the definition file
        definition: PathBuf,
    },
}

pub async fn run(args: PipelineArgs, ctx: &Context) -> Result<()> {
    match args.command {
        PipelineCommand::Run { definition, input } => {
            run_pipeline(definition, input.as_deref(), ctx).await
        }
        PipelineCommand::Validate { definition } => validate(definition, ctx),
    }
}

async fn run_pipeline(path: PathBuf, input: Option<&str>, ctx: &Context) -> Result<()> {
    let definition = PipelineDefinition::from_file(&path)?;
    let input: Value = match input {
        Some(raw) => serde_json::from_str(raw).context("--input must be valid JSON")?,
        None => Value::Object(Default::default()),
    };

    let services = services::node_services(&ctx.settings)?;
    let pipeline = definition.build(&services)?;

    let cancellation = CancellationToken::new();
    let on_ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let run = pipeline.run_with_cancellation(input, &cancellation).await?;

    if ctx.json_output {
        return print_json(&run);
    }
    if ctx.verbose {
        for timing in &run.timings {
            eprintln!("{} ({}) {}ms", timing.node, timing.kind, timing.duration_ms);
        }
        let degraded = services.monitor.snapshot();
        if degraded.count > 0 {
            eprintln!("degraded retrievals: {}", degraded.count);
        }
    }

    match &run.final_result {
        Some(Value::String(text)) => println!("{text}"),
        Some(other) => print_json(other)?,
        None => print_json(&run.context)?,
    }
    Ok(())
}

fn validate(path: PathBuf, ctx: &Context) -> Result<()> {
    let definition = PipelineDefinition::from_file(&path)?;
    definition.validate()?;

    if ctx.json_output {
        return print_json(&definition);
    }
    println!("{}: {} node(s)", definition.name, definition.nodes.len());
    for node in &definition.nodes {
        println!("  {} ({})", node.id(), node.kind());
    }
    Ok(())
}

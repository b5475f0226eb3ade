//! List the tools an agent would be given.

use anyhow::Result;
use clap::Args;

use super::{Context, print_json};
use crate::services;

#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Include `text_to_sql`, which needs the LLM backend
    #[arg(long)]
    pub with_llm: bool,
}

pub fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let llm = if args.with_llm {
        Some(services::llm_backend(&ctx.settings)?)
    } else {
        None
    };
    let registry = services::tool_registry(&ctx.settings, llm)?;
    let descriptors = registry.list();

    if ctx.json_output {
        return print_json(&descriptors);
    }

    for tool in &descriptors {
        println!("{}: {}", tool.name, tool.description);
        if ctx.verbose {
            for param in &tool.parameters {
                let required = if param.required { " (required)" } else { "" };
                println!("    {}{}: {}", param.name, required, param.description);
            }
        }
    }
    Ok(())
}

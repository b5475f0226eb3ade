//! Ask command - one agent run over the built-in tools.

use anyhow::{Result, bail};
use clap::Args;
use corvid_agent::{Agent, AgentEvent, CancellationToken, RunResult, StrategyKind};
use futures::StreamExt;

use super::{Context, print_json};
use crate::services;

/// Arguments for the ask command.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question or task
    #[arg(required = true)]
    pub query: String,

    /// Reasoning strategy: react, structured or plan (default: agent.strategy)
    #[arg(short, long)]
    pub strategy: Option<StrategyKind>,

    /// Iteration cap (default: agent.max_iterations)
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Print every event as a JSON line while the run progresses
    #[arg(long)]
    pub stream: bool,
}

/// Run the ask command.
pub async fn run(args: AskArgs, ctx: &Context) -> Result<()> {
    let settings = &ctx.settings;
    let backend = services::llm_backend(settings)?;
    let tools = services::tool_registry(settings, Some(backend.clone()))?;

    let mut config = services::agent_config(settings);
    if let Some(max) = args.max_iterations {
        config = config.with_max_iterations(max);
    }
    let strategy = match args.strategy {
        Some(kind) => kind,
        None => services::default_strategy(settings)?,
    };

    let agent = Agent::builder()
        .with_shared_backend(backend)
        .with_tools(tools)
        .with_config(config)
        .with_strategy(strategy)
        .build()?;

    let cancellation = CancellationToken::new();
    let on_ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted; cancelling after the current step");
            on_ctrl_c.cancel();
        }
    });

    let result = if args.stream {
        stream_events(&agent, &args.query, cancellation).await?
    } else {
        let result = agent.run(&args.query, cancellation).await;
        print_result(&result, ctx)?;
        result
    };

    if !result.success {
        bail!("run ended in state {:?}", result.state);
    }
    Ok(())
}

async fn stream_events(
    agent: &Agent,
    query: &str,
    cancellation: CancellationToken,
) -> Result<RunResult> {
    let mut events = agent.run_stream(query, cancellation);
    let mut last = None;
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
        if let AgentEvent::End { result } = event {
            last = Some(result);
        }
    }
    match last {
        Some(result) => Ok(result),
        None => bail!("event stream ended without a result"),
    }
}

fn print_result(result: &RunResult, ctx: &Context) -> Result<()> {
    if ctx.json_output {
        return print_json(result);
    }

    if ctx.verbose {
        for step in &result.steps {
            eprintln!("[{}] {}", step.step_type.as_str(), step.content);
        }
        eprintln!(
            "-- {} iteration(s), strategy {}, run {}",
            result.iterations, result.strategy, result.run_id
        );
    }

    if let Some(answer) = &result.answer {
        println!("{answer}");
    }
    if let Some(error) = &result.error {
        eprintln!("error: {error}");
    }
    Ok(())
}

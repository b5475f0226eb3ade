//! Direct access to the three input guards.

use anyhow::{Result, bail};
use clap::Args;
use corvid_guard::{EgressGuard, QuerySanitizer, evaluate};
use serde_json::json;

use super::{Context, print_json};

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Arithmetic expression, e.g. "sqrt(16) + 2"
    #[arg(required = true)]
    pub expression: String,
}

#[derive(Args, Debug)]
pub struct CheckUrlArgs {
    /// URL to validate
    #[arg(required = true)]
    pub url: String,
}

#[derive(Args, Debug)]
pub struct CheckSqlArgs {
    /// SQL statement to validate
    #[arg(required = true)]
    pub sql: String,

    /// Row limit to request (capped at sql.max_rows)
    #[arg(short, long)]
    pub limit: Option<u32>,
}

/// Evaluate an expression; exits non-zero when it is rejected.
pub fn eval(args: EvalArgs, ctx: &Context) -> Result<()> {
    let value = evaluate(&args.expression)?;
    if ctx.json_output {
        print_json(&json!({ "expression": args.expression, "result": value }))
    } else {
        println!("{value}");
        Ok(())
    }
}

/// Validate a URL against the configured egress policy.
pub async fn check_url(args: CheckUrlArgs, ctx: &Context) -> Result<()> {
    let guard = EgressGuard::new()
        .with_allowed_domains(ctx.settings.http_tool.allowed_domains.iter());
    let decision = guard.validate(&args.url).await;

    if ctx.json_output {
        print_json(&decision)?;
    } else if decision.allowed {
        println!("allowed: {}", decision.reason);
        if ctx.verbose {
            for addr in &decision.addresses {
                println!("  {}", addr.ip());
            }
        }
    }

    if !decision.allowed {
        bail!("blocked: {}", decision.reason);
    }
    Ok(())
}

/// Sanitize a query; prints the executable SQL or the rejection reasons.
pub fn check_sql(args: CheckSqlArgs, ctx: &Context) -> Result<()> {
    let sanitizer = QuerySanitizer::new(ctx.settings.sql.max_rows);
    let (safe_sql, result) = sanitizer.sanitize_with_limit(&args.sql, args.limit);

    if ctx.json_output {
        print_json(&json!({
            "sql": safe_sql,
            "is_valid": result.is_valid,
            "errors": result.errors,
            "warnings": result.warnings,
        }))?;
    } else if result.is_valid {
        println!("{safe_sql}");
        for warning in &result.warnings {
            eprintln!("warning: {warning}");
        }
    }

    if !result.is_valid {
        bail!("query rejected: {}", result.errors.join("; "));
    }
    Ok(())
}

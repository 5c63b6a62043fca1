//! qroute: Query Router Main Binary
//!
//! Usage:
//!   qroute --query "text"         - Route one query and print the response
//!   qroute --query "text" --json  - Print the full routing result as JSON
//!   qroute --cli                  - Start interactive CLI mode
//!   qroute --help                 - Show help

mod cli;

use std::sync::Arc;

use qroute_core::{Config, LlmClient, QueryRouter};
use tracing_subscriber::EnvFilter;

/// Run mode
enum RunMode {
    /// One-shot query
    Query { text: String, json: bool },
    /// Interactive CLI mode
    Cli,
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = parse_args()?;

    match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("qroute {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    // qroute.toml if present, environment otherwise
    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting qroute...");
    tracing::info!("Model: {}", config.llm.model);

    let client = LlmClient::new(config.llm_config())
        .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {}", e))?;
    let router = QueryRouter::from_config(&config, Arc::new(client))
        .map_err(|e| anyhow::anyhow!("Failed to create router: {}", e))?;

    match mode {
        RunMode::Query { text, json } => cli::run_query(&router, &text, json).await,
        RunMode::Cli => {
            tracing::info!("Running in CLI mode");
            cli::run_cli(router).await
        }
        _ => Ok(()),
    }
}

/// Parse command line arguments
fn parse_args() -> anyhow::Result<RunMode> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut query = None;
    let mut json = false;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--cli" | "-c" => return Ok(RunMode::Cli),
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            "--json" => json = true,
            "--query" | "-q" => {
                let text = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--query requires a value"))?;
                query = Some(text.clone());
            }
            other => return Err(anyhow::anyhow!("Unknown argument: {}", other)),
        }
    }

    Ok(match query {
        Some(text) => RunMode::Query { text, json },
        None => RunMode::Help,
    })
}

/// Print help message
fn print_help() {
    println!("qroute - Query Router");
    println!();
    println!("Usage:");
    println!("  qroute --query <text>         Route one query and print the response");
    println!("  qroute --query <text> --json  Print the full routing result as JSON");
    println!("  qroute --cli                  Start interactive CLI mode");
    println!("  qroute --help                 Show this help message");
    println!("  qroute --version              Show version");
    println!();
    println!("Configuration is read from ./qroute.toml when present.");
    println!();
    println!("Environment Variables:");
    println!("  LLM_API_KEY                API key (required)");
    println!("  LLM_MODEL                  Model name (default: claude-sonnet-4-20250514)");
    println!("  LLM_PROVIDER               Provider: claude or openai (default: claude)");
    println!("  LLM_BASE_URL               Custom API endpoint");
    println!("  ROUTER_TIMEOUT_SECS        Whole-request timeout (default: 300)");
    println!("  ROUTER_CLASSIFIER_WORKERS  Classifier worker permits (default: 4)");
    println!("  AUDIT_ENABLED              Enable the audit log (default: true)");
    println!("  AUDIT_LOG_FILE             Audit log path (default: logs/audit.log)");
}

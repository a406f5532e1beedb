//! deepsearch: an iterative web research agent exposed as an MCP tool.

mod config;
mod http;
mod mcp;
mod sidecar;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::ResearchConfig;
use deepsearch_agent::ResearchAgent;
use mcp::McpServer;
use sidecar::{Sidecar, STARTUP_GRACE, STOP_TIMEOUT};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tools::{answer_payload, DeepSearchTool, ToolRegistry};
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "deepsearch", version, about = "Deep web research agent served over MCP")]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, env = "DEEPSEARCH_LOG_JSON")]
    log_json: bool,

    /// Companion process to run while serving, as one command line.
    #[arg(long, global = true, env = "DEEPSEARCH_SIDECAR")]
    sidecar: Option<String>,

    #[command(flatten)]
    research: ResearchConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP as newline-delimited JSON-RPC over stdin/stdout.
    Stdio,
    /// Serve MCP over HTTP (`POST /mcp`, `GET /health`).
    Serve {
        #[arg(long, env = "DEEPSEARCH_BIND", default_value = "127.0.0.1:2024")]
        bind: String,
    },
    /// Research one question and print the cited answer.
    Ask {
        query: String,
        #[arg(short, long, default_value = "low")]
        effort: String,
        /// Override the number of first-round queries.
        #[arg(long)]
        initial_queries: Option<usize>,
        /// Override the maximum number of rounds.
        #[arg(long)]
        max_loops: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let agent = Arc::new(cli.research.build_agent()?);

    match cli.command {
        Command::Ask {
            query,
            effort,
            initial_queries,
            max_loops,
        } => ask(agent, query, effort, initial_queries, max_loops).await,
        Command::Stdio => {
            serve_with_sidecar(cli.sidecar.as_deref(), agent, |server, shutdown| async move {
                mcp::run_stdio(server, shutdown).await
            })
            .await
        }
        Command::Serve { bind } => {
            serve_with_sidecar(cli.sidecar.as_deref(), agent, |server, shutdown| async move {
                http::serve(&bind, server, shutdown).await
            })
            .await
        }
    }
}

/// Logs always go to stderr; stdout belongs to the stdio transport.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn build_server(agent: Arc<ResearchAgent>) -> Arc<McpServer> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(DeepSearchTool::new(agent)));
    Arc::new(McpServer::new(Arc::new(registry)))
}

async fn serve_with_sidecar<F, Fut>(
    sidecar_cmd: Option<&str>,
    agent: Arc<ResearchAgent>,
    run: F,
) -> Result<()>
where
    F: FnOnce(Arc<McpServer>, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut sidecar = match sidecar_cmd {
        Some(cmd) => match Sidecar::start(cmd, STARTUP_GRACE).await {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                warn!("Continuing without sidecar: {:#}", e);
                None
            }
        },
        None => None,
    };

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    info!("🚀 deepsearch v{} ready", env!("CARGO_PKG_VERSION"));
    let result = run(build_server(agent), shutdown).await;

    if let Some(sidecar) = sidecar.as_mut() {
        if let Err(e) = sidecar.shutdown(STOP_TIMEOUT).await {
            warn!("Failed to stop sidecar: {:#}", e);
        }
    }
    result
}

async fn ask(
    agent: Arc<ResearchAgent>,
    query: String,
    effort: String,
    initial_queries: Option<usize>,
    max_loops: Option<usize>,
) -> Result<()> {
    let request = DeepSearchTool::parse_request(serde_json::json!({
        "query": query,
        "effort": effort,
        "initial_search_query_count": initial_queries,
        "max_research_loops": max_loops,
    }))?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        interrupt.cancel();
    });

    let span = info_span!("ask", request_id = %Uuid::new_v4(), effort = %request.effort);
    let report = agent.run(&request, &cancel).instrument(span).await?;
    let payload = answer_payload(&report.answer);

    println!("{}", "Answer".bold().underline());
    println!("{}\n", payload["answer"].as_str().unwrap_or_default());

    if !report.answer.sources.is_empty() {
        println!("{}", "Sources".bold().underline());
        for source in &report.answer.sources {
            println!(
                "{} {} {}",
                source.label().cyan(),
                source.title,
                source.url.dimmed()
            );
        }
    }

    println!(
        "\n{}",
        format!(
            "{} rounds, {} queries, {} failed",
            report.loop_count,
            report.rounds.iter().map(Vec::len).sum::<usize>(),
            report.failures.len()
        )
        .dimmed()
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

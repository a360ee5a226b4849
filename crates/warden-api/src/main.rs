//! Warden CLI and REST API entry point.
//!
//! Binary name: `warden`
//!
//! Parses CLI arguments, wires the orchestrator and sinks, then either
//! starts the REST API server or runs the scripted demo.

mod demo;
mod http;
mod state;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use state::AppState;
use warden_types::workflow::WorkflowState;

#[derive(Parser)]
#[command(name = "warden", about = "Supervised agent workflow orchestrator")]
struct Cli {
    /// Data directory (config, artifacts). Defaults to ./warden-data.
    #[arg(long, global = true, env = "WARDEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Export spans via OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    otel: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server.
    Serve,
    /// Run the scripted end-to-end demo in-process.
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    warden_observe::tracing_setup::init_tracing(cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = match cli.command {
        Commands::Serve => {
            let data_dir = cli.data_dir.unwrap_or_else(|| PathBuf::from("./warden-data"));
            serve(data_dir).await
        }
        Commands::Demo => demo::run().await,
    };

    warden_observe::tracing_setup::shutdown_tracing();
    result
}

async fn serve(data_dir: PathBuf) -> anyhow::Result<()> {
    let state = AppState::init(data_dir).await?;
    let listen_addr = state.config.listen_addr.clone();

    // Approval windows are enforced even when nobody polls: sweep every
    // pending workflow and synthesize timeout rejections
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            for execution in sweep_state.orchestrator.list().await {
                if execution.current_state != WorkflowState::AwaitingApproval {
                    continue;
                }
                match sweep_state
                    .orchestrator
                    .expire_approvals(&execution.workflow_id)
                    .await
                {
                    Ok(Some(outcome)) => {
                        tracing::warn!(
                            workflow_id = execution.workflow_id.as_str(),
                            next_state = ?outcome.next_state,
                            "approval window expired, rejection synthesized"
                        );
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(
                            workflow_id = execution.workflow_id.as_str(),
                            error = %err,
                            "approval expiry sweep failed"
                        );
                    }
                }
            }
        }
    });

    let router = http::router::build_router(state);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(listen_addr = listen_addr.as_str(), "warden API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

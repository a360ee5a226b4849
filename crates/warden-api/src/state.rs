//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by the CLI and REST
//! API. The orchestrator is generic over sink ports; AppState pins it to
//! the concrete infra implementations.

use std::path::PathBuf;
use std::sync::Arc;

use warden_core::clock::SystemClock;
use warden_core::event::EventBus;
use warden_core::monitor::Monitor;
use warden_core::orchestrator::Orchestrator;
use warden_core::rollback::ReconciliationEngine;
use warden_core::supervisor::Supervisor;
use warden_infra::artifact::FsArtifactStore;
use warden_infra::escrow::{EscrowBackend, HttpEscrowClient, MemoryEscrow};
use warden_infra::rollback::LedgerInverseRunner;
use warden_types::config::WardenConfig;

/// Concrete orchestrator type pinned to the infra implementations.
pub type ConcreteOrchestrator =
    Orchestrator<FsArtifactStore, EscrowBackend, LedgerInverseRunner>;

/// Shared application state holding all services.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConcreteOrchestrator>,
    pub supervisor: Arc<Supervisor>,
    pub monitor: Arc<Monitor>,
    /// In-process ledger; also the escrow backend when no facility URL is
    /// configured.
    pub ledger: MemoryEscrow,
    pub config: WardenConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, wire sinks and
    /// services.
    pub async fn init(data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;
        let config = warden_infra::config::load_config(&data_dir).await;

        let artifact_dir = config
            .artifact_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("artifacts"));
        let artifact_sink = FsArtifactStore::new(artifact_dir);

        let ledger = MemoryEscrow::new();
        let escrow_sink = match &config.escrow_api_url {
            Some(url) => {
                let api_key = std::env::var("WARDEN_ESCROW_API_KEY")
                    .map_err(|_| anyhow::anyhow!("WARDEN_ESCROW_API_KEY is required when escrow_api_url is set"))?;
                EscrowBackend::Http(HttpEscrowClient::new(url.clone(), api_key.into())?)
            }
            None => EscrowBackend::Memory(ledger.clone()),
        };

        let clock = Arc::new(SystemClock);
        let reconciler = ReconciliationEngine::new(
            LedgerInverseRunner::new(ledger.clone()),
            config.completion,
        );

        let orchestrator = Arc::new(Orchestrator::new(
            artifact_sink,
            escrow_sink,
            reconciler,
            clock.clone(),
            EventBus::new(1024),
            config.settlement,
        ));

        let supervisor = Arc::new(Supervisor::new("default-supervisor", clock.clone()));
        let monitor = Arc::new(Monitor::new(config.monitor));

        Ok(Self {
            orchestrator,
            supervisor,
            monitor,
            ledger,
            config,
            data_dir,
        })
    }
}

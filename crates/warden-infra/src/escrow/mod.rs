//! Escrow sink implementations.
//!
//! - `http` -- client for the remote escrow facility
//! - `memory` -- in-process ledger for demos and tests
//!
//! [`EscrowBackend`] lets the binary pick one at runtime while the
//! orchestrator stays generic over a single `EscrowSink` type.

pub mod http;
pub mod memory;

pub use http::HttpEscrowClient;
pub use memory::{EscrowAccount, MemoryEscrow};

use warden_core::sink::EscrowSink;
use warden_types::error::SinkError;
use warden_types::escrow::PaymentSplit;

/// Runtime-selected escrow sink.
#[derive(Debug, Clone)]
pub enum EscrowBackend {
    Http(HttpEscrowClient),
    Memory(MemoryEscrow),
}

impl EscrowSink for EscrowBackend {
    async fn lock(
        &self,
        workflow_id: &str,
        amount: f64,
        poster_id: &str,
        executor_id: &str,
    ) -> Result<String, SinkError> {
        match self {
            EscrowBackend::Http(client) => {
                client.lock(workflow_id, amount, poster_id, executor_id).await
            }
            EscrowBackend::Memory(ledger) => {
                ledger.lock(workflow_id, amount, poster_id, executor_id).await
            }
        }
    }

    async fn release(
        &self,
        escrow_id: &str,
        amount: f64,
        recipient_id: &str,
        reason: &str,
    ) -> Result<(), SinkError> {
        match self {
            EscrowBackend::Http(client) => {
                client.release(escrow_id, amount, recipient_id, reason).await
            }
            EscrowBackend::Memory(ledger) => {
                ledger.release(escrow_id, amount, recipient_id, reason).await
            }
        }
    }

    async fn split(&self, escrow_id: &str, splits: &[PaymentSplit]) -> Result<(), SinkError> {
        match self {
            EscrowBackend::Http(client) => client.split(escrow_id, splits).await,
            EscrowBackend::Memory(ledger) => ledger.split(escrow_id, splits).await,
        }
    }
}

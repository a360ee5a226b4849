//! Escrow sink port: fund locking, release, and splitting.

use warden_types::error::SinkError;
use warden_types::escrow::PaymentSplit;

/// Operations against the external escrow facility.
///
/// The core calls `lock` once at workflow start and `split` once at
/// settlement; `release` covers single-recipient milestone payouts. The sum
/// of amounts across releases must never exceed the locked amount -- the
/// core enforces this locally and implementations are expected to enforce
/// it remotely as well.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait EscrowSink: Send + Sync {
    /// Lock funds at workflow start. Returns the escrow handle.
    fn lock(
        &self,
        workflow_id: &str,
        amount: f64,
        poster_id: &str,
        executor_id: &str,
    ) -> impl std::future::Future<Output = Result<String, SinkError>> + Send;

    /// Release part of a lock to a single recipient.
    fn release(
        &self,
        escrow_id: &str,
        amount: f64,
        recipient_id: &str,
        reason: &str,
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;

    /// Distribute part of a lock across multiple recipients atomically.
    fn split(
        &self,
        escrow_id: &str,
        splits: &[PaymentSplit],
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;
}

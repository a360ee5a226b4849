//! Compensating-transaction rollback and post-rejection reconciliation.
//!
//! - `registry` -- records side-effectful actions with their inverses and
//!   replays the inverses in reverse order (saga style)
//! - `reconciliation` -- given a rejected checkpoint, runs the rollback and
//!   computes the partial-completion payout

pub mod reconciliation;
pub mod registry;

pub use reconciliation::{ReconciliationEngine, ReconciliationReport};
pub use registry::{
    ActionOutcome, CleanupStatus, CompensatingAction, CompensationRegistry, InverseRunner,
    NoopInverseRunner, RollbackError, RollbackReport,
};

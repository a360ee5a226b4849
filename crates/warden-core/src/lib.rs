//! Orchestration core for Warden.
//!
//! This crate owns the checkpoint/approval state machine and everything it
//! drives: execution-state capture, the compensating-transaction registry
//! and reconciliation engine, the execution monitor, the supervisor adapter,
//! and the sink "ports" (artifact store, escrow facility) the infrastructure
//! layer implements. It depends only on `warden-types` -- never on any
//! database or IO crate.

pub mod capture;
pub mod clock;
pub mod event;
pub mod monitor;
pub mod orchestrator;
pub mod rollback;
pub mod sink;
pub mod supervisor;

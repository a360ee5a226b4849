//! Shared domain types for Warden.
//!
//! This crate contains the core domain types used across the Warden platform:
//! workflow configs and execution records, checkpoint snapshots, approval
//! handshakes, escrow settlement values, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod approval;
pub mod config;
pub mod error;
pub mod escrow;
pub mod event;
pub mod workflow;

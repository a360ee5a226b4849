//! Infrastructure implementations for Warden.
//!
//! Concrete adapters behind the `warden-core` ports: filesystem and
//! in-memory artifact stores, the remote escrow facility client and an
//! in-process escrow ledger, compensating-inverse runners, configuration
//! loading, and the scripted agent driver used by demos and tests.

pub mod artifact;
pub mod config;
pub mod driver;
pub mod escrow;
pub mod rollback;

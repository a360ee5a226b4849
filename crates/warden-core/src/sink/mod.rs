//! Sink "ports" the orchestration core drives.
//!
//! - `artifact` -- content-addressed store for serialized snapshots
//! - `escrow` -- lock/release/split operations against the escrow facility
//!
//! Both are defined here as traits so the core stays free of IO crates;
//! implementations live in `warden-infra`.

pub mod artifact;
pub mod escrow;

pub use artifact::{ArtifactSink, StoredArtifact};
pub use escrow::EscrowSink;

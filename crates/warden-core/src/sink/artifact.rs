//! Artifact sink port: content-addressed storage for serialized snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_types::error::SinkError;

/// Record returned by a successful `put`.
///
/// The `content_hash` MUST equal the SHA-256 of the stored bytes; the core
/// verifies this on read and fails the workflow on mismatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub artifact_id: String,
    /// Opaque URI; only meaningful to the sink that minted it.
    pub uri: String,
    pub content_hash: String,
    pub size_bytes: usize,
    pub created_at: DateTime<Utc>,
}

/// Content-addressed store for checkpoint artifacts.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in warden-infra.
pub trait ArtifactSink: Send + Sync {
    /// Store bytes under their content hash. Idempotent: identical content
    /// yields the same URI.
    fn put(
        &self,
        content_type: &str,
        bytes: &[u8],
        metadata: BTreeMap<String, String>,
    ) -> impl std::future::Future<Output = Result<StoredArtifact, SinkError>> + Send;

    /// Fetch the bytes behind a URI previously returned by `put`.
    fn get(
        &self,
        uri: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, SinkError>> + Send;
}

//! In-memory artifact store for tests and demos.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use warden_core::sink::{ArtifactSink, StoredArtifact};
use warden_types::error::SinkError;

use super::URI_PREFIX;

/// DashMap-backed [`ArtifactSink`]. Cloning shares the underlying store.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct artifacts stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ArtifactSink for MemoryArtifactStore {
    async fn put(
        &self,
        _content_type: &str,
        bytes: &[u8],
        _metadata: BTreeMap<String, String>,
    ) -> Result<StoredArtifact, SinkError> {
        let content_hash = format!("{:x}", Sha256::digest(bytes));
        let uri = format!("{URI_PREFIX}{content_hash}");
        self.entries.insert(uri.clone(), bytes.to_vec());

        Ok(StoredArtifact {
            artifact_id: format!("artifact_{}", &content_hash[..16]),
            uri,
            content_hash,
            size_bytes: bytes.len(),
            created_at: Utc::now(),
        })
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, SinkError> {
        self.entries
            .get(uri)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SinkError::ArtifactNotFound(uri.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = MemoryArtifactStore::new();
        let stored = store
            .put("checkpoint_state", b"bytes", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(store.get(&stored.uri).await.unwrap(), b"bytes");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_contents() {
        let store = MemoryArtifactStore::new();
        let clone = store.clone();
        let stored = clone
            .put("checkpoint_state", b"shared", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(store.get(&stored.uri).await.unwrap(), b"shared");
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let store = MemoryArtifactStore::new();
        let err = store.get("warden://artifacts/none").await.unwrap_err();
        assert!(matches!(err, SinkError::ArtifactNotFound(_)));
    }
}

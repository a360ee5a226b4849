//! Content-addressed artifact storage backed by the local filesystem.
//!
//! The escrow facility offers no application-level artifact storage, so
//! checkpoint artifacts live locally, addressed by the SHA-256 of their
//! bytes:
//!
//! ```text
//! <base_dir>/<content_hash>           -- the raw bytes
//! <base_dir>/<content_hash>.meta.json -- type, hash, metadata, created_at
//! ```
//!
//! Overwriting is safe: identical content hash means identical content.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use warden_core::sink::{ArtifactSink, StoredArtifact};
use warden_types::error::SinkError;

use super::URI_PREFIX;

/// Metadata record persisted next to each artifact's bytes.
#[derive(Debug, Serialize, Deserialize)]
struct ArtifactRecord {
    artifact_id: String,
    uri: String,
    #[serde(rename = "type")]
    content_type: String,
    content_hash: String,
    size_bytes: usize,
    metadata: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
}

/// Filesystem-backed [`ArtifactSink`].
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    base_dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }

    fn hash(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    fn content_path(&self, hash: &str) -> PathBuf {
        self.base_dir.join(hash)
    }

    fn record_path(&self, hash: &str) -> PathBuf {
        self.base_dir.join(format!("{hash}.meta.json"))
    }

    fn hash_from_uri(uri: &str) -> Result<&str, SinkError> {
        uri.strip_prefix(URI_PREFIX)
            .filter(|h| !h.is_empty() && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| SinkError::Artifact(format!("unsupported artifact URI: {uri}")))
    }
}

impl ArtifactSink for FsArtifactStore {
    async fn put(
        &self,
        content_type: &str,
        bytes: &[u8],
        metadata: BTreeMap<String, String>,
    ) -> Result<StoredArtifact, SinkError> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| SinkError::Artifact(e.to_string()))?;

        let content_hash = Self::hash(bytes);
        let uri = format!("{URI_PREFIX}{content_hash}");
        let created_at = Utc::now();

        let record = ArtifactRecord {
            artifact_id: format!("artifact_{}", &content_hash[..16]),
            uri: uri.clone(),
            content_type: content_type.to_string(),
            content_hash: content_hash.clone(),
            size_bytes: bytes.len(),
            metadata,
            created_at,
        };
        let record_json = serde_json::to_vec_pretty(&record)
            .map_err(|e| SinkError::Artifact(e.to_string()))?;

        tokio::fs::write(self.content_path(&content_hash), bytes)
            .await
            .map_err(|e| SinkError::Artifact(e.to_string()))?;
        tokio::fs::write(self.record_path(&content_hash), record_json)
            .await
            .map_err(|e| SinkError::Artifact(e.to_string()))?;

        tracing::info!(uri = uri.as_str(), size_bytes = bytes.len(), "artifact stored");

        Ok(StoredArtifact {
            artifact_id: record.artifact_id,
            uri,
            content_hash,
            size_bytes: bytes.len(),
            created_at,
        })
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, SinkError> {
        let hash = Self::hash_from_uri(uri)?;
        match tokio::fs::read(self.content_path(hash)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(SinkError::ArtifactNotFound(uri.to_string()))
            }
            Err(err) => Err(SinkError::Artifact(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta() -> BTreeMap<String, String> {
        BTreeMap::from([("workflow_id".to_string(), "wf-1".to_string())])
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(tmp.path());

        let stored = store
            .put("checkpoint_state", b"{\"step\":1}", meta())
            .await
            .unwrap();
        assert!(stored.uri.starts_with(URI_PREFIX));
        assert_eq!(stored.size_bytes, 10);

        let bytes = store.get(&stored.uri).await.unwrap();
        assert_eq!(bytes, b"{\"step\":1}");
    }

    #[tokio::test]
    async fn returned_hash_matches_bytes() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(tmp.path());

        let stored = store.put("checkpoint_state", b"payload", meta()).await.unwrap();
        assert_eq!(stored.content_hash, FsArtifactStore::hash(b"payload"));
        assert_eq!(stored.content_hash.len(), 64);
    }

    #[tokio::test]
    async fn identical_content_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(tmp.path());

        let first = store.put("checkpoint_state", b"same", meta()).await.unwrap();
        let second = store.put("checkpoint_state", b"same", meta()).await.unwrap();
        assert_eq!(first.uri, second.uri);
        assert_eq!(first.content_hash, second.content_hash);
    }

    #[tokio::test]
    async fn get_unknown_uri_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(tmp.path());

        let uri = format!("{URI_PREFIX}{}", "ab".repeat(32));
        let err = store.get(&uri).await.unwrap_err();
        assert!(matches!(err, SinkError::ArtifactNotFound(_)));
    }

    #[tokio::test]
    async fn get_rejects_malformed_uri() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(tmp.path());

        let err = store.get("s3://somewhere/else").await.unwrap_err();
        assert!(matches!(err, SinkError::Artifact(_)));

        // Path traversal in the hash position is rejected, not resolved
        let err = store.get("warden://artifacts/../escape").await.unwrap_err();
        assert!(matches!(err, SinkError::Artifact(_)));
    }

    #[tokio::test]
    async fn record_file_carries_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(tmp.path());

        let stored = store.put("checkpoint_state", b"x", meta()).await.unwrap();
        let record_path = tmp.path().join(format!("{}.meta.json", stored.content_hash));
        let record: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(record_path).await.unwrap()).unwrap();
        assert_eq!(record["type"], "checkpoint_state");
        assert_eq!(record["metadata"]["workflow_id"], "wf-1");
        assert_eq!(record["content_hash"], stored.content_hash);
    }
}

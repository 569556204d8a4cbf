// SPDX-License-Identifier: MIT
//! Recoverable snapshots of target state.
//!
//! A snapshot is captured before any mutating execution and is the rollback
//! source when validation fails. The storage mechanics beyond this contract
//! belong to the host; `FileSnapshotStore` covers the common case of a
//! file-path resource.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Snapshot capture/restore contract.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Capture the current state of `resource`, returning an opaque
    /// snapshot reference.
    async fn capture(&self, resource: &str) -> anyhow::Result<String>;

    /// Restore the state referenced by `snapshot_ref` onto its original
    /// resource.
    async fn restore(&self, snapshot_ref: &str) -> anyhow::Result<()>;
}

// ─── FileSnapshotStore ────────────────────────────────────────────────────────

/// File-backed store: the resource is a file path; its bytes are copied to
/// `{snapshot_dir}/{uuid}.snap` with a JSON sidecar recording the origin path
/// and a SHA-256 digest. Restore verifies the digest before writing back, so
/// a corrupt snapshot fails the rollback instead of silently restoring
/// garbage.
pub struct FileSnapshotStore {
    snapshot_dir: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SnapshotMeta {
    resource: String,
    sha256: String,
    created_at: String,
}

impl FileSnapshotStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            snapshot_dir: data_dir.join("snapshots"),
        }
    }

    fn digest(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn capture(&self, resource: &str) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.snapshot_dir).await?;
        let bytes = tokio::fs::read(resource).await?;
        let name = format!("{}.snap", Uuid::new_v4());
        let meta = SnapshotMeta {
            resource: resource.to_string(),
            sha256: Self::digest(&bytes),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        tokio::fs::write(self.snapshot_dir.join(&name), &bytes).await?;
        tokio::fs::write(
            self.snapshot_dir.join(format!("{name}.meta.json")),
            serde_json::to_string_pretty(&meta)?,
        )
        .await?;
        debug!(resource, snapshot = %name, "snapshot captured");
        Ok(name)
    }

    async fn restore(&self, snapshot_ref: &str) -> anyhow::Result<()> {
        let meta_raw = tokio::fs::read_to_string(
            self.snapshot_dir.join(format!("{snapshot_ref}.meta.json")),
        )
        .await?;
        let meta: SnapshotMeta = serde_json::from_str(&meta_raw)?;
        let bytes = tokio::fs::read(self.snapshot_dir.join(snapshot_ref)).await?;
        let digest = Self::digest(&bytes);
        if digest != meta.sha256 {
            warn!(snapshot = snapshot_ref, "snapshot digest mismatch");
            anyhow::bail!(
                "snapshot {snapshot_ref} digest mismatch: expected {}, got {digest}",
                meta.sha256
            );
        }
        tokio::fs::write(&meta.resource, &bytes).await?;
        debug!(resource = %meta.resource, snapshot = snapshot_ref, "snapshot restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn capture_then_restore_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("service.conf");
        tokio::fs::write(&target, b"replicas = 3\n").await.unwrap();

        let store = FileSnapshotStore::new(dir.path());
        let snapshot_ref = store.capture(target.to_str().unwrap()).await.unwrap();

        tokio::fs::write(&target, b"replicas = 0\n").await.unwrap();
        store.restore(&snapshot_ref).await.unwrap();

        let restored = tokio::fs::read(&target).await.unwrap();
        assert_eq!(restored, b"replicas = 3\n");
    }

    #[tokio::test]
    async fn capture_of_missing_resource_fails() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        assert!(store.capture("/nonexistent/resource").await.is_err());
    }

    #[tokio::test]
    async fn corrupt_snapshot_fails_restore() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("page.md");
        tokio::fs::write(&target, b"original").await.unwrap();

        let store = FileSnapshotStore::new(dir.path());
        let snapshot_ref = store.capture(target.to_str().unwrap()).await.unwrap();

        // Tamper with the stored bytes.
        tokio::fs::write(dir.path().join("snapshots").join(&snapshot_ref), b"tampered")
            .await
            .unwrap();
        assert!(store.restore(&snapshot_ref).await.is_err());
    }
}

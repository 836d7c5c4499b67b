//! Side-car version store
//!
//! Keeps non-current versions of an item in a directory of its own, keyed by
//! a hash of the item path, with a JSON manifest describing each version.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    versions::{FileVersion, VersionStore},
};
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::filesystem::{atomic_write, to_utc};

const MANIFEST_FILE: &str = "manifest.json";

pub struct SidecarVersionStore {
    root: PathBuf,
    // Serializes manifest read-modify-write cycles
    manifest_lock: Mutex<()>,
}

impl SidecarVersionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest_lock: Mutex::new(()),
        }
    }

    fn item_dir(&self, url: &Path) -> PathBuf {
        let digest = Sha256::digest(url.to_string_lossy().as_bytes());
        self.root.join(format!("{:x}", digest))
    }

    async fn read_manifest(dir: &Path) -> Result<Vec<FileVersion>> {
        match fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                BridgeError::OperationFailed(format!("Corrupt version manifest: {}", e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn write_manifest(dir: &Path, versions: &[FileVersion]) -> Result<()> {
        let raw = serde_json::to_vec_pretty(versions).map_err(|e| {
            BridgeError::OperationFailed(format!("Failed to encode version manifest: {}", e))
        })?;
        atomic_write(&dir.join(MANIFEST_FILE), &raw).await?;
        Ok(())
    }

    /// Record a conflicting version of `url` saved by another device
    pub async fn record_conflict(
        &self,
        url: &Path,
        contents: Bytes,
        saving_device: Option<String>,
    ) -> Result<FileVersion> {
        let _guard = self.manifest_lock.lock().await;
        let dir = self.item_dir(url);
        let id = Uuid::new_v4().to_string();
        let version_url = dir.join(format!("{}.version", id));
        atomic_write(&version_url, contents.as_ref()).await?;

        let version = FileVersion {
            id,
            url: version_url,
            modified_at: Some(Utc::now()),
            saving_device,
            is_current: false,
            is_resolved: false,
        };

        let mut versions = Self::read_manifest(&dir).await?;
        versions.push(version.clone());
        Self::write_manifest(&dir, &versions).await?;

        debug!(item = ?url, version = %version.id, "Recorded conflict version");
        Ok(version)
    }

    /// Whether `url` has at least one unresolved conflict version
    pub async fn has_unresolved_conflicts(&self, url: &Path) -> Result<bool> {
        Ok(!self.unresolved_conflict_versions(url).await?.is_empty())
    }
}

#[async_trait]
impl VersionStore for SidecarVersionStore {
    async fn current_version(&self, url: &Path) -> Result<Option<FileVersion>> {
        let contents = match fs::read(url).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BridgeError::Io(e)),
        };
        let metadata = fs::metadata(url).await?;

        Ok(Some(FileVersion {
            id: format!("{:x}", Sha256::digest(&contents)),
            url: url.to_path_buf(),
            modified_at: to_utc(metadata.modified()),
            saving_device: None,
            is_current: true,
            is_resolved: true,
        }))
    }

    async fn other_versions(&self, url: &Path) -> Result<Vec<FileVersion>> {
        Self::read_manifest(&self.item_dir(url)).await
    }

    async fn unresolved_conflict_versions(&self, url: &Path) -> Result<Vec<FileVersion>> {
        Ok(self
            .other_versions(url)
            .await?
            .into_iter()
            .filter(|v| !v.is_resolved)
            .collect())
    }

    async fn replace_item(&self, version: &FileVersion, url: &Path) -> Result<()> {
        let contents = fs::read(&version.url).await?;
        atomic_write(url, &contents).await?;
        debug!(item = ?url, version = %version.id, "Replaced item with version");
        Ok(())
    }

    async fn remove_other_versions(&self, url: &Path) -> Result<()> {
        let _guard = self.manifest_lock.lock().await;
        let dir = self.item_dir(url);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(item = ?url, "Removed other versions");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn mark_resolved(&self, version: &FileVersion) -> Result<()> {
        let _guard = self.manifest_lock.lock().await;
        let Some(dir) = version.url.parent() else {
            return Ok(());
        };

        let mut versions = Self::read_manifest(dir).await?;
        let mut touched = false;
        for stored in versions.iter_mut().filter(|v| v.id == version.id) {
            stored.is_resolved = true;
            touched = true;
        }
        if touched {
            Self::write_manifest(dir, &versions).await?;
        }
        Ok(())
    }
}

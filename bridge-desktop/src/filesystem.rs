//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Tokio-based file system implementation
///
/// Items below `container_root` are treated as ubiquitous; everything else is
/// local. Marking an item ubiquitous is a plain move between the two trees.
pub struct TokioFileSystem {
    container_root: PathBuf,
}

impl TokioFileSystem {
    /// Create a file system accessor whose cloud container lives at `container_root`
    pub fn new(container_root: impl Into<PathBuf>) -> Self {
        Self {
            container_root: container_root.into(),
        }
    }

    pub fn container_root(&self) -> &Path {
        &self.container_root
    }

    /// Convert std::io::Error to BridgeError
    fn map_io_error(e: io::Error) -> BridgeError {
        BridgeError::Io(e)
    }

    async fn ensure_absent(path: &Path) -> Result<()> {
        if fs::try_exists(path).await.map_err(Self::map_io_error)? {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        Ok(())
    }
}

/// Write `data` next to `path` and rename it into place
pub(crate) async fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    if let Err(e) = fs::write(&staging, data).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&staging, path).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e);
    }
    Ok(())
}

pub(crate) fn to_utc(time: io::Result<std::time::SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

fn copy_tree<'a>(
    from: &'a Path,
    to: &'a Path,
) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let metadata = fs::metadata(from).await?;
        if !metadata.is_dir() {
            fs::copy(from, to).await?;
            return Ok(());
        }

        fs::create_dir_all(to).await?;
        let mut read_dir = fs::read_dir(from).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let target = to.join(entry.file_name());
            copy_tree(&entry.path(), &target).await?;
        }
        Ok(())
    })
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;

        Ok(FileMetadata {
            size: metadata.len(),
            created_at: to_utc(metadata.created()),
            modified_at: to_utc(metadata.modified()),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file_atomic(&self, path: &Path, data: Bytes) -> Result<()> {
        atomic_write(path, data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error)?
        {
            entries.push(entry.path());
        }
        entries.sort();

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    async fn move_item(&self, from: &Path, to: &Path) -> Result<()> {
        Self::ensure_absent(to).await?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(Self::map_io_error)?;
        }
        fs::rename(from, to).await.map_err(Self::map_io_error)?;
        debug!(from = ?from, to = ?to, "Moved item");
        Ok(())
    }

    async fn copy_item(&self, from: &Path, to: &Path) -> Result<()> {
        Self::ensure_absent(to).await?;
        copy_tree(from, to).await.map_err(Self::map_io_error)?;
        debug!(from = ?from, to = ?to, "Copied item");
        Ok(())
    }

    async fn remove_item(&self, path: &Path) -> Result<()> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;
        if metadata.is_dir() {
            fs::remove_dir_all(path)
                .await
                .map_err(Self::map_io_error)?;
        } else {
            fs::remove_file(path).await.map_err(Self::map_io_error)?;
        }
        debug!(path = ?path, "Removed item");
        Ok(())
    }

    async fn set_ubiquitous(
        &self,
        ubiquitous: bool,
        item: &Path,
        destination: &Path,
    ) -> Result<()> {
        if ubiquitous && !destination.starts_with(&self.container_root) {
            return Err(BridgeError::OperationFailed(format!(
                "{} is outside the cloud container",
                destination.display()
            )));
        }
        self.move_item(item, destination).await?;
        debug!(item = ?item, destination = ?destination, ubiquitous, "Changed ubiquity");
        Ok(())
    }

    async fn is_ubiquitous_item(&self, path: &Path) -> Result<bool> {
        Ok(path.starts_with(&self.container_root) && self.exists(path).await?)
    }
}

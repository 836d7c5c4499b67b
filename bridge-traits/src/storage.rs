//! Storage and File System Abstractions
//!
//! Provides the platform-agnostic file system contract used for both the
//! local offline documents directory and the ubiquitous (cloud-synced)
//! documents directory.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts file I/O operations to support different platforms:
/// - Desktop: Direct filesystem access, a plain directory stands in for the cloud container
/// - iOS/macOS: `FileManager` plus `NSFileCoordinator` for coordinated writes
///
/// Moves, copies and removals are expected to be atomic from the point of
/// view of other readers of the same path.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn promote(fs: &dyn FileSystemAccess, local: &Path, cloud: &Path) -> Result<()> {
///     if !fs.exists(cloud).await? {
///         fs.set_ubiquitous(true, local, cloud).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Replace the file contents atomically, creating it if needed
    ///
    /// Readers observe either the previous contents or the new contents,
    /// never a partially written file.
    async fn write_file_atomic(&self, path: &Path, data: Bytes) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Move an item. Fails if the destination already exists.
    async fn move_item(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy an item. Fails if the destination already exists.
    async fn copy_item(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a file or a directory tree
    async fn remove_item(&self, path: &Path) -> Result<()>;

    /// Remove an item under a coordinated write intent
    ///
    /// Platforms with file coordination wrap the removal so that other
    /// processes presenting the file are told to relinquish it first.
    async fn remove_coordinated(&self, path: &Path) -> Result<()> {
        self.remove_item(path).await
    }

    /// Move an item into (`ubiquitous == true`) or out of the cloud container
    ///
    /// `item` is the current location and `destination` the target location.
    async fn set_ubiquitous(&self, ubiquitous: bool, item: &Path, destination: &Path)
        -> Result<()>;

    /// Whether the item lives in the cloud container
    async fn is_ubiquitous_item(&self, path: &Path) -> Result<bool>;

    /// Byte-for-byte content comparison
    async fn contents_equal(&self, a: &Path, b: &Path) -> Result<bool> {
        let left = self.read_file(a).await?;
        let right = self.read_file(b).await?;
        Ok(left == right)
    }

    /// Check whether the path is an existing directory
    async fn is_directory(&self, path: &Path) -> Result<bool> {
        if !self.exists(path).await? {
            return Ok(false);
        }
        Ok(self.metadata(path).await?.is_directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Fs {}

        #[async_trait]
        impl FileSystemAccess for Fs {
            async fn exists(&self, path: &Path) -> Result<bool>;
            async fn metadata(&self, path: &Path) -> Result<FileMetadata>;
            async fn create_dir_all(&self, path: &Path) -> Result<()>;
            async fn read_file(&self, path: &Path) -> Result<Bytes>;
            async fn write_file_atomic(&self, path: &Path, data: Bytes) -> Result<()>;
            async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;
            async fn move_item(&self, from: &Path, to: &Path) -> Result<()>;
            async fn copy_item(&self, from: &Path, to: &Path) -> Result<()>;
            async fn remove_item(&self, path: &Path) -> Result<()>;
            async fn set_ubiquitous(&self, ubiquitous: bool, item: &Path, destination: &Path) -> Result<()>;
            async fn is_ubiquitous_item(&self, path: &Path) -> Result<bool>;
        }
    }

    #[tokio::test]
    async fn test_contents_equal_reads_both_sides() {
        let mut fs = MockFs::new();
        fs.expect_read_file()
            .withf(|path| path == Path::new("/a"))
            .returning(|_| Ok(Bytes::from_static(b"same")));
        fs.expect_read_file()
            .withf(|path| path == Path::new("/b"))
            .returning(|_| Ok(Bytes::from_static(b"same")));

        assert!(fs
            .contents_equal(Path::new("/a"), Path::new("/b"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_is_directory_skips_metadata_for_missing_path() {
        let mut fs = MockFs::new();
        fs.expect_exists().returning(|_| Ok(false));
        fs.expect_metadata().never();

        assert!(!fs.is_directory(Path::new("/missing")).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_coordinated_defaults_to_remove_item() {
        let mut fs = MockFs::new();
        fs.expect_remove_item()
            .withf(|path| path == Path::new("/doc.txt"))
            .times(1)
            .returning(|_| Ok(()));

        fs.remove_coordinated(Path::new("/doc.txt")).await.unwrap();
    }
}

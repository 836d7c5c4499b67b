//! File Version Abstraction
//!
//! Access to the host's per-file version history, used to inspect and resolve
//! version conflicts produced by concurrent edits on different devices.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// One stored version of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    /// Host-assigned identifier, stable for the life of the version
    pub id: String,
    /// Where the version's contents can be read
    pub url: PathBuf,
    pub modified_at: Option<DateTime<Utc>>,
    /// Name of the device that saved the version, if known
    pub saving_device: Option<String>,
    pub is_current: bool,
    pub is_resolved: bool,
}

impl FileVersion {
    /// Pick the more recently modified of two versions
    ///
    /// Versions without a timestamp lose. On a tie the first argument wins.
    pub fn later_of<'a>(a: &'a FileVersion, b: &'a FileVersion) -> &'a FileVersion {
        match (a.modified_at, b.modified_at) {
            (Some(left), Some(right)) if right > left => b,
            (None, Some(_)) => b,
            _ => a,
        }
    }
}

/// Version store trait
///
/// # Platform Support
///
/// - **iOS/macOS**: `NSFileVersion`
/// - **Desktop**: side-car version directory
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// The version currently at `url`
    async fn current_version(&self, url: &Path) -> Result<Option<FileVersion>>;

    /// All non-current versions
    async fn other_versions(&self, url: &Path) -> Result<Vec<FileVersion>>;

    /// Non-current versions still flagged as an unresolved conflict
    async fn unresolved_conflict_versions(&self, url: &Path) -> Result<Vec<FileVersion>>;

    /// Replace the item at `url` with the contents of `version`
    async fn replace_item(&self, version: &FileVersion, url: &Path) -> Result<()>;

    /// Drop every non-current version
    async fn remove_other_versions(&self, url: &Path) -> Result<()>;

    /// Flag a version as resolved
    async fn mark_resolved(&self, version: &FileVersion) -> Result<()>;
}

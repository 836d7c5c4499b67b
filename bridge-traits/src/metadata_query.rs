//! Metadata Query Abstraction
//!
//! The host's live query over the cloud container. Once started it reports
//! gathering progress and keeps an up-to-date result set of raw records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{BridgeError, Result};

/// Download state of a cloud item as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Local copy is the latest version
    Current,
    /// A local copy exists but a newer version is available
    Downloaded,
    /// A download is in flight
    Downloading,
    /// Only the placeholder exists locally
    NotDownloaded,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Current => "current",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::NotDownloaded => "not_downloaded",
        }
    }
}

impl FromStr for DownloadStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "current" => Ok(DownloadStatus::Current),
            "downloaded" => Ok(DownloadStatus::Downloaded),
            "downloading" => Ok(DownloadStatus::Downloading),
            "not_downloaded" | "notdownloaded" => Ok(DownloadStatus::NotDownloaded),
            _ => Err(BridgeError::OperationFailed(format!(
                "Unknown download status: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw record produced by the host query
///
/// Every attribute is optional: hosts can hand out records that are still
/// being populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    pub url: Option<PathBuf>,
    pub fs_name: Option<String>,
    pub download_status: Option<DownloadStatus>,
    pub modified_at: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

/// Notifications delivered by a running query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryNotification {
    /// Initial gathering phase started
    GatheringStarted,
    /// The result set changed
    Updated,
    /// Initial gathering phase finished
    GatheringFinished,
}

/// Where the query looks and which file extensions it accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryScope {
    pub root: PathBuf,
    /// Accepted extensions without the leading dot. `"*"` accepts any name.
    pub extensions: Vec<String>,
}

impl QueryScope {
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            extensions,
        }
    }

    /// Whether a file name passes the extension filter
    pub fn matches(&self, path: &Path) -> bool {
        if self.extensions.is_empty() || self.extensions.iter().any(|e| e == "*") {
            return true;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.iter().any(|e| e == ext),
            None => false,
        }
    }
}

/// Live metadata query trait
///
/// # Platform Support
///
/// - **iOS/macOS**: `NSMetadataQuery` scoped to ubiquitous documents
/// - **Desktop**: periodic directory scan
#[async_trait]
pub trait MetadataQuery: Send + Sync {
    /// Start the query and return its notification stream
    ///
    /// Starting an already running query restarts it with the new scope.
    async fn start(&self, scope: QueryScope) -> Result<Box<dyn QueryNotificationStream>>;

    /// Snapshot of the current result set
    async fn results(&self) -> Vec<Arc<MetadataRecord>>;

    /// Stop delivering notifications
    async fn stop(&self) -> Result<()>;
}

/// Stream of query notifications
#[async_trait]
pub trait QueryNotificationStream: Send {
    /// Get the next notification
    ///
    /// Returns `None` when the query was stopped.
    async fn next(&mut self) -> Option<QueryNotification>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_status_round_trip_names() {
        for status in [
            DownloadStatus::Current,
            DownloadStatus::Downloaded,
            DownloadStatus::Downloading,
            DownloadStatus::NotDownloaded,
        ] {
            assert_eq!(status.as_str().parse::<DownloadStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<DownloadStatus>().is_err());
    }

    #[test]
    fn test_wildcard_scope_matches_everything() {
        let scope = QueryScope::new("/cloud", vec!["*".to_string()]);
        assert!(scope.matches(Path::new("/cloud/notes.txt")));
        assert!(scope.matches(Path::new("/cloud/README")));
    }

    #[test]
    fn test_extension_scope() {
        let scope = QueryScope::new("/cloud", vec!["txt".to_string(), "md".to_string()]);
        assert!(scope.matches(Path::new("/cloud/notes.txt")));
        assert!(scope.matches(Path::new("/cloud/todo.md")));
        assert!(!scope.matches(Path::new("/cloud/image.png")));
        assert!(!scope.matches(Path::new("/cloud/README")));
    }
}

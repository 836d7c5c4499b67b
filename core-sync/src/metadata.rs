//! # Metadata Snapshots
//!
//! Derived, immutable views of the raw records produced by the host metadata
//! query.
//!
//! A snapshot only exists when its location, display name and download status
//! can all be read from the source record. Partial records yield `None` and are
//! skipped by the update pipeline rather than failing it.

use bridge_traits::{CloudDocument, DownloadStatus, MetadataRecord};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// One item discovered by the metadata query
#[derive(Clone)]
pub struct MetadataSnapshot {
    source: Weak<MetadataRecord>,
    url: PathBuf,
    name: String,
    status: DownloadStatus,
}

impl MetadataSnapshot {
    /// Derive a snapshot from a raw record
    ///
    /// The record is referenced weakly: the host query owns it and may
    /// discard it on its next refresh.
    pub fn from_record(record: &Arc<MetadataRecord>) -> Option<Self> {
        let url = record.url.clone()?;
        let name = record.fs_name.clone().filter(|n| !n.is_empty())?;
        let status = record.download_status?;

        Some(Self {
            source: Arc::downgrade(record),
            url,
            name,
            status,
        })
    }

    pub fn url(&self) -> &Path {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
    }

    /// The raw record, if the host still holds it
    pub fn source(&self) -> Option<Arc<MetadataRecord>> {
        self.source.upgrade()
    }

    /// Fully downloaded and up to date
    pub fn is_current(&self) -> bool {
        self.status == DownloadStatus::Current
    }
}

impl fmt::Debug for MetadataSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataSnapshot")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("status", &self.status)
            .finish()
    }
}

/// A current file handed to the delegate
///
/// The document is not opened: its contents load when the receiver opens it.
#[derive(Clone)]
pub struct CloudFile {
    pub name: String,
    pub metadata: MetadataSnapshot,
    pub document: Arc<dyn CloudDocument>,
}

impl fmt::Debug for CloudFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudFile")
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field("document_state", &self.document.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: Option<&str>, status: Option<DownloadStatus>) -> Arc<MetadataRecord> {
        Arc::new(MetadataRecord {
            url: name.map(|n| PathBuf::from("/cloud/Documents").join(n)),
            fs_name: name.map(str::to_string),
            download_status: status,
            ..MetadataRecord::default()
        })
    }

    #[test]
    fn test_complete_record_builds_snapshot() {
        let raw = record(Some("notes.txt"), Some(DownloadStatus::Current));
        let snapshot = MetadataSnapshot::from_record(&raw).unwrap();

        assert_eq!(snapshot.name(), "notes.txt");
        assert_eq!(snapshot.url(), Path::new("/cloud/Documents/notes.txt"));
        assert!(snapshot.is_current());
        assert!(snapshot.source().is_some());
    }

    #[test]
    fn test_partial_records_are_skipped() {
        assert!(MetadataSnapshot::from_record(&record(None, Some(DownloadStatus::Current))).is_none());
        assert!(MetadataSnapshot::from_record(&record(Some("a.txt"), None)).is_none());

        let nameless = Arc::new(MetadataRecord {
            url: Some(PathBuf::from("/cloud/Documents/a.txt")),
            fs_name: Some(String::new()),
            download_status: Some(DownloadStatus::Current),
            ..MetadataRecord::default()
        });
        assert!(MetadataSnapshot::from_record(&nameless).is_none());
    }

    #[test]
    fn test_source_is_not_kept_alive() {
        let raw = record(Some("a.txt"), Some(DownloadStatus::NotDownloaded));
        let snapshot = MetadataSnapshot::from_record(&raw).unwrap();
        drop(raw);

        assert!(snapshot.source().is_none());
        assert_eq!(snapshot.status(), DownloadStatus::NotDownloaded);
    }
}

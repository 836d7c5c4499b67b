//! # Reconciliation Engine
//!
//! Decides what happens to a file when a local offline copy and a cloud copy
//! share a name.
//!
//! ## Overview
//!
//! The decision itself is pure: [`compare_copies`] ranks two fully read copies,
//! and [`decide_upload`] / [`decide_evict`] map an [`Observation`] to a
//! disposition. [`ReconciliationEngine`] only gathers the observation through
//! the [`FileSystemAccess`] bridge. Executing a disposition is left to the
//! caller.
//!
//! ## Rules
//!
//! | Observation                       | Upload                      | Evict                      |
//! |-----------------------------------|-----------------------------|----------------------------|
//! | target side missing               | `UploadLocal`               | `MoveRemoteToLocal`        |
//! | source side missing               | `NoActionNeeded`            | `NoActionNeeded`           |
//! | remote newer                      | `KeepRemoteDeleteLocal`     | `OverwriteLocalWithRemote` |
//! | local newer                       | `OverwriteRemoteWithLocal`  | `DeleteRemoteKeepLocal`    |
//! | same time, same bytes             | `KeepRemoteDeleteLocal`     | `DeleteRemoteKeepLocal`    |
//! | same time, different bytes        | `ReportConflict`            | `ReportConflict`           |
//! | either side unreadable            | `InsufficientInformation`   | `InsufficientInformation`  |

use crate::{Result, SyncError};
use bridge_traits::FileSystemAccess;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Copies and Conflicts
// ============================================================================

/// A fully read copy of a file, taken once per reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySnapshot {
    pub location: PathBuf,
    pub modified_at: DateTime<Utc>,
    pub content: Bytes,
}

/// One side of a conflict as reported to the delegate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSide {
    /// `None` when the copy could not be read
    pub content: Option<Bytes>,
    pub location: PathBuf,
    pub modified_at: Option<DateTime<Utc>>,
}

impl ConflictSide {
    fn unread(location: PathBuf) -> Self {
        Self {
            content: None,
            location,
            modified_at: None,
        }
    }
}

impl From<CopySnapshot> for ConflictSide {
    fn from(copy: CopySnapshot) -> Self {
        Self {
            content: Some(copy.content),
            location: copy.location,
            modified_at: Some(copy.modified_at),
        }
    }
}

/// Local and cloud copies the engine refused to choose between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConflict {
    pub name: String,
    pub cloud: ConflictSide,
    pub local: ConflictSide,
}

impl FileConflict {
    fn between(name: &str, local: CopySnapshot, remote: CopySnapshot) -> Self {
        Self {
            name: name.to_string(),
            cloud: remote.into(),
            local: local.into(),
        }
    }

    fn unreadable(name: &str, local: PathBuf, remote: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            cloud: ConflictSide::unread(remote),
            local: ConflictSide::unread(local),
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Relative freshness of two copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    LocalNewer,
    RemoteNewer,
    /// Same timestamp, same bytes
    Identical,
    /// Same timestamp, different bytes
    Diverged,
}

/// Three-way comparison shared by both directions
pub fn compare_copies(local: &CopySnapshot, remote: &CopySnapshot) -> Freshness {
    if remote.modified_at > local.modified_at {
        Freshness::RemoteNewer
    } else if local.modified_at > remote.modified_at {
        Freshness::LocalNewer
    } else if local.content == remote.content {
        Freshness::Identical
    } else {
        Freshness::Diverged
    }
}

/// What was found at the local and remote locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    RemoteMissing,
    LocalMissing,
    Both {
        local: CopySnapshot,
        remote: CopySnapshot,
    },
    /// Both copies exist but a timestamp or content read failed
    Unreadable { local: PathBuf, remote: PathBuf },
}

/// Outcome of reconciling a local file into the cloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDisposition {
    /// No cloud copy: move the local file into the cloud
    UploadLocal,
    /// No local copy: nothing to reconcile
    NoActionNeeded,
    KeepRemoteDeleteLocal,
    /// Save the local bytes over the cloud copy; the local file stays
    OverwriteRemoteWithLocal { content: Bytes },
    ReportConflict(FileConflict),
    /// Handled like a conflict: reported, nothing destroyed
    InsufficientInformation(FileConflict),
}

impl UploadDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadDisposition::UploadLocal => "upload_local",
            UploadDisposition::NoActionNeeded => "no_action_needed",
            UploadDisposition::KeepRemoteDeleteLocal => "keep_remote_delete_local",
            UploadDisposition::OverwriteRemoteWithLocal { .. } => "overwrite_remote_with_local",
            UploadDisposition::ReportConflict(_) => "report_conflict",
            UploadDisposition::InsufficientInformation(_) => "insufficient_information",
        }
    }

    /// The conflict to surface, for both reporting variants
    pub fn conflict(&self) -> Option<&FileConflict> {
        match self {
            UploadDisposition::ReportConflict(c) | UploadDisposition::InsufficientInformation(c) => {
                Some(c)
            }
            _ => None,
        }
    }
}

/// Outcome of reconciling a cloud file back to local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictDisposition {
    /// No local copy: move the cloud file out of the cloud
    MoveRemoteToLocal,
    /// No cloud copy: nothing to evict
    NoActionNeeded,
    DeleteRemoteKeepLocal,
    /// Write the cloud bytes over the local copy; the cloud file stays
    OverwriteLocalWithRemote { content: Bytes },
    ReportConflict(FileConflict),
    InsufficientInformation(FileConflict),
}

impl EvictDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictDisposition::MoveRemoteToLocal => "move_remote_to_local",
            EvictDisposition::NoActionNeeded => "no_action_needed",
            EvictDisposition::DeleteRemoteKeepLocal => "delete_remote_keep_local",
            EvictDisposition::OverwriteLocalWithRemote { .. } => "overwrite_local_with_remote",
            EvictDisposition::ReportConflict(_) => "report_conflict",
            EvictDisposition::InsufficientInformation(_) => "insufficient_information",
        }
    }

    pub fn conflict(&self) -> Option<&FileConflict> {
        match self {
            EvictDisposition::ReportConflict(c) | EvictDisposition::InsufficientInformation(c) => {
                Some(c)
            }
            _ => None,
        }
    }
}

pub fn decide_upload(name: &str, observation: Observation) -> UploadDisposition {
    match observation {
        Observation::RemoteMissing => UploadDisposition::UploadLocal,
        Observation::LocalMissing => UploadDisposition::NoActionNeeded,
        Observation::Unreadable { local, remote } => {
            UploadDisposition::InsufficientInformation(FileConflict::unreadable(name, local, remote))
        }
        Observation::Both { local, remote } => match compare_copies(&local, &remote) {
            Freshness::RemoteNewer | Freshness::Identical => {
                UploadDisposition::KeepRemoteDeleteLocal
            }
            Freshness::LocalNewer => UploadDisposition::OverwriteRemoteWithLocal {
                content: local.content,
            },
            Freshness::Diverged => {
                UploadDisposition::ReportConflict(FileConflict::between(name, local, remote))
            }
        },
    }
}

pub fn decide_evict(name: &str, observation: Observation) -> EvictDisposition {
    match observation {
        Observation::LocalMissing => EvictDisposition::MoveRemoteToLocal,
        Observation::RemoteMissing => EvictDisposition::NoActionNeeded,
        Observation::Unreadable { local, remote } => {
            EvictDisposition::InsufficientInformation(FileConflict::unreadable(name, local, remote))
        }
        Observation::Both { local, remote } => match compare_copies(&local, &remote) {
            Freshness::LocalNewer | Freshness::Identical => EvictDisposition::DeleteRemoteKeepLocal,
            Freshness::RemoteNewer => EvictDisposition::OverwriteLocalWithRemote {
                content: remote.content,
            },
            Freshness::Diverged => {
                EvictDisposition::ReportConflict(FileConflict::between(name, local, remote))
            }
        },
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Which copy the caller wants to keep moving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upload,
    Evict,
}

/// Gathers observations through the file system bridge
#[derive(Clone)]
pub struct ReconciliationEngine {
    fs: Arc<dyn FileSystemAccess>,
}

impl ReconciliationEngine {
    pub fn new(fs: Arc<dyn FileSystemAccess>) -> Self {
        Self { fs }
    }

    /// Decide the fate of `local` when uploading it to `remote`
    ///
    /// `remote_listed` is true when the name appears in the last published
    /// snapshot set; the remote also counts as present when it is on disk.
    pub async fn reconcile_upload(
        &self,
        name: &str,
        local: &Path,
        remote: &Path,
        remote_listed: bool,
    ) -> Result<UploadDisposition> {
        if name.is_empty() {
            return Err(SyncError::EmptyName);
        }
        let observation = self
            .observe(local, remote, remote_listed, Direction::Upload)
            .await;
        let disposition = decide_upload(name, observation);
        debug!(name = %name, disposition = disposition.as_str(), "Upload reconciled");
        Ok(disposition)
    }

    /// Decide the fate of `remote` when evicting it to `local`
    pub async fn reconcile_evict(
        &self,
        name: &str,
        local: &Path,
        remote: &Path,
        remote_listed: bool,
    ) -> Result<EvictDisposition> {
        if name.is_empty() {
            return Err(SyncError::EmptyName);
        }
        let observation = self
            .observe(local, remote, remote_listed, Direction::Evict)
            .await;
        let disposition = decide_evict(name, observation);
        debug!(name = %name, disposition = disposition.as_str(), "Eviction reconciled");
        Ok(disposition)
    }

    async fn observe(
        &self,
        local: &Path,
        remote: &Path,
        remote_listed: bool,
        direction: Direction,
    ) -> Observation {
        // The destination side is checked first so a plain move never reads contents
        let (remote_present, local_present) = match direction {
            Direction::Upload => {
                let remote_present = remote_listed || self.present(remote).await;
                if !remote_present {
                    return Observation::RemoteMissing;
                }
                (remote_present, self.present(local).await)
            }
            Direction::Evict => {
                let local_present = self.present(local).await;
                if !local_present {
                    return Observation::LocalMissing;
                }
                (remote_listed || self.present(remote).await, local_present)
            }
        };

        if !local_present {
            return Observation::LocalMissing;
        }
        if !remote_present {
            return Observation::RemoteMissing;
        }

        match (self.read_copy(local).await, self.read_copy(remote).await) {
            (Ok(local), Ok(remote)) => Observation::Both { local, remote },
            (local_read, remote_read) => {
                if let Err(e) = local_read {
                    warn!(path = ?local, error = %e, "Could not read local copy");
                }
                if let Err(e) = remote_read {
                    warn!(path = ?remote, error = %e, "Could not read cloud copy");
                }
                Observation::Unreadable {
                    local: local.to_path_buf(),
                    remote: remote.to_path_buf(),
                }
            }
        }
    }

    /// Existence check where an I/O failure counts as present, so the
    /// subsequent read surfaces it as missing information
    async fn present(&self, path: &Path) -> bool {
        match self.fs.exists(path).await {
            Ok(exists) => exists,
            Err(e) => {
                debug!(path = ?path, error = %e, "Existence check failed");
                true
            }
        }
    }

    async fn read_copy(&self, path: &Path) -> bridge_traits::error::Result<CopySnapshot> {
        let metadata = self.fs.metadata(path).await?;
        let modified_at = metadata.modified_at.ok_or_else(|| {
            bridge_traits::BridgeError::OperationFailed(format!(
                "{} has no modification date",
                path.display()
            ))
        })?;
        let content = self.fs.read_file(path).await?;

        Ok(CopySnapshot {
            location: path.to_path_buf(),
            modified_at,
            content,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

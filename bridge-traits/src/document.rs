//! Document Abstraction
//!
//! A document is a scoped resource bound to one URL: it must be opened before
//! its contents are trustworthy and closed when the caller is done with it.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Result;

/// Lifecycle state of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Normal,
    Closed,
    InConflict,
    SavingError,
    EditingDisabled,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Normal => "normal",
            DocumentState::Closed => "closed",
            DocumentState::InConflict => "in_conflict",
            DocumentState::SavingError => "saving_error",
            DocumentState::EditingDisabled => "editing_disabled",
        }
    }

    /// Human readable description suitable for UI display
    pub fn description(&self) -> &'static str {
        match self {
            DocumentState::Normal => "Document state is normal",
            DocumentState::Closed => "Document is closed",
            DocumentState::InConflict => "Document is in conflict",
            DocumentState::SavingError => "Document is experiencing a saving error",
            DocumentState::EditingDisabled => "Document editing is disabled",
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a save should treat the existing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOperation {
    ForCreating,
    ForOverwriting,
}

/// Cloud document trait
///
/// # Platform Support
///
/// - **iOS**: `UIDocument` subclass
/// - **macOS**: `NSDocument` subclass
/// - **Desktop**: file-backed document
///
/// # Example
///
/// ```ignore
/// use bridge_traits::document::{CloudDocument, SaveOperation};
///
/// async fn write(doc: &dyn CloudDocument, data: Bytes) -> Result<()> {
///     doc.set_contents(data).await;
///     doc.save(SaveOperation::ForOverwriting).await?;
///     doc.close().await
/// }
/// ```
#[async_trait]
pub trait CloudDocument: Send + Sync {
    /// Location of the backing file
    fn url(&self) -> &Path;

    /// Current lifecycle state
    fn state(&self) -> DocumentState;

    /// Watch lifecycle state changes
    fn subscribe_state(&self) -> watch::Receiver<DocumentState>;

    /// In-memory contents
    async fn contents(&self) -> Bytes;

    /// Replace the in-memory contents. Nothing is written until `save`.
    async fn set_contents(&self, data: Bytes);

    /// Last modification time of the backing file, once known
    async fn modification_date(&self) -> Option<DateTime<Utc>>;

    /// Load contents from the backing file
    async fn open(&self) -> Result<()>;

    /// Persist in-memory contents
    async fn save(&self, operation: SaveOperation) -> Result<()>;

    /// Close the document
    async fn close(&self) -> Result<()>;
}

/// Hands out document handles by URL
///
/// Requesting the same URL twice yields a handle observing the same state
/// until the URL is forgotten. Obtaining a handle performs no I/O.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn document(&self, url: &Path) -> Result<Arc<dyn CloudDocument>>;

    /// Drop any handle kept for `url` after the file was removed or moved
    async fn forget(&self, _url: &Path) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_descriptions() {
        assert_eq!(
            DocumentState::Normal.description(),
            "Document state is normal"
        );
        assert_eq!(DocumentState::Closed.description(), "Document is closed");
        assert_eq!(
            DocumentState::InConflict.description(),
            "Document is in conflict"
        );
        assert_eq!(
            DocumentState::SavingError.description(),
            "Document is experiencing a saving error"
        );
        assert_eq!(
            DocumentState::EditingDisabled.description(),
            "Document editing is disabled"
        );
    }
}

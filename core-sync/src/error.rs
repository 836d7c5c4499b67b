use crate::reconciliation::FileConflict;
use bridge_traits::{BridgeError, CloudDocument};
use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Document lifecycle step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFailure {
    /// Writing new contents failed
    Write,
    /// Closing the document after a write failed
    Close,
    /// Creating an empty document failed
    Create,
    /// Opening an existing document failed
    Open,
    /// The document has unresolved conflict versions
    InConflict,
    /// The document is stuck in a saving error
    SavingError,
}

impl DocumentFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFailure::Write => "write",
            DocumentFailure::Close => "close",
            DocumentFailure::Create => "create",
            DocumentFailure::Open => "open",
            DocumentFailure::InConflict => "in_conflict",
            DocumentFailure::SavingError => "saving_error",
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            DocumentFailure::Write => 100,
            DocumentFailure::Close | DocumentFailure::Create => 110,
            DocumentFailure::Open | DocumentFailure::InConflict | DocumentFailure::SavingError => {
                200
            }
        }
    }
}

impl fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Document handle and contents as far as they could be obtained
#[derive(Clone)]
pub struct DocumentOutcome {
    pub document: Arc<dyn CloudDocument>,
    pub contents: Bytes,
}

impl fmt::Debug for DocumentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentOutcome")
            .field("url", &self.document.url())
            .field("state", &self.document.state())
            .field("contents_len", &self.contents.len())
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Document name must not be empty")]
    EmptyName,

    #[error("{name} is not a plain file name")]
    InvalidName { name: String },

    #[error("{name} does not exist at {}", path.display())]
    NotFound { name: String, path: PathBuf },

    #[error("{name} already exists at {}", path.display())]
    AlreadyExists { name: String, path: PathBuf },

    #[error("Coordinated file access failed: {0}")]
    Coordination(String),

    #[error("Store error: {0}")]
    Store(#[from] BridgeError),

    #[error("Local and cloud copies of {} conflict", .0.name)]
    Conflict(Box<FileConflict>),

    #[error("Could not read enough information to reconcile {name}")]
    InsufficientInformation { name: String },

    #[error("Cloud storage is not available")]
    Unavailable,

    #[error("{name} is hidden and will not be uploaded")]
    HiddenFile { name: String },

    #[error("Coordinator has not been set up")]
    NotInitialized,

    #[error("Document {failure} failed: {message}")]
    Document {
        failure: DocumentFailure,
        message: String,
        outcome: Box<DocumentOutcome>,
    },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Coordinator has shut down")]
    Shutdown,
}

impl SyncError {
    /// Stable numeric code for hosts that surface error codes
    pub fn code(&self) -> Option<u16> {
        match self {
            SyncError::EmptyName | SyncError::InvalidName { .. } => Some(1),
            SyncError::Document { failure, .. } => Some(failure.code()),
            SyncError::NotFound { .. } | SyncError::AlreadyExists { .. } => Some(404),
            SyncError::HiddenFile { .. } => Some(520),
            _ => None,
        }
    }

    /// Document context attached to a mid-operation failure
    pub fn outcome(&self) -> Option<&DocumentOutcome> {
        match self {
            SyncError::Document { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    pub(crate) fn from_coordinated(error: BridgeError) -> Self {
        match error {
            BridgeError::Coordination(message) => SyncError::Coordination(message),
            other => SyncError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

//! # Document Sync Module
//!
//! Keeps a cloud documents folder and a local offline folder in step.
//!
//! ## Overview
//!
//! This module turns the host's live metadata query into an ordered list of
//! current files, runs document operations against the cloud container, and
//! reconciles local and cloud copies that share a name:
//! - Publishing the current file list after every query notification
//! - Starting downloads for items that are not downloaded yet
//! - Saving, retrieving, renaming, duplicating, deleting and sharing documents
//! - Uploading local files and evicting cloud files back to local storage
//! - Resolving version conflicts through the host's version store
//!
//! ## Components
//!
//! - **Metadata** (`metadata`): Validated snapshots of query results
//! - **Reconciliation** (`reconciliation`): Pure local/cloud decision procedure
//! - **Update Pipeline** (`pipeline`): Serialized update cycles with validated phase transitions
//! - **Delegate** (`delegate`): Callbacks the host receives, delivered in order
//! - **Sync Coordinator** (`coordinator`): The public surface tying it all together

pub mod coordinator;
pub mod delegate;
mod delivery;
pub mod error;
pub mod metadata;
pub mod observers;
pub mod pipeline;
pub mod reconciliation;

pub use coordinator::{ItemReport, SyncCoordinator, UploadSummary};
pub use delegate::CloudDelegate;
pub use error::{DocumentFailure, DocumentOutcome, Result, SyncError};
pub use metadata::{CloudFile, MetadataSnapshot};
pub use observers::ObserverToken;
pub use pipeline::UpdatePhase;
pub use reconciliation::{
    compare_copies, decide_evict, decide_upload, ConflictSide, CopySnapshot, EvictDisposition,
    FileConflict, Freshness, Observation, ReconciliationEngine, UploadDisposition,
};

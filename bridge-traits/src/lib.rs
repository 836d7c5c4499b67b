//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the document sync core and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but which each platform provides differently (Apple cloud
//! documents on iOS/macOS, a plain directory on desktop, test doubles in CI).
//!
//! ## Traits
//!
//! ### Storage
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O, atomic moves, ubiquity flag, coordinated removal
//! - [`UbiquityContainer`](ubiquity::UbiquityContainer) - Account identity, container location, downloads, publishing
//!
//! ### Change Tracking
//! - [`MetadataQuery`](metadata_query::MetadataQuery) - Live query over the cloud container
//! - [`VersionStore`](versions::VersionStore) - Per-file version history for conflict resolution
//!
//! ### Documents
//! - [`DocumentProvider`](document::DocumentProvider) / [`CloudDocument`](document::CloudDocument) - Open/save/close lifecycle
//!
//! ### Utilities
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | TBD                 | 📋 Planned |
//! | macOS    | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Keep `std::io::Error` intact (via `BridgeError::Io`) so callers can
//!   detect missing files
//! - Report coordination failures as `BridgeError::Coordination`
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.
//!
//! ## Examples
//!
//! ### Implementing UbiquityContainer
//!
//! ```ignore
//! use bridge_traits::ubiquity::{IdentityToken, UbiquityContainer};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct AlwaysSignedIn { root: PathBuf }
//!
//! #[async_trait]
//! impl UbiquityContainer for AlwaysSignedIn {
//!     async fn identity_token(&self) -> Option<IdentityToken> {
//!         Some(IdentityToken::new("local"))
//!     }
//!
//!     async fn container_url(&self, _id: Option<&str>) -> Result<Option<PathBuf>> {
//!         Ok(Some(self.root.clone()))
//!     }
//!     // ...
//! }
//! ```

pub mod document;
pub mod error;
pub mod logging;
pub mod metadata_query;
pub mod storage;
pub mod ubiquity;
pub mod versions;

pub use error::BridgeError;

// Re-export commonly used types
pub use document::{CloudDocument, DocumentProvider, DocumentState, SaveOperation};
pub use logging::{LogEntry, LogLevel, LoggerSink};
pub use metadata_query::{
    DownloadStatus, MetadataQuery, MetadataRecord, QueryNotification, QueryNotificationStream,
    QueryScope,
};
pub use storage::{FileMetadata, FileSystemAccess};
pub use ubiquity::{IdentityChangeStream, IdentityToken, SharedLink, UbiquityContainer};
pub use versions::{FileVersion, VersionStore};

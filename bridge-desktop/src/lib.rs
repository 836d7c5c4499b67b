//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! Desktop has no system cloud-document service, so the container is an
//! ordinary directory (typically one kept in sync by a third-party client):
//! - `FileSystemAccess` using `tokio::fs`, with atomic writes via rename
//! - `UbiquityContainer` backed by a directory, with `.name.icloud` placeholders for evicted items
//! - `MetadataQuery` by periodic directory scans
//! - `DocumentProvider` with file-backed documents
//! - `VersionStore` keeping conflict versions in a side-car directory
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DirectoryContainer, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let container = DirectoryContainer::for_current_user();
//!     let fs = TokioFileSystem::new(container.root());
//!
//!     // Use in core configuration
//! }
//! ```

mod container;
mod document;
mod filesystem;
mod query;
mod versions;

pub use container::{DirectoryContainer, DEFAULT_CONTAINER_ID};
pub use document::{FileDocument, FileDocumentProvider};
pub use filesystem::TokioFileSystem;
pub use query::{PollingMetadataQuery, DEFAULT_POLL_INTERVAL};
pub use versions::SidecarVersionStore;

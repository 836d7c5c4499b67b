//! Delegate receiving coordinator callbacks
//!
//! A coordinator has exactly one delegate, injected at construction. Callbacks
//! other than [`CloudDelegate::query_file_extensions`] are delivered from the
//! coordinator's delivery task, one at a time and in the order they were
//! produced.

use crate::metadata::CloudFile;
use crate::reconciliation::FileConflict;
use async_trait::async_trait;
use bridge_traits::IdentityToken;
use std::path::PathBuf;

#[async_trait]
pub trait CloudDelegate: Send + Sync {
    /// Cloud availability changed, or was re-checked
    async fn availability_changed(
        &self,
        _available: bool,
        _token: Option<IdentityToken>,
        _container: Option<PathBuf>,
    ) {
    }

    /// The metadata query started gathering
    async fn file_update_did_begin(&self) {}

    /// The metadata query finished gathering
    async fn file_update_did_end(&self) {}

    /// The list of current files changed
    ///
    /// Items that are still downloading or not downloaded are excluded.
    async fn files_changed(&self, _files: Vec<CloudFile>) {}

    /// A local and a cloud copy could not be reconciled automatically
    ///
    /// May be called several times in quick succession.
    async fn file_conflict(&self, _conflict: FileConflict) {}

    /// Setup finished and the container is reachable
    async fn did_finish_initializing(
        &self,
        _token: Option<IdentityToken>,
        _container: Option<PathBuf>,
    ) {
    }

    /// Extensions (without dot) the metadata query is limited to
    ///
    /// An empty list falls back to the configured extensions.
    async fn query_file_extensions(&self) -> Vec<String> {
        Vec::new()
    }
}

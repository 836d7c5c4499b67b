//! Directory-backed cloud container
//!
//! Stands in for a real cloud container on desktop: a directory tree that a
//! third-party sync client (or nothing at all) keeps in sync. Evicted items
//! follow the `.name.icloud` placeholder convention, so "downloading" an item
//! means promoting its placeholder back to the real name.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    ubiquity::{IdentityChangeStream, IdentityToken, SharedLink, UbiquityContainer},
};
use chrono::{Duration, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info};

/// Container used when no identifier is requested
pub const DEFAULT_CONTAINER_ID: &str = "default";

/// How long published links stay valid
const SHARE_LINK_LIFETIME_DAYS: i64 = 30;

/// Name of the placeholder file standing in for an evicted item
pub(crate) fn placeholder_name(name: &str) -> String {
    format!(".{}.icloud", name)
}

/// Real item name for a placeholder file name, if it is one
pub(crate) fn name_from_placeholder(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(".icloud"))
        .filter(|name| !name.is_empty())
}

/// Local directory acting as the cloud container
pub struct DirectoryContainer {
    root: PathBuf,
    local_documents: PathBuf,
    identity: watch::Sender<Option<IdentityToken>>,
}

impl DirectoryContainer {
    /// Create a signed-in container rooted at `root`
    pub fn new(root: impl Into<PathBuf>, local_documents: impl Into<PathBuf>) -> Self {
        let (identity, _) = watch::channel(Some(IdentityToken::new("desktop")));
        Self {
            root: root.into(),
            local_documents: local_documents.into(),
            identity,
        }
    }

    /// Create a container under the user's data directory
    pub fn for_current_user() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("document-sync-core");
        let local_documents = dirs::document_dir().unwrap_or_else(|| base.join("Local"));
        Self::new(base.join("Cloud"), local_documents)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Simulate signing into an account
    pub fn sign_in(&self, token: IdentityToken) {
        info!("Desktop container signed in");
        self.identity.send_replace(Some(token));
    }

    /// Simulate signing out
    pub fn sign_out(&self) {
        info!("Desktop container signed out");
        self.identity.send_replace(None);
    }
}

#[async_trait]
impl UbiquityContainer for DirectoryContainer {
    async fn identity_token(&self) -> Option<IdentityToken> {
        self.identity.borrow().clone()
    }

    async fn container_url(&self, container_id: Option<&str>) -> Result<Option<PathBuf>> {
        if self.identity.borrow().is_none() {
            return Ok(None);
        }

        let url = self.root.join(container_id.unwrap_or(DEFAULT_CONTAINER_ID));
        fs::create_dir_all(&url).await?;
        debug!(path = ?url, "Resolved container");
        Ok(Some(url))
    }

    async fn local_documents_url(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.local_documents).await?;
        Ok(self.local_documents.clone())
    }

    async fn start_downloading(&self, url: &Path) -> Result<()> {
        let name = url
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                BridgeError::OperationFailed(format!("{} has no file name", url.display()))
            })?;
        let placeholder = url.with_file_name(placeholder_name(&name));

        if !fs::try_exists(&placeholder).await? {
            debug!(path = ?url, "Nothing to download");
            return Ok(());
        }

        fs::rename(&placeholder, url).await?;
        debug!(path = ?url, "Downloaded item");
        Ok(())
    }

    async fn publish(&self, url: &Path) -> Result<SharedLink> {
        if !fs::try_exists(url).await? {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", url.display()),
            )));
        }

        Ok(SharedLink {
            url: format!("file://{}", url.display()),
            expires_at: Some(Utc::now() + Duration::days(SHARE_LINK_LIFETIME_DAYS)),
        })
    }

    async fn subscribe_identity_changes(&self) -> Result<Box<dyn IdentityChangeStream>> {
        Ok(Box::new(WatchIdentityStream {
            receiver: self.identity.subscribe(),
        }))
    }
}

struct WatchIdentityStream {
    receiver: watch::Receiver<Option<IdentityToken>>,
}

#[async_trait]
impl IdentityChangeStream for WatchIdentityStream {
    async fn next(&mut self) -> Option<Option<IdentityToken>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_placeholder_names() {
        assert_eq!(placeholder_name("notes.txt"), ".notes.txt.icloud");
        assert_eq!(name_from_placeholder(".notes.txt.icloud"), Some("notes.txt"));
        assert_eq!(name_from_placeholder("notes.txt"), None);
        assert_eq!(name_from_placeholder("..icloud"), None);
    }

    #[tokio::test]
    async fn test_signed_out_container_is_unavailable() {
        let dir = tempdir().unwrap();
        let container = DirectoryContainer::new(dir.path().join("cloud"), dir.path().join("local"));
        assert!(container.identity_token().await.is_some());
        assert!(container.container_url(None).await.unwrap().is_some());

        container.sign_out();
        assert!(container.identity_token().await.is_none());
        assert!(container.container_url(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identity_stream_reports_changes() {
        let dir = tempdir().unwrap();
        let container = DirectoryContainer::new(dir.path().join("cloud"), dir.path().join("local"));
        let mut stream = container.subscribe_identity_changes().await.unwrap();

        container.sign_out();
        assert_eq!(stream.next().await, Some(None));

        container.sign_in(IdentityToken::new("other"));
        assert_eq!(stream.next().await, Some(Some(IdentityToken::new("other"))));
    }

    #[tokio::test]
    async fn test_start_downloading_promotes_placeholder() {
        let dir = tempdir().unwrap();
        let container = DirectoryContainer::new(dir.path().join("cloud"), dir.path().join("local"));
        let docs = container.container_url(Some("app")).await.unwrap().unwrap();
        fs::write(docs.join(placeholder_name("a.txt")), b"payload")
            .await
            .unwrap();

        container.start_downloading(&docs.join("a.txt")).await.unwrap();

        assert_eq!(fs::read(docs.join("a.txt")).await.unwrap(), b"payload");
        assert!(!fs::try_exists(docs.join(placeholder_name("a.txt")))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_publish_missing_item_fails() {
        let dir = tempdir().unwrap();
        let container = DirectoryContainer::new(dir.path().join("cloud"), dir.path().join("local"));
        let err = container
            .publish(&dir.path().join("missing.txt"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

//! Ubiquity Container Abstraction
//!
//! Describes the host's cloud document container: whether a cloud account is
//! signed in, where the container lives on disk, and the per-item requests
//! (download, publish) the host performs on our behalf.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Opaque token identifying the signed-in cloud account
///
/// A present token means cloud storage is reachable. The token changes when
/// the user signs into a different account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityToken(String);

impl IdentityToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A published, shareable link to a cloud item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedLink {
    pub url: String,
    /// When the link stops working, if the host reports it
    pub expires_at: Option<DateTime<Utc>>,
}

/// Cloud container trait
///
/// # Platform Support
///
/// - **iOS/macOS**: `FileManager.ubiquityIdentityToken`, `url(forUbiquityContainerIdentifier:)`
/// - **Desktop**: a local directory acting as the synced container
///
/// # Example
///
/// ```ignore
/// use bridge_traits::ubiquity::UbiquityContainer;
///
/// async fn is_available(container: &dyn UbiquityContainer) -> bool {
///     container.identity_token().await.is_some()
/// }
/// ```
#[async_trait]
pub trait UbiquityContainer: Send + Sync {
    /// Current identity token. Must reflect the live account state on every call.
    async fn identity_token(&self) -> Option<IdentityToken>;

    /// Resolve the container root
    ///
    /// Returns `Ok(None)` when no container is available for this account
    /// (signed out, or the container id is unknown). May block on first use,
    /// callers should not invoke it from latency-sensitive contexts.
    async fn container_url(&self, container_id: Option<&str>) -> Result<Option<PathBuf>>;

    /// The app's local (non-synced) documents directory
    async fn local_documents_url(&self) -> Result<PathBuf>;

    /// Ask the host to start downloading a not-yet-downloaded item
    async fn start_downloading(&self, url: &Path) -> Result<()>;

    /// Publish an item and return its shareable link
    async fn publish(&self, url: &Path) -> Result<SharedLink>;

    /// Subscribe to identity changes (sign in, sign out, account switch)
    async fn subscribe_identity_changes(&self) -> Result<Box<dyn IdentityChangeStream>>;
}

/// Stream of identity changes
#[async_trait]
pub trait IdentityChangeStream: Send {
    /// Get the next identity update
    ///
    /// Yields `Some(None)` when the account signed out. Returns `None` when
    /// the stream is closed.
    async fn next(&mut self) -> Option<Option<IdentityToken>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_token_display() {
        let token = IdentityToken::new("account-42");
        assert_eq!(token.as_str(), "account-42");
        assert_eq!(token.to_string(), "account-42");
    }
}

//! # Core Configuration Module
//!
//! Wires host bridges and sync settings into a single `CoreConfig`.
//!
//! ## Overview
//!
//! The configuration uses a builder that enforces fail-fast validation: every
//! bridge the sync core talks to must be present before a coordinator can be
//! constructed.
//!
//! ## Required Dependencies
//!
//! - `FileSystemAccess` - local and cloud file operations
//! - `UbiquityContainer` - account identity and container location
//! - `MetadataQuery` - change notifications for the cloud container
//! - `DocumentProvider` - document open/save/close lifecycle
//! - `VersionStore` - conflict version inspection and resolution
//!
//! When the `desktop-shims` feature is enabled, directory-backed desktop
//! implementations are injected for any bridge that was not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .container_id("iCloud.com.example.notes")
//!     .file_extensions(["txt", "md"])
//!     .file_system(Arc::new(MyFileSystem))
//!     .ubiquity(Arc::new(MyContainer))
//!     .metadata_query(Arc::new(MyQuery))
//!     .documents(Arc::new(MyDocuments))
//!     .versions(Arc::new(MyVersions))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    DocumentProvider, FileSystemAccess, LoggerSink, MetadataQuery, UbiquityContainer,
    VersionStore,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Name of the documents folder inside the cloud container
pub const DEFAULT_DOCUMENTS_DIRECTORY: &str = "Documents";

/// Extension filter accepting every file
pub const ANY_EXTENSION: &str = "*";

/// Sync behavior settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Cloud container identifier, `None` selects the app's default container
    pub container_id: Option<String>,

    /// Folder inside the container holding the documents
    pub documents_directory: String,

    /// File extensions the metadata query is limited to (without dot)
    pub file_extensions: Vec<String>,

    /// Local offline documents directory, defaults to the host's documents directory
    pub local_documents_dir: Option<PathBuf>,

    /// Event bus buffer size
    pub event_buffer_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            container_id: None,
            documents_directory: DEFAULT_DOCUMENTS_DIRECTORY.to_string(),
            file_extensions: vec![ANY_EXTENSION.to_string()],
            local_documents_dir: None,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        if self.documents_directory.trim().is_empty() {
            return Err(Error::InvalidSetting {
                field: "documents_directory".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.documents_directory.contains(['/', '\\']) {
            return Err(Error::InvalidSetting {
                field: "documents_directory".to_string(),
                message: "must be a single path component".to_string(),
            });
        }

        for ext in &self.file_extensions {
            if ext.is_empty() || ext.starts_with('.') || ext.contains(['/', '\\']) {
                return Err(Error::InvalidSetting {
                    field: "file_extensions".to_string(),
                    message: format!("'{}' is not a bare file extension", ext),
                });
            }
        }

        if matches!(&self.container_id, Some(id) if id.trim().is_empty()) {
            return Err(Error::InvalidSetting {
                field: "container_id".to_string(),
                message: "must not be blank when provided".to_string(),
            });
        }

        if self.event_buffer_size == 0 {
            return Err(Error::InvalidSetting {
                field: "event_buffer_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Core configuration for the document sync core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub file_system: Arc<dyn FileSystemAccess>,
    pub ubiquity: Arc<dyn UbiquityContainer>,
    pub metadata_query: Arc<dyn MetadataQuery>,
    pub documents: Arc<dyn DocumentProvider>,
    pub versions: Arc<dyn VersionStore>,

    /// Host log sink (optional)
    pub logger_sink: Option<Arc<dyn LoggerSink>>,

    pub settings: SyncSettings,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("ubiquity", &"UbiquityContainer { ... }")
            .field("metadata_query", &"MetadataQuery { ... }")
            .field("documents", &"DocumentProvider { ... }")
            .field("versions", &"VersionStore { ... }")
            .field(
                "logger_sink",
                &self.logger_sink.as_ref().map(|_| "LoggerSink { ... }"),
            )
            .field("settings", &self.settings)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.settings.validate()
    }
}

/// The full set of bridges a coordinator needs
struct Bridges {
    file_system: Arc<dyn FileSystemAccess>,
    ubiquity: Arc<dyn UbiquityContainer>,
    metadata_query: Arc<dyn MetadataQuery>,
    documents: Arc<dyn DocumentProvider>,
    versions: Arc<dyn VersionStore>,
}

#[cfg(feature = "desktop-shims")]
fn provide_desktop_bridges(local_documents_dir: Option<&PathBuf>) -> Bridges {
    use bridge_desktop::{
        DirectoryContainer, FileDocumentProvider, PollingMetadataQuery, SidecarVersionStore,
        TokioFileSystem,
    };

    let container = match local_documents_dir {
        Some(local) => {
            let defaults = DirectoryContainer::for_current_user();
            DirectoryContainer::new(defaults.root().to_path_buf(), local.clone())
        }
        None => DirectoryContainer::for_current_user(),
    };
    let root = container.root().to_path_buf();
    let versions = Arc::new(SidecarVersionStore::new(
        root.parent().map(|p| p.join("Versions")).unwrap_or_else(|| root.join(".versions")),
    ));

    Bridges {
        file_system: Arc::new(TokioFileSystem::new(&root)),
        ubiquity: Arc::new(container),
        metadata_query: Arc::new(PollingMetadataQuery::new()),
        documents: Arc::new(FileDocumentProvider::with_versions(Arc::clone(&versions))),
        versions,
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn missing_bridge_error(capability: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required by the sync coordinator. \
             Desktop: enable the 'desktop-shims' feature to use the directory-backed defaults. \
             iOS/macOS: inject the platform adapter.",
            capability
        ),
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    file_system: Option<Arc<dyn FileSystemAccess>>,
    ubiquity: Option<Arc<dyn UbiquityContainer>>,
    metadata_query: Option<Arc<dyn MetadataQuery>>,
    documents: Option<Arc<dyn DocumentProvider>>,
    versions: Option<Arc<dyn VersionStore>>,
    logger_sink: Option<Arc<dyn LoggerSink>>,
    settings: SyncSettings,
}

impl CoreConfigBuilder {
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn ubiquity(mut self, container: Arc<dyn UbiquityContainer>) -> Self {
        self.ubiquity = Some(container);
        self
    }

    pub fn metadata_query(mut self, query: Arc<dyn MetadataQuery>) -> Self {
        self.metadata_query = Some(query);
        self
    }

    pub fn documents(mut self, provider: Arc<dyn DocumentProvider>) -> Self {
        self.documents = Some(provider);
        self
    }

    pub fn versions(mut self, store: Arc<dyn VersionStore>) -> Self {
        self.versions = Some(store);
        self
    }

    pub fn logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    /// Sets the cloud container identifier.
    ///
    /// Default: the app's default container
    pub fn container_id(mut self, id: impl Into<String>) -> Self {
        self.settings.container_id = Some(id.into());
        self
    }

    /// Sets the documents folder name inside the container.
    ///
    /// Default: `"Documents"`
    pub fn documents_directory(mut self, name: impl Into<String>) -> Self {
        self.settings.documents_directory = name.into();
        self
    }

    /// Limits the metadata query to these extensions.
    ///
    /// Default: `["*"]`
    pub fn file_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.file_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn local_documents_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.local_documents_dir = Some(path.into());
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.settings.event_buffer_size = size;
        self
    }

    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - `CapabilityMissing` when a required bridge is absent and no desktop
    ///   default is available
    /// - `InvalidSetting` when a setting fails validation
    pub fn build(self) -> Result<CoreConfig> {
        let bridges = self.resolve_bridges()?;

        let config = CoreConfig {
            file_system: bridges.file_system,
            ubiquity: bridges.ubiquity,
            metadata_query: bridges.metadata_query,
            documents: bridges.documents,
            versions: bridges.versions,
            logger_sink: self.logger_sink,
            settings: self.settings,
        };

        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "desktop-shims")]
    fn resolve_bridges(&self) -> Result<Bridges> {
        let defaults = provide_desktop_bridges(self.settings.local_documents_dir.as_ref());
        Ok(Bridges {
            file_system: self.file_system.clone().unwrap_or(defaults.file_system),
            ubiquity: self.ubiquity.clone().unwrap_or(defaults.ubiquity),
            metadata_query: self.metadata_query.clone().unwrap_or(defaults.metadata_query),
            documents: self.documents.clone().unwrap_or(defaults.documents),
            versions: self.versions.clone().unwrap_or(defaults.versions),
        })
    }

    #[cfg(not(feature = "desktop-shims"))]
    fn resolve_bridges(&self) -> Result<Bridges> {
        Ok(Bridges {
            file_system: self
                .file_system
                .clone()
                .ok_or_else(|| missing_bridge_error("FileSystemAccess"))?,
            ubiquity: self
                .ubiquity
                .clone()
                .ok_or_else(|| missing_bridge_error("UbiquityContainer"))?,
            metadata_query: self
                .metadata_query
                .clone()
                .ok_or_else(|| missing_bridge_error("MetadataQuery"))?,
            documents: self
                .documents
                .clone()
                .ok_or_else(|| missing_bridge_error("DocumentProvider"))?,
            versions: self
                .versions
                .clone()
                .ok_or_else(|| missing_bridge_error("VersionStore"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = SyncSettings::default();
        assert_eq!(settings.documents_directory, "Documents");
        assert_eq!(settings.file_extensions, vec!["*".to_string()]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_nested_documents_directory() {
        let settings = SyncSettings {
            documents_directory: "Docs/Inner".to_string(),
            ..SyncSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSetting { field, .. }) if field == "documents_directory"
        ));
    }

    #[test]
    fn test_rejects_dotted_extensions() {
        let settings = SyncSettings {
            file_extensions: vec![".txt".to_string()],
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_blank_container_id() {
        let settings = SyncSettings {
            container_id: Some("  ".to_string()),
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridge_fails_fast() {
        let err = CoreConfig::builder().build().unwrap_err();
        match err {
            Error::CapabilityMissing { capability, message } => {
                assert_eq!(capability, "FileSystemAccess");
                assert!(message.contains("desktop-shims"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_defaults_fill_missing_bridges() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::builder()
            .local_documents_dir(dir.path())
            .file_extensions(["txt"])
            .build()
            .unwrap();

        assert_eq!(config.settings.file_extensions, vec!["txt".to_string()]);
        assert!(format!("{:?}", config).contains("UbiquityContainer"));
    }
}

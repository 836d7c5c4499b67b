//! File-backed documents

use async_trait::async_trait;
use bridge_traits::{
    document::{CloudDocument, DocumentProvider, DocumentState, SaveOperation},
    error::{BridgeError, Result},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, warn};

use crate::filesystem::{atomic_write, to_utc};
use crate::versions::SidecarVersionStore;

/// Document whose contents live in a single file
pub struct FileDocument {
    url: PathBuf,
    state: watch::Sender<DocumentState>,
    contents: RwLock<Bytes>,
    modified_at: RwLock<Option<DateTime<Utc>>>,
    /// Contents were set but not saved yet
    edited: AtomicBool,
    versions: Option<Arc<SidecarVersionStore>>,
}

impl FileDocument {
    fn new(url: PathBuf, versions: Option<Arc<SidecarVersionStore>>) -> Self {
        let (state, _) = watch::channel(DocumentState::Closed);
        Self {
            url,
            state,
            contents: RwLock::new(Bytes::new()),
            modified_at: RwLock::new(None),
            edited: AtomicBool::new(false),
            versions,
        }
    }

    async fn state_after_load(&self) -> DocumentState {
        let Some(versions) = &self.versions else {
            return DocumentState::Normal;
        };
        match versions.has_unresolved_conflicts(&self.url).await {
            Ok(true) => DocumentState::InConflict,
            Ok(false) => DocumentState::Normal,
            Err(e) => {
                warn!(path = ?self.url, error = %e, "Could not read version conflicts");
                DocumentState::Normal
            }
        }
    }

    async fn modified_on_disk(&self) -> Option<DateTime<Utc>> {
        fs::metadata(&self.url)
            .await
            .ok()
            .and_then(|m| to_utc(m.modified()))
    }

    async fn refresh_modified(&self) {
        *self.modified_at.write().await = self.modified_on_disk().await;
    }

    /// Pick up writes made by someone else while the document is open
    async fn reload_if_changed(&self) {
        if self.state() == DocumentState::Closed || self.edited.load(Ordering::SeqCst) {
            return;
        }
        let on_disk = self.modified_on_disk().await;
        if on_disk.is_none() || on_disk == *self.modified_at.read().await {
            return;
        }
        match fs::read(&self.url).await {
            Ok(data) => {
                debug!(path = ?self.url, size = data.len(), "Reloaded document changed on disk");
                *self.contents.write().await = Bytes::from(data);
                *self.modified_at.write().await = on_disk;
                let state = self.state_after_load().await;
                self.state.send_replace(state);
            }
            Err(e) => warn!(path = ?self.url, error = %e, "Could not reload changed document"),
        }
    }

    async fn write(&self, operation: SaveOperation) -> io::Result<()> {
        if operation == SaveOperation::ForCreating && fs::try_exists(&self.url).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", self.url.display()),
            ));
        }
        let data = self.contents.read().await.clone();
        atomic_write(&self.url, data.as_ref()).await
    }
}

#[async_trait]
impl CloudDocument for FileDocument {
    fn url(&self) -> &Path {
        &self.url
    }

    fn state(&self) -> DocumentState {
        *self.state.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<DocumentState> {
        self.state.subscribe()
    }

    async fn contents(&self) -> Bytes {
        self.reload_if_changed().await;
        self.contents.read().await.clone()
    }

    async fn set_contents(&self, data: Bytes) {
        *self.contents.write().await = data;
        self.edited.store(true, Ordering::SeqCst);
    }

    async fn modification_date(&self) -> Option<DateTime<Utc>> {
        *self.modified_at.read().await
    }

    async fn open(&self) -> Result<()> {
        let data = fs::read(&self.url).await.map_err(BridgeError::Io)?;
        debug!(path = ?self.url, size = data.len(), "Opened document");
        *self.contents.write().await = Bytes::from(data);
        self.edited.store(false, Ordering::SeqCst);
        self.refresh_modified().await;

        let state = self.state_after_load().await;
        self.state.send_replace(state);
        Ok(())
    }

    async fn save(&self, operation: SaveOperation) -> Result<()> {
        if let Err(e) = self.write(operation).await {
            warn!(path = ?self.url, error = %e, "Document save failed");
            self.state.send_replace(DocumentState::SavingError);
            return Err(BridgeError::Io(e));
        }
        self.edited.store(false, Ordering::SeqCst);
        self.refresh_modified().await;
        debug!(path = ?self.url, ?operation, "Saved document");

        let state = self.state_after_load().await;
        self.state.send_replace(state);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.send_replace(DocumentState::Closed);
        debug!(path = ?self.url, "Closed document");
        Ok(())
    }
}

/// Provider caching one document handle per URL
pub struct FileDocumentProvider {
    documents: Mutex<HashMap<PathBuf, Arc<FileDocument>>>,
    versions: Option<Arc<SidecarVersionStore>>,
}

impl FileDocumentProvider {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            versions: None,
        }
    }

    /// Report documents with unresolved versions as `InConflict`
    pub fn with_versions(versions: Arc<SidecarVersionStore>) -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            versions: Some(versions),
        }
    }
}

impl Default for FileDocumentProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentProvider for FileDocumentProvider {
    async fn document(&self, url: &Path) -> Result<Arc<dyn CloudDocument>> {
        let mut documents = self.documents.lock().await;
        let document: Arc<dyn CloudDocument> = documents
            .entry(url.to_path_buf())
            .or_insert_with(|| Arc::new(FileDocument::new(url.to_path_buf(), self.versions.clone())))
            .clone();
        Ok(document)
    }

    async fn forget(&self, url: &Path) {
        if self.documents.lock().await.remove(url).is_some() {
            debug!(path = ?url, "Dropped document handle");
        }
    }
}

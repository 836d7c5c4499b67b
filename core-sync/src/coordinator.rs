//! # Sync Coordinator
//!
//! Public entry point for document sync.
//!
//! ## Overview
//!
//! A `SyncCoordinator` is constructed explicitly from a [`CoreConfig`] and an
//! optional [`CloudDelegate`]. It owns:
//! - the serialized update pipeline that publishes the current file list
//! - the delivery task that calls the delegate
//! - the [`ReconciliationEngine`] used by upload and eviction
//! - the observer registrations
//!
//! Every background task it spawns is tied to a [`CancellationToken`] that is
//! cancelled on [`SyncCoordinator::shutdown`] or drop, so nothing keeps running
//! after the coordinator is gone.
//!
//! ## Lifecycle
//!
//! 1. [`SyncCoordinator::new`] inside a tokio runtime
//! 2. [`SyncCoordinator::setup`] resolves the container and starts enumeration
//! 3. file operations, uploads, evictions and conflict resolution
//! 4. [`SyncCoordinator::shutdown`] (or drop)
//!
//! Operations called before `setup` fail with [`SyncError::NotInitialized`].
//! Every operation except [`SyncCoordinator::save`] also fails fast with
//! [`SyncError::Unavailable`] while no account is signed in; availability is
//! read fresh on every call.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_runtime::config::CoreConfig;
//! use core_sync::SyncCoordinator;
//!
//! # async fn example(delegate: std::sync::Arc<dyn core_sync::CloudDelegate>) -> core_sync::Result<()> {
//! let config = CoreConfig::builder().container_id("iCloud.com.example.notes").build()?;
//! let coordinator = SyncCoordinator::new(config, Some(delegate))?;
//! coordinator.setup(None).await?;
//!
//! coordinator.save("notes.txt", "hello".into()).await?;
//! let outcome = coordinator.retrieve_document("notes.txt").await?;
//! assert_eq!(outcome.contents, "hello");
//! # Ok(())
//! # }
//! ```

use crate::delegate::CloudDelegate;
use crate::delivery::{Callback, DeliveryHandle};
use crate::error::{DocumentFailure, DocumentOutcome};
use crate::metadata::MetadataSnapshot;
use crate::observers::{ObserverRegistry, ObserverToken};
use crate::pipeline::{PipelineContext, UpdatePhase, UpdatePipeline};
use crate::reconciliation::{
    EvictDisposition, FileConflict, ReconciliationEngine, UploadDisposition,
};
use crate::{Result, SyncError};
use bridge_traits::{
    BridgeError, CloudDocument, DocumentState, FileVersion, IdentityToken, QueryScope,
    SaveOperation, SharedLink,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_runtime::config::CoreConfig;
use core_runtime::events::{
    AvailabilityEvent, CoreEvent, DocumentEvent, EventBus, EventStream, RecvError, UpdateEvent,
};
use core_runtime::logging::redact_if_sensitive;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of one entry of [`SyncCoordinator::upload_all_local`]
#[derive(Debug)]
pub struct ItemReport {
    pub name: String,
    pub result: Result<UploadDisposition>,
}

/// Totals for one [`SyncCoordinator::upload_all_local`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Moved into the cloud, or overwrote the cloud copy and kept the local one
    pub uploaded: usize,
    /// Local copy deleted because the cloud copy was newer or identical
    pub local_removed: usize,
    /// Handed to the delegate as conflicts
    pub conflicts: usize,
    pub unchanged: usize,
    /// Hidden entries and entries that failed
    pub failed: usize,
}

impl UploadSummary {
    fn record(&mut self, result: &Result<UploadDisposition>) {
        match result {
            Ok(UploadDisposition::UploadLocal)
            | Ok(UploadDisposition::OverwriteRemoteWithLocal { .. }) => self.uploaded += 1,
            Ok(UploadDisposition::KeepRemoteDeleteLocal) => self.local_removed += 1,
            Ok(UploadDisposition::ReportConflict(_))
            | Ok(UploadDisposition::InsufficientInformation(_)) => self.conflicts += 1,
            Ok(UploadDisposition::NoActionNeeded) => self.unchanged += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.uploaded + self.local_removed + self.conflicts + self.unchanged + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SetupState {
    NotStarted,
    Unavailable,
    Ready { container: PathBuf },
}

struct CoordinatorInner {
    config: CoreConfig,
    engine: ReconciliationEngine,
    pipeline: UpdatePipeline,
    delivery: DeliveryHandle,
    delegate: Option<Arc<dyn CloudDelegate>>,
    events: Arc<EventBus>,
    setup_lock: Mutex<()>,
    setup_state: RwLock<SetupState>,
    container_id: RwLock<Option<String>>,
    container: RwLock<Option<PathBuf>>,
    observers: ObserverRegistry,
    shutdown: CancellationToken,
}

/// Document sync coordinator
///
/// Dropping the coordinator cancels its background tasks.
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SyncCoordinator {
    /// Create a coordinator. Must be called inside a tokio runtime.
    pub fn new(config: CoreConfig, delegate: Option<Arc<dyn CloudDelegate>>) -> Result<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let events = Arc::new(EventBus::new(config.settings.event_buffer_size));
        let delivery = DeliveryHandle::spawn(delegate.clone(), shutdown.child_token());
        let pipeline = UpdatePipeline::spawn(
            PipelineContext {
                query: Arc::clone(&config.metadata_query),
                ubiquity: Arc::clone(&config.ubiquity),
                documents: Arc::clone(&config.documents),
                delivery: delivery.clone(),
                events: Arc::clone(&events),
            },
            shutdown.child_token(),
        );

        info!(
            container_id = ?config.settings.container_id,
            has_delegate = delegate.is_some(),
            "Sync coordinator created"
        );

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                engine: ReconciliationEngine::new(Arc::clone(&config.file_system)),
                container_id: RwLock::new(config.settings.container_id.clone()),
                config,
                pipeline,
                delivery,
                delegate,
                events,
                setup_lock: Mutex::new(()),
                setup_state: RwLock::new(SetupState::NotStarted),
                container: RwLock::new(None),
                observers: ObserverRegistry::default(),
                shutdown,
            }),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    // ========================================================================
    // Initialization and availability
    // ========================================================================

    /// Resolve the cloud container and start enumerating documents
    ///
    /// `container_id` overrides the configured container. Returns the
    /// container location, or `None` when no account is signed in; in that
    /// case the delegate hears `availability_changed(false, ..)` and a later
    /// call may retry. Calling again after a successful setup returns the
    /// existing container without side effects.
    #[instrument(skip(self))]
    pub async fn setup(&self, container_id: Option<&str>) -> Result<Option<PathBuf>> {
        let inner = &self.inner;
        let _guard = inner.setup_lock.lock().await;

        if let SetupState::Ready { container } = &*inner.setup_state.read().await {
            debug!(path = ?container, "Already initialized");
            return Ok(Some(container.clone()));
        }

        if let Some(id) = container_id {
            *inner.container_id.write().await = Some(id.to_string());
        }
        let id = inner.container_id.read().await.clone();
        info!(container_id = ?id, "Setting up cloud documents");

        let resolved = match inner.config.ubiquity.container_url(id.as_deref()).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(error = %e, "Could not resolve the cloud container");
                *inner.setup_state.write().await = SetupState::Unavailable;
                inner.report_availability(false, None).await;
                return Err(e.into());
            }
        };

        let Some(container) = resolved else {
            warn!("Cloud container is unavailable, check that an account is signed in");
            *inner.setup_state.write().await = SetupState::Unavailable;
            inner.report_availability(false, None).await;
            return Ok(None);
        };
        *inner.container.write().await = Some(container.clone());

        if let Err(e) = inner.start_enumeration().await {
            error!(error = %e, "Could not start the metadata query");
            *inner.setup_state.write().await = SetupState::Unavailable;
            return Err(e);
        }
        self.watch_identity().await;

        let token = inner.config.ubiquity.identity_token().await;
        *inner.setup_state.write().await = SetupState::Ready {
            container: container.clone(),
        };
        inner.delivery.deliver(Callback::FinishedInitializing {
            token,
            container: Some(container.clone()),
        });
        let _ = inner
            .events
            .emit(CoreEvent::Availability(AvailabilityEvent::Initialized {
                container: id,
            }));

        info!(path = ?container, "Cloud documents initialized");
        Ok(Some(container))
    }

    /// Re-check availability and report it to the delegate and the event bus
    #[instrument(skip(self))]
    pub async fn check_availability(&self) -> bool {
        self.inner.check_availability().await
    }

    /// Whether an account is signed in right now
    pub async fn is_available(&self) -> bool {
        self.inner.config.ubiquity.identity_token().await.is_some()
    }

    /// The resolved container, if setup found one
    pub async fn container_url(&self) -> Option<PathBuf> {
        self.inner.container.read().await.clone()
    }

    /// Documents folder inside the container
    ///
    /// Falls back to the local documents directory when no container is
    /// reachable.
    pub async fn documents_directory(&self) -> Result<PathBuf> {
        self.inner.ensure_initialized().await?;
        self.inner.documents_dir().await
    }

    /// Local offline documents directory
    pub async fn local_documents_directory(&self) -> Result<PathBuf> {
        self.inner.local_documents_dir().await
    }

    async fn watch_identity(&self) {
        let mut changes = match self.inner.config.ubiquity.subscribe_identity_changes().await {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "Could not observe account changes");
                return;
            }
        };

        let inner = Arc::clone(&self.inner);
        let shutdown = inner.shutdown.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    change = changes.next() => match change {
                        Some(_) => {
                            debug!("Account identity changed");
                            inner.check_availability().await;
                        }
                        None => break,
                    },
                }
            }
            debug!("Identity watcher stopped");
        });
    }

    // ========================================================================
    // Update pipeline
    // ========================================================================

    /// Queue one update cycle
    pub fn update_files(&self) {
        self.inner.pipeline.request_update();
    }

    /// Pause or resume the update queue
    ///
    /// Work queued while paused runs in order once resumed.
    pub fn set_updates_suspended(&self, suspended: bool) {
        self.inner.pipeline.set_suspended(suspended);
    }

    pub fn updates_suspended(&self) -> bool {
        self.inner.pipeline.is_suspended()
    }

    pub fn update_phase(&self) -> UpdatePhase {
        self.inner.pipeline.phase()
    }

    /// Number of update cycles published so far
    pub fn published_cycles(&self) -> u64 {
        self.inner.pipeline.cycles()
    }

    /// Read-only view of the last published snapshot set
    pub async fn published_files(&self) -> Arc<Vec<MetadataSnapshot>> {
        self.inner.pipeline.previous_results().await
    }

    /// Wait until queued update work ran and its callbacks reached the delegate
    pub async fn wait_until_idle(&self) -> Result<()> {
        self.inner.pipeline.flush().await?;
        self.inner.delivery.flush().await
    }

    /// Subscribe to the event bus
    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.inner.events.subscribe())
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.inner.events)
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Write `contents` to `name`, creating the document when it is missing
    ///
    /// Works while signed out so the file can be pushed later.
    #[instrument(skip(self, contents), fields(size = contents.len()))]
    pub async fn save(&self, name: &str, contents: Bytes) -> Result<DocumentOutcome> {
        let inner = &self.inner;
        inner.ensure_initialized().await?;
        ensure_named(name)?;

        let url = inner.documents_dir().await?.join(name);
        let operation = if inner.config.file_system.exists(&url).await? {
            SaveOperation::ForOverwriting
        } else {
            SaveOperation::ForCreating
        };

        let document = inner.config.documents.document(&url).await?;
        document.set_contents(contents.clone()).await;

        if let Err(e) = document.save(operation).await {
            error!(error = %e, ?operation, "Failed to save document");
            return Err(document_failure(DocumentFailure::Write, e, &document, contents));
        }
        if let Err(e) = document.close().await {
            error!(error = %e, "Failed to close document after saving");
            return Err(document_failure(DocumentFailure::Close, e, &document, contents));
        }

        debug!(?operation, "Document saved");
        let _ = inner.events.emit(CoreEvent::Document(DocumentEvent::Saved {
            name: name.to_string(),
        }));
        Ok(DocumentOutcome { document, contents })
    }

    /// Open `name` and return its contents, creating an empty document when missing
    ///
    /// A document in conflict or with a saving error still comes back attached
    /// to the error.
    #[instrument(skip(self))]
    pub async fn retrieve_document(&self, name: &str) -> Result<DocumentOutcome> {
        let inner = &self.inner;
        let url = inner.cloud_path(name).await?;
        let document = inner.config.documents.document(&url).await?;

        if !inner.config.file_system.exists(&url).await? {
            info!("Document does not exist yet, creating it");
            document.set_contents(Bytes::new()).await;
            if let Err(e) = document.save(SaveOperation::ForCreating).await {
                error!(error = %e, "Failed to create document");
                return Err(document_failure(
                    DocumentFailure::Create,
                    e,
                    &document,
                    Bytes::new(),
                ));
            }
            return Ok(DocumentOutcome {
                document,
                contents: Bytes::new(),
            });
        }

        let state = document.state();
        debug!(state = state.as_str(), "Retrieving document");
        match state {
            DocumentState::Closed => {
                if let Err(e) = document.open().await {
                    error!(error = %e, "Failed to open document");
                    return Err(document_failure(
                        DocumentFailure::Open,
                        e,
                        &document,
                        Bytes::new(),
                    ));
                }
            }
            DocumentState::Normal | DocumentState::EditingDisabled => {}
            DocumentState::InConflict | DocumentState::SavingError => {
                let failure = if state == DocumentState::InConflict {
                    DocumentFailure::InConflict
                } else {
                    DocumentFailure::SavingError
                };
                warn!(state = state.as_str(), "Document retrieved in a failed state");
                let contents = document.contents().await;
                return Err(SyncError::Document {
                    failure,
                    message: state.description().to_string(),
                    outcome: Box::new(DocumentOutcome { document, contents }),
                });
            }
        }

        let contents = document.contents().await;
        Ok(DocumentOutcome { document, contents })
    }

    /// Document handle for `name`, neither opened nor created
    #[instrument(skip(self))]
    pub async fn retrieve_document_object(&self, name: &str) -> Result<Arc<dyn CloudDocument>> {
        let url = self.inner.cloud_path(name).await?;
        Ok(self.inner.config.documents.document(&url).await?)
    }

    /// Delete `name` under coordinated access and refresh the file list
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let inner = &self.inner;
        let url = inner.existing_cloud_path(name).await?;

        if let Err(e) = inner.config.file_system.remove_coordinated(&url).await {
            error!(error = %e, "Failed to delete document");
            return Err(SyncError::from_coordinated(e));
        }

        inner.config.documents.forget(&url).await;
        info!("Document deleted");
        let _ = inner.events.emit(CoreEvent::Document(DocumentEvent::Deleted {
            name: name.to_string(),
        }));
        inner.pipeline.request_update();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn rename(&self, name: &str, new_name: &str) -> Result<()> {
        let (from, to) = self.inner.transfer_paths(name, new_name).await?;
        self.inner
            .config
            .file_system
            .move_item(&from, &to)
            .await
            .map_err(SyncError::from_coordinated)?;
        self.inner.config.documents.forget(&from).await;
        self.inner.config.documents.forget(&to).await;

        info!("Document renamed");
        let _ = self.inner.events.emit(CoreEvent::Document(DocumentEvent::Renamed {
            from: name.to_string(),
            to: new_name.to_string(),
        }));
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn duplicate(&self, name: &str, new_name: &str) -> Result<()> {
        let (from, to) = self.inner.transfer_paths(name, new_name).await?;
        self.inner
            .config
            .file_system
            .copy_item(&from, &to)
            .await
            .map_err(SyncError::from_coordinated)?;

        info!("Document duplicated");
        let _ = self
            .inner
            .events
            .emit(CoreEvent::Document(DocumentEvent::Duplicated {
                from: name.to_string(),
                to: new_name.to_string(),
            }));
        Ok(())
    }

    /// Publish `name` and return a shareable link
    #[instrument(skip(self))]
    pub async fn share(&self, name: &str) -> Result<SharedLink> {
        let url = self.inner.existing_cloud_path(name).await?;
        let link = self.inner.config.ubiquity.publish(&url).await?;
        info!(expires_at = ?link.expires_at, "Document shared");
        Ok(link)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn file_exists(&self, name: &str) -> Result<bool> {
        let url = self.inner.cloud_path(name).await?;
        Ok(self.inner.config.file_system.exists(&url).await?)
    }

    pub async fn is_ubiquitous_item(&self, name: &str) -> Result<bool> {
        let url = self.inner.cloud_path(name).await?;
        Ok(self.inner.config.file_system.is_ubiquitous_item(&url).await?)
    }

    /// Size in bytes, `None` when the file does not exist
    pub async fn file_size(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.inner.file_metadata(name).await?.map(|m| m.size))
    }

    pub async fn file_modified(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .inner
            .file_metadata(name)
            .await?
            .and_then(|m| m.modified_at))
    }

    pub async fn file_created(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .inner
            .file_metadata(name)
            .await?
            .and_then(|m| m.created_at))
    }

    /// Entries of the documents folder
    pub async fn list_files(&self) -> Result<Vec<PathBuf>> {
        let inner = &self.inner;
        inner.ensure_initialized().await?;
        inner.ensure_available().await?;
        let dir = inner.documents_dir().await?;
        let mut files = inner.config.file_system.list_directory(&dir).await?;
        files.sort();
        Ok(files)
    }

    /// Current state of `name` and its human-readable description
    #[instrument(skip(self))]
    pub async fn document_state(&self, name: &str) -> Result<(DocumentState, &'static str)> {
        let url = self.inner.existing_cloud_path(name).await?;
        let state = self.inner.config.documents.document(&url).await?.state();
        debug!(state = state.as_str(), "Document state");
        Ok((state, state.description()))
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// The current version of `name` followed by every other stored version
    #[instrument(skip(self))]
    pub async fn find_unresolved_conflicts(&self, name: &str) -> Result<Vec<FileVersion>> {
        let url = self.inner.existing_cloud_path(name).await?;
        let versions = &self.inner.config.versions;

        let mut all = Vec::new();
        if let Some(current) = versions.current_version(&url).await? {
            all.push(current);
        }
        all.extend(versions.other_versions(&url).await?);
        debug!(count = all.len(), "Found versions");
        Ok(all)
    }

    /// Keep `version` and drop every other version of `name`
    #[instrument(skip(self, version), fields(version = %version.id))]
    pub async fn resolve_conflict(&self, name: &str, version: &FileVersion) -> Result<()> {
        let url = self.inner.existing_cloud_path(name).await?;
        let versions = &self.inner.config.versions;

        let unresolved = versions.unresolved_conflict_versions(&url).await?;
        let current = versions.current_version(&url).await?;
        let is_current = version.is_current
            || current.as_ref().is_some_and(|current| current.id == version.id);

        if !is_current {
            info!("Replacing the current version with the chosen one");
            versions.replace_item(version, &url).await?;
        }
        versions.remove_other_versions(&url).await?;
        for conflict in &unresolved {
            versions.mark_resolved(conflict).await?;
        }

        info!(resolved = unresolved.len(), "Conflict resolved");
        Ok(())
    }

    // ========================================================================
    // Upload and eviction
    // ========================================================================

    /// Move a local offline file into the cloud, reconciling with any cloud copy
    ///
    /// Conflicts go to the delegate; they are reported as a disposition, not
    /// an error.
    #[instrument(skip(self))]
    pub async fn upload_local(&self, name: &str) -> Result<UploadDisposition> {
        let inner = &self.inner;
        let cloud_dir = inner.ubiquitous_documents_dir().await?;
        ensure_named(name)?;
        let local_dir = inner.local_documents_dir().await?;
        inner.upload_one(name, &local_dir, &cloud_dir).await
    }

    /// Upload every entry of `local_directory`
    ///
    /// Each entry is reported through `on_item`; hidden entries are skipped
    /// with [`SyncError::HiddenFile`]. Individual failures never abort the
    /// batch. Only failing to list the directory fails the whole call.
    #[instrument(skip(self, on_item))]
    pub async fn upload_all_local<F>(
        &self,
        local_directory: &Path,
        mut on_item: F,
    ) -> Result<UploadSummary>
    where
        F: FnMut(ItemReport) + Send,
    {
        let inner = &self.inner;
        let cloud_dir = inner.ubiquitous_documents_dir().await?;

        let entries = inner
            .config
            .file_system
            .list_directory(local_directory)
            .await?;
        let mut names: Vec<String> = entries
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        names.sort();
        info!(count = names.len(), "Uploading local files");

        let mut summary = UploadSummary::default();
        for name in names {
            let result = if name.starts_with('.') {
                Err(SyncError::HiddenFile { name: name.clone() })
            } else {
                inner.upload_one(&name, local_directory, &cloud_dir).await
            };

            if let Err(e) = &result {
                warn!(name = %name, error = %e, "Local file was not uploaded");
            }
            summary.record(&result);
            on_item(ItemReport { name, result });
        }

        info!(?summary, "Finished uploading local files");
        Ok(summary)
    }

    /// Move a cloud file back to the local offline directory
    #[instrument(skip(self))]
    pub async fn evict(&self, name: &str) -> Result<EvictDisposition> {
        let inner = &self.inner;
        let cloud_dir = inner.ubiquitous_documents_dir().await?;
        ensure_named(name)?;
        let local = inner.local_documents_dir().await?.join(name);
        let remote = cloud_dir.join(name);
        let fs = &inner.config.file_system;

        let listed = inner.pipeline.is_listed(name).await;
        let disposition = inner
            .engine
            .reconcile_evict(name, &local, &remote, listed)
            .await?;

        match &disposition {
            EvictDisposition::MoveRemoteToLocal => {
                fs.set_ubiquitous(false, &remote, &local).await?;
                inner.config.documents.forget(&remote).await;
                info!("Moved cloud file to the local directory");
                inner.emit_evicted(name);
            }
            EvictDisposition::NoActionNeeded => debug!("Nothing to evict"),
            EvictDisposition::DeleteRemoteKeepLocal => {
                info!("Local copy is newer or identical, deleting the cloud copy");
                fs.remove_coordinated(&remote)
                    .await
                    .map_err(SyncError::from_coordinated)?;
                inner.config.documents.forget(&remote).await;
                inner.pipeline.request_update();
                inner.emit_evicted(name);
            }
            EvictDisposition::OverwriteLocalWithRemote { content } => {
                info!("Cloud copy is newer, overwriting the local copy");
                fs.write_file_atomic(&local, content.clone()).await?;
                inner.emit_evicted(name);
            }
            EvictDisposition::ReportConflict(conflict)
            | EvictDisposition::InsufficientInformation(conflict) => {
                inner.report_conflict(conflict.clone());
            }
        }
        Ok(disposition)
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Call `observer` whenever availability is reported
    pub async fn observe_availability<F>(&self, observer: F) -> ObserverToken
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let cancel = self.inner.shutdown.child_token();
        let mut stream = EventStream::new(self.inner.events.subscribe()).filter(|event| {
            matches!(
                event,
                CoreEvent::Availability(AvailabilityEvent::Changed { .. })
            )
        });

        let token = self.inner.observers.register(cancel.clone()).await;
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = stream.recv() => event,
                };
                match event {
                    Ok(CoreEvent::Availability(AvailabilityEvent::Changed { available, .. })) => {
                        observer(available)
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Availability observer fell behind")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        debug!(%token, "Availability observer registered");
        token
    }

    pub async fn remove_availability_observer(&self, token: ObserverToken) -> bool {
        self.inner.observers.remove(token).await
    }

    /// Call `observer` whenever the state of `name` changes
    #[instrument(skip(self, observer))]
    pub async fn observe_document_state<F>(
        &self,
        name: &str,
        observer: F,
    ) -> Result<ObserverToken>
    where
        F: Fn(DocumentState) + Send + Sync + 'static,
    {
        let url = self.inner.cloud_path(name).await?;
        let document = self.inner.config.documents.document(&url).await?;
        let mut states = document.subscribe_state();

        let cancel = self.inner.shutdown.child_token();
        let events = Arc::clone(&self.inner.events);
        let name = name.to_string();
        let token = self.inner.observers.register(cancel.clone()).await;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = states.changed() => if changed.is_err() { break },
                }
                let state = *states.borrow_and_update();
                observer(state);
                let _ = events.emit(CoreEvent::Document(DocumentEvent::StateChanged {
                    name: name.clone(),
                    state: state.as_str().to_string(),
                }));
            }
        });

        debug!(%token, "Document state observer registered");
        Ok(token)
    }

    pub async fn remove_document_state_observer(&self, token: ObserverToken) -> bool {
        self.inner.observers.remove(token).await
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop the metadata query and every background task
    pub async fn shutdown(&self) {
        if let Err(e) = self.inner.config.metadata_query.stop().await {
            warn!(error = %e, "Failed to stop the metadata query");
        }
        self.inner.shutdown.cancel();
        info!("Sync coordinator shut down");
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("config", &self.inner.config)
            .field("has_delegate", &self.inner.delegate.is_some())
            .field("phase", &self.inner.pipeline.phase())
            .finish()
    }
}

impl CoordinatorInner {
    async fn ensure_initialized(&self) -> Result<()> {
        if *self.setup_state.read().await == SetupState::NotStarted {
            return Err(SyncError::NotInitialized);
        }
        Ok(())
    }

    async fn ensure_available(&self) -> Result<()> {
        if self.config.ubiquity.identity_token().await.is_none() {
            warn!("Cloud storage is unavailable");
            return Err(SyncError::Unavailable);
        }
        Ok(())
    }

    /// Location of `name` in the documents folder, after the common guards
    async fn cloud_path(&self, name: &str) -> Result<PathBuf> {
        self.ensure_initialized().await?;
        self.ensure_available().await?;
        ensure_named(name)?;
        Ok(self.documents_dir().await?.join(name))
    }

    async fn existing_cloud_path(&self, name: &str) -> Result<PathBuf> {
        let url = self.cloud_path(name).await?;
        if !self.config.file_system.exists(&url).await? {
            warn!(name = %name, "File does not exist");
            return Err(SyncError::NotFound {
                name: name.to_string(),
                path: url,
            });
        }
        Ok(url)
    }

    async fn transfer_paths(&self, name: &str, new_name: &str) -> Result<(PathBuf, PathBuf)> {
        let from = self.existing_cloud_path(name).await?;
        ensure_named(new_name)?;
        let to = from.with_file_name(new_name);
        if self.config.file_system.exists(&to).await? {
            warn!(name = %new_name, "Target already exists");
            return Err(SyncError::AlreadyExists {
                name: new_name.to_string(),
                path: to,
            });
        }
        Ok((from, to))
    }

    async fn file_metadata(&self, name: &str) -> Result<Option<bridge_traits::FileMetadata>> {
        let url = self.cloud_path(name).await?;
        let fs = &self.config.file_system;
        if !fs.exists(&url).await? {
            return Ok(None);
        }
        Ok(Some(fs.metadata(&url).await?))
    }

    async fn container(&self) -> Result<Option<PathBuf>> {
        if let Some(container) = self.container.read().await.clone() {
            return Ok(Some(container));
        }

        let id = self.container_id.read().await.clone();
        let resolved = self.config.ubiquity.container_url(id.as_deref()).await?;
        if let Some(container) = &resolved {
            *self.container.write().await = Some(container.clone());
        }
        Ok(resolved)
    }

    /// Documents folder, falling back to the local directory without a container
    async fn documents_dir(&self) -> Result<PathBuf> {
        match self.container().await? {
            Some(container) => self.prepare_documents_dir(&container).await,
            None => {
                warn!("Cloud container is unavailable, using the local documents directory");
                self.report_availability(false, None).await;
                self.local_documents_dir().await
            }
        }
    }

    /// Documents folder inside a reachable container, never the local fallback
    async fn ubiquitous_documents_dir(&self) -> Result<PathBuf> {
        self.ensure_initialized().await?;
        self.ensure_available().await?;
        match self.container().await? {
            Some(container) => self.prepare_documents_dir(&container).await,
            None => Err(SyncError::Unavailable),
        }
    }

    async fn prepare_documents_dir(&self, container: &Path) -> Result<PathBuf> {
        let fs = &self.config.file_system;
        let dir = container.join(&self.config.settings.documents_directory);

        if fs.exists(&dir).await? {
            if !fs.is_directory(&dir).await? {
                warn!(path = ?dir, "Documents path is not a directory, recreating it");
                fs.remove_item(&dir).await?;
                fs.create_dir_all(&dir).await?;
            }
        } else {
            debug!(path = ?dir, "Creating the documents directory");
            fs.create_dir_all(&dir).await?;
        }
        Ok(dir)
    }

    async fn local_documents_dir(&self) -> Result<PathBuf> {
        match &self.config.settings.local_documents_dir {
            Some(dir) => {
                self.config.file_system.create_dir_all(dir).await?;
                Ok(dir.clone())
            }
            None => Ok(self.config.ubiquity.local_documents_url().await?),
        }
    }

    async fn start_enumeration(&self) -> Result<()> {
        let root = self.documents_dir().await?;
        let mut extensions = match &self.delegate {
            Some(delegate) => delegate.query_file_extensions().await,
            None => Vec::new(),
        };
        if extensions.is_empty() {
            extensions = self.config.settings.file_extensions.clone();
        }

        debug!(root = ?root, ?extensions, "Starting metadata query");
        let stream = self
            .config
            .metadata_query
            .start(QueryScope::new(root, extensions))
            .await?;
        self.pipeline.attach(stream, self.shutdown.child_token());
        Ok(())
    }

    async fn check_availability(&self) -> bool {
        let token = self.config.ubiquity.identity_token().await;
        let available = token.is_some();
        if let Some(token) = &token {
            debug!(
                identity_token = %redact_if_sensitive("identity_token", token.as_str()),
                "Account signed in"
            );
        }
        info!(available, "Cloud availability checked");
        self.report_availability(available, token).await;
        available
    }

    async fn report_availability(&self, available: bool, token: Option<IdentityToken>) {
        let container = self.container.read().await.clone();
        self.delivery.deliver(Callback::AvailabilityChanged {
            available,
            token,
            container,
        });
        let _ = self
            .events
            .emit(CoreEvent::Availability(AvailabilityEvent::Changed {
                available,
                container: self.container_id.read().await.clone(),
            }));
    }

    fn report_conflict(&self, conflict: FileConflict) {
        warn!(name = %conflict.name, "Local and cloud copies conflict");
        let _ = self
            .events
            .emit(CoreEvent::Update(UpdateEvent::ConflictDetected {
                name: conflict.name.clone(),
            }));
        self.delivery.deliver(Callback::Conflict(conflict));
    }

    fn emit_evicted(&self, name: &str) {
        let _ = self.events.emit(CoreEvent::Document(DocumentEvent::Evicted {
            name: name.to_string(),
        }));
    }

    async fn upload_one(
        &self,
        name: &str,
        local_dir: &Path,
        cloud_dir: &Path,
    ) -> Result<UploadDisposition> {
        let local = local_dir.join(name);
        let remote = cloud_dir.join(name);
        let fs = &self.config.file_system;

        let listed = self.pipeline.is_listed(name).await;
        let disposition = self
            .engine
            .reconcile_upload(name, &local, &remote, listed)
            .await?;

        match &disposition {
            UploadDisposition::UploadLocal => {
                fs.set_ubiquitous(true, &local, &remote).await?;
                info!(name = %name, "Moved local file to the cloud");
                self.emit_uploaded(name);
            }
            UploadDisposition::NoActionNeeded => debug!(name = %name, "Nothing to upload"),
            UploadDisposition::KeepRemoteDeleteLocal => {
                info!(name = %name, "Cloud copy is newer or identical, deleting the local copy");
                fs.remove_item(&local).await?;
            }
            UploadDisposition::OverwriteRemoteWithLocal { content } => {
                info!(name = %name, "Local copy is newer, overwriting the cloud copy");
                let document = self.config.documents.document(&remote).await?;
                document.set_contents(content.clone()).await;
                if let Err(e) = document.save(SaveOperation::ForOverwriting).await {
                    error!(name = %name, error = %e, "Failed to overwrite the cloud copy");
                    return Err(document_failure(
                        DocumentFailure::Write,
                        e,
                        &document,
                        content.clone(),
                    ));
                }
                if let Err(e) = document.close().await {
                    return Err(document_failure(
                        DocumentFailure::Close,
                        e,
                        &document,
                        content.clone(),
                    ));
                }
                self.emit_uploaded(name);
            }
            UploadDisposition::ReportConflict(conflict)
            | UploadDisposition::InsufficientInformation(conflict) => {
                self.report_conflict(conflict.clone());
            }
        }
        Ok(disposition)
    }

    fn emit_uploaded(&self, name: &str) {
        let _ = self.events.emit(CoreEvent::Document(DocumentEvent::Uploaded {
            name: name.to_string(),
        }));
    }
}

/// Names are single path components inside the documents directory
fn ensure_named(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::EmptyName);
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(SyncError::InvalidName {
            name: name.to_string(),
        }),
    }
}

fn document_failure(
    failure: DocumentFailure,
    error: BridgeError,
    document: &Arc<dyn CloudDocument>,
    contents: Bytes,
) -> SyncError {
    SyncError::Document {
        failure,
        message: error.to_string(),
        outcome: Box::new(DocumentOutcome {
            document: Arc::clone(document),
            contents,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_every_outcome() {
        let mut summary = UploadSummary::default();
        summary.record(&Ok(UploadDisposition::UploadLocal));
        summary.record(&Ok(UploadDisposition::OverwriteRemoteWithLocal {
            content: Bytes::from_static(b"x"),
        }));
        summary.record(&Ok(UploadDisposition::KeepRemoteDeleteLocal));
        summary.record(&Ok(UploadDisposition::NoActionNeeded));
        summary.record(&Err(SyncError::HiddenFile {
            name: ".DS_Store".to_string(),
        }));

        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.local_removed, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.conflicts, 0);
        assert_eq!(summary.total(), 5);
    }

    #[test]
    fn test_names_must_be_single_components() {
        assert!(matches!(ensure_named(""), Err(SyncError::EmptyName)));
        assert!(ensure_named("notes.txt").is_ok());
        assert!(ensure_named(".hidden").is_ok());
        for name in ["../Local/x", "a/b", "..", ".", "/etc/passwd", "a\\b"] {
            assert!(
                matches!(ensure_named(name), Err(SyncError::InvalidName { .. })),
                "{name} should be rejected"
            );
        }
    }
}

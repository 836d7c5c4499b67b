//! # Update Pipeline
//!
//! Turns metadata query notifications into an ordered sequence of published
//! file lists.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Gathering → Partitioning → Publishing → Idle
//!            ↓             ↓
//!           Idle          Idle
//! ```
//!
//! - **Gathering**: raw records become [`MetadataSnapshot`]s; partial records are dropped
//! - **Partitioning**: current items are published, not-downloaded items get a
//!   fire-and-forget download request, downloading items wait for a later cycle
//! - **Publishing**: the snapshot set replaces the previous results wholesale and
//!   the current files are handed to the delegate
//!
//! ## Ordering
//!
//! All work runs on a single worker task fed by an unbounded queue, so cycles
//! never overlap and run in arrival order. Suspending the pipeline holds the
//! queue; resuming drains it in order.

use crate::delivery::{Callback, DeliveryHandle};
use crate::metadata::{CloudFile, MetadataSnapshot};
use crate::{Result, SyncError};
use bridge_traits::{
    DocumentProvider, DownloadStatus, MetadataQuery, QueryNotification, QueryNotificationStream,
    UbiquityContainer,
};
use core_runtime::events::{CoreEvent, EventBus, UpdateEvent};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    Gathering,
    Partitioning,
    Publishing,
}

impl UpdatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::Gathering => "gathering",
            UpdatePhase::Partitioning => "partitioning",
            UpdatePhase::Publishing => "publishing",
        }
    }

    pub fn can_transition_to(&self, next: UpdatePhase) -> bool {
        matches!(
            (self, next),
            (UpdatePhase::Idle, UpdatePhase::Gathering)
                | (UpdatePhase::Gathering, UpdatePhase::Partitioning)
                | (UpdatePhase::Gathering, UpdatePhase::Idle)
                | (UpdatePhase::Partitioning, UpdatePhase::Publishing)
                | (UpdatePhase::Partitioning, UpdatePhase::Idle)
                | (UpdatePhase::Publishing, UpdatePhase::Idle)
        )
    }

    /// Validate a transition to `next`
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` when the cycle would skip or repeat a phase.
    pub fn transition(self, next: UpdatePhase) -> Result<UpdatePhase> {
        if !self.can_transition_to(next) {
            return Err(SyncError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
                reason: "update cycles run idle, gathering, partitioning, publishing".to_string(),
            });
        }
        Ok(next)
    }
}

impl FromStr for UpdatePhase {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(UpdatePhase::Idle),
            "gathering" => Ok(UpdatePhase::Gathering),
            "partitioning" => Ok(UpdatePhase::Partitioning),
            "publishing" => Ok(UpdatePhase::Publishing),
            _ => Err(SyncError::InvalidStateTransition {
                from: s.to_string(),
                to: s.to_string(),
                reason: "unknown update phase".to_string(),
            }),
        }
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

enum UpdateWork {
    Begin,
    Cycle,
    End,
    Barrier(oneshot::Sender<()>),
}

/// Finishing the initial gathering publishes once more before ending
fn work_for(notification: QueryNotification) -> Vec<UpdateWork> {
    match notification {
        QueryNotification::GatheringStarted => vec![UpdateWork::Begin],
        QueryNotification::Updated => vec![UpdateWork::Cycle],
        QueryNotification::GatheringFinished => vec![UpdateWork::Cycle, UpdateWork::End],
    }
}

/// Collaborators a cycle needs
pub(crate) struct PipelineContext {
    pub query: Arc<dyn MetadataQuery>,
    pub ubiquity: Arc<dyn UbiquityContainer>,
    pub documents: Arc<dyn DocumentProvider>,
    pub delivery: DeliveryHandle,
    pub events: Arc<EventBus>,
}

struct PipelineShared {
    previous_results: RwLock<Arc<Vec<MetadataSnapshot>>>,
    phase: watch::Sender<UpdatePhase>,
    cycles: AtomicU64,
}

impl PipelineShared {
    fn advance(&self, next: UpdatePhase) -> Result<()> {
        let current = *self.phase.borrow();
        let next = current.transition(next)?;
        self.phase.send_replace(next);
        Ok(())
    }
}

/// Serialized update queue owning the previous results
pub(crate) struct UpdatePipeline {
    sender: mpsc::UnboundedSender<UpdateWork>,
    suspended: watch::Sender<bool>,
    shared: Arc<PipelineShared>,
}

impl UpdatePipeline {
    /// Start the worker task. Must be called inside a tokio runtime.
    pub(crate) fn spawn(context: PipelineContext, shutdown: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (suspended, suspended_rx) = watch::channel(false);
        let (phase, _) = watch::channel(UpdatePhase::Idle);
        let shared = Arc::new(PipelineShared {
            previous_results: RwLock::new(Arc::new(Vec::new())),
            phase,
            cycles: AtomicU64::new(0),
        });

        tokio::spawn(run_worker(
            context,
            Arc::clone(&shared),
            receiver,
            suspended_rx,
            shutdown,
        ));

        Self {
            sender,
            suspended,
            shared,
        }
    }

    fn enqueue(&self, work: UpdateWork) {
        if self.sender.send(work).is_err() {
            debug!("Update worker stopped, dropping work");
        }
    }

    /// Queue one update cycle
    pub(crate) fn request_update(&self) {
        self.enqueue(UpdateWork::Cycle);
    }

    /// Queue the work for one query notification
    pub(crate) fn notify(&self, notification: QueryNotification) {
        for work in work_for(notification) {
            self.enqueue(work);
        }
    }

    /// Forward a query's notifications into the queue until shutdown
    pub(crate) fn attach(
        &self,
        mut stream: Box<dyn QueryNotificationStream>,
        shutdown: CancellationToken,
    ) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = stream.next() => match next {
                        Some(notification) => notification,
                        None => break,
                    },
                };

                debug!(?notification, "Query notification");
                if work_for(notification)
                    .into_iter()
                    .any(|work| sender.send(work).is_err())
                {
                    break;
                }
            }
            debug!("Query listener stopped");
        });
    }

    pub(crate) fn set_suspended(&self, suspended: bool) {
        self.suspended.send_replace(suspended);
        info!(suspended, "Update queue suspension changed");
    }

    pub(crate) fn is_suspended(&self) -> bool {
        *self.suspended.borrow()
    }

    pub(crate) fn phase(&self) -> UpdatePhase {
        *self.shared.phase.borrow()
    }

    /// Number of cycles published so far
    pub(crate) fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::SeqCst)
    }

    /// Read-only view of the last published snapshot set
    pub(crate) async fn previous_results(&self) -> Arc<Vec<MetadataSnapshot>> {
        Arc::clone(&*self.shared.previous_results.read().await)
    }

    /// Whether `name` was listed by the last published cycle
    pub(crate) async fn is_listed(&self, name: &str) -> bool {
        self.previous_results()
            .await
            .iter()
            .any(|snapshot| snapshot.name() == name)
    }

    /// Wait until all work queued so far has run
    pub(crate) async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(UpdateWork::Barrier(done))
            .map_err(|_| SyncError::Shutdown)?;
        wait.await.map_err(|_| SyncError::Shutdown)
    }
}

async fn wait_until_resumed(suspended: &mut watch::Receiver<bool>) -> bool {
    suspended.wait_for(|s| !*s).await.is_ok()
}

async fn run_worker(
    context: PipelineContext,
    shared: Arc<PipelineShared>,
    mut receiver: mpsc::UnboundedReceiver<UpdateWork>,
    mut suspended: watch::Receiver<bool>,
    shutdown: CancellationToken,
) {
    loop {
        let work = tokio::select! {
            _ = shutdown.cancelled() => break,
            work = receiver.recv() => match work {
                Some(work) => work,
                None => break,
            },
        };

        if *suspended.borrow() {
            debug!("Update queue suspended, holding work");
            let resumed = tokio::select! {
                _ = shutdown.cancelled() => false,
                resumed = wait_until_resumed(&mut suspended) => resumed,
            };
            if !resumed {
                break;
            }
        }

        match work {
            UpdateWork::Begin => {
                debug!("Beginning file update");
                let _ = context.events.emit(CoreEvent::Update(UpdateEvent::Began));
                context.delivery.deliver(Callback::UpdateBegan);
            }
            UpdateWork::Cycle => {
                if let Err(e) = run_cycle(&context, &shared).await {
                    error!(error = %e, "Update cycle failed");
                    shared.phase.send_replace(UpdatePhase::Idle);
                }
            }
            UpdateWork::End => {
                debug!("Finished file update");
                let _ = context.events.emit(CoreEvent::Update(UpdateEvent::Ended));
                context.delivery.deliver(Callback::UpdateEnded);
            }
            UpdateWork::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Update worker stopped");
}

#[instrument(skip_all, fields(cycle = shared.cycles.load(Ordering::SeqCst) + 1))]
async fn run_cycle(context: &PipelineContext, shared: &PipelineShared) -> Result<()> {
    if context.ubiquity.identity_token().await.is_none() {
        debug!("Cloud storage unavailable, skipping update cycle");
        return Ok(());
    }

    shared.advance(UpdatePhase::Gathering)?;
    let records = context.query.results().await;
    let valid: Vec<MetadataSnapshot> = records
        .iter()
        .filter_map(MetadataSnapshot::from_record)
        .collect();
    if valid.len() < records.len() {
        debug!(
            skipped = records.len() - valid.len(),
            "Dropped incomplete metadata records"
        );
    }
    let snapshots = latest_per_name(valid);

    shared.advance(UpdatePhase::Partitioning)?;
    let mut files = Vec::new();
    let mut pending = 0;
    for snapshot in &snapshots {
        match snapshot.status() {
            DownloadStatus::Current => match context.documents.document(snapshot.url()).await {
                Ok(document) => files.push(CloudFile {
                    name: snapshot.name().to_string(),
                    metadata: snapshot.clone(),
                    document,
                }),
                Err(e) => {
                    warn!(name = %snapshot.name(), error = %e, "Could not create document handle")
                }
            },
            DownloadStatus::NotDownloaded => {
                pending += 1;
                start_download(context, snapshot);
            }
            DownloadStatus::Downloading | DownloadStatus::Downloaded => pending += 1,
        }
    }

    shared.advance(UpdatePhase::Publishing)?;
    *shared.previous_results.write().await = Arc::new(snapshots);
    let cycle = shared.cycles.fetch_add(1, Ordering::SeqCst) + 1;

    debug!(files = files.len(), pending, "Publishing file list");
    let _ = context.events.emit(CoreEvent::Update(UpdateEvent::Published {
        cycle,
        files: files.len(),
        pending,
    }));
    context.delivery.deliver(Callback::FilesChanged(files));

    shared.advance(UpdatePhase::Idle)
}

/// One snapshot per name, the last one reported wins its slot
fn latest_per_name(snapshots: Vec<MetadataSnapshot>) -> Vec<MetadataSnapshot> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(snapshots.len());
    let mut unique: Vec<MetadataSnapshot> = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        match slots.get(snapshot.name()) {
            Some(&index) => unique[index] = snapshot,
            None => {
                slots.insert(snapshot.name().to_string(), unique.len());
                unique.push(snapshot);
            }
        }
    }
    unique
}

/// Ask the host to download an item without waiting for it
fn start_download(context: &PipelineContext, snapshot: &MetadataSnapshot) {
    let ubiquity = Arc::clone(&context.ubiquity);
    let events = Arc::clone(&context.events);
    let name = snapshot.name().to_string();
    let url = snapshot.url().to_path_buf();

    tokio::spawn(async move {
        match ubiquity.start_downloading(&url).await {
            Ok(()) => debug!(name = %name, "Started downloading"),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to start downloading");
                let _ = events.emit(CoreEvent::Update(UpdateEvent::DownloadFailed {
                    name,
                    message: e.to_string(),
                }));
            }
        }
    });
}

// ============================================================================
// Tests
// ============================================================================

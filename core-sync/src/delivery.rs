//! Ordered delivery of delegate callbacks
//!
//! Every delegate callback goes through one task, so the delegate sees
//! callbacks one at a time, never on a pipeline worker, and in the order they
//! were queued.

use crate::delegate::CloudDelegate;
use crate::metadata::CloudFile;
use crate::reconciliation::FileConflict;
use crate::{Result, SyncError};
use bridge_traits::IdentityToken;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub(crate) enum Callback {
    AvailabilityChanged {
        available: bool,
        token: Option<IdentityToken>,
        container: Option<PathBuf>,
    },
    FinishedInitializing {
        token: Option<IdentityToken>,
        container: Option<PathBuf>,
    },
    UpdateBegan,
    UpdateEnded,
    FilesChanged(Vec<CloudFile>),
    Conflict(FileConflict),
    /// Resolves once everything queued before it was delivered
    Barrier(oneshot::Sender<()>),
}

impl Callback {
    fn as_str(&self) -> &'static str {
        match self {
            Callback::AvailabilityChanged { .. } => "availability_changed",
            Callback::FinishedInitializing { .. } => "did_finish_initializing",
            Callback::UpdateBegan => "file_update_did_begin",
            Callback::UpdateEnded => "file_update_did_end",
            Callback::FilesChanged(_) => "files_changed",
            Callback::Conflict(_) => "file_conflict",
            Callback::Barrier(_) => "barrier",
        }
    }
}

#[derive(Clone)]
pub(crate) struct DeliveryHandle {
    sender: mpsc::UnboundedSender<Callback>,
}

impl DeliveryHandle {
    /// Start the delivery task. Must be called inside a tokio runtime.
    pub(crate) fn spawn(
        delegate: Option<Arc<dyn CloudDelegate>>,
        shutdown: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(delegate, receiver, shutdown));
        Self { sender }
    }

    pub(crate) fn deliver(&self, callback: Callback) {
        let kind = callback.as_str();
        if self.sender.send(callback).is_err() {
            debug!(callback = kind, "Delivery task stopped, dropping callback");
        }
    }

    /// Wait until every callback queued so far reached the delegate
    pub(crate) async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(Callback::Barrier(done))
            .map_err(|_| SyncError::Shutdown)?;
        wait.await.map_err(|_| SyncError::Shutdown)
    }
}

async fn run(
    delegate: Option<Arc<dyn CloudDelegate>>,
    mut receiver: mpsc::UnboundedReceiver<Callback>,
    shutdown: CancellationToken,
) {
    loop {
        let callback = tokio::select! {
            _ = shutdown.cancelled() => break,
            callback = receiver.recv() => match callback {
                Some(callback) => callback,
                None => break,
            },
        };

        if let Callback::Barrier(done) = callback {
            let _ = done.send(());
            continue;
        }

        let Some(delegate) = &delegate else {
            trace!(callback = callback.as_str(), "No delegate registered");
            continue;
        };

        trace!(callback = callback.as_str(), "Delivering callback");
        match callback {
            Callback::AvailabilityChanged {
                available,
                token,
                container,
            } => {
                delegate
                    .availability_changed(available, token, container)
                    .await
            }
            Callback::FinishedInitializing { token, container } => {
                delegate.did_finish_initializing(token, container).await
            }
            Callback::UpdateBegan => delegate.file_update_did_begin().await,
            Callback::UpdateEnded => delegate.file_update_did_end().await,
            Callback::FilesChanged(files) => delegate.files_changed(files).await,
            Callback::Conflict(conflict) => delegate.file_conflict(conflict).await,
            Callback::Barrier(_) => {}
        }
    }
    debug!("Delivery task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloudDelegate for Recorder {
        async fn file_update_did_begin(&self) {
            self.calls.lock().await.push("begin".to_string());
        }

        async fn file_update_did_end(&self) {
            self.calls.lock().await.push("end".to_string());
        }

        async fn files_changed(&self, files: Vec<CloudFile>) {
            self.calls.lock().await.push(format!("files:{}", files.len()));
        }
    }

    #[tokio::test]
    async fn test_callbacks_arrive_in_queue_order() {
        let recorder = Arc::new(Recorder::default());
        let handle = DeliveryHandle::spawn(Some(recorder.clone()), CancellationToken::new());

        handle.deliver(Callback::UpdateBegan);
        handle.deliver(Callback::FilesChanged(Vec::new()));
        handle.deliver(Callback::UpdateEnded);
        handle.flush().await.unwrap();

        assert_eq!(*recorder.calls.lock().await, vec!["begin", "files:0", "end"]);
    }

    #[tokio::test]
    async fn test_missing_delegate_is_silent() {
        let handle = DeliveryHandle::spawn(None, CancellationToken::new());
        handle.deliver(Callback::UpdateBegan);
        assert!(handle.flush().await.is_ok());
    }

    #[tokio::test]
    async fn test_flush_after_shutdown_fails() {
        let shutdown = CancellationToken::new();
        let handle = DeliveryHandle::spawn(None, shutdown.clone());
        shutdown.cancel();
        tokio::task::yield_now().await;

        // Either the send or the wait observes the stopped task
        for _ in 0..10 {
            if handle.flush().await.is_err() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("delivery task kept running after shutdown");
    }
}

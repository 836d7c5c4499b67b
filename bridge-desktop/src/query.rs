//! Polling metadata query
//!
//! Rescans the container directory on a fixed interval and reports a change
//! whenever the listing differs from the previous scan.

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    metadata_query::{
        DownloadStatus, MetadataQuery, MetadataRecord, QueryNotification,
        QueryNotificationStream, QueryScope,
    },
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::container::name_from_placeholder;
use crate::filesystem::to_utc;

/// Default rescan interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct PollingMetadataQuery {
    interval: Duration,
    results: Arc<RwLock<Vec<Arc<MetadataRecord>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingMetadataQuery {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            results: Arc::new(RwLock::new(Vec::new())),
            task: Mutex::new(None),
        }
    }
}

impl Default for PollingMetadataQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollingMetadataQuery {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

/// Scan one directory level and build raw records
async fn scan(scope: &QueryScope) -> std::io::Result<Vec<Arc<MetadataRecord>>> {
    let mut records = Vec::new();
    let mut read_dir = match fs::read_dir(&scope.root).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
        Err(e) => return Err(e),
    };

    while let Some(entry) = read_dir.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            // Removed between listing and stat
            Err(_) => continue,
        };
        if metadata.is_dir() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        let (name, status) = match name_from_placeholder(&file_name) {
            Some(name) => (name.to_string(), DownloadStatus::NotDownloaded),
            None if file_name.starts_with('.') => continue,
            None => (file_name, DownloadStatus::Current),
        };

        let url = scope.root.join(&name);
        if !scope.matches(Path::new(&name)) {
            continue;
        }

        records.push(Arc::new(MetadataRecord {
            url: Some(url),
            fs_name: Some(name),
            download_status: Some(status),
            modified_at: to_utc(metadata.modified()),
            size: Some(metadata.len()),
        }));
    }

    records.sort_by(|a, b| a.fs_name.cmp(&b.fs_name));
    Ok(records)
}

#[async_trait]
impl MetadataQuery for PollingMetadataQuery {
    async fn start(&self, scope: QueryScope) -> Result<Box<dyn QueryNotificationStream>> {
        self.stop().await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let results = Arc::clone(&self.results);
        let interval = self.interval;

        debug!(root = ?scope.root, extensions = ?scope.extensions, "Starting metadata query");

        let handle = tokio::spawn(async move {
            if sender.send(QueryNotification::GatheringStarted).is_err() {
                return;
            }

            match scan(&scope).await {
                Ok(records) => *results.write().await = records,
                Err(e) => warn!(error = %e, "Initial scan failed"),
            }

            if sender.send(QueryNotification::GatheringFinished).is_err() {
                return;
            }

            loop {
                tokio::time::sleep(interval).await;
                let records = match scan(&scope).await {
                    Ok(records) => records,
                    Err(e) => {
                        warn!(error = %e, "Rescan failed");
                        continue;
                    }
                };

                let changed = {
                    let mut current = results.write().await;
                    if *current != records {
                        *current = records;
                        true
                    } else {
                        false
                    }
                };

                if changed && sender.send(QueryNotification::Updated).is_err() {
                    break;
                }
            }
        });

        *self.task.lock().await = Some(handle);
        Ok(Box::new(ChannelNotificationStream { receiver }))
    }

    async fn results(&self) -> Vec<Arc<MetadataRecord>> {
        self.results.read().await.clone()
    }

    async fn stop(&self) -> Result<()> {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            debug!("Stopped metadata query");
        }
        Ok(())
    }
}

struct ChannelNotificationStream {
    receiver: mpsc::UnboundedReceiver<QueryNotification>,
}

#[async_trait]
impl QueryNotificationStream for ChannelNotificationStream {
    async fn next(&mut self) -> Option<QueryNotification> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::placeholder_name;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_gathering_reports_records() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join(placeholder_name("b.txt")), b"b").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"h").unwrap();
        std::fs::write(dir.path().join("c.png"), b"c").unwrap();

        let query = PollingMetadataQuery::with_interval(Duration::from_millis(20));
        let scope = QueryScope::new(dir.path(), vec!["txt".to_string()]);
        let mut stream = query.start(scope).await.unwrap();

        assert_eq!(stream.next().await, Some(QueryNotification::GatheringStarted));
        assert_eq!(stream.next().await, Some(QueryNotification::GatheringFinished));

        let results = query.results().await;
        let names: Vec<_> = results
            .iter()
            .map(|r| (r.fs_name.clone().unwrap(), r.download_status.unwrap()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("a.txt".to_string(), DownloadStatus::Current),
                ("b.txt".to_string(), DownloadStatus::NotDownloaded),
            ]
        );
        query.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rescan_reports_update() {
        let dir = tempdir().unwrap();
        let query = PollingMetadataQuery::with_interval(Duration::from_millis(20));
        let mut stream = query
            .start(QueryScope::new(dir.path(), vec!["*".to_string()]))
            .await
            .unwrap();
        assert_eq!(stream.next().await, Some(QueryNotification::GatheringStarted));
        assert_eq!(stream.next().await, Some(QueryNotification::GatheringFinished));
        assert!(query.results().await.is_empty());

        std::fs::write(dir.path().join("new.txt"), b"n").unwrap();

        let update = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert_eq!(update, Some(QueryNotification::Updated));
        assert_eq!(query.results().await.len(), 1);
        query.stop().await.unwrap();
    }
}

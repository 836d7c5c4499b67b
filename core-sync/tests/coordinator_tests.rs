//! Integration tests for the sync coordinator
//!
//! These tests run the coordinator against the desktop bridges inside a
//! temporary directory:
//! - Document round trips and creation on first retrieval
//! - Rename, duplicate and delete preconditions
//! - Upload and eviction dispositions and which copies survive them
//! - Bulk upload reporting
//! - Availability reporting while signed out
//! - Version conflict resolution

use async_trait::async_trait;
use bridge_desktop::{
    DirectoryContainer, FileDocumentProvider, PollingMetadataQuery, SidecarVersionStore,
    TokioFileSystem,
};
use bridge_traits::{DocumentState, IdentityToken};
use bytes::Bytes;
use core_runtime::config::CoreConfig;
use core_sync::{
    CloudDelegate, CloudFile, EvictDisposition, FileConflict, ItemReport, SyncCoordinator,
    SyncError, UploadDisposition,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};

// ============================================================================
// Test Harness
// ============================================================================

#[derive(Default)]
struct Recorder {
    availability: Mutex<Vec<bool>>,
    initialized: Mutex<Vec<Option<PathBuf>>>,
    conflicts: Mutex<Vec<FileConflict>>,
    files: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl CloudDelegate for Recorder {
    async fn availability_changed(
        &self,
        available: bool,
        _token: Option<IdentityToken>,
        _container: Option<PathBuf>,
    ) {
        self.availability.lock().await.push(available);
    }

    async fn files_changed(&self, files: Vec<CloudFile>) {
        let names = files.into_iter().map(|f| f.name).collect();
        self.files.lock().await.push(names);
    }

    async fn file_conflict(&self, conflict: FileConflict) {
        self.conflicts.lock().await.push(conflict);
    }

    async fn did_finish_initializing(
        &self,
        _token: Option<IdentityToken>,
        container: Option<PathBuf>,
    ) {
        self.initialized.lock().await.push(container);
    }
}

struct Sandbox {
    _dir: TempDir,
    coordinator: SyncCoordinator,
    container: Arc<DirectoryContainer>,
    versions: Arc<SidecarVersionStore>,
    recorder: Arc<Recorder>,
    local: PathBuf,
}

fn sandbox() -> Sandbox {
    let dir = tempfile::tempdir().unwrap();
    let cloud_root = dir.path().join("Cloud");
    let local = dir.path().join("Local");

    let container = Arc::new(DirectoryContainer::new(cloud_root.clone(), local.clone()));
    let versions = Arc::new(SidecarVersionStore::new(dir.path().join("Versions")));
    let config = CoreConfig::builder()
        .file_system(Arc::new(TokioFileSystem::new(cloud_root)))
        .ubiquity(container.clone())
        .metadata_query(Arc::new(PollingMetadataQuery::with_interval(
            Duration::from_millis(50),
        )))
        .documents(Arc::new(FileDocumentProvider::with_versions(versions.clone())))
        .versions(versions.clone())
        .local_documents_dir(local.clone())
        .build()
        .unwrap();

    let recorder = Arc::new(Recorder::default());
    let coordinator = SyncCoordinator::new(config, Some(recorder.clone())).unwrap();

    Sandbox {
        _dir: dir,
        coordinator,
        container,
        versions,
        recorder,
        local,
    }
}

async fn ready_sandbox() -> Sandbox {
    let sandbox = sandbox();
    sandbox.coordinator.setup(None).await.unwrap().unwrap();
    sandbox
}

fn write_with_mtime(path: &Path, contents: &[u8], modified: SystemTime) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(modified).unwrap();
}

// ============================================================================
// Setup and availability
// ============================================================================

#[tokio::test]
async fn test_operations_before_setup_fail() {
    let sandbox = sandbox();
    let result = sandbox.coordinator.retrieve_document("notes.txt").await;
    assert!(matches!(result, Err(SyncError::NotInitialized)));
}

#[tokio::test]
async fn test_setup_reports_initialization_once() {
    let sandbox = sandbox();
    let first = sandbox.coordinator.setup(None).await.unwrap();
    let second = sandbox.coordinator.setup(None).await.unwrap();
    assert!(first.is_some());
    assert_eq!(first, second);

    sandbox.coordinator.wait_until_idle().await.unwrap();
    let initialized = sandbox.recorder.initialized.lock().await;
    assert_eq!(initialized.len(), 1);
    assert_eq!(initialized[0], first);
}

#[tokio::test]
async fn test_signed_out_setup_reports_unavailable() {
    let sandbox = sandbox();
    sandbox.container.sign_out();

    let container = sandbox.coordinator.setup(None).await.unwrap();
    assert!(container.is_none());
    sandbox.coordinator.wait_until_idle().await.unwrap();
    assert_eq!(*sandbox.recorder.availability.lock().await, vec![false]);

    let result = sandbox.coordinator.retrieve_document("notes.txt").await;
    assert!(matches!(result, Err(SyncError::Unavailable)));

    // Saving works offline and lands in the local directory
    sandbox
        .coordinator
        .save("offline.txt", Bytes::from_static(b"draft"))
        .await
        .unwrap();
    assert_eq!(
        std::fs::read(sandbox.local.join("offline.txt")).unwrap(),
        b"draft"
    );
}

#[tokio::test]
async fn test_availability_observer_follows_checks() {
    let sandbox = ready_sandbox().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let token = sandbox
        .coordinator
        .observe_availability(move |available| {
            let _ = tx.send(available);
        })
        .await;

    assert!(sandbox.coordinator.check_availability().await);
    let seen = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap();
    assert_eq!(seen, Some(true));

    sandbox.container.sign_out();
    assert!(!sandbox.coordinator.check_availability().await);
    let mut last = None;
    while last != Some(false) {
        last = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
    }

    assert!(sandbox.coordinator.remove_availability_observer(token).await);
    assert!(!sandbox.coordinator.remove_availability_observer(token).await);
}

// ============================================================================
// Documents
// ============================================================================

#[tokio::test]
async fn test_save_then_retrieve_round_trips() {
    let sandbox = ready_sandbox().await;
    let data = Bytes::from_static(b"hello from the cloud");

    sandbox.coordinator.save("notes.txt", data.clone()).await.unwrap();
    let outcome = sandbox.coordinator.retrieve_document("notes.txt").await.unwrap();

    assert_eq!(outcome.contents, data);
    assert_eq!(outcome.document.state(), DocumentState::Normal);
    assert_eq!(
        sandbox.coordinator.file_size("notes.txt").await.unwrap(),
        Some(data.len() as u64)
    );
}

#[tokio::test]
async fn test_missing_document_is_created_empty() {
    let sandbox = ready_sandbox().await;

    let outcome = sandbox.coordinator.retrieve_document("fresh.txt").await.unwrap();
    assert!(outcome.contents.is_empty());
    assert!(sandbox.coordinator.file_exists("fresh.txt").await.unwrap());
    assert_eq!(sandbox.coordinator.file_size("other.txt").await.unwrap(), None);
}

#[tokio::test]
async fn test_empty_name_fails_fast() {
    let sandbox = ready_sandbox().await;
    let error = sandbox.coordinator.retrieve_document("").await.unwrap_err();
    assert!(matches!(error, SyncError::EmptyName));
    assert_eq!(error.code(), Some(1));
}

#[tokio::test]
async fn test_retrieve_sees_changes_made_elsewhere() {
    let sandbox = ready_sandbox().await;
    let coordinator = &sandbox.coordinator;
    coordinator.save("notes.txt", Bytes::from_static(b"v1")).await.unwrap();

    let first = coordinator.retrieve_document("notes.txt").await.unwrap();
    assert_eq!(first.contents, Bytes::from_static(b"v1"));
    assert_eq!(first.document.state(), DocumentState::Normal);

    let url = coordinator.documents_directory().await.unwrap().join("notes.txt");
    write_with_mtime(
        &url,
        b"v2 from another device",
        SystemTime::now() + Duration::from_secs(60),
    );

    let second = coordinator.retrieve_document("notes.txt").await.unwrap();
    assert_eq!(second.contents, Bytes::from_static(b"v2 from another device"));
}

#[tokio::test]
async fn test_names_outside_the_documents_folder_are_rejected() {
    let sandbox = ready_sandbox().await;
    let coordinator = &sandbox.coordinator;
    std::fs::create_dir_all(&sandbox.local).unwrap();
    std::fs::write(sandbox.local.join("x"), b"keep me").unwrap();
    coordinator.save("a.txt", Bytes::from_static(b"a")).await.unwrap();

    let error = coordinator.delete("../../Local/x").await.unwrap_err();
    assert!(matches!(error, SyncError::InvalidName { .. }));
    assert_eq!(error.code(), Some(1));
    assert!(sandbox.local.join("x").exists());

    assert!(matches!(
        coordinator.rename("a.txt", "sub/b.txt").await,
        Err(SyncError::InvalidName { .. })
    ));
    assert!(matches!(
        coordinator.share("..").await,
        Err(SyncError::InvalidName { .. })
    ));
    assert!(coordinator.file_exists("a.txt").await.unwrap());
}

#[tokio::test]
async fn test_rename_duplicate_and_delete_preconditions() {
    let sandbox = ready_sandbox().await;
    let coordinator = &sandbox.coordinator;
    coordinator.save("a.txt", Bytes::from_static(b"a")).await.unwrap();
    coordinator.save("b.txt", Bytes::from_static(b"b")).await.unwrap();

    let missing = coordinator.rename("missing.txt", "x.txt").await.unwrap_err();
    assert!(matches!(missing, SyncError::NotFound { .. }));
    assert_eq!(missing.code(), Some(404));

    let taken = coordinator.rename("a.txt", "b.txt").await.unwrap_err();
    assert!(matches!(taken, SyncError::AlreadyExists { .. }));

    coordinator.rename("a.txt", "c.txt").await.unwrap();
    assert!(!coordinator.file_exists("a.txt").await.unwrap());
    assert!(coordinator.file_exists("c.txt").await.unwrap());

    coordinator.duplicate("c.txt", "d.txt").await.unwrap();
    assert!(coordinator.file_exists("c.txt").await.unwrap());
    assert!(coordinator.file_exists("d.txt").await.unwrap());

    coordinator.delete("d.txt").await.unwrap();
    assert!(matches!(
        coordinator.delete("d.txt").await,
        Err(SyncError::NotFound { .. })
    ));

    let listed: Vec<_> = coordinator
        .list_files()
        .await
        .unwrap()
        .into_iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(listed, vec!["b.txt", "c.txt"]);
}

#[tokio::test]
async fn test_document_state_reports_description() {
    let sandbox = ready_sandbox().await;
    sandbox
        .coordinator
        .save("state.txt", Bytes::from_static(b"x"))
        .await
        .unwrap();

    let (state, description) = sandbox.coordinator.document_state("state.txt").await.unwrap();
    assert_eq!(state, DocumentState::Closed);
    assert_eq!(description, "Document is closed");
}

#[tokio::test]
async fn test_published_files_reach_the_delegate() {
    let sandbox = ready_sandbox().await;
    sandbox
        .coordinator
        .save("listed.txt", Bytes::from_static(b"x"))
        .await
        .unwrap();

    for _ in 0..100 {
        sandbox.coordinator.wait_until_idle().await.unwrap();
        let files = sandbox.recorder.files.lock().await;
        if files.last().is_some_and(|names| names.iter().any(|n| n == "listed.txt")) {
            return;
        }
        drop(files);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("listed.txt was never published");
}

// ============================================================================
// Upload and eviction
// ============================================================================

#[tokio::test]
async fn test_upload_moves_new_local_file() {
    let sandbox = ready_sandbox().await;
    std::fs::create_dir_all(&sandbox.local).unwrap();
    std::fs::write(sandbox.local.join("new.txt"), b"local only").unwrap();

    let disposition = sandbox.coordinator.upload_local("new.txt").await.unwrap();
    assert_eq!(disposition, UploadDisposition::UploadLocal);
    assert!(!sandbox.local.join("new.txt").exists());

    let outcome = sandbox.coordinator.retrieve_document("new.txt").await.unwrap();
    assert_eq!(outcome.contents, Bytes::from_static(b"local only"));
}

#[tokio::test]
async fn test_upload_keeps_newer_cloud_copy() {
    let sandbox = ready_sandbox().await;
    let cloud = sandbox.coordinator.documents_directory().await.unwrap();
    let now = SystemTime::now();

    write_with_mtime(&sandbox.local.join("notes.txt"), b"old", now - Duration::from_secs(60));
    write_with_mtime(&cloud.join("notes.txt"), b"new", now);

    let disposition = sandbox.coordinator.upload_local("notes.txt").await.unwrap();
    assert_eq!(disposition, UploadDisposition::KeepRemoteDeleteLocal);
    assert!(!sandbox.local.join("notes.txt").exists());
    assert_eq!(std::fs::read(cloud.join("notes.txt")).unwrap(), b"new");
}

#[tokio::test]
async fn test_upload_newer_local_overwrites_cloud_and_keeps_local() {
    let sandbox = ready_sandbox().await;
    let cloud = sandbox.coordinator.documents_directory().await.unwrap();
    let now = SystemTime::now();

    write_with_mtime(&sandbox.local.join("notes.txt"), b"new", now);
    write_with_mtime(&cloud.join("notes.txt"), b"old", now - Duration::from_secs(60));

    let disposition = sandbox.coordinator.upload_local("notes.txt").await.unwrap();
    assert!(matches!(
        disposition,
        UploadDisposition::OverwriteRemoteWithLocal { .. }
    ));
    assert_eq!(std::fs::read(cloud.join("notes.txt")).unwrap(), b"new");
    assert_eq!(std::fs::read(sandbox.local.join("notes.txt")).unwrap(), b"new");
}

#[tokio::test]
async fn test_upload_identical_copies_drops_the_local_one() {
    let sandbox = ready_sandbox().await;
    let cloud = sandbox.coordinator.documents_directory().await.unwrap();
    let stamp = SystemTime::now() - Duration::from_secs(30);

    write_with_mtime(&sandbox.local.join("same.txt"), b"same", stamp);
    write_with_mtime(&cloud.join("same.txt"), b"same", stamp);

    let disposition = sandbox.coordinator.upload_local("same.txt").await.unwrap();
    assert_eq!(disposition, UploadDisposition::KeepRemoteDeleteLocal);
    assert!(!sandbox.local.join("same.txt").exists());
    assert_eq!(std::fs::read(cloud.join("same.txt")).unwrap(), b"same");
}

#[tokio::test]
async fn test_upload_conflict_reaches_the_delegate() {
    let sandbox = ready_sandbox().await;
    let cloud = sandbox.coordinator.documents_directory().await.unwrap();
    let stamp = SystemTime::now() - Duration::from_secs(30);

    write_with_mtime(&sandbox.local.join("notes.txt"), b"mine", stamp);
    write_with_mtime(&cloud.join("notes.txt"), b"theirs", stamp);

    let disposition = sandbox.coordinator.upload_local("notes.txt").await.unwrap();
    assert!(matches!(disposition, UploadDisposition::ReportConflict(_)));

    sandbox.coordinator.wait_until_idle().await.unwrap();
    let conflicts = sandbox.recorder.conflicts.lock().await;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].name, "notes.txt");
    assert_eq!(conflicts[0].local.content, Some(Bytes::from_static(b"mine")));
    assert_eq!(conflicts[0].cloud.content, Some(Bytes::from_static(b"theirs")));

    // Nothing was destroyed
    assert!(sandbox.local.join("notes.txt").exists());
    assert!(cloud.join("notes.txt").exists());
}

#[tokio::test]
async fn test_hidden_files_are_reported_individually() {
    let sandbox = ready_sandbox().await;
    std::fs::create_dir_all(&sandbox.local).unwrap();
    for i in 0..5 {
        std::fs::write(sandbox.local.join(format!(".hidden-{}", i)), b"x").unwrap();
    }

    let mut reports: Vec<ItemReport> = Vec::new();
    let summary = sandbox
        .coordinator
        .upload_all_local(&sandbox.local, |report| reports.push(report))
        .await
        .unwrap();

    assert_eq!(reports.len(), 5);
    for report in &reports {
        let error = report.result.as_ref().unwrap_err();
        assert!(matches!(error, SyncError::HiddenFile { .. }));
        assert_eq!(error.code(), Some(520));
    }
    assert_eq!(summary.failed, 5);
    assert_eq!(summary.total(), 5);
}

#[tokio::test]
async fn test_bulk_upload_continues_past_failures() {
    let sandbox = ready_sandbox().await;
    std::fs::create_dir_all(&sandbox.local).unwrap();
    std::fs::write(sandbox.local.join(".DS_Store"), b"x").unwrap();
    std::fs::write(sandbox.local.join("one.txt"), b"1").unwrap();
    std::fs::write(sandbox.local.join("two.txt"), b"2").unwrap();

    let mut names = Vec::new();
    let summary = sandbox
        .coordinator
        .upload_all_local(&sandbox.local, |report| names.push(report.name))
        .await
        .unwrap();

    assert_eq!(names, vec![".DS_Store", "one.txt", "two.txt"]);
    assert_eq!(summary.uploaded, 2);
    assert_eq!(summary.failed, 1);
    assert!(sandbox.coordinator.file_exists("one.txt").await.unwrap());
}

#[tokio::test]
async fn test_bulk_upload_hands_conflicts_to_the_delegate() {
    let sandbox = ready_sandbox().await;
    let cloud = sandbox.coordinator.documents_directory().await.unwrap();
    let stamp = SystemTime::now() - Duration::from_secs(30);

    write_with_mtime(&sandbox.local.join("clash.txt"), b"mine", stamp);
    write_with_mtime(&cloud.join("clash.txt"), b"theirs", stamp);
    std::fs::write(sandbox.local.join("fresh.txt"), b"fresh").unwrap();

    let summary = sandbox
        .coordinator
        .upload_all_local(&sandbox.local, |_| {})
        .await
        .unwrap();
    assert_eq!(summary.conflicts, 1);
    assert_eq!(summary.uploaded, 1);

    sandbox.coordinator.wait_until_idle().await.unwrap();
    let conflicts = sandbox.recorder.conflicts.lock().await;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].name, "clash.txt");
    assert_eq!(std::fs::read(sandbox.local.join("clash.txt")).unwrap(), b"mine");
    assert_eq!(std::fs::read(cloud.join("clash.txt")).unwrap(), b"theirs");
}

#[tokio::test]
async fn test_evict_newer_cloud_copy_overwrites_local_and_keeps_cloud() {
    let sandbox = ready_sandbox().await;
    let cloud = sandbox.coordinator.documents_directory().await.unwrap();
    let now = SystemTime::now();

    write_with_mtime(&sandbox.local.join("notes.txt"), b"old", now - Duration::from_secs(60));
    write_with_mtime(&cloud.join("notes.txt"), b"new", now);

    let disposition = sandbox.coordinator.evict("notes.txt").await.unwrap();
    assert!(matches!(
        disposition,
        EvictDisposition::OverwriteLocalWithRemote { .. }
    ));
    assert_eq!(std::fs::read(sandbox.local.join("notes.txt")).unwrap(), b"new");
    assert_eq!(std::fs::read(cloud.join("notes.txt")).unwrap(), b"new");
}

#[tokio::test]
async fn test_evict_newer_local_copy_drops_the_cloud_one() {
    let sandbox = ready_sandbox().await;
    let cloud = sandbox.coordinator.documents_directory().await.unwrap();
    let now = SystemTime::now();

    write_with_mtime(&sandbox.local.join("notes.txt"), b"new", now);
    write_with_mtime(&cloud.join("notes.txt"), b"old", now - Duration::from_secs(60));

    let disposition = sandbox.coordinator.evict("notes.txt").await.unwrap();
    assert_eq!(disposition, EvictDisposition::DeleteRemoteKeepLocal);
    assert!(!sandbox.coordinator.file_exists("notes.txt").await.unwrap());
    assert_eq!(std::fs::read(sandbox.local.join("notes.txt")).unwrap(), b"new");
}

#[tokio::test]
async fn test_evict_moves_cloud_file_to_local() {
    let sandbox = ready_sandbox().await;
    sandbox
        .coordinator
        .save("away.txt", Bytes::from_static(b"bye"))
        .await
        .unwrap();

    sandbox.coordinator.evict("away.txt").await.unwrap();
    assert!(!sandbox.coordinator.file_exists("away.txt").await.unwrap());
    assert_eq!(std::fs::read(sandbox.local.join("away.txt")).unwrap(), b"bye");
}

// ============================================================================
// Versions
// ============================================================================

#[tokio::test]
async fn test_resolve_conflict_keeps_chosen_version() {
    let sandbox = ready_sandbox().await;
    let coordinator = &sandbox.coordinator;
    coordinator
        .save("doc.txt", Bytes::from_static(b"mine"))
        .await
        .unwrap();

    let url = coordinator.documents_directory().await.unwrap().join("doc.txt");
    sandbox
        .versions
        .record_conflict(&url, Bytes::from_static(b"theirs"), Some("iPad".to_string()))
        .await
        .unwrap();

    let versions = coordinator.find_unresolved_conflicts("doc.txt").await.unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions[0].is_current);
    assert_eq!(versions[1].saving_device.as_deref(), Some("iPad"));

    coordinator.resolve_conflict("doc.txt", &versions[1]).await.unwrap();

    let outcome = coordinator.retrieve_document("doc.txt").await.unwrap();
    assert_eq!(outcome.contents, Bytes::from_static(b"theirs"));
    assert_eq!(outcome.document.state(), DocumentState::Normal);
    assert_eq!(
        coordinator.find_unresolved_conflicts("doc.txt").await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_document_in_conflict_is_returned_with_the_error() {
    let sandbox = ready_sandbox().await;
    let coordinator = &sandbox.coordinator;
    coordinator
        .save("doc.txt", Bytes::from_static(b"mine"))
        .await
        .unwrap();
    let url = coordinator.documents_directory().await.unwrap().join("doc.txt");
    sandbox
        .versions
        .record_conflict(&url, Bytes::from_static(b"theirs"), None)
        .await
        .unwrap();

    // Opening loads the conflict state, the next retrieval reports it
    coordinator.retrieve_document("doc.txt").await.unwrap();
    let error = coordinator.retrieve_document("doc.txt").await.unwrap_err();
    assert_eq!(error.code(), Some(200));
    assert_eq!(
        error.outcome().map(|o| o.contents.clone()),
        Some(Bytes::from_static(b"mine"))
    );
}

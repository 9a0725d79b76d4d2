use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::store::RemoteStore;
use parabot_core::error::ParabotError;
use parabot_storage::db::LocalSnapshot;

/// Upper bound on a single download, create or update.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Identity of the remote object mirroring the database file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFileHandle {
    remote_id: Option<String>,
}

impl RemoteFileHandle {
    pub fn unresolved() -> Self {
        Self { remote_id: None }
    }

    pub fn resolved(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: Some(remote_id.into()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.remote_id.is_some()
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// No remote copy yet; the local file was left alone.
    Skipped,
    Downloaded { bytes: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Created { remote_id: String },
    Updated { remote_id: String },
    /// An upload that started after this request already carried its changes.
    Coalesced,
}

struct SyncState {
    handle: RemoteFileHandle,
    /// Highest request ticket known to be reflected remotely.
    completed: u64,
}

/// Moves the database file between local disk and the remote store.
///
/// Uploads are serialized: one in flight at a time. Every request takes a
/// ticket before waiting; when its turn comes, it is skipped if an upload that
/// began after the ticket was issued has already succeeded. A burst of
/// requests during an upload therefore costs one extra upload at most, and the
/// remote object is created at most once per process.
pub struct RemoteSync {
    store: Arc<dyn RemoteStore>,
    file_name: String,
    transfer_timeout: Duration,
    requested: AtomicU64,
    state: Mutex<SyncState>,
}

impl RemoteSync {
    pub fn new(store: Arc<dyn RemoteStore>, file_name: &str, handle: RemoteFileHandle) -> Self {
        RemoteSync {
            store,
            file_name: file_name.to_string(),
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            requested: AtomicU64::new(0),
            state: Mutex::new(SyncState {
                handle,
                completed: 0,
            }),
        }
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// A stalled transfer would otherwise hold the upload lock forever.
    async fn bounded<T>(
        &self,
        what: &str,
        transfer: impl Future<Output = Result<T, ParabotError>>,
    ) -> Result<T, ParabotError> {
        tokio::time::timeout(self.transfer_timeout, transfer)
            .await
            .map_err(|_| {
                ParabotError::Timeout(format!("{what} after {:?}", self.transfer_timeout))
            })?
    }

    pub async fn handle(&self) -> RemoteFileHandle {
        self.state.lock().await.handle.clone()
    }

    /// Replace `local_path` with the remote copy, if there is one.
    ///
    /// Content lands in a sibling temp file first, so a failed transfer leaves
    /// whatever was on disk untouched.
    pub async fn download_to_local(
        &self,
        local_path: &Path,
    ) -> Result<DownloadOutcome, ParabotError> {
        let state = self.state.lock().await;
        let Some(remote_id) = state.handle.remote_id() else {
            warn!("No remote database yet; starting from a fresh local file");
            return Ok(DownloadOutcome::Skipped);
        };

        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = sibling_path(local_path, ".download");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let bytes = match self
            .bounded("download", self.store.download(remote_id, &mut file))
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, local_path).await?;
        // A leftover rollback journal would be replayed onto the new file.
        let _ = tokio::fs::remove_file(sibling_path(local_path, "-journal")).await;

        info!("Database downloaded from remote ({remote_id}, {bytes} bytes)");
        Ok(DownloadOutcome::Downloaded { bytes })
    }

    /// Push the current local state: update in place when the remote object is
    /// known, otherwise create it and remember its id.
    pub async fn upload_from_local(
        &self,
        source: Arc<dyn LocalSnapshot>,
    ) -> Result<UploadOutcome, ParabotError> {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock().await;
        if state.completed >= ticket {
            return Ok(UploadOutcome::Coalesced);
        }
        // Every request issued up to here had committed its change already.
        let covers = self.requested.load(Ordering::SeqCst);

        let content = tokio::task::spawn_blocking(move || source.read_snapshot())
            .await
            .map_err(|e| ParabotError::Task(format!("snapshot task join error: {e}")))??;

        let outcome = match state.handle.remote_id() {
            Some(remote_id) => {
                self.bounded("update", self.store.update(remote_id, content))
                    .await?;
                info!("Database updated on remote ({remote_id})");
                UploadOutcome::Updated {
                    remote_id: remote_id.to_string(),
                }
            }
            None => {
                let created = self
                    .bounded("create", self.store.create(&self.file_name, content))
                    .await?;
                info!("Database created on remote: {}", created.id);
                if let Some(link) = &created.web_view_link {
                    info!("Link: {link}");
                }
                info!("Hint: set DRIVE_FILE_ID={} to pin this file", created.id);
                state.handle = RemoteFileHandle::resolved(created.id.clone());
                UploadOutcome::Created {
                    remote_id: created.id,
                }
            }
        };
        state.completed = covers;
        Ok(outcome)
    }

    /// Upload for background triggers: failures are logged and left for the next trigger.
    pub async fn upload_or_log(&self, source: Arc<dyn LocalSnapshot>, reason: &str) {
        match self.upload_from_local(source).await {
            Ok(UploadOutcome::Coalesced) => {
                info!("Sync ({reason}): already covered by a concurrent upload")
            }
            Ok(_) => {}
            Err(e) => error!("Sync ({reason}) failed, will retry on next trigger: {e}"),
        }
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

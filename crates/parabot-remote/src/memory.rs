//! In-process [`RemoteStore`] for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::store::{RemoteFile, RemoteStore, SQLITE_MIME_TYPE};
use parabot_core::error::ParabotError;

struct StoredObject {
    file: RemoteFile,
    content: Vec<u8>,
    trashed: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<Vec<StoredObject>>,
    next_id: AtomicUsize,
    metadata_calls: AtomicUsize,
    search_calls: AtomicUsize,
    create_count: AtomicUsize,
    update_count: AtomicUsize,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
    upload_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, Vec<StoredObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn new_file(&self, name: &str) -> RemoteFile {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        RemoteFile {
            id: format!("mem-{n}"),
            name: name.to_string(),
            mime_type: Some(SQLITE_MIME_TYPE.to_string()),
            web_view_link: Some(format!("memory://mem-{n}")),
            ..Default::default()
        }
    }

    /// Seed an object directly, bypassing counters. Returns its id.
    pub fn insert(&self, name: &str, content: Vec<u8>) -> String {
        let file = self.new_file(name);
        let id = file.id.clone();
        self.objects().push(StoredObject {
            file,
            content,
            trashed: false,
        });
        id
    }

    pub fn trash(&self, id: &str) {
        if let Some(obj) = self.objects().iter_mut().find(|o| o.file.id == id) {
            obj.trashed = true;
        }
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.objects()
            .iter()
            .find(|o| o.file.id == id && !o.trashed)
            .map(|o| o.content.clone())
    }

    pub fn files_named(&self, name: &str) -> Vec<RemoteFile> {
        self.objects()
            .iter()
            .filter(|o| o.file.name == name && !o.trashed)
            .map(|o| o.file.clone())
            .collect()
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.update_count.load(Ordering::SeqCst)
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    /// Make create/update take at least `delay`, to widen race windows.
    pub fn set_upload_delay(&self, delay: Duration) {
        *self
            .upload_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(delay);
    }

    async fn before_upload(&self) -> Result<(), ParabotError> {
        let delay = *self
            .upload_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ParabotError::Remote {
                status: 503,
                message: "injected upload failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_metadata(&self, id: &str) -> Result<RemoteFile, ParabotError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.objects()
            .iter()
            .find(|o| o.file.id == id && !o.trashed)
            .map(|o| o.file.clone())
            .ok_or_else(|| ParabotError::RemoteNotFound(format!("file {id}")))
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<RemoteFile>, ParabotError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.files_named(name))
    }

    async fn download(
        &self,
        id: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ParabotError> {
        let content = self
            .content(id)
            .ok_or_else(|| ParabotError::RemoteNotFound(format!("file {id}")))?;
        if self.fail_downloads.load(Ordering::SeqCst) {
            // Partial write before failing, like a dropped connection.
            let half = content.len() / 2;
            dest.write_all(&content[..half]).await?;
            return Err(ParabotError::Remote {
                status: 500,
                message: "injected download failure".into(),
            });
        }
        dest.write_all(&content).await?;
        dest.flush().await?;
        Ok(content.len() as u64)
    }

    async fn create(&self, name: &str, content: Vec<u8>) -> Result<RemoteFile, ParabotError> {
        self.before_upload().await?;
        self.create_count.fetch_add(1, Ordering::SeqCst);
        let file = self.new_file(name);
        self.objects().push(StoredObject {
            file: file.clone(),
            content,
            trashed: false,
        });
        Ok(file)
    }

    async fn update(&self, id: &str, content: Vec<u8>) -> Result<(), ParabotError> {
        self.before_upload().await?;
        let mut objects = self.objects();
        let obj = objects
            .iter_mut()
            .find(|o| o.file.id == id && !o.trashed)
            .ok_or_else(|| ParabotError::RemoteNotFound(format!("file {id}")))?;
        obj.content = content;
        self.update_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

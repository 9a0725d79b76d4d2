use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWrite;

use parabot_core::error::ParabotError;

pub const SQLITE_MIME_TYPE: &str = "application/x-sqlite3";

/// Metadata of one object in the remote store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

/// The object-store operations the sync subsystem consumes.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fails with `RemoteNotFound` when the id does not exist or is not visible.
    async fn get_metadata(&self, id: &str) -> Result<RemoteFile, ParabotError>;

    /// Exact-name matches, trashed objects excluded, in provider order.
    async fn find_by_name(&self, name: &str) -> Result<Vec<RemoteFile>, ParabotError>;

    /// Stream the object's content into `dest`; returns the byte count.
    async fn download(
        &self,
        id: &str,
        dest: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ParabotError>;

    async fn create(&self, name: &str, content: Vec<u8>) -> Result<RemoteFile, ParabotError>;

    async fn update(&self, id: &str, content: Vec<u8>) -> Result<(), ParabotError>;
}

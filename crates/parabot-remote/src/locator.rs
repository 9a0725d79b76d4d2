use tracing::{info, warn};

use crate::store::RemoteStore;
use crate::sync::RemoteFileHandle;
use parabot_core::error::ParabotError;

/// Work out which remote object mirrors the database file.
///
/// A configured id must exist; anything else is a configuration error and no
/// name search is attempted. Without one, the first exact-name match wins. The
/// provider decides that order and does not promise it is stable across runs.
/// No match means the object will be created by the first upload.
pub async fn resolve(
    store: &dyn RemoteStore,
    file_name: &str,
    configured_id: Option<&str>,
) -> Result<RemoteFileHandle, ParabotError> {
    if let Some(id) = configured_id.map(str::trim).filter(|id| !id.is_empty()) {
        return match store.get_metadata(id).await {
            Ok(file) => {
                info!("Remote database found (configured id): {} ({})", file.name, file.id);
                Ok(RemoteFileHandle::resolved(file.id))
            }
            Err(e) => Err(ParabotError::Config(format!(
                "Remote file {id} not found or not accessible ({e}). Check DRIVE_FILE_ID."
            ))),
        };
    }

    let matches = store.find_by_name(file_name).await?;
    let Some(first) = matches.first() else {
        info!("Remote database '{file_name}' not found; it will be created on the first upload");
        return Ok(RemoteFileHandle::unresolved());
    };
    if matches.len() > 1 {
        let ids: Vec<&str> = matches.iter().map(|f| f.id.as_str()).collect();
        warn!(
            "{} remote files are named '{file_name}' ({}); using {}. Set DRIVE_FILE_ID to pin one.",
            matches.len(),
            ids.join(", "),
            first.id
        );
    }
    info!("Remote database found: {} ({})", first.name, first.id);
    info!("Hint: set DRIVE_FILE_ID={} to skip the name search", first.id);
    Ok(RemoteFileHandle::resolved(first.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_resolve_configured_id() {
        let store = MemoryStore::new();
        let id = store.insert("parabot.sqlite", b"x".to_vec());
        let handle = resolve(&store, "parabot.sqlite", Some(&id)).await.unwrap();
        assert_eq!(handle.remote_id(), Some(id.as_str()));
        assert_eq!(store.metadata_calls(), 1);
        assert_eq!(store.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_invalid_configured_id_is_fatal_without_fallback() {
        let store = MemoryStore::new();
        store.insert("parabot.sqlite", b"x".to_vec());
        let err = resolve(&store, "parabot.sqlite", Some("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ParabotError::Config(_)));
        assert!(err.to_string().contains("DRIVE_FILE_ID"));
        assert_eq!(store.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_blank_configured_id_falls_back_to_search() {
        let store = MemoryStore::new();
        let id = store.insert("parabot.sqlite", b"x".to_vec());
        let handle = resolve(&store, "parabot.sqlite", Some("  ")).await.unwrap();
        assert_eq!(handle.remote_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_resolve_by_name_not_found_is_unresolved() {
        let store = MemoryStore::new();
        store.insert("other.sqlite", b"x".to_vec());
        let handle = resolve(&store, "parabot.sqlite", None).await.unwrap();
        assert!(!handle.is_resolved());
    }

    #[tokio::test]
    async fn test_resolve_by_name_picks_first_of_duplicates() {
        let store = MemoryStore::new();
        let first = store.insert("parabot.sqlite", b"1".to_vec());
        store.insert("parabot.sqlite", b"2".to_vec());
        let handle = resolve(&store, "parabot.sqlite", None).await.unwrap();
        assert_eq!(handle.remote_id(), Some(first.as_str()));
        assert_eq!(store.create_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_ignores_trashed_files() {
        let store = MemoryStore::new();
        let trashed = store.insert("parabot.sqlite", b"old".to_vec());
        store.trash(&trashed);
        let handle = resolve(&store, "parabot.sqlite", None).await.unwrap();
        assert!(!handle.is_resolved());
    }
}

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::channels::discord::{build_discord_client, DiscordAdapter};
use crate::config::Config;
use parabot_channels::channel_adapter::ChannelAdapter;
use parabot_core::error::ParabotError;
use parabot_remote::auth::GoogleAuth;
use parabot_remote::drive::DriveStore;
use parabot_remote::locator;
use parabot_remote::store::RemoteStore;
use parabot_remote::sync::{DownloadOutcome, RemoteSync, UploadOutcome};
use parabot_storage::db::{Database, LocalSnapshot};

pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub sync: Arc<RemoteSync>,
}

impl AppState {
    pub fn snapshot_source(&self) -> Arc<dyn LocalSnapshot> {
        self.db.clone()
    }

    pub async fn upload_now(&self) -> Result<UploadOutcome, ParabotError> {
        self.sync.upload_from_local(self.snapshot_source()).await
    }

    pub async fn upload_or_log(&self, reason: &str) {
        self.sync
            .upload_or_log(self.snapshot_source(), reason)
            .await
    }
}

/// Find the remote copy, pull it down and open the local store.
///
/// Every error here is fatal: running on a stale or empty local file would
/// overwrite the remote copy at the next upload.
pub async fn bootstrap(
    config: Config,
    store: Arc<dyn RemoteStore>,
) -> Result<AppState, ParabotError> {
    let handle = locator::resolve(
        store.as_ref(),
        &config.db_file_name,
        config.drive_file_id.as_deref(),
    )
    .await?;

    let sync = RemoteSync::new(store, &config.db_file_name, handle);
    let db_path = config.db_path();
    if let DownloadOutcome::Downloaded { bytes } = sync.download_to_local(&db_path).await? {
        info!("Local database hydrated ({bytes} bytes)");
    }

    let open_path = db_path.clone();
    let db = tokio::task::spawn_blocking(move || Database::open(&open_path))
        .await
        .map_err(|e| ParabotError::Task(format!("database open join error: {e}")))??;
    info!("Database initialized");

    Ok(AppState {
        config,
        db: Arc::new(db),
        sync: Arc::new(sync),
    })
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let auth = GoogleAuth::load(&config.credentials_source(), &config.token_source())?;
    info!("Google credentials loaded (client {})", auth.client_id());
    let store: Arc<dyn RemoteStore> = Arc::new(DriveStore::new(Arc::new(auth))?);

    let state = Arc::new(bootstrap(config, store).await?);

    let adapter: Arc<dyn ChannelAdapter> =
        Arc::new(DiscordAdapter::new(state.config.discord_token.clone())?);
    let (ready_tx, ready_rx) = oneshot::channel();
    crate::scheduler::spawn_notifier(state.clone(), adapter, ready_rx);
    crate::scheduler::spawn_sync_job(state.clone());

    // Covers the first run, when no remote copy exists yet.
    state.upload_or_log("startup").await;

    let mut client = build_discord_client(state.clone(), ready_tx).await?;
    let shard_manager = client.shard_manager.clone();
    let gateway = tokio::spawn(async move { client.start().await });
    let gateway_exit = async move {
        match gateway.await {
            Ok(Ok(())) => anyhow!("Discord gateway stopped unexpectedly"),
            Ok(Err(e)) => anyhow!("Discord gateway error: {e}"),
            Err(e) => anyhow!("Discord gateway task failed: {e}"),
        }
    };
    info!("Runtime active; waiting for Ctrl-C or SIGTERM");

    let result = serve_until_stopped(&state, shutdown_signal(), gateway_exit).await;
    shard_manager.shutdown_all().await;
    info!("Bot stopped");
    result
}

/// Wait for `stop` or for the gateway to exit, whichever comes first, then
/// push the final upload. A gateway exit is returned as the error.
pub(crate) async fn serve_until_stopped(
    state: &AppState,
    stop: impl Future<Output = ()>,
    gateway_exit: impl Future<Output = anyhow::Error>,
) -> anyhow::Result<()> {
    let gateway_error = tokio::select! {
        _ = stop => None,
        err = gateway_exit => {
            error!("{err}");
            Some(err)
        }
    };

    info!("Saving database before shutdown...");
    state.upload_or_log("shutdown").await;

    match gateway_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl-C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                let _ = ctrl_c.await;
                info!("Received Ctrl-C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received Ctrl-C, shutting down...");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parabot_remote::memory::MemoryStore;
    use parabot_remote::sync::RemoteFileHandle;
    use std::path::PathBuf;

    /// Removes the directory when dropped; bind it for the life of the test.
    pub(crate) struct TempDir(pub PathBuf);

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    pub(crate) struct TestState {
        pub state: AppState,
        pub store: Arc<MemoryStore>,
        pub dir: TempDir,
    }

    fn temp_dir() -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("parabot_runtime_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            discord_token: "tok".into(),
            data_dir: dir.to_string_lossy().to_string(),
            ..Config::default()
        }
    }

    /// Fresh store, no remote copy yet.
    pub(crate) fn test_state() -> TestState {
        let dir = temp_dir();
        let config = config_in(&dir);
        let db = Database::open(&config.db_path()).unwrap();
        let store = Arc::new(MemoryStore::new());
        let sync = RemoteSync::new(
            store.clone(),
            &config.db_file_name,
            RemoteFileHandle::unresolved(),
        );
        TestState {
            state: AppState {
                config,
                db: Arc::new(db),
                sync: Arc::new(sync),
            },
            store,
            dir: TempDir(dir),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_without_remote_copy_starts_fresh() {
        let dir = temp_dir();
        let store = Arc::new(MemoryStore::new());
        let state = bootstrap(config_in(&dir), store.clone()).await.unwrap();

        assert!(!state.sync.handle().await.is_resolved());
        assert!(state.db.list_birthdays("g1").unwrap().is_empty());
        assert!(state.config.db_path().exists());
        assert_eq!(store.create_count(), 0);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_bootstrap_hydrates_from_remote_copy() {
        let seed_dir = temp_dir();
        let seed = Database::open(&seed_dir.join("parabot.sqlite")).unwrap();
        seed.upsert_channel_binding("g1", "c1").unwrap();
        seed.upsert_birthday("g1", "42", 15, 6).unwrap();
        let bytes = seed.read_snapshot().unwrap();
        drop(seed);

        let store = Arc::new(MemoryStore::new());
        let remote_id = store.insert("parabot.sqlite", bytes);

        let dir = temp_dir();
        let state = bootstrap(config_in(&dir), store).await.unwrap();
        assert_eq!(
            state.sync.handle().await.remote_id(),
            Some(remote_id.as_str())
        );
        assert_eq!(state.db.list_birthdays("g1").unwrap().len(), 1);
        assert_eq!(state.db.find_matching(15, 6).unwrap()[0].channel_id.as_deref(), Some("c1"));

        let _ = std::fs::remove_dir_all(seed_dir);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_bootstrap_invalid_configured_id_is_fatal() {
        let dir = temp_dir();
        let mut config = config_in(&dir);
        config.drive_file_id = Some("does-not-exist".into());
        let store = Arc::new(MemoryStore::new());
        let err = bootstrap(config.clone(), store).await.err().unwrap();
        assert!(matches!(err, ParabotError::Config(_)));
        assert!(!config.db_path().exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_stop_signal_pushes_final_upload() {
        let TestState { state, store, dir: _dir } = test_state();
        state.db.upsert_birthday("g1", "42", 1, 1).unwrap();

        serve_until_stopped(&state, async {}, std::future::pending())
            .await
            .unwrap();

        assert_eq!(store.create_count(), 1);
        let remote_id = state.sync.handle().await.remote_id().unwrap().to_string();
        assert_eq!(store.content(&remote_id).unwrap(), state.db.read_snapshot().unwrap());
    }

    #[tokio::test]
    async fn test_gateway_exit_still_uploads_and_reports_error() {
        let TestState { state, store, dir: _dir } = test_state();
        state.db.upsert_channel_binding("g1", "c1").unwrap();

        let err = serve_until_stopped(&state, std::future::pending(), async {
            anyhow!("Discord gateway error: invalid token")
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("invalid token"));
        assert_eq!(store.create_count(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_download_failure_is_fatal() {
        let dir = temp_dir();
        let store = Arc::new(MemoryStore::new());
        store.insert("parabot.sqlite", vec![1u8; 64]);
        store.set_fail_downloads(true);
        assert!(bootstrap(config_in(&dir), store).await.is_err());
        let _ = std::fs::remove_dir_all(dir);
    }
}

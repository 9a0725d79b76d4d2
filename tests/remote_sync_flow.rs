//! Startup, command handling and mirroring against an in-memory remote store.

use std::path::PathBuf;
use std::sync::Arc;

use parabot::chat_commands::{handle_command, Command, Invocation, MemberPermissions};
use parabot::config::Config;
use parabot::runtime::{bootstrap, AppState};
use parabot_remote::memory::MemoryStore;

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("parabot_flow_test_{}", uuid::Uuid::new_v4()));
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

fn add_birthday(guild: &str, user: &str, day: i64, month: i64) -> Invocation {
    Invocation {
        guild_id: Some(guild.into()),
        invoker_id: "1".into(),
        permissions: MemberPermissions::default(),
        command: Command::AddBirthday {
            user_id: user.into(),
            day,
            month,
        },
    }
}

async fn boot(store: &Arc<MemoryStore>, dir: &std::path::Path) -> AppState {
    bootstrap(config_in(dir), store.clone()).await.unwrap()
}

#[tokio::test]
async fn test_first_mutation_creates_remote_then_updates_in_place() {
    let dir = temp_dir();
    let store = Arc::new(MemoryStore::new());
    let state = boot(&store, &dir).await;
    assert!(!state.sync.handle().await.is_resolved());

    handle_command(&state, add_birthday("G", "42", 1, 1)).await;
    let handle = state.sync.handle().await;
    let remote_id = handle.remote_id().unwrap().to_string();
    assert_eq!(store.create_count(), 1);

    handle_command(&state, add_birthday("G", "43", 2, 1)).await;
    assert_eq!(store.create_count(), 1);
    assert_eq!(store.update_count(), 1);
    assert_eq!(state.sync.handle().await.remote_id(), Some(remote_id.as_str()));
    assert_eq!(store.files_named("parabot.sqlite").len(), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_state_survives_a_wiped_disk() {
    let store = Arc::new(MemoryStore::new());

    let first_dir = temp_dir();
    let first = boot(&store, &first_dir).await;
    handle_command(&first, add_birthday("G", "42", 15, 6)).await;
    handle_command(&first, add_birthday("G", "42", 16, 6)).await;
    let uploaded = std::fs::read(first.config.db_path()).unwrap();
    drop(first);
    let _ = std::fs::remove_dir_all(&first_dir);

    // New host, empty disk: the name search finds the object created above.
    let second_dir = temp_dir();
    let second = boot(&store, &second_dir).await;
    assert!(second.sync.handle().await.is_resolved());
    assert_eq!(std::fs::read(second.config.db_path()).unwrap(), uploaded);

    let records = second.db.list_birthdays("G").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!((records[0].day, records[0].month), (16, 6));
    assert_eq!(store.create_count(), 1);

    let _ = std::fs::remove_dir_all(second_dir);
}

#[tokio::test]
async fn test_concurrent_commands_share_one_remote_object() {
    let dir = temp_dir();
    let store = Arc::new(MemoryStore::new());
    store.set_upload_delay(std::time::Duration::from_millis(30));
    let state = Arc::new(boot(&store, &dir).await);

    let mut tasks = Vec::new();
    for user in 0..6 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            handle_command(&state, add_birthday("G", &user.to_string(), 1, 1)).await
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    state.upload_now().await.unwrap();

    assert_eq!(store.create_count(), 1);
    let remote_id = state.sync.handle().await.remote_id().unwrap().to_string();
    assert_eq!(
        store.content(&remote_id).unwrap(),
        std::fs::read(state.config.db_path()).unwrap()
    );
    assert_eq!(state.db.list_birthdays("G").unwrap().len(), 6);

    let _ = std::fs::remove_dir_all(dir);
}

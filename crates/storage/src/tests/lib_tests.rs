use super::*;
use shared::domain::{Identity, RosterEntry};

fn sample_config() -> WorkspaceConfig {
    WorkspaceConfig {
        identity: "alice".into(),
        channel_id: "acme/widgets".into(),
        credential: "secret".into(),
        team: vec![RosterEntry::new(Identity::new("alice"))],
        ..WorkspaceConfig::default()
    }
}

#[tokio::test]
async fn memory_store_counts_writes_and_tracks_marker() {
    let store = MemoryStore::new();
    assert!(store.read().await.expect("read").is_none());
    store.write(&sample_config()).await.expect("write");
    assert_eq!(store.write_count(), 1);
    assert_eq!(store.read().await.expect("read"), Some(sample_config()));

    store.set_connected_marker(true).await.expect("mark");
    assert!(store.connected_marker().await.expect("marker"));
    store.set_connected_marker(false).await.expect("unmark");
    assert!(!store.connected_marker().await.expect("marker"));
}

#[tokio::test]
async fn json_file_store_round_trips_and_manages_marker_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path());
    assert!(store.read().await.expect("read missing").is_none());

    store.write(&sample_config()).await.expect("write");
    assert!(dir.path().join(".huddle").join("config.json").exists());
    assert_eq!(store.read().await.expect("read"), Some(sample_config()));

    store.set_connected_marker(true).await.expect("mark");
    assert!(store.marker_path().exists());
    assert!(store.connected_marker().await.expect("marker"));
    store.set_connected_marker(false).await.expect("unmark");
    assert!(!store.marker_path().exists());
    // clearing an absent marker is not an error
    store.set_connected_marker(false).await.expect("unmark again");
}

#[tokio::test]
async fn json_file_store_rejects_corrupt_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path());
    std::fs::create_dir_all(dir.path().join(".huddle")).expect("dir");
    std::fs::write(store.config_path(), "{not json").expect("corrupt");
    let err = store.read().await.expect_err("corrupt config");
    assert!(err.to_string().contains("invalid workspace config"));
}

#[tokio::test]
async fn sqlite_store_keeps_workspaces_apart() {
    let store = SqliteStore::new("sqlite::memory:", "acme/widgets")
        .await
        .expect("db");
    store.health_check().await.expect("health");
    assert!(store.read().await.expect("read").is_none());

    store.write(&sample_config()).await.expect("write");
    let mut changed = sample_config();
    changed.team.push(RosterEntry::new(Identity::new("bob")));
    store.write(&changed).await.expect("overwrite");
    assert_eq!(store.read().await.expect("read"), Some(changed));

    let other = store.for_workspace("acme/gadgets");
    assert!(other.read().await.expect("other read").is_none());

    store.set_connected_marker(true).await.expect("mark");
    assert!(store.connected_marker().await.expect("marker"));
    assert!(!other.connected_marker().await.expect("other marker"));
}

#[tokio::test]
async fn sqlite_store_creates_database_file_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("huddle.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let store = SqliteStore::new(&database_url, "ws").await.expect("db");
    drop(store);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[test]
fn repo_slug_handles_https_and_ssh_remotes() {
    assert_eq!(
        workspace::repo_slug("https://github.com/acme/widgets.git"),
        Some("acme/widgets".to_string())
    );
    assert_eq!(
        workspace::repo_slug("git@github.com:acme/widgets.git"),
        Some("acme/widgets".to_string())
    );
    assert_eq!(
        workspace::repo_slug("https://github.com/acme/widgets/"),
        Some("acme/widgets".to_string())
    );
    assert_eq!(workspace::repo_slug("git@github.com:widgets.git"), None);
    assert_eq!(workspace::repo_slug("https://github.com/widgets"), None);
}

#[test]
fn repo_slug_keeps_dotted_repository_names() {
    assert_eq!(
        workspace::repo_slug("https://github.com/socketio/socket.io.git"),
        Some("socketio/socket.io".to_string())
    );
    assert_eq!(
        workspace::repo_slug("git@github.com:vercel/next.js.git"),
        Some("vercel/next.js".to_string())
    );
    assert_eq!(
        workspace::repo_slug("ssh://git@git.example.com:2222/my.org/tools.rs"),
        Some("my.org/tools.rs".to_string())
    );
}

#[tokio::test]
async fn init_workspace_keeps_existing_config_unless_forced() {
    let dir = tempfile::tempdir().expect("tempdir");
    let created = init_workspace(dir.path(), false).await.expect("init");
    assert_eq!(created.system_prompt, DEFAULT_SYSTEM_PROMPT);
    assert!(!created.identity.is_empty());
    assert!(created.credential.is_empty());

    let store = JsonFileStore::new(dir.path());
    let mut edited = created.clone();
    edited.credential = "secret".into();
    store.write(&edited).await.expect("edit");

    let again = init_workspace(dir.path(), false).await.expect("re-init");
    assert_eq!(again.credential, "secret");

    let forced = init_workspace(dir.path(), true).await.expect("force");
    assert!(forced.credential.is_empty());
}

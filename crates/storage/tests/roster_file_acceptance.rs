use std::sync::Arc;

use shared::domain::{Identity, RosterUpdate};
use storage::{init_workspace, JsonFileStore, RosterStore, WorkspaceStore};

#[tokio::test]
async fn auto_registration_preserves_admin_edits_in_workspace_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    init_workspace(dir.path(), false).await.expect("init");

    let store = Arc::new(JsonFileStore::new(dir.path()));
    let roster = RosterStore::new(store.clone());

    roster
        .merge_present(&[Identity::new("alice"), Identity::new("bob")])
        .await
        .expect("first snapshot");

    // an administrator renames bob through a second handle on the same file
    let admin = RosterStore::new(Arc::new(JsonFileStore::new(dir.path())));
    admin
        .update(
            &Identity::new("bob"),
            RosterUpdate {
                display_name: Some("Bob the Builder".into()),
                style_prompt: None,
            },
        )
        .await
        .expect("admin edit");

    roster
        .merge_present(&[Identity::new("bob"), Identity::new("carol")])
        .await
        .expect("second snapshot");

    let config = store.read().await.expect("read").expect("config");
    let names: Vec<_> = config
        .team
        .iter()
        .map(|entry| entry.resolved_name().to_string())
        .collect();
    assert_eq!(names, vec!["alice", "Bob the Builder", "carol"]);
}

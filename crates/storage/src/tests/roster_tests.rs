use super::*;
use crate::{JsonFileStore, MemoryStore};

fn id(value: &str) -> Identity {
    Identity::new(value)
}

fn roster_with(store: Arc<MemoryStore>) -> RosterStore {
    RosterStore::new(store)
}

#[tokio::test]
async fn presence_of_alice_and_bob_registers_both_with_empty_style() {
    let store = Arc::new(MemoryStore::new());
    let roster = roster_with(Arc::clone(&store));

    let entries = roster
        .merge_present(&[id("alice"), id("bob")])
        .await
        .expect("merge");

    assert_eq!(entries.len(), 2);
    let team = roster.entries().await.expect("entries");
    assert_eq!(team.len(), 2);
    assert!(team.iter().all(|entry| entry.style_prompt.is_none()));
    assert_eq!(entries[1].resolved_name(), "bob");
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn merge_is_idempotent_and_writes_once() {
    let store = Arc::new(MemoryStore::new());
    let roster = roster_with(Arc::clone(&store));
    let defaults = RosterUpdate {
        display_name: Some("Bobby".into()),
        style_prompt: None,
    };

    let first = roster.merge(&id("bob"), defaults.clone()).await.expect("first");
    let second = roster.merge(&id("bob"), defaults).await.expect("second");

    assert_eq!(first, second);
    assert_eq!(store.write_count(), 1);
    assert_eq!(roster.entries().await.expect("entries").len(), 1);
}

#[tokio::test]
async fn merge_never_overwrites_existing_metadata() {
    let store = Arc::new(MemoryStore::with_config(WorkspaceConfig {
        team: vec![RosterEntry {
            identity: id("bob"),
            display_name: Some("Builder Bob".into()),
            style_prompt: Some("pirate".into()),
        }],
        ..WorkspaceConfig::default()
    }));
    let roster = roster_with(Arc::clone(&store));

    let merged = roster
        .merge(
            &id("bob"),
            RosterUpdate {
                display_name: Some("other".into()),
                style_prompt: Some("other".into()),
            },
        )
        .await
        .expect("merge");
    assert_eq!(merged.display_name.as_deref(), Some("Builder Bob"));
    assert_eq!(merged.style_prompt.as_deref(), Some("pirate"));

    roster.merge_present(&[id("bob")]).await.expect("present");
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn roster_grows_monotonically_without_duplicates_over_snapshots() {
    let store = Arc::new(MemoryStore::new());
    let roster = roster_with(Arc::clone(&store));
    let snapshots: Vec<Vec<Identity>> = vec![
        vec![id("alice")],
        vec![id("alice"), id("bob")],
        vec![],
        vec![id("carol"), id("bob"), id("carol")],
        vec![id("Alice")],
        vec![id("alice")],
    ];

    let mut previous = 0;
    for snapshot in snapshots {
        roster.merge_present(&snapshot).await.expect("merge");
        let team = roster.entries().await.expect("entries");
        assert!(team.len() >= previous);
        let unique: HashSet<_> = team.iter().map(|entry| entry.identity.clone()).collect();
        assert_eq!(unique.len(), team.len());
        previous = team.len();
    }
    // identities are case-sensitive
    assert_eq!(previous, 4);
}

#[tokio::test]
async fn concurrent_registrations_for_distinct_identities_all_persist() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file_store = Arc::new(JsonFileStore::new(dir.path()));
    file_store
        .write(&WorkspaceConfig {
            identity: "alice".into(),
            system_prompt: "keep me".into(),
            ..WorkspaceConfig::default()
        })
        .await
        .expect("seed");
    let roster = Arc::new(RosterStore::new(file_store.clone()));

    let mut tasks = Vec::new();
    for n in 0..16 {
        let roster = Arc::clone(&roster);
        tasks.push(tokio::spawn(async move {
            roster
                .merge_present(&[Identity::new(format!("member-{n}"))])
                .await
                .expect("merge");
        }));
    }
    for task in tasks {
        task.await.expect("join");
    }

    let config = file_store.read().await.expect("read").expect("config");
    assert_eq!(config.team.len(), 16);
    assert_eq!(config.system_prompt, "keep me");
}

#[tokio::test]
async fn update_edits_fields_and_find_member_matches_names() {
    let store = Arc::new(MemoryStore::new());
    let roster = roster_with(Arc::clone(&store));
    roster.merge_present(&[id("judy")]).await.expect("merge");

    let updated = roster
        .update(
            &id("judy"),
            RosterUpdate {
                display_name: Some("Judy H".into()),
                style_prompt: Some("cheerful".into()),
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.resolved_name(), "Judy H");

    let partial = roster
        .update(
            &id("judy"),
            RosterUpdate {
                display_name: None,
                style_prompt: Some(String::new()),
            },
        )
        .await
        .expect("partial update");
    assert_eq!(partial.display_name.as_deref(), Some("Judy H"));
    assert!(partial.style_prompt.is_none());

    let by_name = roster.find_member("judy h").await.expect("find");
    assert_eq!(by_name.map(|entry| entry.identity), Some(id("judy")));
    let by_identity = roster.find_member("JUDY").await.expect("find");
    assert_eq!(by_identity.map(|entry| entry.identity), Some(id("judy")));
    assert!(roster.find_member("nobody").await.expect("find").is_none());
    assert!(roster.lookup(&id("nobody")).await.expect("lookup").is_none());
}

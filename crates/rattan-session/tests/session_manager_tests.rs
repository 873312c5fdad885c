//! SessionManager behaviour tests against the file-backed snapshot store.

use chrono::Duration;
use rattan_core::Role;
use rattan_session::{
    CreateSessionOptions, FileSnapshotStore, MessageDraft, SessionKind, SessionManager,
    SessionManagerConfig, MAIN_SESSION_ID,
};
use std::sync::Arc;

fn manager_in(dir: &std::path::Path) -> SessionManager {
    SessionManager::new(
        SessionManagerConfig::default(),
        Arc::new(FileSnapshotStore::new(dir)),
    )
}

#[tokio::test]
async fn load_materializes_main_session() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_in(dir.path());
    manager.load().await.unwrap();

    let main = manager.main_session().await.unwrap();
    assert_eq!(main.id, MAIN_SESSION_ID);
    assert_eq!(main.kind, SessionKind::Main);
}

#[tokio::test]
async fn main_session_cannot_be_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_in(dir.path());
    manager.load().await.unwrap();

    assert!(!manager.delete_session(MAIN_SESSION_ID).await.unwrap());
    assert!(manager.main_session().await.is_ok());
}

#[tokio::test]
async fn delete_then_get_returns_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_in(dir.path());
    manager.load().await.unwrap();

    let session = manager
        .create_session(SessionKind::Group, CreateSessionOptions::default())
        .await
        .unwrap();

    assert!(manager.delete_session(&session.id).await.unwrap());
    assert!(manager.get_session(&session.id).await.is_none());
    // second delete is a no-op
    assert!(!manager.delete_session(&session.id).await.unwrap());
}

#[tokio::test]
async fn concurrent_domain_creation_yields_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(manager_in(dir.path()));
    manager.load().await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager
                .get_or_create_domain_session("finance")
                .await
                .unwrap()
                .id
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }

    ids.dedup();
    assert_eq!(ids.len(), 1, "racing callers must observe one session id");
    // main + one domain session
    assert_eq!(manager.session_count(), 2);
}

#[tokio::test]
async fn domain_session_is_recreated_after_delete() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_in(dir.path());
    manager.load().await.unwrap();

    let first = manager.get_or_create_domain_session("health").await.unwrap();
    assert!(manager.delete_session(&first.id).await.unwrap());

    let second = manager.get_or_create_domain_session("health").await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.domain.as_deref(), Some("health"));
}

#[tokio::test]
async fn message_roundtrip_preserves_content_and_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_in(dir.path());
    manager.load().await.unwrap();

    let draft = MessageDraft::new(Role::User, "hello there").with_source("whatsapp", "alice");
    let appended = manager.add_message(MAIN_SESSION_ID, draft).await.unwrap();
    assert!(!appended.id.is_empty());

    let history = manager.history(MAIN_SESSION_ID, Some(1)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "hello there");
    assert_eq!(history[0].sender.as_deref(), Some("alice"));
    assert_eq!(history[0].channel.as_deref(), Some("whatsapp"));
}

#[tokio::test]
async fn history_is_bounded_to_most_recent_entries() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(
        SessionManagerConfig {
            history_cap: 1000,
            history_trim: 500,
        },
        Arc::new(FileSnapshotStore::new(dir.path())),
    );
    manager.load().await.unwrap();

    for i in 0..1001 {
        manager
            .add_message(MAIN_SESSION_ID, MessageDraft::new(Role::User, format!("m{}", i)))
            .await
            .unwrap();
    }

    let history = manager.history(MAIN_SESSION_ID, None).await.unwrap();
    assert_eq!(history.len(), 500);
    assert_eq!(history.last().unwrap().content, "m1000");
    assert_eq!(history.first().unwrap().content, "m501");
}

#[tokio::test]
async fn history_limit_returns_tail() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_in(dir.path());
    manager.load().await.unwrap();

    for i in 0..5 {
        manager
            .add_message(MAIN_SESSION_ID, MessageDraft::new(Role::User, format!("m{}", i)))
            .await
            .unwrap();
    }

    let tail = manager.history(MAIN_SESSION_ID, Some(2)).await.unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].content, "m3");
    assert_eq!(tail[1].content, "m4");
}

#[tokio::test]
async fn restart_resumes_persisted_sessions() {
    let dir = tempfile::tempdir().unwrap();

    let domain_id = {
        let manager = manager_in(dir.path());
        manager.load().await.unwrap();
        manager
            .add_message(MAIN_SESSION_ID, MessageDraft::new(Role::User, "before restart"))
            .await
            .unwrap();
        let domain = manager.get_or_create_domain_session("social").await.unwrap();
        domain.id
    };

    // New manager over the same directory: prior conversations resume.
    let manager = manager_in(dir.path());
    manager.load().await.unwrap();

    let history = manager.history(MAIN_SESSION_ID, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "before restart");

    let domain = manager.get_or_create_domain_session("social").await.unwrap();
    assert_eq!(domain.id, domain_id, "domain index must be rebuilt on load");
}

#[tokio::test]
async fn prune_removes_only_stale_group_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_in(dir.path());
    manager.load().await.unwrap();

    manager
        .create_session(SessionKind::Group, CreateSessionOptions::default())
        .await
        .unwrap();
    manager.get_or_create_domain_session("finance").await.unwrap();

    // Nothing is older than a day yet.
    assert_eq!(manager.prune_inactive(Duration::hours(24)).await, 0);

    // With a zero-age cutoff the group session goes, main and domain stay.
    assert_eq!(manager.prune_inactive(Duration::zero()).await, 1);
    assert!(manager.main_session().await.is_ok());
    assert_eq!(manager.session_count(), 2);
}

#[tokio::test]
async fn add_message_to_unknown_session_fails() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager_in(dir.path());
    manager.load().await.unwrap();

    let result = manager
        .add_message("no-such-session", MessageDraft::new(Role::User, "hi"))
        .await;
    assert!(result.is_err());
}

//! Snapshot persistence boundary.
//!
//! One serialized [`Session`] per file, acting as a poor man's WAL: every
//! mutation rewrites the affected session's snapshot so a crash right after
//! a successful call never loses that call's effect. The trait keeps the
//! boundary swappable for an embedded store later without touching the
//! manager's in-memory logic.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::SessionResult;
use crate::types::Session;

/// Storage contract for session snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load every persisted session. Called once at startup before the main
    /// session is rematerialized.
    async fn load_all(&self) -> SessionResult<Vec<Session>>;

    /// Persist the full snapshot of one session.
    async fn save(&self, session: &Session) -> SessionResult<()>;

    /// Remove a session's snapshot. Missing snapshots are not an error.
    async fn delete(&self, session_id: &str) -> SessionResult<()>;
}

/// Flat-file store: `<dir>/<session_id>.json`, written atomically via a
/// temp file and rename. The directory is process-owned and never
/// hand-edited.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load_all(&self) -> SessionResult<Vec<Session>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("skipping unreadable snapshot {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<Session>(&raw) {
                Ok(session) => sessions.push(session),
                // A torn write from a previous crash; leave the file in
                // place for inspection and carry on.
                Err(e) => warn!("skipping corrupt snapshot {}: {}", path.display(), e),
            }
        }

        debug!("loaded {} session snapshots from {}", sessions.len(), self.dir.display());
        Ok(sessions)
    }

    async fn save(&self, session: &Session) -> SessionResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&session.id);
        let tmp = self.dir.join(format!(".{}.tmp", session.id));
        let raw = serde_json::to_vec(session)?;
        tokio::fs::write(&tmp, &raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> SessionResult<()> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionKind;

    #[tokio::test]
    async fn save_load_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        let session = Session::new_domain("finance");
        store.save(&session).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, session.id);
        assert_eq!(loaded[0].kind, SessionKind::Domain);

        store.delete(&session.id).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_snapshot_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        store.delete("does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        let session = Session::new_group();
        store.save(&session).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{ not json")
            .await
            .unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, session.id);
    }

    #[tokio::test]
    async fn save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        let mut session = Session::new_group();
        store.save(&session).await.unwrap();
        session.history.push(rattan_core::Message::user("hello"));
        store.save(&session).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].history.len(), 1);
    }
}

//! Durable keyed storage for session records.
//!
//! The timer only ever talks to this trait; `db::Database` is the SQLite implementation and
//! `MemoryStore` backs tests and ephemeral runs.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{Session, SessionPatch};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>>;

    /// Insert or fully replace a record, pause ledger included.
    async fn put(&self, session: &Session) -> Result<()>;

    /// Most recently started record still flagged `running` for the device.
    async fn find_running_for_device(&self, device_id: &str) -> Result<Option<Session>>;

    /// Apply the present fields of `patch`. Unknown ids are an error.
    async fn update(&self, id: &str, patch: SessionPatch) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn put(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_running_for_device(&self, device_id: &str) -> Result<Option<Session>> {
        let guard = self.sessions.read().await;
        Ok(guard
            .values()
            .filter(|session| session.running && session.device_id == device_id)
            .max_by_key(|session| session.start_ts)
            .cloned())
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> Result<()> {
        let mut guard = self.sessions.write().await;
        let session = guard
            .get_mut(id)
            .ok_or_else(|| anyhow!("session {id} not found"))?;
        session.apply(&patch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_latest_running_session_for_device_only() {
        let store = MemoryStore::new();
        let older = Session::begin("a".into(), "dev-1".into(), "flow".into(), 1_000);
        let newer = Session::begin("b".into(), "dev-1".into(), "flow".into(), 2_000);
        let other_device = Session::begin("c".into(), "dev-2".into(), "flow".into(), 3_000);
        let mut stopped = Session::begin("d".into(), "dev-1".into(), "flow".into(), 4_000);
        stopped.running = false;
        stopped.end_ts = Some(5_000);

        for session in [&older, &newer, &other_device, &stopped] {
            store.put(session).await.unwrap();
        }

        let found = store.find_running_for_device("dev-1").await.unwrap();
        assert_eq!(found.map(|s| s.id), Some("b".to_string()));
        assert!(store.find_running_for_device("dev-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_of_unknown_id_fails() {
        let store = MemoryStore::new();
        let err = store
            .update("missing", SessionPatch::touched(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert_eq!(store.len().await, 0);
    }
}

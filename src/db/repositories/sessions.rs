use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_sync_status, to_i64, to_u32, to_u64},
};
use crate::models::{PauseInterval, Session, SessionPatch, SyncStatus};
use crate::store::SessionStore;

const SESSION_COLUMNS: &str = "id, device_id, start_ts, end_ts, running, mode, paused_ms, \
                               created_at, updated_at, sync_status, distractions";

/// Row without its pause ledger; callers attach pauses via `load_pauses`.
fn row_to_session(row: &Row) -> Result<Session> {
    let paused_ms: i64 = row.get("paused_ms")?;
    let sync_status: String = row.get("sync_status")?;
    let distractions: i64 = row.get("distractions")?;

    Ok(Session {
        id: row.get("id")?,
        device_id: row.get("device_id")?,
        start_ts: row.get("start_ts")?,
        end_ts: row.get("end_ts")?,
        running: row.get("running")?,
        mode: row.get("mode")?,
        paused_ms: to_u64(paused_ms, "paused_ms")?,
        pauses: Vec::new(),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        sync_status: parse_sync_status(&sync_status)?,
        distractions: to_u32(distractions, "distractions")?,
    })
}

fn load_pauses(conn: &Connection, session_id: &str) -> Result<Vec<PauseInterval>> {
    let mut stmt = conn.prepare(
        "SELECT start_ts, end_ts FROM session_pauses
         WHERE session_id = ?1
         ORDER BY seq ASC",
    )?;
    let mut rows = stmt.query(params![session_id])?;
    let mut pauses = Vec::new();
    while let Some(row) = rows.next()? {
        pauses.push(PauseInterval {
            start: row.get(0)?,
            end: row.get(1)?,
        });
    }
    Ok(pauses)
}

fn query_sessions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    for session in &mut sessions {
        session.pauses = load_pauses(conn, &session.id)?;
    }
    Ok(sessions)
}

fn load_session(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
    Ok(query_sessions(conn, &sql, params![session_id])?.pop())
}

fn write_row(conn: &Connection, record: &Session) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, device_id, start_ts, end_ts, running, mode, paused_ms, created_at, updated_at, sync_status, distractions)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
             end_ts = excluded.end_ts,
             running = excluded.running,
             paused_ms = excluded.paused_ms,
             updated_at = excluded.updated_at,
             sync_status = excluded.sync_status,
             distractions = excluded.distractions",
        params![
            record.id,
            record.device_id,
            record.start_ts,
            record.end_ts,
            record.running,
            record.mode,
            to_i64(record.paused_ms)?,
            record.created_at,
            record.updated_at,
            record.sync_status.as_str(),
            record.distractions,
        ],
    )
    .with_context(|| format!("failed to write session {}", record.id))?;
    Ok(())
}

fn write_pauses(conn: &Connection, session_id: &str, pauses: &[PauseInterval]) -> Result<()> {
    conn.execute(
        "DELETE FROM session_pauses WHERE session_id = ?1",
        params![session_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO session_pauses (session_id, seq, start_ts, end_ts)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (seq, pause) in pauses.iter().enumerate() {
        stmt.execute(params![session_id, seq as i64, pause.start, pause.end])
            .with_context(|| format!("failed to write pause {seq} of session {session_id}"))?;
    }
    Ok(())
}

impl Database {
    /// Stopped sessions, newest first. This is the read side used by history and
    /// analytics views.
    pub async fn list_sessions(&self, limit: usize, offset: usize) -> Result<Vec<Session>> {
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE running = 0
                 ORDER BY start_ts DESC
                 LIMIT ?1 OFFSET ?2"
            );
            query_sessions(conn, &sql, params![limit, offset])
        })
        .await
    }

    /// Records awaiting upload, oldest change first.
    pub async fn list_pending_sync(&self, limit: usize) -> Result<Vec<Session>> {
        let limit = limit as i64;
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE sync_status = 'pending'
                 ORDER BY updated_at ASC
                 LIMIT ?1"
            );
            query_sessions(conn, &sql, params![limit])
        })
        .await
    }

    pub async fn mark_synced(&self, session_ids: &[String]) -> Result<usize> {
        let session_ids = session_ids.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            for session_id in &session_ids {
                updated += tx.execute(
                    "UPDATE sessions SET sync_status = ?1 WHERE id = ?2",
                    params![SyncStatus::Synced.as_str(), session_id],
                )?;
            }
            tx.commit()?;
            Ok(updated)
        })
        .await
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let session_id = id.to_string();
        self.execute(move |conn| load_session(conn, &session_id))
            .await
    }

    async fn put(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            write_row(&tx, &record)?;
            write_pauses(&tx, &record.id, &record.pauses)?;
            tx.commit().context("failed to commit session write")?;
            Ok(())
        })
        .await
    }

    async fn find_running_for_device(&self, device_id: &str) -> Result<Option<Session>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE device_id = ?1 AND running = 1
                 ORDER BY start_ts DESC
                 LIMIT 1"
            );
            Ok(query_sessions(conn, &sql, params![device_id])?.pop())
        })
        .await
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> Result<()> {
        let session_id = id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut session = load_session(&tx, &session_id)?
                .ok_or_else(|| anyhow!("session {session_id} not found"))?;
            session.apply(&patch);
            write_row(&tx, &session)?;
            if patch.pauses.is_some() {
                write_pauses(&tx, &session_id, &session.pauses)?;
            }
            tx.commit().context("failed to commit session update")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("focus.sqlite3")).unwrap();
        (dir, db)
    }

    fn stopped(id: &str, start_ts: i64) -> Session {
        let mut session = Session::begin(id.into(), "dev".into(), "flow".into(), start_ts);
        session.running = false;
        session.end_ts = Some(start_ts + 60_000);
        session
    }

    #[tokio::test]
    async fn put_then_get_keeps_the_ledger_in_order() {
        let (_dir, db) = open();
        let mut session = Session::begin("s-1".into(), "dev".into(), "flow".into(), 1_000);
        session.pauses = vec![
            PauseInterval {
                start: 2_000,
                end: Some(2_500),
            },
            PauseInterval::open(4_000),
        ];
        session.paused_ms = 500;
        db.put(&session).await.unwrap();

        let loaded = db.get("s-1").await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(db.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_applies_patch_and_rewrites_pauses() {
        let (_dir, db) = open();
        let mut session = Session::begin("s-1".into(), "dev".into(), "flow".into(), 1_000);
        session.pauses = vec![PauseInterval::open(2_000)];
        db.put(&session).await.unwrap();

        let patch = SessionPatch {
            pauses: Some(vec![PauseInterval {
                start: 2_000,
                end: Some(3_000),
            }]),
            paused_ms: Some(1_000),
            end_ts: Some(5_000),
            running: Some(false),
            ..SessionPatch::touched(5_000)
        };
        db.update("s-1", patch).await.unwrap();

        let loaded = db.get("s-1").await.unwrap().unwrap();
        assert!(!loaded.running);
        assert_eq!(loaded.end_ts, Some(5_000));
        assert_eq!(loaded.paused_ms, 1_000);
        assert_eq!(loaded.pauses.len(), 1);
        assert_eq!(loaded.pauses[0].end, Some(3_000));
        assert_eq!(loaded.updated_at, 5_000);
        assert_eq!(loaded.mode, "flow");
    }

    #[tokio::test]
    async fn update_without_pauses_leaves_ledger_alone() {
        let (_dir, db) = open();
        let mut session = Session::begin("s-1".into(), "dev".into(), "flow".into(), 1_000);
        session.pauses = vec![PauseInterval::open(2_000)];
        db.put(&session).await.unwrap();

        let patch = SessionPatch {
            distractions: Some(3),
            ..SessionPatch::touched(2_500)
        };
        db.update("s-1", patch).await.unwrap();

        let loaded = db.get("s-1").await.unwrap().unwrap();
        assert_eq!(loaded.distractions, 3);
        assert_eq!(loaded.pauses, vec![PauseInterval::open(2_000)]);
    }

    #[tokio::test]
    async fn update_of_unknown_session_fails() {
        let (_dir, db) = open();
        let err = db
            .update("nope", SessionPatch::touched(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn running_lookup_is_scoped_to_device() {
        let (_dir, db) = open();
        db.put(&Session::begin("a".into(), "dev".into(), "flow".into(), 1_000))
            .await
            .unwrap();
        db.put(&Session::begin("b".into(), "dev".into(), "flow".into(), 2_000))
            .await
            .unwrap();
        db.put(&Session::begin("c".into(), "other".into(), "flow".into(), 3_000))
            .await
            .unwrap();
        db.put(&stopped("d", 4_000)).await.unwrap();

        let running = db.find_running_for_device("dev").await.unwrap().unwrap();
        assert_eq!(running.id, "b");
        assert!(db.find_running_for_device("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_and_sync_queries() {
        let (_dir, db) = open();
        db.put(&stopped("old", 1_000)).await.unwrap();
        db.put(&stopped("new", 9_000)).await.unwrap();
        db.put(&Session::begin("live".into(), "dev".into(), "flow".into(), 20_000))
            .await
            .unwrap();

        let history = db.list_sessions(10, 0).await.unwrap();
        let ids: Vec<_> = history.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(db.list_sessions(1, 1).await.unwrap()[0].id, "old");

        assert_eq!(db.list_pending_sync(10).await.unwrap().len(), 3);
        let marked = db
            .mark_synced(&["old".to_string(), "new".to_string()])
            .await
            .unwrap();
        assert_eq!(marked, 2);

        let pending = db.list_pending_sync(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "live");
    }
}

//! SQLite chat history backend.

use std::path::PathBuf;

use chrono::Utc;
use keshra_core::error::{KeshraError, Result};
use keshra_core::history::{ChatHistory, Role};
use rusqlite::{params, Connection};

/// One persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub role: String,
    pub text: String,
    pub created_at: i64,
}

/// Chat history in a local SQLite database, one row per committed message.
#[derive(Debug)]
pub struct SqliteHistory {
    db_path: PathBuf,
}

impl SqliteHistory {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path).map_err(|e| KeshraError::History(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS messages (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              session_id TEXT NOT NULL,
              role TEXT NOT NULL,
              text TEXT NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
              ON messages(session_id, created_at);
            "#,
        )
        .map_err(|e| KeshraError::History(e.to_string()))?;
        Ok(())
    }

    /// Most recent messages of a session, oldest first.
    pub fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT role, text, created_at FROM messages
                 WHERE session_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| KeshraError::History(e.to_string()))?;

        let mut rows = stmt
            .query(params![session_id, limit as i64])
            .map_err(|e| KeshraError::History(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| KeshraError::History(e.to_string()))?
        {
            out.push(StoredMessage {
                role: row.get(0).map_err(|e| KeshraError::History(e.to_string()))?,
                text: row.get(1).map_err(|e| KeshraError::History(e.to_string()))?,
                created_at: row.get(2).map_err(|e| KeshraError::History(e.to_string()))?,
            });
        }
        out.reverse();
        Ok(out)
    }
}

impl ChatHistory for SqliteHistory {
    fn append_message(&mut self, session_id: &str, role: Role, text: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO messages (session_id, role, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role.as_str(), text, Utc::now().timestamp()],
        )
        .map_err(|e| KeshraError::History(e.to_string()))?;
        Ok(())
    }
}

/// No-op backend for when history persistence is disabled in settings.
#[derive(Debug, Default)]
pub struct DisabledHistory;

impl ChatHistory for DisabledHistory {
    fn append_message(&mut self, _session_id: &str, _role: Role, _text: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!(
            "keshra-test-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_micros()
        ))
    }

    #[test]
    fn appends_and_reads_back_in_order() {
        let path = temp_db();
        let mut store = SqliteHistory::new(path.clone()).unwrap();

        store.append_message("s1", Role::User, "hello").unwrap();
        store.append_message("s1", Role::Model, "hi").unwrap();
        store.append_message("s2", Role::User, "other session").unwrap();

        let messages = store.recent("s1", 10).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[1].role, "model");

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn recent_respects_the_limit() {
        let path = temp_db();
        let mut store = SqliteHistory::new(path.clone()).unwrap();

        for i in 0..5 {
            store
                .append_message("s1", Role::User, &format!("msg {i}"))
                .unwrap();
        }

        let messages = store.recent("s1", 2).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "msg 3");
        assert_eq!(messages[1].text, "msg 4");

        let _ = std::fs::remove_file(path);
    }
}

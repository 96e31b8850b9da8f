//! siliqa-history — durable conversation log.
//!
//! SQLite-backed message log; the in-memory conversation cache elsewhere is a
//! best-effort accelerator, this file is the durable truth.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use siliqa_common::{Result, SiliqaError};
use tracing::info;
use uuid::Uuid;

/// New conversations inherit their title from the first user message,
/// truncated to this many characters.
const TITLE_MAX: usize = 30;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    title TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    sources TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY(conversation_id) REFERENCES conversations(id)
);
";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub sources: Option<serde_json::Value>,
    pub created_at: String,
}

pub struct ChatHistoryDb {
    conn: Mutex<Connection>,
}

impl ChatHistoryDb {
    /// Open or create the log database and its tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(db_err)?;
        info!(path = %path.display(), "chat history opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(db_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Create a conversation and return its id.
    pub fn create_conversation(&self, title: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().expect("history lock poisoned");
        conn.execute(
            "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![id, title, now],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    /// Append a message. An unknown conversation id is created on the fly;
    /// the first user message sets the conversation title.
    pub fn add_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        sources: Option<&serde_json::Value>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().expect("history lock poisoned");

        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        if exists.is_none() {
            let title = if role == "user" { truncate_title(content) } else { "New Chat".to_string() };
            conn.execute(
                "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                params![conversation_id, title, now],
            )
            .map_err(db_err)?;
        } else {
            conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )
            .map_err(db_err)?;

            if role == "user" {
                let count: i64 = conn
                    .query_row(
                        "SELECT count(*) FROM messages WHERE conversation_id = ?1",
                        params![conversation_id],
                        |row| row.get(0),
                    )
                    .map_err(db_err)?;
                if count == 0 {
                    conn.execute(
                        "UPDATE conversations SET title = ?1 WHERE id = ?2",
                        params![truncate_title(content), conversation_id],
                    )
                    .map_err(db_err)?;
                }
            }
        }

        let sources_json = sources.map(|s| s.to_string());
        conn.execute(
            "INSERT INTO messages (conversation_id, role, content, sources, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![conversation_id, role, content, sources_json, now],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Conversations ordered by most recent update.
    pub fn conversations(&self, limit: usize) -> Result<Vec<ConversationRow>> {
        let conn = self.conn.lock().expect("history lock poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT id, title, created_at, updated_at FROM conversations \
                 ORDER BY updated_at DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// All messages of one conversation, oldest first.
    pub fn messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        let conn = self.conn.lock().expect("history lock poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT id, conversation_id, role, content, sources, created_at \
                 FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![conversation_id], |row| {
                let sources_text: Option<String> = row.get(4)?;
                Ok(MessageRow {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    sources: sources_text.and_then(|s| serde_json::from_str(&s).ok()),
                    created_at: row.get(5)?,
                })
            })
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// Delete a conversation and its messages; true when it existed.
    pub fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("history lock poisoned");
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
        )
        .map_err(db_err)?;
        let deleted = conn
            .execute("DELETE FROM conversations WHERE id = ?1", params![conversation_id])
            .map_err(db_err)?;
        Ok(deleted > 0)
    }
}

fn truncate_title(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() > TITLE_MAX {
        let head: String = chars[..TITLE_MAX].iter().collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

fn db_err(e: rusqlite::Error) -> SiliqaError {
    SiliqaError::Persistence(e.to_string())
}

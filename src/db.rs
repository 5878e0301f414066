//! Conversation store
//!
//! Persists conversations and their turn transcripts, and owns the
//! current-conversation pointer. The orchestrator writes after every
//! mutation (best effort); readers reconstruct transcripts from the ordered
//! turn rows.

mod schema;

pub use schema::*;

use crate::state_machine::TurnState;
use crate::transcript::Turn;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Conversation Operations ====================

    /// Create a new conversation
    pub fn create_conversation(&self, id: &str, title: &str) -> DbResult<ConversationRecord> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO conversations (id, title, state, is_current, created_at, updated_at)
             VALUES (?1, ?2, '{\"type\":\"idle\"}', 0, ?3, ?3)",
            params![id, title, now.to_rfc3339()],
        )?;

        Ok(ConversationRecord {
            id: id.to_string(),
            title: title.to_string(),
            state: TurnState::Idle,
            is_current: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get conversation by ID
    pub fn get_conversation(&self, id: &str) -> DbResult<ConversationRecord> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, state, is_current, created_at, updated_at
             FROM conversations WHERE id = ?1",
        )?;

        stmt.query_row(params![id], row_to_conversation)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::ConversationNotFound(id.to_string()),
                other => DbError::Sqlite(other),
            })
    }

    /// Get the current conversation, if one is selected
    pub fn get_current(&self) -> DbResult<Option<ConversationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, state, is_current, created_at, updated_at
             FROM conversations WHERE is_current = 1 LIMIT 1",
        )?;

        match stmt.query_row([], row_to_conversation) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }

    /// Point the current-conversation marker at the given id
    pub fn set_current(&self, id: &str, update_timestamp: bool) -> DbResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("UPDATE conversations SET is_current = 0 WHERE is_current = 1", [])?;
        let updated = if update_timestamp {
            tx.execute(
                "UPDATE conversations SET is_current = 1, updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )?
        } else {
            tx.execute(
                "UPDATE conversations SET is_current = 1 WHERE id = ?1",
                params![id],
            )?
        };

        if updated == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    /// List conversations, most recently touched first
    pub fn list_conversations(&self) -> DbResult<Vec<ConversationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, state, is_current, created_at, updated_at
             FROM conversations
             ORDER BY updated_at DESC",
        )?;

        let rows = stmt.query_map([], row_to_conversation)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Update conversation state
    pub fn update_state(&self, id: &str, state: &TurnState) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let state_json = serde_json::to_string(state)
            .map_err(|e| DbError::Corrupt(format!("state serialization: {e}")))?;

        let updated = conn.execute(
            "UPDATE conversations SET state = ?1 WHERE id = ?2",
            params![state_json, id],
        )?;

        if updated == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Update conversation title
    pub fn update_title(&self, id: &str, title: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE conversations SET title = ?1 WHERE id = ?2",
            params![title, id],
        )?;

        if updated == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete a conversation and its turns
    pub fn delete_conversation(&self, id: &str) -> DbResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM turns WHERE conversation_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;

        if deleted == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    /// In-flight model/tool states cannot be resumed after a restart — the
    /// outstanding call is gone. Reset them to idle; a suspended
    /// confirmation and the terminal states survive as-is.
    pub fn reset_interrupted_states(&self) -> DbResult<usize> {
        let conn = self.conn.lock().unwrap();
        let reset = conn.execute(
            "UPDATE conversations SET state = '{\"type\":\"idle\"}'
             WHERE json_extract(state, '$.type') IN ('awaiting_model', 'awaiting_tool')",
            [],
        )?;
        Ok(reset)
    }

    // ==================== Turn Operations ====================

    /// Upsert the full turn list for a conversation. Turn ids are stable, so
    /// replaying the whole transcript after each mutation is idempotent.
    pub fn save_turns(&self, conversation_id: &str, turns: &[Turn], update_timestamp: bool) -> DbResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for (sequence_id, turn) in turns.iter().enumerate() {
            let payload = serde_json::to_string(turn)
                .map_err(|e| DbError::Corrupt(format!("turn serialization: {e}")))?;
            tx.execute(
                "INSERT INTO turns (id, conversation_id, sequence_id, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET sequence_id = ?3, payload = ?4",
                params![
                    turn.id,
                    conversation_id,
                    sequence_id as i64,
                    payload,
                    turn.created_at.to_rfc3339()
                ],
            )?;
        }

        if update_timestamp {
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), conversation_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Load a conversation's turns in transcript order
    pub fn get_turns(&self, conversation_id: &str) -> DbResult<Vec<Turn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload FROM turns WHERE conversation_id = ?1 ORDER BY sequence_id",
        )?;

        let rows = stmt.query_map(params![conversation_id], |row| {
            row.get::<_, String>(0)
        })?;

        let mut turns = Vec::new();
        for payload in rows {
            let payload = payload?;
            let turn: Turn = serde_json::from_str(&payload)
                .map_err(|e| DbError::Corrupt(format!("turn payload: {e}")))?;
            turns.push(turn);
        }
        Ok(turns)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRecord, rusqlite::Error> {
    Ok(ConversationRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        state: serde_json::from_str(&row.get::<_, String>(2)?).unwrap_or_default(),
        is_current: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        updated_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

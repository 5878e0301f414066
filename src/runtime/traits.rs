//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::Database;
use crate::state_machine::TurnState;
use crate::transcript::Turn;
use async_trait::async_trait;
use std::sync::Arc;

/// Persistence seam for the orchestration loop. Writes are best effort —
/// the runtime logs failures and keeps the in-memory conversation going.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Upsert the full transcript for a conversation.
    async fn save_turns(
        &self,
        conversation_id: &str,
        turns: &[Turn],
        update_timestamp: bool,
    ) -> Result<(), String>;

    /// Persist the turn loop state.
    async fn update_state(&self, conversation_id: &str, state: &TurnState) -> Result<(), String>;

    /// Persist a generated or edited title.
    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<(), String>;
}

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn save_turns(
        &self,
        conversation_id: &str,
        turns: &[Turn],
        update_timestamp: bool,
    ) -> Result<(), String> {
        (**self)
            .save_turns(conversation_id, turns, update_timestamp)
            .await
    }

    async fn update_state(&self, conversation_id: &str, state: &TurnState) -> Result<(), String> {
        (**self).update_state(conversation_id, state).await
    }

    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<(), String> {
        (**self).update_title(conversation_id, title).await
    }
}

// ============================================================================
// Production Adapter
// ============================================================================

/// Adapter exposing the sqlite `Database` through the store seam
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for DatabaseStore {
    async fn save_turns(
        &self,
        conversation_id: &str,
        turns: &[Turn],
        update_timestamp: bool,
    ) -> Result<(), String> {
        self.db
            .save_turns(conversation_id, turns, update_timestamp)
            .map_err(|e| e.to_string())
    }

    async fn update_state(&self, conversation_id: &str, state: &TurnState) -> Result<(), String> {
        self.db
            .update_state(conversation_id, state)
            .map_err(|e| e.to_string())
    }

    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<(), String> {
        self.db
            .update_title(conversation_id, title)
            .map_err(|e| e.to_string())
    }
}

//! API request and response types

use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Request to resolve a pending confirmation
#[derive(Debug, Deserialize)]
pub struct ConfirmationRequest {
    pub turn_id: String,
    pub approve: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request to rename a conversation
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

/// Response with a list of conversations
#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<serde_json::Value>,
}

/// Response with a single conversation
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: serde_json::Value,
}

/// Response with a conversation and its transcript
#[derive(Debug, Serialize)]
pub struct ConversationWithTurnsResponse {
    pub conversation: serde_json::Value,
    pub turns: Vec<serde_json::Value>,
    pub agent_working: bool,
}

/// Response for chat action
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub queued: bool,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Response with the tool catalog
#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub servers: serde_json::Value,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

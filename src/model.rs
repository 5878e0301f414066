//! Model client abstraction
//!
//! The orchestrator talks to the model through a stateful chat session:
//! prior turns are implicit session context, and `reset` fully clears that
//! context before a new conversation's first instruction is sent.

mod gemini;

pub use gemini::{GeminiGateway, GeminiSession};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Model error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::InvalidRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Unknown, message)
    }
}

/// Error classification for logging and display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// Network issues, timeouts
    Network,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Authentication failed (401, 403)
    Auth,
    /// Bad request (400)
    InvalidRequest,
    /// Unknown error
    Unknown,
}

/// A stateful chat session with the model.
#[async_trait]
pub trait ModelSession: Send + Sync {
    /// Install the system instruction for this session.
    async fn send_system_instruction(&self, text: &str) -> Result<(), ModelError>;

    /// Send one message. With `expect_response` the call blocks on the
    /// model's reply; without it the text only joins the session context
    /// (used to rehydrate history) and no request goes out.
    async fn send_message(&self, text: &str, expect_response: bool) -> Result<String, ModelError>;

    /// Fully clear the session context.
    async fn reset(&self);

    /// One-shot title request, outside the session history.
    async fn generate_title(&self, seed: &str) -> Result<String, ModelError>;
}

#[async_trait]
impl<T: ModelSession + ?Sized> ModelSession for Arc<T> {
    async fn send_system_instruction(&self, text: &str) -> Result<(), ModelError> {
        (**self).send_system_instruction(text).await
    }

    async fn send_message(&self, text: &str, expect_response: bool) -> Result<String, ModelError> {
        (**self).send_message(text, expect_response).await
    }

    async fn reset(&self) {
        (**self).reset().await;
    }

    async fn generate_title(&self, seed: &str) -> Result<String, ModelError> {
        (**self).generate_title(seed).await
    }
}

/// Opens fresh model sessions — one per conversation.
pub trait ModelGateway: Send + Sync {
    fn open_session(&self) -> Arc<dyn ModelSession>;
}

//! Runtime for executing conversations
//!
//! One orchestration task per conversation, owned by the `RuntimeManager`.
//! The manager also carries the session initialization produced at startup
//! (tool catalog + system instruction) — an explicit readiness value, not a
//! shared "configured" flag — and rebuilds it wholesale on refresh so the
//! catalog and the instruction can never drift apart.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::OrchestratorRuntime;
pub use traits::*;

use crate::bridge::{BridgeError, ToolBridge, ToolCatalog};
use crate::db::Database;
use crate::model::ModelGateway;
use crate::state_machine::Event;
use crate::system_prompt::build_system_instruction;
use crate::transcript::{SegmentBody, Transcript, Turn, TurnRole};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Type alias for the production runtime with concrete implementations
pub type ProductionRuntime =
    OrchestratorRuntime<DatabaseStore, dyn crate::model::ModelSession, dyn ToolBridge>;

/// Everything a conversation session needs from the tool bridge, resolved
/// before the first message is accepted.
#[derive(Debug, Clone)]
pub struct SessionInit {
    pub catalog: ToolCatalog,
    pub system_instruction: String,
}

impl SessionInit {
    /// Fetch the catalog and derive the system instruction from it.
    pub async fn load(bridge: &dyn ToolBridge) -> Result<Self, BridgeError> {
        let catalog = bridge.load_catalog().await?;
        let system_instruction = build_system_instruction(&catalog);
        Ok(Self {
            catalog,
            system_instruction,
        })
    }

    /// Degraded-start fallback when the bridge is unreachable at boot.
    pub fn empty() -> Self {
        let catalog = ToolCatalog::new();
        let system_instruction = build_system_instruction(&catalog);
        Self {
            catalog,
            system_instruction,
        }
    }
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init {
        conversation: serde_json::Value,
        turns: Vec<serde_json::Value>,
        agent_working: bool,
    },
    TurnStarted {
        turn: serde_json::Value,
    },
    SegmentAppended {
        turn_id: String,
        segment: serde_json::Value,
    },
    ConfirmationRequested {
        turn_id: String,
        pending: serde_json::Value,
    },
    StateChange {
        state: serde_json::Value,
    },
    TitleChanged {
        title: String,
    },
    AgentDone,
    Error {
        message: String,
    },
}

/// Handle to interact with a running conversation
pub struct ConversationHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
}

/// Manager for all conversation runtimes
pub struct RuntimeManager {
    db: Database,
    gateway: Arc<dyn ModelGateway>,
    bridge: Arc<dyn ToolBridge>,
    session: RwLock<Arc<SessionInit>>,
    max_tool_hops: u32,
    runtimes: RwLock<HashMap<String, ConversationHandle>>,
}

impl RuntimeManager {
    pub fn new(
        db: Database,
        gateway: Arc<dyn ModelGateway>,
        bridge: Arc<dyn ToolBridge>,
        init: SessionInit,
        max_tool_hops: u32,
    ) -> Self {
        Self {
            db,
            gateway,
            bridge,
            session: RwLock::new(Arc::new(init)),
            max_tool_hops,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create a runtime for a conversation
    pub async fn get_or_create(&self, conversation_id: &str) -> Result<ConversationHandle, String> {
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(conversation_id) {
                return Ok(ConversationHandle {
                    event_tx: handle.event_tx.clone(),
                    broadcast_tx: handle.broadcast_tx.clone(),
                });
            }
        }

        let conversation = self
            .db
            .get_conversation(conversation_id)
            .map_err(|e| e.to_string())?;
        let turns = self
            .db
            .get_turns(conversation_id)
            .map_err(|e| e.to_string())?;

        // Fresh model session per conversation: clear any carried context,
        // install the instruction, then replay prior turns into the session
        // history without issuing model calls.
        let init = self.session.read().await.clone();
        let session = self.gateway.open_session();
        session.reset().await;
        session
            .send_system_instruction(&init.system_instruction)
            .await
            .map_err(|e| e.to_string())?;
        if !turns.is_empty() {
            let replay = render_history(&turns);
            session
                .send_message(&replay, false)
                .await
                .map_err(|e| e.to_string())?;
        }

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);

        let runtime: ProductionRuntime = OrchestratorRuntime::new(
            conversation_id,
            self.max_tool_hops,
            conversation.state,
            Transcript::from_turns(turns),
            DatabaseStore::new(self.db.clone()),
            session,
            Arc::clone(&self.bridge),
            event_rx,
            event_tx.clone(),
            broadcast_tx.clone(),
        );

        let conv_id = conversation_id.to_string();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(conv_id = %conv_id, "Conversation runtime finished");
        });

        let handle = ConversationHandle {
            event_tx: event_tx.clone(),
            broadcast_tx: broadcast_tx.clone(),
        };

        self.runtimes.write().await.insert(
            conversation_id.to_string(),
            ConversationHandle {
                event_tx,
                broadcast_tx,
            },
        );

        Ok(handle)
    }

    /// Send an event to a conversation
    pub async fn send_event(&self, conversation_id: &str, event: Event) -> Result<(), String> {
        let handle = self.get_or_create(conversation_id).await?;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }

    /// Subscribe to conversation updates
    pub async fn subscribe(
        &self,
        conversation_id: &str,
    ) -> Result<broadcast::Receiver<SseEvent>, String> {
        let handle = self.get_or_create(conversation_id).await?;
        Ok(handle.broadcast_tx.subscribe())
    }

    /// Current session initialization (catalog + system instruction)
    pub async fn session_init(&self) -> Arc<SessionInit> {
        self.session.read().await.clone()
    }

    /// Re-fetch the catalog and rebuild the system instruction, swapping
    /// both at once. Runtimes opened after the swap see the new catalog.
    pub async fn refresh_session(&self) -> Result<Arc<SessionInit>, BridgeError> {
        let init = Arc::new(SessionInit::load(&*self.bridge).await?);
        *self.session.write().await = Arc::clone(&init);
        tracing::info!(servers = init.catalog.len(), "Tool catalog refreshed");
        Ok(init)
    }

    /// Get the database handle
    pub fn db(&self) -> &Database {
        &self.db
    }
}

/// Compact textual replay of a stored transcript, fed into a fresh model
/// session as context when an existing conversation is reopened.
fn render_history(turns: &[Turn]) -> String {
    let mut out = String::from(
        "Context from the earlier part of this conversation (do not answer it again):\n",
    );
    for turn in turns {
        let speaker = match turn.role {
            TurnRole::User => "User",
            TurnRole::Assistant => "Assistant",
            TurnRole::System => "System",
        };
        for segment in &turn.segments {
            match &segment.body {
                SegmentBody::Prose { text } if !text.is_empty() => {
                    out.push_str(speaker);
                    out.push_str(": ");
                    out.push_str(text);
                    out.push('\n');
                }
                SegmentBody::Prose { .. } => {}
                SegmentBody::ToolOperation {
                    server_id,
                    tool_name,
                    result,
                    ..
                } => {
                    out.push_str(&format!(
                        "Assistant ran tool {server_id}/{tool_name}; result: {result}\n"
                    ));
                }
                SegmentBody::Error { message, .. } => {
                    out.push_str(&format!("[The turn failed: {message}]\n"));
                }
            }
        }
    }
    out
}

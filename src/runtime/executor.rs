//! Orchestration runtime executor
//!
//! One runtime task per conversation. Events arrive on an mpsc channel, run
//! through the pure transition function, and the resulting effects execute
//! here — strictly in order, on this task, so segment appends always land in
//! the order the state machine produced them. Network effects are spawned as
//! background tasks that post their completion back onto the event channel;
//! a confirmation resolved hours later re-enters through the same channel
//! and continues the original turn.

use super::traits::ConversationStore;
use super::SseEvent;
use crate::bridge::ToolBridge;
use crate::model::ModelSession;
use crate::parser::ToolRequest;
use crate::state_machine::{transition, Effect, Event, TurnContext, TurnState};
use crate::title_generator;
use crate::transcript::{Transcript, TurnRole};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Generic conversation runtime over store, model session, and tool bridge
pub struct OrchestratorRuntime<S, M, B>
where
    S: ConversationStore + Clone + 'static,
    M: ModelSession + ?Sized + 'static,
    B: ToolBridge + ?Sized + 'static,
{
    conversation_id: String,
    max_tool_hops: u32,
    state: TurnState,
    transcript: Transcript,
    /// The assistant turn currently receiving segments
    active_turn: Option<String>,
    store: S,
    model: Arc<M>,
    bridge: Arc<B>,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SseEvent>,
}

impl<S, M, B> OrchestratorRuntime<S, M, B>
where
    S: ConversationStore + Clone + 'static,
    M: ModelSession + ?Sized + 'static,
    B: ToolBridge + ?Sized + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversation_id: impl Into<String>,
        max_tool_hops: u32,
        state: TurnState,
        transcript: Transcript,
        store: S,
        model: Arc<M>,
        bridge: Arc<B>,
        event_rx: mpsc::Receiver<Event>,
        event_tx: mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<SseEvent>,
    ) -> Self {
        // A turn suspended on a confirmation resumes against the assistant
        // turn that opened it.
        let active_turn = if state.is_suspended() {
            transcript
                .turns()
                .iter()
                .rev()
                .find(|t| t.role == TurnRole::Assistant && t.has_open_confirmation())
                .map(|t| t.id.clone())
        } else {
            None
        };

        Self {
            conversation_id: conversation_id.into(),
            max_tool_hops,
            state,
            transcript,
            active_turn,
            store,
            model,
            bridge,
            event_rx,
            event_tx,
            broadcast_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(conv_id = %self.conversation_id, "Starting conversation runtime");

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    if let Err(e) = self.process_event(event).await {
                        tracing::error!(conv_id = %self.conversation_id, error = %e, "Error handling event");
                        let _ = self.broadcast_tx.send(SseEvent::Error { message: e });
                    }
                }
                else => break,
            }
        }

        tracing::info!(conv_id = %self.conversation_id, "Conversation runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), String> {
        let context = TurnContext {
            conversation_id: self.conversation_id.clone(),
            max_tool_hops: self.max_tool_hops,
            transcript_empty: self.transcript.is_empty(),
            active_turn: self.active_turn.clone(),
        };

        // Pure state transition; caller-level errors leave the state as-is.
        let result = transition(&self.state, &context, event).map_err(|e| e.to_string())?;

        self.state = result.new_state;

        for effect in result.effects {
            self.execute_effect(effect).await?;
        }

        Ok(())
    }

    fn active_turn_id(&self) -> Result<String, String> {
        self.active_turn
            .clone()
            .ok_or_else(|| "No active assistant turn".to_string())
    }

    /// Broadcast the freshly appended segment of a turn.
    fn broadcast_segment(&self, turn_id: &str, segment_id: u64) {
        let segment = self
            .transcript
            .turn(turn_id)
            .and_then(|t| t.segments.iter().find(|s| s.id == segment_id))
            .map_or(Value::Null, |s| {
                serde_json::to_value(s).unwrap_or(Value::Null)
            });
        let _ = self.broadcast_tx.send(SseEvent::SegmentAppended {
            turn_id: turn_id.to_string(),
            segment,
        });
    }

    fn broadcast_turn(&self, turn_id: &str) {
        let turn = self
            .transcript
            .turn(turn_id)
            .map_or(Value::Null, |t| {
                serde_json::to_value(t).unwrap_or(Value::Null)
            });
        let _ = self.broadcast_tx.send(SseEvent::TurnStarted { turn });
    }

    #[allow(clippy::too_many_lines)] // Effect handling is inherently branchy
    async fn execute_effect(&mut self, effect: Effect) -> Result<(), String> {
        match effect {
            Effect::AppendUserTurn { text } => {
                let turn_id = self.transcript.push_user_turn(&text);
                self.broadcast_turn(&turn_id);
                Ok(())
            }

            Effect::BeginAssistantTurn => {
                let turn_id = self.transcript.begin_assistant_turn();
                self.active_turn = Some(turn_id.clone());
                self.broadcast_turn(&turn_id);
                Ok(())
            }

            Effect::AppendProse { text } => {
                let turn_id = self.active_turn_id()?;
                let segment_id = self
                    .transcript
                    .append_prose(&turn_id, &text)
                    .map_err(|e| e.to_string())?;
                self.broadcast_segment(&turn_id, segment_id);
                Ok(())
            }

            Effect::AppendToolOperation { request, result } => {
                let turn_id = self.active_turn_id()?;
                let segment_id = self
                    .transcript
                    .append_tool_operation(&turn_id, &request, result)
                    .map_err(|e| e.to_string())?;
                self.broadcast_segment(&turn_id, segment_id);
                Ok(())
            }

            Effect::AppendError { kind, message } => {
                let turn_id = self.active_turn_id()?;
                let segment_id = self
                    .transcript
                    .append_error(&turn_id, kind, &message)
                    .map_err(|e| e.to_string())?;
                self.broadcast_segment(&turn_id, segment_id);
                Ok(())
            }

            Effect::OpenConfirmation { pending } => {
                let turn_id = self.active_turn_id()?;
                self.transcript
                    .open_confirmation(&turn_id, pending.clone())
                    .map_err(|e| e.to_string())?;
                let _ = self.broadcast_tx.send(SseEvent::ConfirmationRequested {
                    turn_id,
                    pending: serde_json::to_value(&pending).unwrap_or(Value::Null),
                });
                Ok(())
            }

            Effect::ResolveConfirmation {
                approve,
                request,
                result,
            } => {
                let turn_id = self.active_turn_id()?;
                let segment_id = self
                    .transcript
                    .resolve_confirmation(&turn_id, approve, &request, result)
                    .map_err(|e| e.to_string())?;
                self.broadcast_segment(&turn_id, segment_id);
                Ok(())
            }

            Effect::Persist => {
                // Best effort: a dead store must not kill the conversation.
                if let Err(e) = self
                    .store
                    .save_turns(&self.conversation_id, self.transcript.turns(), true)
                    .await
                {
                    tracing::warn!(conv_id = %self.conversation_id, error = %e, "Failed to persist turns");
                }
                if let Err(e) = self
                    .store
                    .update_state(&self.conversation_id, &self.state)
                    .await
                {
                    tracing::warn!(conv_id = %self.conversation_id, error = %e, "Failed to persist state");
                }
                let state_json = serde_json::to_value(&self.state).unwrap_or(Value::Null);
                let _ = self
                    .broadcast_tx
                    .send(SseEvent::StateChange { state: state_json });
                Ok(())
            }

            Effect::RequestModel { input } => {
                self.spawn_model_request(input);
                Ok(())
            }

            Effect::InvokeTool { request } => {
                self.spawn_tool_invocation(request);
                Ok(())
            }

            Effect::SubmitConfirmation {
                confirmation_id,
                approve,
                reason,
            } => {
                self.spawn_confirmation(confirmation_id, approve, reason);
                Ok(())
            }

            Effect::GenerateTitle { seed } => {
                self.spawn_title_generation(seed);
                Ok(())
            }

            Effect::NotifyTurnEnded => {
                let _ = self.broadcast_tx.send(SseEvent::AgentDone);
                Ok(())
            }
        }
    }

    fn spawn_model_request(&self, input: String) {
        let model = Arc::clone(&self.model);
        let event_tx = self.event_tx.clone();
        let conv_id = self.conversation_id.clone();

        tokio::spawn(async move {
            tracing::debug!(conv_id = %conv_id, "Sending message to model");
            let event = match model.send_message(&input, true).await {
                Ok(raw) => Event::ModelReply { raw },
                Err(e) => Event::ModelFailed {
                    message: e.message.clone(),
                },
            };
            let _ = event_tx.send(event).await;
        });
    }

    fn spawn_tool_invocation(&self, request: ToolRequest) {
        let bridge = Arc::clone(&self.bridge);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let outcome = bridge
                .execute(&request.server_id, &request.tool_name, &request.parameters)
                .await;
            let _ = event_tx.send(Event::ToolFinished { outcome }).await;
        });
    }

    fn spawn_confirmation(&self, confirmation_id: String, approve: bool, reason: String) {
        let bridge = Arc::clone(&self.bridge);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let outcome = bridge.confirm(&confirmation_id, approve, &reason).await;
            let _ = event_tx.send(Event::ToolFinished { outcome }).await;
        });
    }

    /// Title generation is a detached side task: a failure is logged and the
    /// conversation keeps its slug title.
    fn spawn_title_generation(&self, seed: String) {
        let model = Arc::clone(&self.model);
        let store = self.store.clone();
        let broadcast_tx = self.broadcast_tx.clone();
        let conv_id = self.conversation_id.clone();

        tokio::spawn(async move {
            let Some(title) = title_generator::generate_title(&*model, &seed).await else {
                return;
            };
            if let Err(e) = store.update_title(&conv_id, &title).await {
                tracing::warn!(conv_id = %conv_id, error = %e, "Failed to persist generated title");
                return;
            }
            let _ = broadcast_tx.send(SseEvent::TitleChanged { title });
        });
    }
}

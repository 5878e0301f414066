//! Mock implementations and end-to-end orchestration tests
//!
//! The mocks replace the three I/O seams (model session, tool bridge,
//! conversation store) so a whole turn loop can run without a network.

use super::traits::ConversationStore;
use super::{OrchestratorRuntime, SseEvent};
use crate::bridge::{
    rejection_record, BridgeError, BridgeFailure, BridgeHealth, ServerInfo, ToolBridge,
    ToolOutcome, ToolSpec,
};
use crate::model::{ModelError, ModelSession};
use crate::state_machine::TurnState;
use crate::transcript::Turn;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock Model Session
// ============================================================================

/// Mock model session that returns queued replies
#[allow(dead_code)]
pub struct MockModelSession {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    title: Mutex<Option<String>>,
    delay: Duration,
    /// Record of all messages sent (text, expect_response)
    pub sent: Mutex<Vec<(String, bool)>>,
    /// Record of installed system instructions
    pub instructions: Mutex<Vec<String>>,
}

impl MockModelSession {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            title: Mutex::new(None),
            delay: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
            instructions: Mutex::new(Vec::new()),
        }
    }

    /// Delay every reply, for tests that need the loop to stay busy
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_title(self, title: &str) -> Self {
        *self.title.lock().unwrap() = Some(title.to_string());
        self
    }

    pub fn queue_reply(&self, raw: &str) {
        self.replies.lock().unwrap().push_back(Ok(raw.to_string()));
    }

    pub fn queue_error(&self, error: ModelError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_sends(&self) -> Vec<(String, bool)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for MockModelSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelSession for MockModelSession {
    async fn send_system_instruction(&self, text: &str) -> Result<(), ModelError> {
        self.instructions.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_message(&self, text: &str, expect_response: bool) -> Result<String, ModelError> {
        self.sent
            .lock()
            .unwrap()
            .push((text.to_string(), expect_response));
        if !expect_response {
            return Ok(String::new());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::network("No mock reply queued")))
    }

    async fn reset(&self) {
        self.sent.lock().unwrap().clear();
    }

    async fn generate_title(&self, _seed: &str) -> Result<String, ModelError> {
        self.title
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ModelError::unknown("No mock title configured"))
    }
}

// ============================================================================
// Mock Tool Bridge
// ============================================================================

/// Mock bridge with queued execution and confirmation outcomes
#[allow(dead_code)]
pub struct MockToolBridge {
    outcomes: Mutex<VecDeque<ToolOutcome>>,
    confirm_outcomes: Mutex<VecDeque<ToolOutcome>>,
    /// Record of executions (server, tool, parameters)
    pub executions: Mutex<Vec<(String, String, Value)>>,
    /// Record of confirmation submissions (id, approve)
    pub confirmations: Mutex<Vec<(String, bool)>>,
}

impl MockToolBridge {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            confirm_outcomes: Mutex::new(VecDeque::new()),
            executions: Mutex::new(Vec::new()),
            confirmations: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_outcome(&self, outcome: ToolOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn queue_confirm_outcome(&self, outcome: ToolOutcome) {
        self.confirm_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn recorded_executions(&self) -> Vec<(String, String, Value)> {
        self.executions.lock().unwrap().clone()
    }
}

impl Default for MockToolBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolBridge for MockToolBridge {
    async fn health(&self) -> Result<BridgeHealth, BridgeError> {
        Ok(BridgeHealth { server_count: 1 })
    }

    async fn list_servers(&self) -> Result<Vec<ServerInfo>, BridgeError> {
        Ok(vec![ServerInfo {
            id: "filesystem".to_string(),
        }])
    }

    async fn list_tools(&self, _server_id: &str) -> Result<Vec<ToolSpec>, BridgeError> {
        Ok(Vec::new())
    }

    async fn execute(&self, server_id: &str, tool_name: &str, parameters: &Value) -> ToolOutcome {
        self.executions.lock().unwrap().push((
            server_id.to_string(),
            tool_name.to_string(),
            parameters.clone(),
        ));
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ToolOutcome::Failed {
                kind: BridgeFailure::Rejected,
                message: "No mock outcome queued".to_string(),
            })
    }

    async fn confirm(&self, confirmation_id: &str, approve: bool, reason: &str) -> ToolOutcome {
        self.confirmations
            .lock()
            .unwrap()
            .push((confirmation_id.to_string(), approve));
        if approve {
            self.confirm_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ToolOutcome::Failed {
                    kind: BridgeFailure::Rejected,
                    message: "No mock confirm outcome queued".to_string(),
                })
        } else {
            ToolOutcome::Completed {
                result: rejection_record(reason),
            }
        }
    }
}

// ============================================================================
// In-memory Store
// ============================================================================

#[derive(Default)]
struct MemoryStoreInner {
    turns: HashMap<String, Vec<Turn>>,
    states: HashMap<String, TurnState>,
    titles: HashMap<String, String>,
}

/// In-memory conversation store
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved_turns(&self, conversation_id: &str) -> Vec<Turn> {
        self.inner
            .lock()
            .unwrap()
            .turns
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn state(&self, conversation_id: &str) -> Option<TurnState> {
        self.inner
            .lock()
            .unwrap()
            .states
            .get(conversation_id)
            .cloned()
    }

    pub fn title(&self, conversation_id: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .titles
            .get(conversation_id)
            .cloned()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn save_turns(
        &self,
        conversation_id: &str,
        turns: &[Turn],
        _update_timestamp: bool,
    ) -> Result<(), String> {
        self.inner
            .lock()
            .unwrap()
            .turns
            .insert(conversation_id.to_string(), turns.to_vec());
        Ok(())
    }

    async fn update_state(&self, conversation_id: &str, state: &TurnState) -> Result<(), String> {
        self.inner
            .lock()
            .unwrap()
            .states
            .insert(conversation_id.to_string(), state.clone());
        Ok(())
    }

    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<(), String> {
        self.inner
            .lock()
            .unwrap()
            .titles
            .insert(conversation_id.to_string(), title.to_string());
        Ok(())
    }
}

// ============================================================================
// Scenario tests
// ============================================================================

#[cfg(test)]
mod scenarios {
    use super::*;
    use crate::state_machine::Event;
    use crate::transcript::{
        ConfirmationStatus, FailureKind, PendingConfirmation, SegmentBody, Transcript, TurnRole,
    };
    use serde_json::json;
    use tokio::sync::{broadcast, mpsc};

    const CONV: &str = "conv-test";

    struct Harness {
        event_tx: mpsc::Sender<Event>,
        broadcast_rx: broadcast::Receiver<SseEvent>,
        store: MemoryStore,
        model: Arc<MockModelSession>,
        bridge: Arc<MockToolBridge>,
    }

    fn spawn_runtime(model: MockModelSession, bridge: MockToolBridge, max_hops: u32) -> Harness {
        spawn_runtime_with(
            model,
            bridge,
            max_hops,
            TurnState::Idle,
            Transcript::new(),
        )
    }

    fn spawn_runtime_with(
        model: MockModelSession,
        bridge: MockToolBridge,
        max_hops: u32,
        state: TurnState,
        transcript: Transcript,
    ) -> Harness {
        let model = Arc::new(model);
        let bridge = Arc::new(bridge);
        let store = MemoryStore::new();
        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(128);

        let runtime = OrchestratorRuntime::new(
            CONV,
            max_hops,
            state,
            transcript,
            store.clone(),
            Arc::clone(&model),
            Arc::clone(&bridge),
            event_rx,
            event_tx.clone(),
            broadcast_tx,
        );
        tokio::spawn(runtime.run());

        Harness {
            event_tx,
            broadcast_rx,
            store,
            model,
            bridge,
        }
    }

    /// Collect broadcast events until `stop` matches one (inclusive).
    async fn collect_until(
        rx: &mut broadcast::Receiver<SseEvent>,
        stop: impl Fn(&SseEvent) -> bool,
    ) -> Vec<SseEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("broadcast closed");
            let done = stop(&event);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    fn tool_reply(server: &str, tool: &str, prose: &str) -> String {
        format!(
            r#"{{"tool_call": {{"server_id": "{server}", "tool_name": "{tool}", "parameters": {{"path": "/tmp"}}}}, "response": "{prose}"}}"#
        )
    }

    fn assistant_turn(store: &MemoryStore) -> Turn {
        store
            .saved_turns(CONV)
            .into_iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
            .expect("assistant turn persisted")
    }

    #[tokio::test]
    async fn tool_call_round_trip_ends_done() {
        let model = MockModelSession::new();
        model.queue_reply(&tool_reply("filesystem", "list_dir", "Listing /tmp."));
        model.queue_reply("Here are the files: a.txt.");
        let bridge = MockToolBridge::new();
        bridge.queue_outcome(ToolOutcome::Completed {
            result: json!({"entries": ["a.txt"]}),
        });

        let mut h = spawn_runtime(model, bridge, 8);
        h.event_tx
            .send(Event::UserMessage {
                text: "list files in /tmp".to_string(),
            })
            .await
            .unwrap();

        collect_until(&mut h.broadcast_rx, |e| matches!(e, SseEvent::AgentDone)).await;

        // Prose, then the tool operation, then the model continuation.
        let turn = assistant_turn(&h.store);
        let kinds: Vec<&SegmentBody> = turn.segments.iter().map(|s| &s.body).collect();
        assert_eq!(turn.segments.len(), 3);
        assert!(matches!(kinds[0], SegmentBody::Prose { text } if text == "Listing /tmp."));
        assert!(matches!(
            kinds[1],
            SegmentBody::ToolOperation { result, .. } if result == &json!({"entries": ["a.txt"]})
        ));
        assert!(
            matches!(kinds[2], SegmentBody::Prose { text } if text == "Here are the files: a.txt.")
        );
        let ids: Vec<u64> = turn.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        assert_eq!(h.store.state(CONV), Some(TurnState::Done));
        assert_eq!(
            h.bridge.recorded_executions(),
            vec![(
                "filesystem".to_string(),
                "list_dir".to_string(),
                json!({"path": "/tmp"})
            )]
        );

        // Second model call is the synthesized feedback.
        let sends = h.model.recorded_sends();
        assert_eq!(sends.len(), 2);
        assert!(sends[1].0.starts_with("The tool list_dir was executed successfully."));
    }

    #[tokio::test]
    async fn gated_tool_suspends_then_rejection_continues() {
        let model = MockModelSession::new();
        model.queue_reply(&tool_reply("filesystem", "delete_file", "Deleting it."));
        model.queue_reply("Understood, I won't delete it.");
        let bridge = MockToolBridge::new();
        bridge.queue_outcome(ToolOutcome::ConfirmationRequired {
            confirmation_id: "conf-1".to_string(),
            method: "tools/call".to_string(),
            risk_level: 3,
            risk_description: "destructive operation".to_string(),
        });

        let mut h = spawn_runtime(model, bridge, 8);
        h.event_tx
            .send(Event::UserMessage {
                text: "delete /tmp/x".to_string(),
            })
            .await
            .unwrap();

        let events = collect_until(&mut h.broadcast_rx, |e| {
            matches!(e, SseEvent::ConfirmationRequested { .. })
        })
        .await;
        let turn_id = match events.last() {
            Some(SseEvent::ConfirmationRequested { turn_id, .. }) => turn_id.clone(),
            other => panic!("expected confirmation request, got {other:?}"),
        };
        // The persist following the confirmation broadcasts a state change;
        // after it the store is settled.
        collect_until(&mut h.broadcast_rx, |e| {
            matches!(e, SseEvent::StateChange { .. })
        })
        .await;

        // Suspended: no tool operation segment yet, state persisted as
        // awaiting confirmation.
        let turn = assistant_turn(&h.store);
        assert!(turn
            .segments
            .iter()
            .all(|s| !matches!(s.body, SegmentBody::ToolOperation { .. })));
        assert!(matches!(
            h.store.state(CONV),
            Some(TurnState::AwaitingConfirmation { .. })
        ));

        h.event_tx
            .send(Event::ConfirmationDecision {
                turn_id,
                approve: false,
                reason: Some("too risky".to_string()),
            })
            .await
            .unwrap();

        collect_until(&mut h.broadcast_rx, |e| matches!(e, SseEvent::AgentDone)).await;

        let turn = assistant_turn(&h.store);
        // Cancellation recorded as a tool operation, then the continuation.
        let op = turn
            .segments
            .iter()
            .find_map(|s| match &s.body {
                SegmentBody::ToolOperation { result, .. } => Some(result.clone()),
                _ => None,
            })
            .expect("cancellation operation recorded");
        assert_eq!(op["status"], "rejected");
        assert_eq!(op["message"], "too risky");
        assert_eq!(
            turn.pending_confirmation.as_ref().unwrap().status,
            ConfirmationStatus::Rejected
        );
        assert!(matches!(
            &turn.segments.last().unwrap().body,
            SegmentBody::Prose { text } if text == "Understood, I won't delete it."
        ));

        // The model was told about the cancellation.
        let sends = h.model.recorded_sends();
        assert_eq!(
            sends[1].0,
            "The operation was cancelled by the user: too risky"
        );
        assert_eq!(h.store.state(CONV), Some(TurnState::Done));
    }

    #[tokio::test]
    async fn approval_executes_the_gated_call() {
        let model = MockModelSession::new();
        model.queue_reply(&tool_reply("filesystem", "delete_file", "Deleting it."));
        model.queue_reply("Done, the file is gone.");
        let bridge = MockToolBridge::new();
        bridge.queue_outcome(ToolOutcome::ConfirmationRequired {
            confirmation_id: "conf-2".to_string(),
            method: "tools/call".to_string(),
            risk_level: 2,
            risk_description: "modifies files".to_string(),
        });
        bridge.queue_confirm_outcome(ToolOutcome::Completed {
            result: json!({"deleted": true}),
        });

        let mut h = spawn_runtime(model, bridge, 8);
        h.event_tx
            .send(Event::UserMessage {
                text: "delete /tmp/x".to_string(),
            })
            .await
            .unwrap();

        let events = collect_until(&mut h.broadcast_rx, |e| {
            matches!(e, SseEvent::ConfirmationRequested { .. })
        })
        .await;
        let turn_id = match events.last() {
            Some(SseEvent::ConfirmationRequested { turn_id, .. }) => turn_id.clone(),
            other => panic!("expected confirmation request, got {other:?}"),
        };

        h.event_tx
            .send(Event::ConfirmationDecision {
                turn_id,
                approve: true,
                reason: None,
            })
            .await
            .unwrap();

        collect_until(&mut h.broadcast_rx, |e| matches!(e, SseEvent::AgentDone)).await;

        let turn = assistant_turn(&h.store);
        assert_eq!(
            turn.pending_confirmation.as_ref().unwrap().status,
            ConfirmationStatus::Confirmed
        );
        assert!(turn.segments.iter().any(|s| matches!(
            &s.body,
            SegmentBody::ToolOperation { result, .. } if result == &json!({"deleted": true})
        )));
        assert_eq!(
            h.bridge.confirmations.lock().unwrap().clone(),
            vec![("conf-2".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn bridge_rejection_fails_the_turn_with_one_error() {
        let model = MockModelSession::new();
        model.queue_reply(&tool_reply("nosuch", "list_dir", "Trying a server."));
        let bridge = MockToolBridge::new();
        bridge.queue_outcome(ToolOutcome::Failed {
            kind: BridgeFailure::Rejected,
            message: "No server found with ID: nosuch".to_string(),
        });

        let mut h = spawn_runtime(model, bridge, 8);
        h.event_tx
            .send(Event::UserMessage {
                text: "use the nosuch server".to_string(),
            })
            .await
            .unwrap();

        collect_until(&mut h.broadcast_rx, |e| matches!(e, SseEvent::AgentDone)).await;

        let turn = assistant_turn(&h.store);
        let errors: Vec<&SegmentBody> = turn
            .segments
            .iter()
            .map(|s| &s.body)
            .filter(|b| matches!(b, SegmentBody::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            SegmentBody::Error { kind: FailureKind::ToolBridgeRejected, message }
                if message.contains("No server found")
        ));
        assert_eq!(
            h.store.state(CONV),
            Some(TurnState::Failed {
                kind: FailureKind::ToolBridgeRejected
            })
        );
        // No further model calls after the failure.
        assert_eq!(h.model.recorded_sends().len(), 1);
    }

    #[tokio::test]
    async fn runaway_tool_requests_hit_the_depth_cap() {
        let model = MockModelSession::new();
        for _ in 0..3 {
            model.queue_reply(&tool_reply("filesystem", "list_dir", ""));
        }
        let bridge = MockToolBridge::new();
        for _ in 0..2 {
            bridge.queue_outcome(ToolOutcome::Completed {
                result: json!({"entries": []}),
            });
        }

        let mut h = spawn_runtime(model, bridge, 2);
        h.event_tx
            .send(Event::UserMessage {
                text: "keep listing".to_string(),
            })
            .await
            .unwrap();

        collect_until(&mut h.broadcast_rx, |e| matches!(e, SseEvent::AgentDone)).await;

        assert_eq!(
            h.store.state(CONV),
            Some(TurnState::Failed {
                kind: FailureKind::DepthExceeded
            })
        );
        // Two hops ran, the third request tripped the cap.
        assert_eq!(h.bridge.recorded_executions().len(), 2);
        let turn = assistant_turn(&h.store);
        assert!(turn.segments.iter().any(|s| matches!(
            &s.body,
            SegmentBody::Error { kind: FailureKind::DepthExceeded, .. }
        )));
    }

    #[tokio::test]
    async fn model_failure_surfaces_in_the_transcript() {
        let model = MockModelSession::new();
        model.queue_error(ModelError::network("connection refused"));
        let bridge = MockToolBridge::new();

        let mut h = spawn_runtime(model, bridge, 8);
        h.event_tx
            .send(Event::UserMessage {
                text: "hello".to_string(),
            })
            .await
            .unwrap();

        collect_until(&mut h.broadcast_rx, |e| matches!(e, SseEvent::AgentDone)).await;

        assert_eq!(
            h.store.state(CONV),
            Some(TurnState::Failed {
                kind: FailureKind::ModelUnavailable
            })
        );
        let turn = assistant_turn(&h.store);
        assert!(matches!(
            &turn.segments[0].body,
            SegmentBody::Error { kind: FailureKind::ModelUnavailable, message }
                if message.contains("connection refused")
        ));
    }

    #[tokio::test]
    async fn second_message_while_busy_is_rejected() {
        let model = MockModelSession::new().with_delay(Duration::from_millis(200));
        model.queue_reply("First answer.");
        let bridge = MockToolBridge::new();

        let mut h = spawn_runtime(model, bridge, 8);
        h.event_tx
            .send(Event::UserMessage {
                text: "first".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.event_tx
            .send(Event::UserMessage {
                text: "second".to_string(),
            })
            .await
            .unwrap();

        let events =
            collect_until(&mut h.broadcast_rx, |e| matches!(e, SseEvent::AgentDone)).await;
        assert!(events.iter().any(|e| matches!(
            e,
            SseEvent::Error { message } if message.contains("busy")
        )));

        // Only the first message became a turn.
        let user_turns = h
            .store
            .saved_turns(CONV)
            .into_iter()
            .filter(|t| t.role == TurnRole::User)
            .count();
        assert_eq!(user_turns, 1);
    }

    #[tokio::test]
    async fn first_turn_of_fresh_conversation_gets_a_title() {
        let model = MockModelSession::new().with_title("Tmp File Listing");
        model.queue_reply("Happy to help.");
        let bridge = MockToolBridge::new();

        let mut h = spawn_runtime(model, bridge, 8);
        h.event_tx
            .send(Event::UserMessage {
                text: "list files in /tmp".to_string(),
            })
            .await
            .unwrap();

        collect_until(&mut h.broadcast_rx, |e| {
            matches!(e, SseEvent::TitleChanged { .. })
        })
        .await;

        assert_eq!(h.store.title(CONV), Some("Tmp File Listing".to_string()));
    }

    #[tokio::test]
    async fn suspended_conversation_resumes_after_restart() {
        // Simulate a transcript persisted before a restart: the assistant
        // turn is parked on an open confirmation.
        let mut transcript = Transcript::new();
        transcript.push_user_turn("delete /tmp/x");
        let turn_id = transcript.begin_assistant_turn();
        transcript.append_prose(&turn_id, "Deleting it.").unwrap();
        let request = crate::parser::ToolRequest {
            server_id: "filesystem".to_string(),
            tool_name: "delete_file".to_string(),
            parameters: json!({"path": "/tmp/x"}),
        };
        let pending = PendingConfirmation {
            confirmation_id: "conf-7".to_string(),
            server_id: "filesystem".to_string(),
            tool_name: "delete_file".to_string(),
            method: "tools/call".to_string(),
            risk_level: 3,
            risk_description: "destructive operation".to_string(),
            status: ConfirmationStatus::Pending,
        };
        transcript
            .open_confirmation(&turn_id, pending.clone())
            .unwrap();
        let state = TurnState::AwaitingConfirmation {
            request,
            pending,
            hops_used: 0,
        };

        let model = MockModelSession::new();
        model.queue_reply("The file is gone.");
        let bridge = MockToolBridge::new();
        bridge.queue_confirm_outcome(ToolOutcome::Completed {
            result: json!({"deleted": true}),
        });

        let mut h = spawn_runtime_with(model, bridge, 8, state, transcript);
        h.event_tx
            .send(Event::ConfirmationDecision {
                turn_id: turn_id.clone(),
                approve: true,
                reason: None,
            })
            .await
            .unwrap();

        collect_until(&mut h.broadcast_rx, |e| matches!(e, SseEvent::AgentDone)).await;

        let turn = assistant_turn(&h.store);
        assert_eq!(turn.id, turn_id);
        assert_eq!(
            turn.pending_confirmation.as_ref().unwrap().status,
            ConfirmationStatus::Confirmed
        );
        // Segments resumed on the original turn, in order.
        let ids: Vec<u64> = turn.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(h.store.state(CONV), Some(TurnState::Done));
    }

    #[tokio::test]
    async fn resolving_a_confirmation_twice_is_rejected() {
        let model = MockModelSession::new();
        model.queue_reply(&tool_reply("filesystem", "delete_file", "Deleting."));
        model.queue_reply("Cancelled then.");
        let bridge = MockToolBridge::new();
        bridge.queue_outcome(ToolOutcome::ConfirmationRequired {
            confirmation_id: "conf-3".to_string(),
            method: "tools/call".to_string(),
            risk_level: 3,
            risk_description: "destructive".to_string(),
        });

        let mut h = spawn_runtime(model, bridge, 8);
        h.event_tx
            .send(Event::UserMessage {
                text: "delete it".to_string(),
            })
            .await
            .unwrap();

        let events = collect_until(&mut h.broadcast_rx, |e| {
            matches!(e, SseEvent::ConfirmationRequested { .. })
        })
        .await;
        let turn_id = match events.last() {
            Some(SseEvent::ConfirmationRequested { turn_id, .. }) => turn_id.clone(),
            other => panic!("expected confirmation request, got {other:?}"),
        };

        h.event_tx
            .send(Event::ConfirmationDecision {
                turn_id: turn_id.clone(),
                approve: false,
                reason: None,
            })
            .await
            .unwrap();
        collect_until(&mut h.broadcast_rx, |e| matches!(e, SseEvent::AgentDone)).await;

        let segments_before = assistant_turn(&h.store).segments.len();

        // Second resolution: explicit error, no duplicate segment.
        h.event_tx
            .send(Event::ConfirmationDecision {
                turn_id,
                approve: false,
                reason: None,
            })
            .await
            .unwrap();
        collect_until(&mut h.broadcast_rx, |e| matches!(e, SseEvent::Error { .. })).await;

        assert_eq!(assistant_turn(&h.store).segments.len(), segments_before);
        assert_eq!(
            h.bridge.confirmations.lock().unwrap().len(),
            1,
            "bridge must see exactly one decision"
        );
    }
}

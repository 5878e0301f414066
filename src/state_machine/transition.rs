//! Pure state transition function
//!
//! Given the current turn state and an event, produce the next state plus
//! the effects the runtime must execute. No I/O happens here — given the
//! same inputs this function always produces the same outputs, which is what
//! makes the orchestration loop testable without a model or a bridge.

use super::{Effect, Event, TurnContext, TurnState};
use crate::bridge::{BridgeFailure, ToolOutcome};
use crate::parser;
use crate::transcript::{ConfirmationStatus, FailureKind, PendingConfirmation};
use serde_json::Value;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TurnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TurnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition. These are caller-level errors —
/// the turn state is unchanged when one is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Agent is busy, cannot accept a message until the current turn finishes")]
    AgentBusy,
    #[error("A tool confirmation is awaiting a decision; resolve it first")]
    ConfirmationPending,
    #[error("No confirmation is awaiting a decision")]
    NoConfirmationPending,
    #[error("Confirmation does not belong to turn {got}")]
    TurnMismatch { got: String },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function implementing the turn loop:
/// send → parse → (execute tool | await confirmation | finish) → feed the
/// result back → repeat, with a hard cap on tool-call hops.
pub fn transition(
    state: &TurnState,
    context: &TurnContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User input: a fresh turn pair from any resting state
        // ============================================================
        (
            TurnState::Idle | TurnState::Done | TurnState::Failed { .. },
            Event::UserMessage { text },
        ) => {
            let mut result = TransitionResult::new(TurnState::AwaitingModel { hops_used: 0 })
                .with_effect(Effect::AppendUserTurn { text: text.clone() })
                .with_effect(Effect::BeginAssistantTurn)
                .with_effect(Effect::Persist);
            if context.transcript_empty {
                result = result.with_effect(Effect::GenerateTitle { seed: text.clone() });
            }
            Ok(result.with_effect(Effect::RequestModel { input: text }))
        }

        (TurnState::AwaitingModel { .. } | TurnState::AwaitingTool { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::AgentBusy)
        }

        (TurnState::AwaitingConfirmation { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::ConfirmationPending)
        }

        // ============================================================
        // Model replies: parse, then finish or invoke the next tool
        // ============================================================
        (TurnState::AwaitingModel { hops_used }, Event::ModelReply { raw }) => {
            let parsed = parser::parse(&raw);
            match parsed.tool_request {
                None => Ok(TransitionResult::new(TurnState::Done)
                    .with_effect(Effect::AppendProse { text: parsed.prose })
                    .with_effect(Effect::Persist)
                    .with_effect(Effect::NotifyTurnEnded)),
                Some(request) => {
                    let mut result;
                    if *hops_used >= context.max_tool_hops {
                        let message = format!(
                            "Tool-call depth exceeded: {} sequential tool calls without a final reply",
                            context.max_tool_hops
                        );
                        result = TransitionResult::new(TurnState::Failed {
                            kind: FailureKind::DepthExceeded,
                        });
                        if !parsed.prose.is_empty() {
                            result = result.with_effect(Effect::AppendProse { text: parsed.prose });
                        }
                        result = result
                            .with_effect(Effect::AppendError {
                                kind: FailureKind::DepthExceeded,
                                message,
                            })
                            .with_effect(Effect::Persist)
                            .with_effect(Effect::NotifyTurnEnded);
                    } else {
                        result = TransitionResult::new(TurnState::AwaitingTool {
                            request: request.clone(),
                            hops_used: *hops_used,
                            resolution: None,
                        });
                        if !parsed.prose.is_empty() {
                            result = result.with_effect(Effect::AppendProse { text: parsed.prose });
                        }
                        result = result
                            .with_effect(Effect::Persist)
                            .with_effect(Effect::InvokeTool { request });
                    }
                    Ok(result)
                }
            }
        }

        (TurnState::AwaitingModel { .. }, Event::ModelFailed { message }) => {
            Ok(
                TransitionResult::new(TurnState::Failed {
                    kind: FailureKind::ModelUnavailable,
                })
                .with_effect(Effect::AppendError {
                    kind: FailureKind::ModelUnavailable,
                    message,
                })
                .with_effect(Effect::Persist)
                .with_effect(Effect::NotifyTurnEnded),
            )
        }

        // ============================================================
        // Tool outcomes
        // ============================================================
        (
            TurnState::AwaitingTool {
                request,
                hops_used,
                resolution,
            },
            Event::ToolFinished { outcome },
        ) => match outcome {
            ToolOutcome::Completed { result } => {
                let feedback = if is_rejection_record(&result) {
                    cancellation_feedback(&result)
                } else {
                    success_feedback(&request.tool_name, &result)
                };
                let record = match resolution {
                    Some(approve) => Effect::ResolveConfirmation {
                        approve: *approve,
                        request: request.clone(),
                        result,
                    },
                    None => Effect::AppendToolOperation {
                        request: request.clone(),
                        result,
                    },
                };
                Ok(TransitionResult::new(TurnState::AwaitingModel {
                    hops_used: hops_used + 1,
                })
                .with_effect(record)
                .with_effect(Effect::Persist)
                .with_effect(Effect::RequestModel { input: feedback }))
            }

            ToolOutcome::ConfirmationRequired {
                confirmation_id,
                method,
                risk_level,
                risk_description,
            } if resolution.is_none() => {
                let pending = PendingConfirmation {
                    confirmation_id,
                    server_id: request.server_id.clone(),
                    tool_name: request.tool_name.clone(),
                    method,
                    risk_level,
                    risk_description,
                    status: ConfirmationStatus::Pending,
                };
                Ok(TransitionResult::new(TurnState::AwaitingConfirmation {
                    request: request.clone(),
                    pending: pending.clone(),
                    hops_used: *hops_used,
                })
                .with_effect(Effect::OpenConfirmation { pending })
                .with_effect(Effect::Persist))
            }

            // The bridge must never gate an already-decided call again.
            ToolOutcome::ConfirmationRequired { .. } => {
                Ok(failed_turn(
                    FailureKind::ToolBridgeRejected,
                    "Bridge requested confirmation for an already-decided operation".to_string(),
                ))
            }

            ToolOutcome::Failed { kind, message } => {
                let kind = match kind {
                    BridgeFailure::Transport => FailureKind::ToolTransportFailure,
                    BridgeFailure::Rejected => FailureKind::ToolBridgeRejected,
                };
                Ok(failed_turn(kind, message))
            }
        },

        // ============================================================
        // Confirmation decisions
        // ============================================================
        (
            TurnState::AwaitingConfirmation {
                request,
                pending,
                hops_used,
            },
            Event::ConfirmationDecision {
                turn_id,
                approve,
                reason,
            },
        ) => {
            if context.active_turn.as_deref() != Some(turn_id.as_str()) {
                return Err(TransitionError::TurnMismatch { got: turn_id });
            }
            let reason = reason.unwrap_or_else(|| "User rejected the operation".to_string());
            Ok(TransitionResult::new(TurnState::AwaitingTool {
                request: request.clone(),
                hops_used: *hops_used,
                resolution: Some(approve),
            })
            .with_effect(Effect::SubmitConfirmation {
                confirmation_id: pending.confirmation_id.clone(),
                approve,
                reason,
            }))
        }

        // Resolving twice (or with nothing pending) never duplicates a
        // segment — it is an explicit error.
        (_, Event::ConfirmationDecision { .. }) => Err(TransitionError::NoConfirmationPending),

        // ============================================================
        // Everything else
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {state:?} with event {event:?}"
        ))),
    }
}

/// One error segment, then terminal `Failed` — the user always sees what
/// failed and why.
fn failed_turn(kind: FailureKind, message: String) -> TransitionResult {
    TransitionResult::new(TurnState::Failed { kind })
        .with_effect(Effect::AppendError { kind, message })
        .with_effect(Effect::Persist)
        .with_effect(Effect::NotifyTurnEnded)
}

/// A rejected confirmation comes back as a completed outcome whose result
/// records the cancellation.
fn is_rejection_record(result: &Value) -> bool {
    result.get("status").and_then(Value::as_str) == Some("rejected")
}

fn success_feedback(tool_name: &str, result: &Value) -> String {
    let rendered = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
    format!("The tool {tool_name} was executed successfully. Result: {rendered}")
}

fn cancellation_feedback(result: &Value) -> String {
    let message = result
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("No reason provided");
    format!("The operation was cancelled by the user: {message}")
}

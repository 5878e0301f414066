//! Conversation transcript types
//!
//! A conversation is an ordered list of turns; an assistant turn is an
//! ordered list of segments (prose, tool operations, errors). Segment order
//! is the ground truth for "what happened when" — ids are a per-turn
//! monotonic counter, never wall-clock time, since several segments can be
//! produced within the same instant. All operations are append/replace-only.

use crate::parser::ToolRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("Unknown turn: {0}")]
    UnknownTurn(String),
    #[error("Turn {0} already has an open confirmation")]
    ConfirmationAlreadyOpen(String),
    #[error("Turn {0} has no open confirmation")]
    NoOpenConfirmation(String),
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// Terminal failure classification, surfaced to the user inside the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ModelUnavailable,
    ToolTransportFailure,
    ToolBridgeRejected,
    DepthExceeded,
}

/// One atomic unit of a turn's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u64,
    #[serde(flatten)]
    pub body: SegmentBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentBody {
    Prose {
        text: String,
    },
    /// One completed (or completed-after-confirmation) tool invocation,
    /// holding both the request and the literal bridge result.
    ToolOperation {
        server_id: String,
        tool_name: String,
        parameters: Value,
        result: Value,
    },
    Error {
        kind: FailureKind,
        message: String,
    },
}

/// Decision state of a gated tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Rejected,
}

/// A gated tool call awaiting a human decision, attached to its turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    /// Opaque token issued by the tool bridge.
    pub confirmation_id: String,
    pub server_id: String,
    pub tool_name: String,
    pub method: String,
    /// Ordinal; higher is more dangerous.
    pub risk_level: u8,
    pub risk_description: String,
    pub status: ConfirmationStatus,
}

/// One request/response exchange. Segments may be appended while the loop
/// that produces the turn is active; the turn is immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: TurnRole,
    pub segments: Vec<Segment>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_confirmation: Option<PendingConfirmation>,
}

impl Turn {
    pub fn new(role: TurnRole) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            segments: Vec::new(),
            created_at: Utc::now(),
            pending_confirmation: None,
        }
    }

    /// Next id in the per-turn counter. Append-only segments make the last
    /// id the high-water mark.
    fn next_segment_id(&self) -> u64 {
        self.segments.last().map_or(0, |s| s.id + 1)
    }

    fn append(&mut self, body: SegmentBody) -> &Segment {
        let segment = Segment {
            id: self.next_segment_id(),
            body,
        };
        self.segments.push(segment);
        self.segments.last().expect("just pushed")
    }

    /// True while a gated tool call awaits a decision.
    pub fn has_open_confirmation(&self) -> bool {
        self.pending_confirmation
            .as_ref()
            .is_some_and(|p| p.status == ConfirmationStatus::Pending)
    }
}

/// The ordered sequence of turns composing one conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turn(&self, turn_id: &str) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == turn_id)
    }

    fn turn_mut(&mut self, turn_id: &str) -> Result<&mut Turn, TranscriptError> {
        self.turns
            .iter_mut()
            .find(|t| t.id == turn_id)
            .ok_or_else(|| TranscriptError::UnknownTurn(turn_id.to_string()))
    }

    /// Append a user turn carrying one prose segment. Returns the turn id.
    pub fn push_user_turn(&mut self, text: &str) -> String {
        let mut turn = Turn::new(TurnRole::User);
        turn.append(SegmentBody::Prose {
            text: text.to_string(),
        });
        let id = turn.id.clone();
        self.turns.push(turn);
        id
    }

    /// Open an empty assistant turn for the loop to append into. Returns the
    /// turn id.
    pub fn begin_assistant_turn(&mut self) -> String {
        let turn = Turn::new(TurnRole::Assistant);
        let id = turn.id.clone();
        self.turns.push(turn);
        id
    }

    pub fn append_prose(&mut self, turn_id: &str, text: &str) -> Result<u64, TranscriptError> {
        let turn = self.turn_mut(turn_id)?;
        let segment = turn.append(SegmentBody::Prose {
            text: text.to_string(),
        });
        Ok(segment.id)
    }

    pub fn append_tool_operation(
        &mut self,
        turn_id: &str,
        request: &ToolRequest,
        result: Value,
    ) -> Result<u64, TranscriptError> {
        let turn = self.turn_mut(turn_id)?;
        let segment = turn.append(SegmentBody::ToolOperation {
            server_id: request.server_id.clone(),
            tool_name: request.tool_name.clone(),
            parameters: request.parameters.clone(),
            result,
        });
        Ok(segment.id)
    }

    pub fn append_error(
        &mut self,
        turn_id: &str,
        kind: FailureKind,
        message: &str,
    ) -> Result<u64, TranscriptError> {
        let turn = self.turn_mut(turn_id)?;
        let segment = turn.append(SegmentBody::Error {
            kind,
            message: message.to_string(),
        });
        Ok(segment.id)
    }

    /// Attach a pending confirmation to a turn. A turn cannot accept a new
    /// one until the current one resolves.
    pub fn open_confirmation(
        &mut self,
        turn_id: &str,
        pending: PendingConfirmation,
    ) -> Result<(), TranscriptError> {
        let turn = self.turn_mut(turn_id)?;
        if turn.has_open_confirmation() {
            return Err(TranscriptError::ConfirmationAlreadyOpen(
                turn_id.to_string(),
            ));
        }
        turn.pending_confirmation = Some(pending);
        Ok(())
    }

    /// Record the user's decision: mark the confirmation, then append the
    /// resulting tool operation segment. Resolving twice is an error — the
    /// first resolution consumed the pending state.
    pub fn resolve_confirmation(
        &mut self,
        turn_id: &str,
        approved: bool,
        request: &ToolRequest,
        result: Value,
    ) -> Result<u64, TranscriptError> {
        let turn = self.turn_mut(turn_id)?;
        if !turn.has_open_confirmation() {
            return Err(TranscriptError::NoOpenConfirmation(turn_id.to_string()));
        }
        if let Some(pending) = turn.pending_confirmation.as_mut() {
            pending.status = if approved {
                ConfirmationStatus::Confirmed
            } else {
                ConfirmationStatus::Rejected
            };
        }
        let segment = turn.append(SegmentBody::ToolOperation {
            server_id: request.server_id.clone(),
            tool_name: request.tool_name.clone(),
            parameters: request.parameters.clone(),
            result,
        });
        Ok(segment.id)
    }
}

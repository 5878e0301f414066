//! Turn state types

use crate::parser::ToolRequest;
use crate::transcript::{FailureKind, PendingConfirmation};
use serde::{Deserialize, Serialize};

/// Where the loop for the active user turn currently stands.
///
/// The state is serialized into the conversation row after every transition,
/// so a turn suspended at `AwaitingConfirmation` survives a process restart:
/// the persisted payload is exactly the originating request plus the pending
/// confirmation, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnState {
    /// Ready for user input, no turn in flight.
    #[default]
    Idle,

    /// Model request in flight. `hops_used` counts completed tool calls
    /// within this turn.
    AwaitingModel { hops_used: u32 },

    /// Tool invocation in flight against the bridge.
    AwaitingTool {
        request: ToolRequest,
        hops_used: u32,
        /// `Some(approve)` when this invocation resumes a confirmation that
        /// the user just decided; `None` for a direct invocation.
        resolution: Option<bool>,
    },

    /// Suspended on a risk gate. No model or tool call happens until an
    /// external actor submits a decision.
    AwaitingConfirmation {
        request: ToolRequest,
        pending: PendingConfirmation,
        hops_used: u32,
    },

    /// The model produced a reply with no further tool request.
    Done,

    /// The turn ended on an unrecoverable error. The conversation remains
    /// usable; a new user message starts a fresh turn.
    Failed { kind: FailureKind },
}

impl TurnState {
    /// True while the loop is actively driving model or tool calls.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            TurnState::AwaitingModel { .. } | TurnState::AwaitingTool { .. }
        )
    }

    /// True when the turn is suspended waiting on a human decision.
    pub fn is_suspended(&self) -> bool {
        matches!(self, TurnState::AwaitingConfirmation { .. })
    }
}

/// Context for a single transition, assembled by the runtime.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub conversation_id: String,
    /// Hard cap on tool-call hops per user turn.
    pub max_tool_hops: u32,
    /// True when the conversation has no turns yet; the first user message
    /// then also kicks off title generation.
    pub transcript_empty: bool,
    /// The assistant turn currently receiving segments, if any.
    pub active_turn: Option<String>,
}

/// Default cap on sequential tool-call hops within one user turn.
pub const DEFAULT_MAX_TOOL_HOPS: u32 = 24;

//! Effects produced by state transitions

use crate::parser::ToolRequest;
use crate::transcript::{FailureKind, PendingConfirmation};
use serde_json::Value;

/// Effects to be executed after a state transition. The runtime applies them
/// strictly in order, so segment appends land in the order the state machine
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append a user turn carrying the submitted text.
    AppendUserTurn { text: String },

    /// Open the assistant turn that the rest of the loop appends into.
    BeginAssistantTurn,

    /// Append a prose segment to the active turn.
    AppendProse { text: String },

    /// Append a completed tool operation to the active turn.
    AppendToolOperation { request: ToolRequest, result: Value },

    /// Append an error segment to the active turn.
    AppendError { kind: FailureKind, message: String },

    /// Attach a pending confirmation to the active turn.
    OpenConfirmation { pending: PendingConfirmation },

    /// Clear the pending confirmation and append the resulting operation.
    ResolveConfirmation {
        approve: bool,
        request: ToolRequest,
        result: Value,
    },

    /// Persist the transcript and state (best effort, write-after-mutation).
    Persist,

    /// Send the given input to the model and await a reply.
    RequestModel { input: String },

    /// Execute a tool against the bridge.
    InvokeTool { request: ToolRequest },

    /// Submit the user's decision for a gated call to the bridge.
    SubmitConfirmation {
        confirmation_id: String,
        approve: bool,
        reason: String,
    },

    /// Ask the model for a conversation title (detached, best effort).
    GenerateTitle { seed: String },

    /// Tell clients the turn reached a terminal state.
    NotifyTurnEnded,
}

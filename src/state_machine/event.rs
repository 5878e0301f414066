//! Events that drive turn transitions

use crate::bridge::ToolOutcome;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
    },
    /// External actor decided a pending confirmation.
    ConfirmationDecision {
        turn_id: String,
        approve: bool,
        reason: Option<String>,
    },

    // Model events
    ModelReply {
        raw: String,
    },
    ModelFailed {
        message: String,
    },

    // Bridge events
    ToolFinished {
        outcome: ToolOutcome,
    },
}

//! Turn orchestration state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions: the
//! runtime feeds events in and receives a new state plus a list of effects,
//! performing all I/O itself. The transition function never touches the
//! network or the transcript directly.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

pub use effect::Effect;
pub use event::Event;
pub use state::{TurnContext, TurnState};
pub use transition::{transition, TransitionError};

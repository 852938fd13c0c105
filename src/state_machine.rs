//! Session state store
//!
//! Canonical conversation, citation and session state with pure
//! transitions. Only the streaming controller applies actions.

pub mod action;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use action::{Action, NewTurn, TurnPatch};
pub use state::{SessionState, Source, Status, Turn};
pub use transition::transition;

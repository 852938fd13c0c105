//! Streaming controller runtime
//!
//! The controller owns the session state and is its only writer. Callers
//! talk to it through a [`ControllerHandle`] and observe state snapshots
//! through a watch channel.

mod controller;

#[cfg(test)]
pub mod testing;

pub use controller::StreamingController;

use crate::state_machine::SessionState;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("question cannot be empty")]
    EmptyQuestion,
    #[error("controller has stopped")]
    Stopped,
}

/// Requests handled by the controller loop
#[derive(Debug)]
pub(crate) enum Command {
    Ask { question: String, reset_first: bool },
    Cancel,
    Reset,
    ToggleSource { name: String, expanded: Option<bool> },
}

/// Command plus the acknowledgement sent once it has been applied
pub(crate) type Envelope = (Command, oneshot::Sender<()>);

/// Handle to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Envelope>,
    state_rx: watch::Receiver<SessionState>,
}

impl ControllerHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Envelope>,
        state_rx: watch::Receiver<SessionState>,
    ) -> Self {
        Self { commands, state_rx }
    }

    async fn send(&self, command: Command) -> Result<(), ControllerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send((command, ack_tx))
            .await
            .map_err(|_| ControllerError::Stopped)?;
        ack_rx.await.map_err(|_| ControllerError::Stopped)
    }

    /// Ask a follow-up question in the current session.
    ///
    /// Returns once the question is in the conversation and streaming has
    /// started; a stream already in flight is cancelled first.
    pub async fn ask(&self, question: impl Into<String>) -> Result<(), ControllerError> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(ControllerError::EmptyQuestion);
        }
        self.send(Command::Ask {
            question,
            reset_first: false,
        })
        .await
    }

    /// New top-level search: reset the session, then ask
    pub async fn search(&self, question: impl Into<String>) -> Result<(), ControllerError> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(ControllerError::EmptyQuestion);
        }
        self.send(Command::Ask {
            question,
            reset_first: true,
        })
        .await
    }

    pub async fn cancel(&self) -> Result<(), ControllerError> {
        self.send(Command::Cancel).await
    }

    pub async fn reset(&self) -> Result<(), ControllerError> {
        self.send(Command::Reset).await
    }

    pub async fn toggle_source(
        &self,
        name: impl Into<String>,
        expanded: Option<bool>,
    ) -> Result<(), ControllerError> {
        self.send(Command::ToggleSource {
            name: name.into(),
            expanded,
        })
        .await
    }

    /// Latest snapshot
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Wait until no stream is in flight
    pub async fn settled(&self) -> Result<SessionState, ControllerError> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|s| !s.status.is_streaming())
            .await
            .map_err(|_| ControllerError::Stopped)?;
        Ok(state.clone())
    }
}

//! Streaming controller
//!
//! Drives `Idle -> Streaming -> {Done, Error}`: opens the answer stream,
//! applies decoded events to the session state, retries retriable
//! connection failures and resolves cancellation.
//!
//! Every connection carries a generation number. Cancelling, superseding
//! or reconnecting bumps the current generation, and messages from any
//! other generation are dropped before they reach the state.

use super::{Command, ControllerHandle, Envelope};
use crate::config::ClientConfig;
use crate::history::{HistoryManager, KeyValueStore};
use crate::protocol::{decode_stream, ContextEntry, StreamEvent};
use crate::state_machine::{transition, Action, NewTurn, SessionState, Status, TurnPatch};
use crate::transport::{AskRequest, AskTransport, StreamError};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub const NARRATION_START: &str = "Searching for relevant sources...";
pub const NARRATION_DONE: &str = "Answer complete.";
pub const FALLBACK_ERROR: &str =
    "Sorry, I could not find an answer this time. Please try again later.";

fn narrate_sources(count: usize) -> String {
    match count {
        1 => "Found 1 source.".to_string(),
        n => format!("Found {n} sources."),
    }
}

fn narrate_retry(attempt: u32, max_attempts: u32) -> String {
    format!("Connection problem, retrying (attempt {attempt} of {max_attempts})...")
}

/// Message from a connection task
#[derive(Debug)]
pub(crate) struct Inbound {
    generation: u64,
    message: StreamMessage,
}

#[derive(Debug)]
enum StreamMessage {
    Opened,
    Event(StreamEvent),
    Failed(StreamError),
    /// Body ended without a terminal event
    Closed,
}

/// The question currently being answered
#[derive(Debug)]
struct Attempt {
    generation: u64,
    /// Assistant turn receiving the answer
    turn_id: u64,
    /// Connection number, 1-based
    number: u32,
    request: AskRequest,
    cancel: CancellationToken,
    saw_source: bool,
    saw_source_list: bool,
}

/// Single writer of [`SessionState`]
pub struct StreamingController<T: AskTransport + 'static> {
    config: ClientConfig,
    transport: Arc<T>,
    history: HistoryManager,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    command_rx: mpsc::Receiver<Envelope>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
    generation: u64,
    active: Option<Attempt>,
}

impl<T: AskTransport + 'static> StreamingController<T> {
    /// Build a controller with its history loaded from `store`
    pub fn new(
        config: ClientConfig,
        transport: T,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> (Self, ControllerHandle) {
        let history = HistoryManager::new(store, config.history_limit);
        let state = SessionState::with_history(history.load());

        let (state_tx, state_rx) = watch::channel(state.clone());
        let (command_tx, command_rx) = mpsc::channel(32);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let controller = Self {
            config,
            transport: Arc::new(transport),
            history,
            state,
            state_tx,
            command_rx,
            inbound_tx,
            inbound_rx,
            generation: 0,
            active: None,
        };
        (controller, ControllerHandle::new(command_tx, state_rx))
    }

    /// Build a controller and run it on the tokio runtime
    pub fn spawn(
        config: ClientConfig,
        transport: T,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> ControllerHandle {
        let (controller, handle) = Self::new(config, transport, store);
        tokio::spawn(controller.run());
        handle
    }

    /// Process commands and stream messages until every handle is dropped
    pub async fn run(mut self) {
        tracing::info!(
            max_attempts = self.config.max_attempts,
            "Starting streaming controller"
        );

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some((command, ack)) => {
                        self.handle_command(command);
                        self.publish();
                        let _ = ack.send(());
                    }
                    None => break,
                },
                Some(inbound) = self.inbound_rx.recv() => {
                    self.handle_inbound(inbound);
                    self.publish();
                }
            }
        }

        self.abandon_active();
        tracing::info!("Streaming controller stopped");
    }

    fn apply(&mut self, action: Action) {
        let state = std::mem::take(&mut self.state);
        self.state = transition(state, action);
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    fn narrate(&mut self, message: impl Into<String>) {
        self.apply(Action::AddStatusMessage(message.into()));
    }

    // ============================================================
    // Commands
    // ============================================================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Ask {
                question,
                reset_first,
            } => self.submit(&question, reset_first),
            Command::Cancel => self.cancel_active(),
            Command::Reset => {
                self.abandon_active();
                self.apply(Action::Reset);
                tracing::info!("Session reset");
            }
            Command::ToggleSource { name, expanded } => {
                self.apply(Action::SourceToggle { name, expanded });
            }
        }
    }

    fn submit(&mut self, question: &str, reset_first: bool) {
        let question = question.trim();
        if question.is_empty() {
            return;
        }

        if self.state.status.is_streaming() {
            tracing::info!("New question while streaming, cancelling current answer");
            self.cancel_active();
        }
        if reset_first {
            self.abandon_active();
            self.apply(Action::Reset);
        }

        if let Some(history) = self.history.record(&self.state.history, question) {
            self.apply(Action::SetHistory(history));
        }

        self.apply(Action::AddMessage(NewTurn::human(question)));
        let turn_id = self.state.next_turn_id();
        self.apply(Action::AddMessage(NewTurn::assistant()));

        let request = AskRequest::new(question)
            .with_session(self.state.session_id.clone())
            .with_top_k(self.config.top_k);

        self.apply(Action::ResetStatusMessages);
        self.apply(Action::SetError(None));
        self.apply(Action::SetStatus(Status::Streaming));
        self.narrate(NARRATION_START);

        self.generation += 1;
        let attempt = Attempt {
            generation: self.generation,
            turn_id,
            number: 1,
            request,
            cancel: CancellationToken::new(),
            saw_source: false,
            saw_source_list: false,
        };
        tracing::info!(
            generation = attempt.generation,
            turn_id,
            session_id = ?attempt.request.session_id,
            "Question submitted"
        );
        self.connect(&attempt, None);
        self.active = Some(attempt);
    }

    /// Stop the active stream and settle the state.
    ///
    /// A blank answer turn is removed; the status becomes `Done`, or
    /// `Idle` when nothing is left in the conversation.
    fn cancel_active(&mut self) {
        let Some(attempt) = self.active.take() else {
            return;
        };
        attempt.cancel.cancel();
        self.generation += 1;

        let blank = self.state.turn(attempt.turn_id).is_some_and(|t| t.is_blank());
        if blank {
            self.apply(Action::RemoveMessage { id: attempt.turn_id });
        } else {
            self.apply(Action::UpdateMessage {
                id: attempt.turn_id,
                patch: TurnPatch::loading(false),
            });
        }

        let status = if self.state.conversation.is_empty() {
            Status::Idle
        } else {
            Status::Done
        };
        self.apply(Action::SetStatus(status));
        self.apply(Action::ResetStatusMessages);

        tracing::info!(
            generation = attempt.generation,
            removed_turn = blank,
            status = status.display_name(),
            "Answer stream cancelled"
        );
    }

    /// Drop the active stream without touching the state
    fn abandon_active(&mut self) {
        if let Some(attempt) = self.active.take() {
            attempt.cancel.cancel();
            self.generation += 1;
        }
    }

    // ============================================================
    // Connections
    // ============================================================

    fn connect(&self, attempt: &Attempt, delay: Option<Duration>) {
        tokio::spawn(run_connection(
            Arc::clone(&self.transport),
            attempt.request.clone(),
            attempt.generation,
            delay,
            attempt.cancel.clone(),
            self.inbound_tx.clone(),
        ));
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        let current = self.active.as_ref().map(|a| a.generation);
        if current != Some(inbound.generation) {
            tracing::debug!(
                generation = inbound.generation,
                current = ?current,
                "Discarding message from stale stream"
            );
            return;
        }

        match inbound.message {
            StreamMessage::Opened => {
                tracing::debug!(generation = inbound.generation, "Answer stream opened");
            }
            StreamMessage::Event(event) => self.apply_event(event),
            StreamMessage::Failed(error) => self.handle_failure(error),
            StreamMessage::Closed => self.handle_closed(),
        }
    }

    fn apply_event(&mut self, event: StreamEvent) {
        let Some(turn_id) = self.active.as_ref().map(|a| a.turn_id) else {
            return;
        };
        tracing::trace!(kind = event.kind(), "Applying stream event");

        match event {
            StreamEvent::SessionId(session_id) => {
                self.apply(Action::SetSessionId(Some(session_id)));
            }
            StreamEvent::Source(source) => {
                if let Some(attempt) = self.active.as_mut() {
                    attempt.saw_source = true;
                }
                self.apply(Action::AddSource(source));
            }
            StreamEvent::Status(message) => self.narrate(message),
            StreamEvent::SourceList(names) => {
                if let Some(attempt) = self.active.as_mut() {
                    attempt.saw_source_list = true;
                }
                let count = names.len();
                self.apply(Action::SetMessageSource { id: turn_id, names });
                self.narrate(narrate_sources(count));
            }
            StreamEvent::Contexts(entries) => self.apply_contexts(turn_id, &entries),
            StreamEvent::Chunk(text) => self.apply(Action::UpdateMessage {
                id: turn_id,
                patch: TurnPatch::append(text),
            }),
            StreamEvent::AnswerHtml(html) => self.apply(Action::UpdateMessage {
                id: turn_id,
                patch: TurnPatch::html(html),
            }),
            StreamEvent::Done => self.complete(),
            StreamEvent::Error(message) => {
                self.fail(&StreamError::backend(message.unwrap_or_default()));
            }
            StreamEvent::Unknown { event_type, text } => {
                tracing::debug!(event_type = %event_type, "Unrecognized event shown as narration");
                self.narrate(text);
            }
        }
    }

    /// Sources from `contexts` when the stream sent no `source` events
    fn apply_contexts(&mut self, turn_id: u64, entries: &[ContextEntry]) {
        let Some(attempt) = self.active.as_ref() else {
            return;
        };
        if attempt.saw_source || entries.is_empty() {
            return;
        }
        let attach = !attempt.saw_source_list;

        let mut names: Vec<String> = Vec::with_capacity(entries.len());
        for entry in entries {
            let source = entry.to_source();
            if !names.contains(&source.name) {
                names.push(source.name.clone());
            }
            self.apply(Action::AddSource(source));
        }
        tracing::debug!(count = names.len(), "Derived sources from contexts");

        let has_sources = self.state.turn(turn_id).is_some_and(|t| !t.sources.is_empty());
        if attach && !has_sources {
            let count = names.len();
            self.apply(Action::SetMessageSource { id: turn_id, names });
            self.narrate(narrate_sources(count));
        }
    }

    fn complete(&mut self) {
        let Some(attempt) = self.active.take() else {
            return;
        };
        attempt.cancel.cancel();

        self.apply(Action::UpdateMessage {
            id: attempt.turn_id,
            patch: TurnPatch::loading(false),
        });
        self.narrate(NARRATION_DONE);
        self.apply(Action::SetStatus(Status::Done));

        tracing::info!(
            generation = attempt.generation,
            attempts = attempt.number,
            answer_len = self.state.turn(attempt.turn_id).map_or(0, |t| t.content.len()),
            "Answer complete"
        );
    }

    fn handle_failure(&mut self, error: StreamError) {
        let max_attempts = self.config.max_attempts;
        let Some(attempt) = self.active.as_mut() else {
            return;
        };

        if !error.is_retryable() || attempt.number >= max_attempts {
            self.fail(&error);
            return;
        }

        attempt.cancel.cancel();
        self.generation += 1;
        attempt.generation = self.generation;
        attempt.number += 1;
        attempt.cancel = CancellationToken::new();
        attempt.saw_source = false;
        attempt.saw_source_list = false;
        attempt.request.session_id = self.state.session_id.clone();

        let number = attempt.number;
        let turn_id = attempt.turn_id;
        let delay = self.config.retry_delay(number);
        tracing::warn!(
            error = %error,
            retryable = true,
            attempt = number,
            max_attempts,
            delay_ms = %delay.as_millis(),
            "Answer stream failed, retrying"
        );

        self.apply(Action::UpdateMessage {
            id: turn_id,
            patch: TurnPatch::cleared(),
        });
        self.narrate(narrate_retry(number, max_attempts));

        if let Some(attempt) = self.active.as_ref() {
            self.connect(attempt, Some(delay));
        }
    }

    fn handle_closed(&mut self) {
        let Some(turn_id) = self.active.as_ref().map(|a| a.turn_id) else {
            return;
        };
        let has_answer = self.state.turn(turn_id).is_some_and(|t| !t.is_blank());

        if has_answer {
            tracing::warn!("Answer stream closed without a done marker, keeping the answer");
            self.complete();
        } else {
            self.handle_failure(StreamError::network(
                "Stream closed before the answer completed",
            ));
        }
    }

    /// Terminal failure: no further retries
    fn fail(&mut self, error: &StreamError) {
        let Some(attempt) = self.active.take() else {
            return;
        };
        attempt.cancel.cancel();

        let message = error.user_message().unwrap_or(FALLBACK_ERROR).to_string();
        tracing::error!(
            error = %error,
            kind = ?error.kind,
            status = ?error.status,
            attempts = attempt.number,
            "Answer stream failed"
        );

        self.apply(Action::UpdateMessage {
            id: attempt.turn_id,
            patch: TurnPatch::loading(false),
        });
        self.apply(Action::SetError(Some(message.clone())));
        self.narrate(message);
        self.apply(Action::SetStatus(Status::Error));
    }
}

/// One connection: open, decode, forward until done, failed or cancelled
async fn run_connection<T: AskTransport + 'static>(
    transport: Arc<T>,
    request: AskRequest,
    generation: u64,
    delay: Option<Duration>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Inbound>,
) {
    if let Some(delay) = delay {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }

    let opened = tokio::select! {
        () = cancel.cancelled() => return,
        result = transport.open(&request) => result,
    };

    let body = match opened {
        Ok(body) => body,
        Err(error) => {
            let _ = tx
                .send(Inbound {
                    generation,
                    message: StreamMessage::Failed(error),
                })
                .await;
            return;
        }
    };

    if tx
        .send(Inbound {
            generation,
            message: StreamMessage::Opened,
        })
        .await
        .is_err()
    {
        return;
    }

    let mut events = decode_stream(body);
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return,
            next = events.next() => next,
        };

        let message = match next {
            Some(Ok(event)) => StreamMessage::Event(event),
            Some(Err(error)) => StreamMessage::Failed(error),
            None => StreamMessage::Closed,
        };
        let last = !matches!(
            message,
            StreamMessage::Event(ref event)
                if !matches!(event, StreamEvent::Done | StreamEvent::Error(_))
        );

        if tx.send(Inbound { generation, message }).await.is_err() || last {
            return;
        }
    }
}

//! GPTLov client
//!
//! Streaming session controller for the GPTLov retrieval-augmented answer
//! service: decodes the event stream, reconciles it into session state,
//! and keeps a bounded question history.

pub mod config;
pub mod history;
pub mod protocol;
pub mod runtime;
pub mod state_machine;
pub mod transport;

pub use config::ClientConfig;
pub use history::{HistoryManager, KeyValueStore, MemoryStore, SqliteStore};
pub use protocol::{EventStream, StreamEvent};
pub use runtime::{ControllerError, ControllerHandle, StreamingController};
pub use state_machine::{SessionState, Source, Status, Turn};
pub use transport::{AskRequest, AskTransport, HttpTransport, StreamError, StreamErrorKind};

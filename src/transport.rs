//! Connection to the answer service
//!
//! Opens the chunked answer stream and classifies connection failures.

mod error;
mod http;

pub use error::{StreamError, StreamErrorKind};
pub use http::HttpTransport;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use std::sync::Arc;

/// Raw body chunks as they come off the wire
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StreamError>>;

/// Body of an ask request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Sent as the `session_id` query parameter, not in the body
    #[serde(skip)]
    pub session_id: Option<String>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: None,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_top_k(mut self, top_k: Option<u32>) -> Self {
        self.top_k = top_k;
        self
    }
}

/// Opens answer streams
///
/// `open` resolves once response headers are in: a non-2xx status is
/// returned as a classified [`StreamError`], otherwise the body stream.
#[async_trait]
pub trait AskTransport: Send + Sync {
    async fn open(&self, request: &AskRequest) -> Result<ByteStream, StreamError>;
}

#[async_trait]
impl<T: AskTransport + ?Sized> AskTransport for Arc<T> {
    async fn open(&self, request: &AskRequest) -> Result<ByteStream, StreamError> {
        (**self).open(request).await
    }
}

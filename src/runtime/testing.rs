//! Mock implementations for testing
//!
//! These mocks enable controller testing without real I/O.

use crate::transport::{AskRequest, AskTransport, ByteStream, StreamError};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Scripted connection outcome
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Non-2xx connection-open status
    Status(u16),
    /// Non-2xx status with a response body
    StatusBody(u16, String),
    /// Connection never opened
    NetworkError(String),
    /// 2xx body delivered as these network reads
    Body {
        chunks: Vec<String>,
        /// Keep the connection open after the last chunk
        hold_open: bool,
    },
}

impl MockResponse {
    pub fn body<S: Into<String>>(chunks: impl IntoIterator<Item = S>) -> Self {
        Self::Body {
            chunks: chunks.into_iter().map(Into::into).collect(),
            hold_open: false,
        }
    }

    pub fn held_open<S: Into<String>>(chunks: impl IntoIterator<Item = S>) -> Self {
        Self::Body {
            chunks: chunks.into_iter().map(Into::into).collect(),
            hold_open: true,
        }
    }
}

/// Format one record the way the backend writes it
pub fn record(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// Transport that replays queued responses in order
#[allow(dead_code)]
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<AskRequest>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responses(responses: impl IntoIterator<Item = MockResponse>) -> Self {
        let transport = Self::new();
        for response in responses {
            transport.queue(response);
        }
        transport
    }

    pub fn queue(&self, response: MockResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn recorded_requests(&self) -> Vec<AskRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AskTransport for MockTransport {
    async fn open(&self, request: &AskRequest) -> Result<ByteStream, StreamError> {
        self.requests.lock().unwrap().push(request.clone());
        let response = self.responses.lock().unwrap().pop_front();

        match response {
            Some(MockResponse::Status(status)) => Err(StreamError::from_status(status, "")),
            Some(MockResponse::StatusBody(status, body)) => {
                Err(StreamError::from_status(status, &body))
            }
            Some(MockResponse::NetworkError(message)) => Err(StreamError::network(message)),
            Some(MockResponse::Body { chunks, hold_open }) => {
                let reads = futures::stream::iter(
                    chunks
                        .into_iter()
                        .map(|chunk| Ok::<_, StreamError>(chunk.into_bytes())),
                );
                if hold_open {
                    Ok(reads.chain(futures::stream::pending()).boxed())
                } else {
                    Ok(reads.boxed())
                }
            }
            None => Err(StreamError::network("No mock response queued")),
        }
    }
}

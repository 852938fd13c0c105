//! Record framing and the event stream adapter

use super::event::StreamEvent;
use super::{legacy, DecodeError};
use crate::transport::{ByteStream, StreamError};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;

/// Decoded events of one response body
pub type EventStream = BoxStream<'static, Result<StreamEvent, StreamError>>;

/// One blank-line delimited record before typing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    /// Value of the `event:` field
    pub event: Option<String>,
    /// `data:` lines joined with newlines, or the bare lines when there were none
    pub data: String,
}

impl RawRecord {
    /// Parse the lines of one record; `None` when it holds nothing
    pub fn parse(text: &str) -> Option<Self> {
        let mut event = None;
        let mut data: Vec<&str> = Vec::new();
        let mut bare: Vec<&str> = Vec::new();

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            match line.split_once(':') {
                Some((field, value)) if matches!(field, "event" | "data" | "id" | "retry") => {
                    let value = value.strip_prefix(' ').unwrap_or(value);
                    match field {
                        "event" => event = Some(value.trim().to_string()).filter(|v| !v.is_empty()),
                        "data" => data.push(value),
                        _ => {}
                    }
                }
                _ => bare.push(line),
            }
        }

        let data = if data.is_empty() { bare.join("\n") } else { data.join("\n") };
        if event.is_none() && data.trim().is_empty() {
            return None;
        }
        Some(Self { event, data })
    }

    /// Resolve the record type and payload into a typed event
    pub fn decode(self) -> Result<Option<StreamEvent>, DecodeError> {
        let (event_type, payload, text) = match self.event {
            Some(event) => (event.to_ascii_lowercase(), parse_payload(&self.data), self.data),
            None => match legacy::parse_tagged(&self.data) {
                Some(tagged) => (tagged.tag, tagged.payload, tagged.text),
                None if self.data.is_empty() => return Ok(None),
                None => ("chunk".to_string(), parse_payload(&self.data), self.data),
            },
        };
        StreamEvent::from_record(&event_type, payload, &text)
    }
}

/// JSON when it parses, the raw text otherwise.
///
/// Bare numbers stay text so a chunk like ` 2024` keeps its leading space.
fn parse_payload(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match serde_json::from_str(raw) {
        Ok(Value::Number(_)) | Err(_) => Value::String(raw.to_string()),
        Ok(value) => value,
    }
}

/// Incremental framer over network reads
///
/// Works on bytes so a multi-byte character split between reads is only
/// decoded once its record is complete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read, returning every record it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawRecord> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some((end, next)) = find_separator(&self.buffer) {
            let rest = self.buffer.split_off(next);
            let mut block = std::mem::replace(&mut self.buffer, rest);
            block.truncate(end);
            if let Some(record) = RawRecord::parse(&String::from_utf8_lossy(&block)) {
                records.push(record);
            }
        }
        records
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> Option<RawRecord> {
        let block = std::mem::take(&mut self.buffer);
        RawRecord::parse(&String::from_utf8_lossy(&block))
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Locate a blank line: `(end of record, start of the next one)`
fn find_separator(buffer: &[u8]) -> Option<(usize, usize)> {
    buffer
        .iter()
        .enumerate()
        .filter(|(_, byte)| **byte == b'\n')
        .find_map(|(i, _)| {
            let mut next = i + 1;
            if buffer.get(next) == Some(&b'\r') {
                next += 1;
            }
            (buffer.get(next) == Some(&b'\n')).then_some((i, next + 1))
        })
}

struct DecodeState {
    body: ByteStream,
    frames: FrameDecoder,
    ready: VecDeque<StreamEvent>,
    finished: bool,
}

impl DecodeState {
    fn enqueue(&mut self, record: RawRecord) {
        match record.decode() {
            Ok(Some(event)) => self.ready.push_back(event),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "Skipping undecodable record"),
        }
    }
}

/// Turn a response body into its ordered event sequence.
///
/// A backend `error`/`fatalerror` record ends the sequence with a
/// [`StreamError`] of kind `Backend`; transport errors end it as they are.
pub fn decode_stream(body: ByteStream) -> EventStream {
    let state = DecodeState {
        body,
        frames: FrameDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                if let StreamEvent::Error(message) = event {
                    state.finished = true;
                    state.ready.clear();
                    let error = StreamError::backend(message.unwrap_or_default());
                    return Some((Err(error), state));
                }
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    for record in state.frames.push(&bytes) {
                        state.enqueue(record);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    if let Some(record) = state.frames.finish() {
                        state.enqueue(record);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

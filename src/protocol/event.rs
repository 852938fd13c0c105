//! Typed events carried by the answer stream

use super::DecodeError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;

/// Name used by the backend when a context has nothing better to go by
pub const FALLBACK_SOURCE_NAME: &str = "Kilde";

/// One decoded record
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    SessionId(String),
    Source(SourcePayload),
    Status(String),
    SourceList(Vec<String>),
    Contexts(Vec<ContextEntry>),
    Chunk(String),
    AnswerHtml(String),
    Done,
    /// `error` / `fatalerror`; the stream adapter turns this into a terminal failure
    Error(Option<String>),
    /// Unrecognized type that still carried text
    Unknown { event_type: String, text: String },
}

impl StreamEvent {
    pub fn kind(&self) -> &str {
        match self {
            StreamEvent::SessionId(_) => "session_id",
            StreamEvent::Source(_) => "source",
            StreamEvent::Status(_) => "status",
            StreamEvent::SourceList(_) => "source_list",
            StreamEvent::Contexts(_) => "contexts",
            StreamEvent::Chunk(_) => "chunk",
            StreamEvent::AnswerHtml(_) => "answer_html",
            StreamEvent::Done => "done",
            StreamEvent::Error(_) => "error",
            StreamEvent::Unknown { event_type, .. } => event_type,
        }
    }

    /// Map an event type and its parsed payload onto a typed event.
    ///
    /// `Ok(None)` means the record carried nothing worth applying.
    pub fn from_parts(event_type: &str, payload: Value) -> Result<Option<Self>, DecodeError> {
        let text = match &payload {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Self::from_record(event_type, payload, &text)
    }

    /// Like [`StreamEvent::from_parts`], with the record text as it arrived.
    ///
    /// Answer text and unrecognized records fall back to `text` when the
    /// payload has no field to read, so content that merely looks like JSON
    /// (`[1]`, `null`) is never lost.
    pub fn from_record(
        event_type: &str,
        payload: Value,
        text: &str,
    ) -> Result<Option<Self>, DecodeError> {
        let event = match event_type {
            "session_id" => text_field(&payload, "session_id")
                .filter(|id| !id.trim().is_empty())
                .map(|id| StreamEvent::SessionId(id.trim().to_string())),
            "source" => {
                let source: SourcePayload = serde_json::from_value(payload)
                    .map_err(|e| DecodeError::invalid(event_type, e))?;
                Some(StreamEvent::Source(source))
            }
            "status" => text_field(&payload, "message")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(StreamEvent::Status),
            "source_list" => Some(StreamEvent::SourceList(parse_names(&payload)?)),
            "contexts" => Some(StreamEvent::Contexts(parse_contexts(payload)?)),
            "chunk" => text_field(&payload, "text")
                .or_else(|| Some(text.to_string()))
                .filter(|s| !s.is_empty())
                .map(StreamEvent::Chunk),
            "answer_html" => text_field(&payload, "html")
                .or_else(|| Some(text.to_string()))
                .filter(|s| !s.is_empty())
                .map(StreamEvent::AnswerHtml),
            "done" => Some(StreamEvent::Done),
            "error" | "fatalerror" => Some(StreamEvent::Error(
                text_field(&payload, "message")
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            )),
            other => {
                let narration = text_field(&payload, "message")
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .or_else(|| Some(text.trim().to_string()).filter(|s| !s.is_empty()));
                if narration.is_none() {
                    tracing::debug!(event_type = other, "Ignoring empty record");
                }
                narration.map(|text| StreamEvent::Unknown {
                    event_type: other.to_string(),
                    text,
                })
            }
        };
        Ok(event)
    }
}

/// One citation with its text snippet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePayload {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub page_content: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SourcePayload {
    pub fn new(name: impl Into<String>, page_content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_content: page_content.into(),
            url: None,
            source_path: None,
            category: None,
            updated_at: None,
        }
    }

    /// Link to show for the source: the url, else the local path
    pub fn link(&self) -> Option<String> {
        non_blank(self.url.as_deref()).or_else(|| non_blank(self.source_path.as_deref()))
    }
}

/// Retrieved context as listed by the `contexts` event
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ContextEntry {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub refid: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl ContextEntry {
    /// Citation name: title, then refid, then file stem of the path
    pub fn display_name(&self) -> String {
        if let Some(title) = non_blank(self.title.as_deref()) {
            return title;
        }
        if let Some(refid) = non_blank(self.refid.as_deref()) {
            return refid;
        }
        if let Some(path) = non_blank(self.source_path.as_deref()) {
            return Path::new(&path)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .filter(|stem| !stem.is_empty())
                .map_or(path.clone(), str::to_string);
        }
        FALLBACK_SOURCE_NAME.to_string()
    }

    pub fn to_source(&self) -> SourcePayload {
        SourcePayload {
            name: self.display_name(),
            page_content: self.content.clone().unwrap_or_default(),
            url: self.url.clone(),
            source_path: self.source_path.clone(),
            category: self.category.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Text from a bare string payload or from `key` in an object payload
fn text_field(payload: &Value, key: &str) -> Option<String> {
    match payload {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }),
        Value::Array(_) | Value::Null => None,
    }
}

fn parse_names(payload: &Value) -> Result<Vec<String>, DecodeError> {
    let list = match payload {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("names") {
            Some(Value::Array(items)) => items,
            _ => return Err(DecodeError::invalid("source_list", "missing names array")),
        },
        _ => return Err(DecodeError::invalid("source_list", "expected a list of names")),
    };

    let mut names: Vec<String> = Vec::with_capacity(list.len());
    for name in list.iter().filter_map(Value::as_str).map(str::trim) {
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

fn parse_contexts(payload: Value) -> Result<Vec<ContextEntry>, DecodeError> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("contexts") {
            Some(Value::Array(items)) => items,
            _ => return Err(DecodeError::invalid("contexts", "missing contexts array")),
        },
        _ => return Err(DecodeError::invalid("contexts", "expected a list of contexts")),
    };

    Ok(items
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_str).and_then(parse_timestamp))
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` or a bare date
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

//! Session state types

use crate::protocol::SourcePayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Streaming lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Idle,
    Streaming,
    Done,
    Error,
}

impl Status {
    pub fn is_streaming(self) -> bool {
        matches!(self, Status::Streaming)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Streaming => "streaming",
            Status::Done => "done",
            Status::Error => "error",
        }
    }
}

/// One side of an exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: u64,
    pub is_human: bool,
    /// Accumulated plain text
    pub content: String,
    /// Pre-rendered markup; shown instead of `content` when present
    pub content_html: Option<String>,
    /// Citation names attached to this turn
    pub sources: Vec<String>,
    pub loading: bool,
}

impl Turn {
    /// Markup if the backend sent any, else the plain text
    pub fn display_text(&self) -> &str {
        self.content_html.as_deref().unwrap_or(&self.content)
    }

    /// No text and no markup yet
    pub fn is_blank(&self) -> bool {
        self.content.is_empty() && self.content_html.is_none()
    }
}

/// Deduplicated citation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub category: Option<String>,
    /// Url, or the local path when the backend had no url
    pub url: Option<String>,
    /// Distinct snippets in arrival order
    pub summary: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub expanded: bool,
}

impl Source {
    pub fn from_payload(payload: &SourcePayload) -> Self {
        Self {
            name: payload.name.clone(),
            category: payload.category.clone().filter(|c| !c.trim().is_empty()),
            url: payload.link(),
            summary: vec![payload.page_content.clone()],
            updated_at: payload.updated_at,
            expanded: false,
        }
    }
}

/// Root of everything the client shows
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub status: Status,
    /// Issued by the backend, reused for every later question
    pub session_id: Option<String>,
    /// Append-ordered turns; callers treat the first as the running summary
    pub conversation: Vec<Turn>,
    pub sources: BTreeMap<String, Source>,
    /// Most recent first
    pub history: Vec<String>,
    /// Progress narration of the current attempt
    pub status_messages: Vec<String>,
    /// User-facing message of the last fatal failure
    pub error: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: Vec<String>) -> Self {
        Self {
            history,
            ..Self::default()
        }
    }

    pub fn turn(&self, id: u64) -> Option<&Turn> {
        self.conversation.iter().find(|t| t.id == id)
    }

    /// Id the next added turn receives
    pub fn next_turn_id(&self) -> u64 {
        let by_count = self.conversation.len() as u64 + 1;
        let after_last = self.conversation.last().map_or(1, |t| t.id + 1);
        by_count.max(after_last)
    }

    /// Sources attached to a turn, in attachment order
    pub fn turn_sources(&self, id: u64) -> Vec<&Source> {
        self.turn(id)
            .map(|turn| {
                turn.sources
                    .iter()
                    .filter_map(|name| self.sources.get(name))
                    .collect()
            })
            .unwrap_or_default()
    }
}

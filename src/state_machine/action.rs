//! Operations that change session state

use super::state::Status;
use crate::protocol::SourcePayload;

/// The closed set of state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AddSource(SourcePayload),
    SetStatus(Status),
    SetSessionId(Option<String>),
    AddMessage(NewTurn),
    UpdateMessage { id: u64, patch: TurnPatch },
    /// Names without a matching source are dropped
    SetMessageSource { id: u64, names: Vec<String> },
    RemoveMessage { id: u64 },
    /// Toggles unless `expanded` is given
    SourceToggle { name: String, expanded: Option<bool> },
    SetHistory(Vec<String>),
    AddStatusMessage(String),
    ResetStatusMessages,
    SetError(Option<String>),
    /// Back to an empty idle session; history survives
    Reset,
}

/// Turn to append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTurn {
    pub is_human: bool,
    pub content: String,
    pub loading: bool,
}

impl NewTurn {
    pub fn human(question: impl Into<String>) -> Self {
        Self {
            is_human: true,
            content: question.into(),
            loading: false,
        }
    }

    /// Empty answer placeholder, loading until the stream settles
    pub fn assistant() -> Self {
        Self {
            is_human: false,
            content: String::new(),
            loading: true,
        }
    }
}

/// Partial update of a turn; unset fields are left alone
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TurnPatch {
    pub content: Option<String>,
    /// Appended after `content` is applied
    pub append: Option<String>,
    /// `Some(None)` clears the markup
    pub content_html: Option<Option<String>>,
    pub loading: Option<bool>,
}

impl TurnPatch {
    pub fn append(text: impl Into<String>) -> Self {
        Self {
            append: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self {
            content_html: Some(Some(html.into())),
            ..Self::default()
        }
    }

    pub fn loading(loading: bool) -> Self {
        Self {
            loading: Some(loading),
            ..Self::default()
        }
    }

    /// Drop partial output before a reconnect replays the answer
    pub fn cleared() -> Self {
        Self {
            content: Some(String::new()),
            content_html: Some(None),
            loading: Some(true),
            ..Self::default()
        }
    }
}

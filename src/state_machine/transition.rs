//! Pure state transition function
//!
//! Every action either applies completely or leaves the state as it was;
//! there is no I/O here.

use super::action::{Action, NewTurn, TurnPatch};
use super::state::{SessionState, Source, Status, Turn};
use crate::protocol::SourcePayload;

/// Apply one action, producing the next state
pub fn transition(mut state: SessionState, action: Action) -> SessionState {
    match action {
        Action::AddSource(payload) => add_source(&mut state, &payload),
        Action::SetStatus(status) => state.status = status,
        Action::SetSessionId(session_id) => state.session_id = session_id,
        Action::AddMessage(turn) => add_message(&mut state, turn),
        Action::UpdateMessage { id, patch } => {
            if let Some(turn) = state.conversation.iter_mut().find(|t| t.id == id) {
                apply_patch(turn, patch);
            }
        }
        Action::SetMessageSource { id, names } => set_message_source(&mut state, id, names),
        Action::RemoveMessage { id } => state.conversation.retain(|t| t.id != id),
        Action::SourceToggle { name, expanded } => {
            if let Some(source) = state.sources.get_mut(&name) {
                source.expanded = expanded.unwrap_or(!source.expanded);
            }
        }
        Action::SetHistory(history) => state.history = history,
        Action::AddStatusMessage(message) => state.status_messages.push(message),
        Action::ResetStatusMessages => state.status_messages.clear(),
        Action::SetError(error) => state.error = error,
        Action::Reset => {
            state = SessionState {
                status: Status::Idle,
                history: state.history,
                ..SessionState::default()
            };
        }
    }
    state
}

/// Same name appends the snippet unless it is already there verbatim
fn add_source(state: &mut SessionState, payload: &SourcePayload) {
    match state.sources.get_mut(&payload.name) {
        Some(existing) => {
            let snippet = &payload.page_content;
            if !existing.summary.contains(snippet) {
                existing.summary.push(snippet.clone());
            }
        }
        None => {
            state
                .sources
                .insert(payload.name.clone(), Source::from_payload(payload));
        }
    }
}

fn add_message(state: &mut SessionState, turn: NewTurn) {
    let id = state.next_turn_id();
    state.conversation.push(Turn {
        id,
        is_human: turn.is_human,
        content: turn.content,
        content_html: None,
        sources: vec![],
        loading: turn.loading,
    });
}

fn apply_patch(turn: &mut Turn, patch: TurnPatch) {
    if let Some(content) = patch.content {
        turn.content = content;
    }
    if let Some(text) = patch.append {
        turn.content.push_str(&text);
    }
    if let Some(html) = patch.content_html {
        turn.content_html = html;
    }
    if let Some(loading) = patch.loading {
        turn.loading = loading;
    }
}

fn set_message_source(state: &mut SessionState, id: u64, names: Vec<String>) {
    let mut resolved: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if state.sources.contains_key(&name) && !resolved.contains(&name) {
            resolved.push(name);
        }
    }
    if let Some(turn) = state.conversation.iter_mut().find(|t| t.id == id) {
        turn.sources = resolved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_all(actions: Vec<Action>) -> SessionState {
        actions.into_iter().fold(SessionState::new(), transition)
    }

    #[test]
    fn test_add_source_merges_snippets() {
        let state = apply_all(vec![
            Action::AddSource(SourcePayload::new("Lov", "A")),
            Action::AddSource(SourcePayload::new("Lov", "B")),
        ]);
        assert_eq!(state.sources["Lov"].summary, vec!["A", "B"]);

        let again = transition(state.clone(), Action::AddSource(SourcePayload::new("Lov", "A")));
        assert_eq!(again, state);
    }

    #[test]
    fn test_empty_snippet_is_kept_once() {
        let state = apply_all(vec![
            Action::AddSource(SourcePayload::new("Lov", "")),
            Action::AddSource(SourcePayload::new("Lov", "")),
            Action::AddSource(SourcePayload::new("Lov", "A")),
        ]);
        assert_eq!(state.sources["Lov"].summary, vec!["", "A"]);
    }

    #[test]
    fn test_re_citing_keeps_first_metadata() {
        let mut first = SourcePayload::new("Lov", "A");
        first.url = Some("https://lovdata.no/a".to_string());
        let mut second = SourcePayload::new("Lov", "B");
        second.url = Some("https://lovdata.no/b".to_string());

        let state = apply_all(vec![Action::AddSource(first), Action::AddSource(second)]);
        assert_eq!(state.sources["Lov"].url.as_deref(), Some("https://lovdata.no/a"));
        assert_eq!(state.sources.len(), 1);
    }

    #[test]
    fn test_turn_ids_follow_count() {
        let state = apply_all(vec![
            Action::AddMessage(NewTurn::human("Hva er X?")),
            Action::AddMessage(NewTurn::assistant()),
        ]);
        let ids: Vec<u64> = state.conversation.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(state.conversation[0].is_human);
        assert!(state.conversation[1].loading);
        assert_eq!(state.conversation[1].content, "");
    }

    #[test]
    fn test_update_message_appends_and_sets_html() {
        let state = apply_all(vec![
            Action::AddMessage(NewTurn::assistant()),
            Action::UpdateMessage { id: 1, patch: TurnPatch::append("Hello") },
            Action::UpdateMessage { id: 1, patch: TurnPatch::append(" world") },
            Action::UpdateMessage { id: 1, patch: TurnPatch::html("<p>Hello world</p>") },
            Action::UpdateMessage { id: 1, patch: TurnPatch::loading(false) },
        ]);
        let turn = state.turn(1).unwrap();
        assert_eq!(turn.content, "Hello world");
        assert_eq!(turn.display_text(), "<p>Hello world</p>");
        assert!(!turn.loading);

        let cleared = transition(
            state,
            Action::UpdateMessage { id: 1, patch: TurnPatch::cleared() },
        );
        assert!(cleared.turn(1).unwrap().is_blank());
    }

    #[test]
    fn test_update_unknown_message_is_noop() {
        let state = apply_all(vec![Action::AddMessage(NewTurn::human("q"))]);
        let next = transition(
            state.clone(),
            Action::UpdateMessage { id: 9, patch: TurnPatch::append("x") },
        );
        assert_eq!(next, state);
    }

    #[test]
    fn test_set_message_source_drops_unknown_names() {
        let state = apply_all(vec![
            Action::AddSource(SourcePayload::new("A", "a")),
            Action::AddSource(SourcePayload::new("B", "b")),
            Action::AddMessage(NewTurn::assistant()),
            Action::SetMessageSource {
                id: 1,
                names: vec!["B".into(), "missing".into(), "A".into(), "B".into()],
            },
        ]);
        assert_eq!(state.turn(1).unwrap().sources, vec!["B", "A"]);
        let names: Vec<&str> = state.turn_sources(1).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn test_remove_message() {
        let state = apply_all(vec![
            Action::AddMessage(NewTurn::human("q")),
            Action::AddMessage(NewTurn::assistant()),
            Action::RemoveMessage { id: 2 },
        ]);
        assert_eq!(state.conversation.len(), 1);
        assert_eq!(state.conversation[0].id, 1);
    }

    #[test]
    fn test_source_toggle() {
        let state = apply_all(vec![Action::AddSource(SourcePayload::new("A", "a"))]);
        let toggled = transition(
            state,
            Action::SourceToggle { name: "A".into(), expanded: None },
        );
        assert!(toggled.sources["A"].expanded);

        let forced = transition(
            toggled,
            Action::SourceToggle { name: "A".into(), expanded: Some(true) },
        );
        assert!(forced.sources["A"].expanded);

        let back = transition(forced, Action::SourceToggle { name: "A".into(), expanded: None });
        assert!(!back.sources["A"].expanded);
    }

    #[test]
    fn test_status_messages() {
        let state = apply_all(vec![
            Action::AddStatusMessage("one".into()),
            Action::AddStatusMessage("two".into()),
        ]);
        assert_eq!(state.status_messages, vec!["one", "two"]);
        assert!(transition(state, Action::ResetStatusMessages).status_messages.is_empty());
    }

    #[test]
    fn test_reset_keeps_history() {
        let state = apply_all(vec![
            Action::SetHistory(vec!["q".into()]),
            Action::SetSessionId(Some("abc".into())),
            Action::SetStatus(Status::Done),
            Action::AddSource(SourcePayload::new("A", "a")),
            Action::AddMessage(NewTurn::human("q")),
            Action::AddStatusMessage("done".into()),
            Action::SetError(Some("boom".into())),
            Action::Reset,
        ]);
        assert_eq!(state, SessionState::with_history(vec!["q".into()]));
    }
}

//! Property-based tests for the session transitions
//!
//! These tests verify key invariants hold across arbitrary action sequences.

use super::action::*;
use super::state::*;
use super::transition::*;
use crate::protocol::SourcePayload;
use proptest::prelude::*;
use std::collections::HashSet;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Arbeidsmiljøloven".to_string()),
        Just("Husleieloven".to_string()),
        Just("Forvaltningsloven".to_string()),
        "[A-Z][a-z]{2,8}",
    ]
}

fn arb_snippet() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), Just("§ 1".to_string()), "[a-z ]{0,12}"]
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (arb_name(), arb_snippet())
            .prop_map(|(name, snippet)| Action::AddSource(SourcePayload::new(name, snippet))),
        "[a-z ?]{1,20}".prop_map(|q| Action::AddMessage(NewTurn::human(q))),
        Just(Action::AddMessage(NewTurn::assistant())),
        (1u64..8).prop_map(|id| Action::RemoveMessage { id }),
        (1u64..8, "[a-z ]{0,6}")
            .prop_map(|(id, text)| Action::UpdateMessage { id, patch: TurnPatch::append(text) }),
        (1u64..8, prop::collection::vec(arb_name(), 0..4))
            .prop_map(|(id, names)| Action::SetMessageSource { id, names }),
        (arb_name(), prop::option::of(any::<bool>()))
            .prop_map(|(name, expanded)| Action::SourceToggle { name, expanded }),
        "[a-z]{1,10}".prop_map(Action::AddStatusMessage),
        Just(Action::ResetStatusMessages),
    ]
}

fn run(actions: Vec<Action>) -> SessionState {
    actions.into_iter().fold(SessionState::new(), transition)
}

proptest! {
    #[test]
    fn turn_ids_strictly_increase(actions in prop::collection::vec(arb_action(), 0..60)) {
        let state = run(actions);
        for pair in state.conversation.windows(2) {
            prop_assert!(pair[0].id < pair[1].id);
        }
    }

    #[test]
    fn summaries_have_no_duplicates(actions in prop::collection::vec(arb_action(), 0..60)) {
        let state = run(actions);
        for (name, source) in &state.sources {
            prop_assert_eq!(name, &source.name);
            let distinct: HashSet<&String> = source.summary.iter().collect();
            prop_assert_eq!(distinct.len(), source.summary.len());
            prop_assert!(!source.summary.is_empty());
        }
    }

    #[test]
    fn attached_sources_exist(actions in prop::collection::vec(arb_action(), 0..60)) {
        let state = run(actions);
        for turn in &state.conversation {
            for name in &turn.sources {
                prop_assert!(state.sources.contains_key(name));
            }
        }
    }

    #[test]
    fn turn_operations_never_drop_sources(actions in prop::collection::vec(arb_action(), 0..60)) {
        let mut state = SessionState::new();
        for action in actions {
            let before: HashSet<String> = state.sources.keys().cloned().collect();
            state = transition(state, action);
            let after: HashSet<String> = state.sources.keys().cloned().collect();
            prop_assert!(before.is_subset(&after));
        }
    }

    #[test]
    fn reset_always_returns_to_idle(
        actions in prop::collection::vec(arb_action(), 0..30),
        history in prop::collection::vec("[a-z]{1,8}", 0..5),
    ) {
        let mut state = transition(SessionState::new(), Action::SetHistory(history.clone()));
        state = actions.into_iter().fold(state, transition);
        state = transition(state, Action::SetStatus(Status::Done));
        let reset = transition(state, Action::Reset);
        prop_assert_eq!(reset, SessionState::with_history(history));
    }
}

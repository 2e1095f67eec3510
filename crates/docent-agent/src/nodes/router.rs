use crate::{
    graph::Route,
    state::{ConversationState, IntentFlag},
};

/// Pick the branch for the current turn.
///
/// An out-of-scope redirect always wins, even over a stale intent flag; then
/// ticket; anything else goes to museum info.
pub fn route(state: &ConversationState) -> Route {
    if !state.out_of_scope_message.is_empty() {
        return Route::End;
    }
    match state.intent {
        IntentFlag::Ticket => Route::Ticket,
        IntentFlag::Museum | IntentFlag::Undetermined => Route::Museum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(intent: IntentFlag, redirect: &str) -> ConversationState {
        ConversationState {
            intent,
            out_of_scope_message: redirect.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_out_of_scope_takes_precedence() {
        assert_eq!(route(&state(IntentFlag::Ticket, "Ask about museums")), Route::End);
        assert_eq!(route(&state(IntentFlag::Museum, "Ask about museums")), Route::End);
        assert_eq!(route(&state(IntentFlag::Undetermined, "x")), Route::End);
    }

    #[test]
    fn test_ticket_then_museum() {
        assert_eq!(route(&state(IntentFlag::Ticket, "")), Route::Ticket);
        assert_eq!(route(&state(IntentFlag::Museum, "")), Route::Museum);
        assert_eq!(route(&state(IntentFlag::Undetermined, "")), Route::Museum);
    }

    #[test]
    fn test_route_ignores_other_fields() {
        let mut a = state(IntentFlag::Ticket, "");
        let b = a.clone();
        a.begin_turn("something else entirely");
        a.intent = IntentFlag::Ticket;
        a.collected_details.push("Jane".into());
        assert_eq!(route(&a), route(&b));
    }
}

//! Tool-result correlation
//!
//! Results arrive as their own events, possibly after later turns have
//! started. Each one becomes a sibling turn placed right after the turn that
//! issued the matching call, behind any results already placed there.

use legion_protocol::new_id;
use serde_json::Value;
use tracing::warn;

use crate::effect::Effect;
use crate::store::TranscriptStore;
use crate::turn::{Role, Turn, TurnBody};

/// Close the open turn, then place a tool-result turn. Returns its index.
pub fn place_tool_result(
    store: &mut TranscriptStore,
    tool_call_id: Option<String>,
    output: Value,
    effects: &mut Vec<Effect>,
) -> usize {
    if let Some(index) = store.close_open() {
        effects.push(Effect::TurnClosed { index });
    }

    let anchor = tool_call_id
        .as_deref()
        .and_then(|id| store.find_tool_call_turn(id));
    let turn = Turn::new(
        new_id(),
        TurnBody::ToolResult {
            tool_call_id: tool_call_id.clone(),
            output,
        },
    );

    match anchor {
        Some(call_turn) => {
            let mut at = call_turn + 1;
            while store
                .turns()
                .get(at)
                .is_some_and(|t| t.role() == Role::ToolResult)
            {
                at += 1;
            }
            if at == store.len() {
                let index = store.push(turn);
                effects.push(Effect::TurnAppended { index });
                index
            } else {
                let index = store.insert(at, turn);
                effects.push(Effect::TurnInserted { index });
                index
            }
        }
        None => {
            warn!(
                component = "correlate",
                event = "tool_result.unmatched",
                tool_call_id = tool_call_id.as_deref().unwrap_or(""),
                "No tool call matches result; appending at end"
            );
            let index = store.push(turn);
            effects.push(Effect::TurnAppended { index });
            index
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{append_text, start_tool_call};
    use crate::turn::{AssistantTurn, Part, ToolArguments, ToolCallPart};
    use legion_protocol::ToolCallSignal;
    use serde_json::json;

    fn call_turn(id: &str, call_id: &str) -> Turn {
        Turn::new(
            id,
            TurnBody::Assistant(AssistantTurn::closed(vec![Part::ToolCall(ToolCallPart {
                tool_name: "Shell".to_string(),
                tool_call_id: Some(call_id.to_string()),
                arguments: ToolArguments::Parsed(json!({"cmd": "ls"})),
            })])),
        )
    }

    fn result_ids(store: &TranscriptStore) -> Vec<Option<&str>> {
        store
            .turns()
            .iter()
            .map(|t| match &t.body {
                TurnBody::ToolResult { tool_call_id, .. } => tool_call_id.as_deref(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn late_result_lands_after_its_call_not_after_the_streaming_turn() {
        let mut store = TranscriptStore::new();
        let mut effects = Vec::new();
        start_tool_call(
            &mut store,
            "Shell".to_string(),
            Some("Shell:0".to_string()),
            ToolCallSignal::Fragment("{\"cmd\":\"ls\"}".to_string()),
            &mut effects,
        );
        store.close_open();
        append_text(&mut store, "Turn B is streaming", &mut effects);
        effects.clear();

        let index = place_tool_result(
            &mut store,
            Some("Shell:0".to_string()),
            json!("file.txt"),
            &mut effects,
        );

        assert_eq!(index, 1);
        assert_eq!(store.len(), 3);
        assert_eq!(store.turns()[1].role(), Role::ToolResult);
        assert_eq!(store.turns()[2].role(), Role::Assistant);
        assert!(!store.turns()[2].is_open());
        assert_eq!(
            effects,
            vec![
                Effect::TurnClosed { index: 1 },
                Effect::TurnInserted { index: 1 }
            ]
        );
    }

    #[test]
    fn several_results_for_one_turn_keep_arrival_order() {
        let mut store = TranscriptStore::new();
        let mut effects = Vec::new();
        let mut turn = call_turn("a", "Shell:0");
        if let Some(assistant) = turn.as_assistant_mut() {
            assistant.push_settled(Part::ToolCall(ToolCallPart {
                tool_name: "Shell".to_string(),
                tool_call_id: Some("Shell:1".to_string()),
                arguments: ToolArguments::Parsed(json!({})),
            }));
        }
        store.push(turn);
        store.push(call_turn("b", "Other:0"));

        place_tool_result(&mut store, Some("Shell:0".to_string()), json!(1), &mut effects);
        place_tool_result(&mut store, Some("Shell:1".to_string()), json!(2), &mut effects);

        assert_eq!(
            result_ids(&store),
            vec![None, Some("Shell:0"), Some("Shell:1"), None]
        );
        assert_eq!(store.turns()[3].id, "b");
    }

    #[test]
    fn unmatched_or_anonymous_results_append() {
        let mut store = TranscriptStore::new();
        let mut effects = Vec::new();
        store.push(call_turn("a", "Shell:0"));
        store.push(call_turn("b", "Shell:1"));

        let unknown = place_tool_result(
            &mut store,
            Some("Missing:9".to_string()),
            json!("x"),
            &mut effects,
        );
        let anonymous = place_tool_result(&mut store, None, json!("y"), &mut effects);

        assert_eq!((unknown, anonymous), (2, 3));
        assert!(effects
            .iter()
            .all(|e| matches!(e, Effect::TurnAppended { .. })));
    }

    #[test]
    fn result_for_last_turn_is_an_append() {
        let mut store = TranscriptStore::new();
        let mut effects = Vec::new();
        store.push(call_turn("a", "Shell:0"));

        place_tool_result(&mut store, Some("Shell:0".to_string()), json!("ok"), &mut effects);
        assert_eq!(effects, vec![Effect::TurnAppended { index: 1 }]);
    }
}

//! Turn builder: streaming fragments into the open turn.
//!
//! Each function handles one event kind from the transition table and records
//! what it changed as [`Effect`]s. Fragments that need an open turn create one
//! lazily at the end of the transcript.

use legion_protocol::{new_id, TerminalPayload, ToolCallInfo, ToolCallSignal};
use serde_json::Value;
use tracing::debug;

use crate::effect::Effect;
use crate::replay::{assistant_parts, tool_call_part};
use crate::store::TranscriptStore;
use crate::turn::{AssistantTurn, Part, PartKind, ToolArguments, ToolCallPart, Turn, TurnBody};

fn opened_or_updated(index: usize, created: bool) -> Effect {
    if created {
        Effect::TurnAppended { index }
    } else {
        Effect::TurnUpdated { index }
    }
}

/// `chunk`: extend the trailing open text part, or start one.
pub fn append_text(store: &mut TranscriptStore, content: &str, effects: &mut Vec<Effect>) {
    if content.is_empty() {
        return;
    }
    let (index, turn, created) = store.open_or_create();
    if let Some(i) = turn.trailing_open(PartKind::Text) {
        if let Some(Part::Text { content: existing }) = turn.part_mut(i) {
            existing.push_str(content);
        }
    } else {
        turn.push_active(Part::Text {
            content: content.to_string(),
        });
    }
    effects.push(opened_or_updated(index, created));
}

/// `think`: extend the trailing active thinking part, or start one.
pub fn append_thinking(store: &mut TranscriptStore, content: &str, effects: &mut Vec<Effect>) {
    if content.is_empty() {
        return;
    }
    let (index, turn, created) = store.open_or_create();
    if let Some(i) = turn.trailing_open(PartKind::Thinking) {
        if let Some(Part::Thinking { content: existing }) = turn.part_mut(i) {
            existing.push_str(content);
        }
    } else {
        turn.push_active(Part::Thinking {
            content: content.to_string(),
        });
    }
    effects.push(opened_or_updated(index, created));
}

fn ids_compatible(existing: Option<&str>, incoming: Option<&str>) -> bool {
    match (existing, incoming) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// `tool_call`: a streaming start (raw fragment) or a fully known call.
pub fn start_tool_call(
    store: &mut TranscriptStore,
    tool_name: String,
    tool_call_id: Option<String>,
    signal: ToolCallSignal,
    effects: &mut Vec<Effect>,
) {
    let (index, turn, created) = store.open_or_create();
    match signal {
        ToolCallSignal::Fragment(raw) => {
            let compatible = turn.trailing_open(PartKind::ToolCall).filter(|i| {
                matches!(
                    &turn.parts()[*i],
                    Part::ToolCall(call)
                        if call.arguments.is_raw()
                            && call.tool_name == tool_name
                            && ids_compatible(call.tool_call_id.as_deref(), tool_call_id.as_deref())
                )
            });
            match compatible {
                Some(i) => {
                    if let Some(Part::ToolCall(call)) = turn.part_mut(i) {
                        if let ToolArguments::Raw(existing) = &mut call.arguments {
                            existing.push_str(&raw);
                        }
                    }
                }
                None => {
                    turn.push_active(Part::ToolCall(ToolCallPart {
                        tool_name,
                        tool_call_id,
                        arguments: ToolArguments::Raw(raw),
                    }));
                }
            }
        }
        ToolCallSignal::Arguments(arguments) => {
            let target = turn.open_part(PartKind::ToolCall).filter(|i| {
                matches!(
                    &turn.parts()[*i],
                    Part::ToolCall(call)
                        if ids_compatible(call.tool_call_id.as_deref(), tool_call_id.as_deref())
                )
            });
            match target {
                Some(i) => {
                    if let Some(Part::ToolCall(call)) = turn.part_mut(i) {
                        call.arguments = ToolArguments::from_value(arguments);
                        if call.tool_call_id.is_none() {
                            call.tool_call_id = tool_call_id;
                        }
                    }
                    turn.deactivate();
                }
                None => {
                    turn.push_settled(Part::ToolCall(ToolCallPart {
                        tool_name,
                        tool_call_id,
                        arguments: ToolArguments::from_value(arguments),
                    }));
                }
            }
        }
    }
    effects.push(opened_or_updated(index, created));
}

/// `tool_call_chunk`: extend the active call's raw arguments. No-op without one.
pub fn append_tool_arguments(
    store: &mut TranscriptStore,
    content: &str,
    effects: &mut Vec<Effect>,
) {
    let Some((index, turn)) = store.open_turn_mut() else {
        debug!(
            component = "turn_builder",
            event = "tool_call_chunk.no_open_turn",
            "Ignoring argument fragment without an open turn"
        );
        return;
    };
    let Some(i) = turn.open_part(PartKind::ToolCall) else {
        return;
    };
    if let Some(Part::ToolCall(call)) = turn.part_mut(i) {
        if let ToolArguments::Raw(existing) = &mut call.arguments {
            existing.push_str(content);
            effects.push(Effect::TurnUpdated { index });
        }
    }
}

/// `tool_call_complete`: settle the active call. Parse failure keeps the raw text.
pub fn complete_tool_call(
    store: &mut TranscriptStore,
    carried: Option<Value>,
    effects: &mut Vec<Effect>,
) {
    let Some((index, turn)) = store.open_turn_mut() else {
        return;
    };
    let Some(i) = turn.open_part(PartKind::ToolCall) else {
        return;
    };
    if let (Some(Part::ToolCall(call)), Some(arguments)) = (turn.part_mut(i), carried) {
        if call
            .arguments
            .as_raw()
            .is_some_and(|raw| raw.trim().is_empty())
        {
            call.arguments = ToolArguments::from_value(arguments);
        }
    }
    turn.deactivate();
    effects.push(Effect::TurnUpdated { index });
}

/// `complete` / `assistant`: reconcile with authoritative data and close the turn.
pub fn finish_turn(store: &mut TranscriptStore, payload: TerminalPayload, effects: &mut Vec<Effect>) {
    let TerminalPayload {
        content,
        thinking,
        tool_calls,
    } = payload;

    match store.open_turn_mut() {
        Some((index, turn)) => {
            if let Some(calls) = tool_calls.as_deref().filter(|calls| !calls.is_empty()) {
                overwrite_tool_calls(turn, calls);
            }
            if let Some(thinking) = thinking.filter(|t| !t.is_empty()) {
                if !turn.has_kind(PartKind::Thinking) {
                    turn.insert_settled(0, Part::Thinking { content: thinking });
                }
            }
            if let Some(content) = content {
                append_full_content(turn, &content);
            }
            store.close_open();
            effects.push(Effect::TurnClosed { index });
        }
        None => {
            let parts = assistant_parts(
                thinking.as_deref().unwrap_or_default(),
                content.as_deref().unwrap_or_default(),
                tool_calls.as_deref().unwrap_or_default(),
            );
            if !parts.is_empty() {
                let index = store.push(Turn::new(
                    new_id(),
                    TurnBody::Assistant(AssistantTurn::closed(parts)),
                ));
                effects.push(Effect::TurnAppended { index });
            }
        }
    }
}

/// Replace streamed arguments with the backend's parsed calls, position by position.
fn overwrite_tool_calls(turn: &mut AssistantTurn, calls: &[ToolCallInfo]) {
    let positions: Vec<usize> = turn
        .parts()
        .iter()
        .enumerate()
        .filter(|(_, part)| part.kind() == PartKind::ToolCall)
        .map(|(i, _)| i)
        .collect();

    for (n, info) in calls.iter().enumerate() {
        let authoritative = tool_call_part(info);
        match positions.get(n) {
            Some(&i) => {
                if let Some(Part::ToolCall(call)) = turn.part_mut(i) {
                    call.arguments = authoritative.arguments;
                    if call.tool_call_id.is_none() {
                        call.tool_call_id = authoritative.tool_call_id;
                    }
                    if call.tool_name.is_empty() {
                        call.tool_name = authoritative.tool_name;
                    }
                }
            }
            None => {
                turn.push_settled(Part::ToolCall(authoritative));
            }
        }
    }
}

/// Append whatever part of the full message text was not streamed.
/// If the full text disagrees with what streamed, the streamed text stands.
fn append_full_content(turn: &mut AssistantTurn, content: &str) {
    let streamed = turn.text();
    let Some(rest) = content.strip_prefix(streamed.as_str()) else {
        debug!(
            component = "turn_builder",
            event = "terminal.content_mismatch",
            streamed_chars = streamed.len(),
            content_chars = content.len(),
            "Final content differs from streamed text; keeping streamed text"
        );
        return;
    };
    if rest.is_empty() {
        return;
    }
    let last = turn.parts().len().checked_sub(1);
    if let Some(Part::Text { content: existing }) = last.and_then(|i| turn.part_mut(i)) {
        existing.push_str(rest);
        return;
    }
    turn.push_settled(Part::Text {
        content: rest.to_string(),
    });
}

/// `error`: close the open turn and record the error as its own turn.
pub fn record_error(store: &mut TranscriptStore, message: String, effects: &mut Vec<Effect>) {
    if let Some(index) = store.close_open() {
        effects.push(Effect::TurnClosed { index });
    }
    let index = store.push(Turn::new(new_id(), TurnBody::Error { message }));
    effects.push(Effect::TurnAppended { index });
}

//! History replay
//!
//! Rebuilds turns from a persisted linear history in one pass. Output matches
//! what live streaming of the same content produces: per assistant message
//! `thinking → text → tool_call*`, tool results as sibling turns in their
//! recorded position.

use legion_protocol::codec::normalize_id;
use legion_protocol::{HistoryMessage, ToolCallInfo};

use crate::turn::{AssistantTurn, Part, ToolArguments, ToolCallPart, Turn, TurnBody};

/// Turn id for the message at `index` of a fetched history
pub fn history_turn_id(index: usize) -> String {
    format!("hist-{index}")
}

pub fn replay(messages: &[HistoryMessage]) -> Vec<Turn> {
    messages
        .iter()
        .enumerate()
        .map(|(index, message)| Turn::new(history_turn_id(index), replay_body(message)))
        .collect()
}

fn replay_body(message: &HistoryMessage) -> TurnBody {
    match message {
        HistoryMessage::User { content } => TurnBody::User {
            content: content.clone(),
            attachments: Vec::new(),
        },
        HistoryMessage::Assistant {
            content,
            thinking,
            tool_calls,
        } => TurnBody::Assistant(AssistantTurn::closed(assistant_parts(
            thinking, content, tool_calls,
        ))),
        HistoryMessage::ToolResult {
            tool_call_id,
            output,
        } => TurnBody::ToolResult {
            tool_call_id: normalize_id(Some(tool_call_id.clone())),
            output: output.clone(),
        },
    }
}

/// Parts of a finished assistant message, in canonical order.
pub fn assistant_parts(thinking: &str, content: &str, tool_calls: &[ToolCallInfo]) -> Vec<Part> {
    let mut parts = Vec::with_capacity(2 + tool_calls.len());
    if !thinking.is_empty() {
        parts.push(Part::Thinking {
            content: thinking.to_string(),
        });
    }
    if !content.is_empty() {
        parts.push(Part::Text {
            content: content.to_string(),
        });
    }
    for info in tool_calls {
        parts.push(Part::ToolCall(tool_call_part(info)));
        if let Some(output) = &info.output {
            parts.push(Part::ToolResult {
                tool_call_id: normalize_id(Some(info.tool_call_id.clone())),
                output: output.clone(),
            });
        }
    }
    parts
}

pub(crate) fn tool_call_part(info: &ToolCallInfo) -> ToolCallPart {
    ToolCallPart {
        tool_name: info.tool_name.clone(),
        tool_call_id: normalize_id(Some(info.tool_call_id.clone())),
        arguments: ToolArguments::from_value(info.arguments.clone()),
    }
}

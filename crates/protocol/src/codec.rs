//! Frame codec: raw socket text in, validated event out.
//!
//! Decoding never fails loudly: anything that is not a well-formed frame of a
//! known `type` is logged and dropped, so protocol drift can never reach the
//! transcript state machine.

use serde_json::Value;
use tracing::warn;

use crate::server::ServerEvent;
use crate::types::{TokenUsage, ToolCallInfo};

/// How a `tool_call` frame carries its arguments
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallSignal {
    /// Streaming start: a raw, possibly incomplete JSON fragment
    Fragment(String),
    /// The call is fully known; arguments are already structured
    Arguments(Value),
}

/// Payload of a terminal `complete` / `assistant` frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminalPayload {
    pub content: Option<String>,
    pub thinking: Option<String>,
    /// Authoritative parsed tool calls, when the backend supplies them
    pub tool_calls: Option<Vec<ToolCallInfo>>,
}

/// A validated inbound event. Downstream code never sees raw payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Status {
        context_usage: Option<f64>,
        token_usage: Option<TokenUsage>,
    },
    UserEcho(String),
    Chunk(String),
    Think(String),
    ToolCall {
        tool_name: String,
        tool_call_id: Option<String>,
        signal: ToolCallSignal,
    },
    ToolCallChunk(String),
    ToolCallComplete {
        /// Arguments the backend parsed itself; used only if nothing streamed
        arguments: Option<Value>,
    },
    ToolResult {
        tool_call_id: Option<String>,
        output: Value,
    },
    Terminal(TerminalPayload),
    Approval {
        action: String,
        description: String,
    },
    ApprovalResult {
        approved: bool,
    },
    Error(String),
}

const LOG_PREVIEW_CHARS: usize = 240;

/// Decode one text frame. Returns `None` (and logs) for anything invalid.
pub fn decode_frame(text: &str) -> Option<InboundEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => Some(InboundEvent::from(event)),
        Err(e) => {
            warn!(
                component = "codec",
                event = "codec.frame.dropped",
                error = %e,
                payload_bytes = text.len(),
                payload_preview = %truncate_for_log(text, LOG_PREVIEW_CHARS),
                "Dropping malformed frame"
            );
            None
        }
    }
}

impl From<ServerEvent> for InboundEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Status {
                context_usage,
                token_usage,
            } => InboundEvent::Status {
                context_usage,
                token_usage,
            },
            ServerEvent::User { content } => InboundEvent::UserEcho(content),
            ServerEvent::Chunk { content } => InboundEvent::Chunk(content),
            ServerEvent::Think { content } => InboundEvent::Think(content),
            ServerEvent::ToolCall {
                tool_name,
                tool_call_id,
                arguments,
                arguments_raw,
            } => {
                let signal = match (non_null(arguments), arguments_raw) {
                    (Some(Value::String(raw)), _) => ToolCallSignal::Fragment(raw),
                    (Some(args), _) => ToolCallSignal::Arguments(args),
                    (None, raw) => ToolCallSignal::Fragment(raw.unwrap_or_default()),
                };
                InboundEvent::ToolCall {
                    tool_name,
                    tool_call_id: normalize_id(tool_call_id),
                    signal,
                }
            }
            ServerEvent::ToolCallChunk { content, .. } => InboundEvent::ToolCallChunk(content),
            ServerEvent::ToolCallComplete { arguments, .. } => InboundEvent::ToolCallComplete {
                arguments: non_null(arguments),
            },
            ServerEvent::ToolResult {
                tool_call_id,
                output,
            } => InboundEvent::ToolResult {
                tool_call_id: normalize_id(tool_call_id),
                output,
            },
            ServerEvent::Complete {
                content,
                tool_calls,
            } => InboundEvent::Terminal(TerminalPayload {
                content,
                thinking: None,
                tool_calls,
            }),
            ServerEvent::Assistant {
                content,
                thinking,
                tool_calls,
            } => InboundEvent::Terminal(TerminalPayload {
                content,
                thinking,
                tool_calls,
            }),
            ServerEvent::Approval {
                action,
                description,
            } => InboundEvent::Approval {
                action,
                description,
            },
            ServerEvent::ApprovalResult { approved } => InboundEvent::ApprovalResult { approved },
            ServerEvent::Error { message } => InboundEvent::Error(message),
        }
    }
}

/// The backend sends `""` when a call has no id.
pub fn normalize_id(id: Option<String>) -> Option<String> {
    id.filter(|id| !id.is_empty())
}

fn non_null(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

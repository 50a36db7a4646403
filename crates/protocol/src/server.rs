//! Server → Client frames, exactly as they appear on the wire

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{TokenUsage, ToolCallInfo};

/// Frames sent from the agent backend to a chat client
///
/// Loosely typed: optional fields mirror what the backend may omit. Use
/// [`crate::codec::decode_frame`] to obtain a validated [`crate::InboundEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    // Side channel
    Status {
        context_usage: Option<f64>,
        token_usage: Option<TokenUsage>,
    },

    // Echo of the operator's prompt
    User {
        content: String,
    },

    // Streaming fragments
    Chunk {
        content: String,
    },
    Think {
        content: String,
    },
    ToolCall {
        tool_name: String,
        tool_call_id: Option<String>,
        arguments: Option<Value>,
        arguments_raw: Option<String>,
    },
    ToolCallChunk {
        tool_call_id: Option<String>,
        content: String,
    },
    ToolCallComplete {
        tool_call_id: Option<String>,
        tool_name: Option<String>,
        arguments: Option<Value>,
    },

    // Results
    ToolResult {
        tool_call_id: Option<String>,
        output: Value,
    },

    // Terminal
    Complete {
        content: Option<String>,
        tool_calls: Option<Vec<ToolCallInfo>>,
    },
    Assistant {
        content: Option<String>,
        thinking: Option<String>,
        tool_calls: Option<Vec<ToolCallInfo>>,
    },

    // Approvals
    Approval {
        #[serde(default)]
        action: String,
        #[serde(default)]
        description: String,
    },
    ApprovalResult {
        approved: bool,
    },

    // Errors
    Error {
        message: String,
    },
}

impl ServerEvent {
    /// Wire name of the frame's `type`
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Status { .. } => "status",
            ServerEvent::User { .. } => "user",
            ServerEvent::Chunk { .. } => "chunk",
            ServerEvent::Think { .. } => "think",
            ServerEvent::ToolCall { .. } => "tool_call",
            ServerEvent::ToolCallChunk { .. } => "tool_call_chunk",
            ServerEvent::ToolCallComplete { .. } => "tool_call_complete",
            ServerEvent::ToolResult { .. } => "tool_result",
            ServerEvent::Complete { .. } => "complete",
            ServerEvent::Assistant { .. } => "assistant",
            ServerEvent::Approval { .. } => "approval",
            ServerEvent::ApprovalResult { .. } => "approval_result",
            ServerEvent::Error { .. } => "error",
        }
    }
}

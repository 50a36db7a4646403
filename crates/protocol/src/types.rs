//! Core types shared across the protocol

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token usage reported by the agent runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub input_other: u64,
    pub output: u64,
    pub input_cache_read: u64,
    pub input_cache_creation: u64,
}

impl TokenUsage {
    /// All input tokens, cached or not
    pub fn input_total(&self) -> u64 {
        self.input_other + self.input_cache_read + self.input_cache_creation
    }

    /// Calculate cache hit percentage
    pub fn cache_hit_percent(&self) -> f64 {
        let total = self.input_total();
        if total == 0 {
            return 0.0;
        }
        (self.input_cache_read as f64 / total as f64) * 100.0
    }
}

/// Attachment reference carried by an outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub filename: String,
    #[serde(rename = "mediaType")]
    pub media_type: String,
}

impl Attachment {
    /// Image attachments are the only kind the backend forwards to the model.
    pub fn image(url: String, filename: String, media_type: String) -> Self {
        Self {
            kind: "image_url".to_string(),
            url,
            filename,
            media_type,
        }
    }
}

/// A conversation record as stored by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub session_id: String,
    pub work_dir: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub message_count: u64,
}

/// A tool call recorded in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub tool_name: String,
    /// Structured arguments, or the raw string when the backend could not parse them
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub tool_call_id: String,
    /// Present when the history record bundles the call's result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// One entry of a persisted linear conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryMessage {
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default)]
        thinking: String,
        #[serde(default)]
        tool_calls: Vec<ToolCallInfo>,
    },
    ToolResult {
        #[serde(default)]
        tool_call_id: String,
        output: Value,
    },
}

/// Single model entry of the agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub max_context_size: u64,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelConfig {
    pub fn supports_thinking(&self) -> bool {
        self.capabilities.iter().any(|c| c == "thinking")
    }
}

/// Single provider entry of the agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

/// Model/provider configuration served by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub default_model: String,
    #[serde(default)]
    pub default_thinking: bool,
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

// ---------------------------------------------------------------------------
// REST envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub config: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConversationsResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConversationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
}

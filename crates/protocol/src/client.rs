//! Client → Server messages

use serde::{Deserialize, Serialize};

use crate::types::Attachment;

/// A user prompt for the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    pub message: String,
    pub thinking: bool,
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Control frames, discriminated by `type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Stop,
}

/// Messages sent from client to server
///
/// Prompts carry no discriminator on the wire; control frames do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Send(SendMessage),
    Control(ControlMessage),
}

impl ClientMessage {
    pub fn stop() -> Self {
        ClientMessage::Control(ControlMessage::Stop)
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, ClientMessage::Control(ControlMessage::Stop))
    }
}

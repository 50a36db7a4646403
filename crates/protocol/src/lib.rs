//! Legion Protocol
//!
//! Shared types for communication between the Legion agent backend and chat
//! clients. Socket frames are JSON objects discriminated by their `type` field.

use uuid::Uuid;

pub mod client;
pub mod codec;
pub mod server;
pub mod types;

pub use client::{ClientMessage, ControlMessage, SendMessage};
pub use codec::{decode_frame, InboundEvent, TerminalPayload, ToolCallSignal};
pub use server::ServerEvent;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

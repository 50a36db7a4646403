//! Legion transcript engine
//!
//! Assembles the backend's fragmented event stream into an ordered list of
//! turns. Live streaming and history replay produce the same structure, so a
//! renderer never needs to know where a turn came from.
//!
//! Everything here is synchronous and free of I/O: feed [`InboundEvent`]s to
//! [`Transcript::apply`] and read back [`Effect`]s or a snapshot.
//!
//! [`InboundEvent`]: legion_protocol::InboundEvent

pub mod builder;
pub mod correlate;
mod effect;
pub mod replay;
pub mod store;
mod transcript;
pub mod turn;

pub use effect::Effect;
pub use replay::{history_turn_id, replay};
pub use store::TranscriptStore;
pub use transcript::{StatusInfo, Transcript, TranscriptSnapshot};
pub use turn::{
    AssistantTurn, OpenPart, Part, PartKind, Role, ToolArguments, ToolCallPart, Turn, TurnBody,
    TurnPhase,
};

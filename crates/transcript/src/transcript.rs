//! Transcript: pure transition function over inbound events.
//!
//! `apply` is the whole state machine: one validated event in, the changes it
//! made out. No I/O happens here; the connection layer feeds events and a
//! renderer consumes [`Effect`]s or [`TranscriptSnapshot`]s.

use legion_protocol::{new_id, Attachment, HistoryMessage, InboundEvent, TokenUsage};
use serde::Serialize;
use tracing::debug;

use crate::builder;
use crate::correlate::place_tool_result;
use crate::effect::Effect;
use crate::replay::replay;
use crate::store::TranscriptStore;
use crate::turn::{Turn, TurnBody};

/// Side-channel status. Never rendered as a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusInfo {
    pub context_usage: Option<f64>,
    pub token_usage: Option<TokenUsage>,
}

/// Owned copy of everything a renderer needs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscriptSnapshot {
    pub turns: Vec<Turn>,
    pub status: StatusInfo,
    pub streaming: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    store: TranscriptStore,
    status: StatusInfo,
    streaming: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcript rebuilt from persisted history. Nothing is open or streaming.
    pub fn from_history(messages: &[HistoryMessage]) -> Self {
        Self {
            store: TranscriptStore::from_turns(replay(messages)),
            ..Self::default()
        }
    }

    pub fn turns(&self) -> &[Turn] {
        self.store.turns()
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    pub fn status(&self) -> &StatusInfo {
        &self.status
    }

    /// True between a user message and the end of the reply
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            turns: self.store.turns().to_vec(),
            status: self.status.clone(),
            streaming: self.streaming,
        }
    }

    /// Apply one inbound event.
    pub fn apply(&mut self, event: InboundEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            InboundEvent::Status {
                context_usage,
                token_usage,
            } => {
                if let Some(usage) = context_usage {
                    self.status.context_usage = Some(usage);
                }
                if let Some(usage) = token_usage {
                    self.status.token_usage = Some(usage);
                }
                effects.push(Effect::StatusChanged);
            }
            InboundEvent::UserEcho(content) => {
                let duplicate = matches!(
                    self.store.last().map(|t| &t.body),
                    Some(TurnBody::User { content: last, .. }) if *last == content
                );
                if duplicate {
                    debug!(
                        component = "transcript",
                        event = "user_echo.deduplicated",
                        "Echo matches optimistic user turn"
                    );
                } else {
                    self.append_user(content, Vec::new(), &mut effects);
                }
            }
            InboundEvent::Chunk(content) => {
                builder::append_text(&mut self.store, &content, &mut effects);
            }
            InboundEvent::Think(content) => {
                builder::append_thinking(&mut self.store, &content, &mut effects);
            }
            InboundEvent::ToolCall {
                tool_name,
                tool_call_id,
                signal,
            } => {
                builder::start_tool_call(
                    &mut self.store,
                    tool_name,
                    tool_call_id,
                    signal,
                    &mut effects,
                );
            }
            InboundEvent::ToolCallChunk(content) => {
                builder::append_tool_arguments(&mut self.store, &content, &mut effects);
            }
            InboundEvent::ToolCallComplete { arguments } => {
                builder::complete_tool_call(&mut self.store, arguments, &mut effects);
            }
            InboundEvent::ToolResult {
                tool_call_id,
                output,
            } => {
                place_tool_result(&mut self.store, tool_call_id, output, &mut effects);
            }
            InboundEvent::Terminal(payload) => {
                builder::finish_turn(&mut self.store, payload, &mut effects);
                self.finish_streaming(&mut effects);
            }
            InboundEvent::Approval {
                action,
                description,
            } => {
                self.close_open(&mut effects);
                let index = self.store.push(Turn::new(
                    new_id(),
                    TurnBody::Approval {
                        action,
                        description,
                        approved: None,
                    },
                ));
                effects.push(Effect::TurnAppended { index });
            }
            InboundEvent::ApprovalResult { approved } => {
                self.resolve_approval(approved, &mut effects);
            }
            InboundEvent::Error(message) => {
                builder::record_error(&mut self.store, message, &mut effects);
                self.finish_streaming(&mut effects);
            }
        }
        effects
    }

    /// Record a message the user is sending, before the backend echoes it.
    pub fn push_user(&mut self, content: String, attachments: Vec<Attachment>) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.append_user(content, attachments, &mut effects);
        effects
    }

    /// Local stop: finalize the open turn and leave the streaming state at once.
    pub fn stop(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.close_open(&mut effects);
        self.finish_streaming(&mut effects);
        effects
    }

    /// Drop everything, e.g. when switching conversations.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Replace the contents with replayed history.
    pub fn load_history(&mut self, messages: &[HistoryMessage]) {
        *self = Self::from_history(messages);
    }

    fn append_user(
        &mut self,
        content: String,
        attachments: Vec<Attachment>,
        effects: &mut Vec<Effect>,
    ) {
        self.close_open(effects);
        let index = self.store.push(Turn::new(
            new_id(),
            TurnBody::User {
                content,
                attachments,
            },
        ));
        effects.push(Effect::TurnAppended { index });
        self.streaming = true;
    }

    fn close_open(&mut self, effects: &mut Vec<Effect>) {
        if let Some(index) = self.store.close_open() {
            effects.push(Effect::TurnClosed { index });
        }
    }

    fn finish_streaming(&mut self, effects: &mut Vec<Effect>) {
        if self.streaming {
            self.streaming = false;
            effects.push(Effect::StreamingFinished);
        }
    }

    fn resolve_approval(&mut self, approved: bool, effects: &mut Vec<Effect>) {
        let pending = self.store.turns().iter().rposition(|turn| {
            matches!(turn.body, TurnBody::Approval { approved: None, .. })
        });
        match pending.and_then(|index| self.store.get_mut(index).map(|turn| (index, turn))) {
            Some((index, turn)) => {
                if let TurnBody::Approval { approved: slot, .. } = &mut turn.body {
                    *slot = Some(approved);
                }
                effects.push(Effect::TurnUpdated { index });
            }
            None => {
                let index = self.store.push(Turn::new(
                    new_id(),
                    TurnBody::Approval {
                        action: String::new(),
                        description: String::new(),
                        approved: Some(approved),
                    },
                ));
                effects.push(Effect::TurnAppended { index });
            }
        }
    }
}

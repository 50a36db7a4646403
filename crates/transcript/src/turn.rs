//! Turn and part model
//!
//! An assistant turn is an ordered list of parts plus an explicit phase:
//! `Idle → Streaming(open part) → Closed`. Whether a part is "active" is
//! derived from the phase, so at most one part of a turn can ever be active.

use legion_protocol::Attachment;
use serde::ser::Serializer;
use serde::Serialize;
use serde_json::Value;

/// Role of a turn in the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
    Error,
    Approval,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool_result",
            Role::Error => "error",
            Role::Approval => "approval",
        }
    }
}

/// Tool-call arguments: raw while streaming, structured once settled
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolArguments {
    Raw(String),
    Parsed(Value),
}

impl ToolArguments {
    /// Parse raw arguments if they are valid JSON; otherwise keep the raw text.
    /// Blank input settles to an empty object.
    pub fn settle(self) -> Self {
        match self {
            ToolArguments::Raw(raw) if raw.trim().is_empty() => {
                ToolArguments::Parsed(Value::Object(Default::default()))
            }
            ToolArguments::Raw(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => ToolArguments::Parsed(value),
                Err(_) => ToolArguments::Raw(raw),
            },
            parsed => parsed,
        }
    }

    /// Arguments from a persisted or authoritative record. Strings are parsed best-effort.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(raw) => ToolArguments::Raw(raw).settle(),
            Value::Null => ToolArguments::Parsed(Value::Object(Default::default())),
            other => ToolArguments::Parsed(other),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, ToolArguments::Raw(_))
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            ToolArguments::Raw(raw) => Some(raw),
            ToolArguments::Parsed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallPart {
    pub tool_name: String,
    pub tool_call_id: Option<String>,
    pub arguments: ToolArguments,
}

/// One ordered fragment of an assistant turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Thinking {
        content: String,
    },
    Text {
        content: String,
    },
    ToolCall(ToolCallPart),
    ToolResult {
        tool_call_id: Option<String>,
        output: Value,
    },
}

impl Part {
    pub fn kind(&self) -> PartKind {
        match self {
            Part::Thinking { .. } => PartKind::Thinking,
            Part::Text { .. } => PartKind::Text,
            Part::ToolCall(_) => PartKind::ToolCall,
            Part::ToolResult { .. } => PartKind::ToolResult,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            Part::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    Thinking,
    Text,
    ToolCall,
    ToolResult,
}

/// The part currently receiving fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenPart {
    pub kind: PartKind,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Open, but no part is streaming
    Idle,
    Streaming(OpenPart),
    Closed,
}

/// Contents of an assistant turn
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    parts: Vec<Part>,
    phase: TurnPhase,
}

impl Default for AssistantTurn {
    fn default() -> Self {
        Self::open()
    }
}

impl AssistantTurn {
    /// A fresh, empty turn eligible for streaming
    pub fn open() -> Self {
        Self {
            parts: Vec::new(),
            phase: TurnPhase::Idle,
        }
    }

    /// A finalized turn built from known parts
    pub fn closed(parts: Vec<Part>) -> Self {
        Self {
            parts,
            phase: TurnPhase::Closed,
        }
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        self.phase != TurnPhase::Closed
    }

    pub fn active_index(&self) -> Option<usize> {
        match self.phase {
            TurnPhase::Streaming(open) => Some(open.index),
            _ => None,
        }
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.active_index() == Some(index)
    }

    /// Index of the active part, if it is of `kind`
    pub fn open_part(&self, kind: PartKind) -> Option<usize> {
        match self.phase {
            TurnPhase::Streaming(open) if open.kind == kind => Some(open.index),
            _ => None,
        }
    }

    /// Index of the active part, if it is of `kind` and is the last part
    pub fn trailing_open(&self, kind: PartKind) -> Option<usize> {
        self.open_part(kind)
            .filter(|index| index + 1 == self.parts.len())
    }

    pub fn part_mut(&mut self, index: usize) -> Option<&mut Part> {
        self.parts.get_mut(index)
    }

    pub fn has_kind(&self, kind: PartKind) -> bool {
        self.parts.iter().any(|p| p.kind() == kind)
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(Part::as_tool_call)
    }

    pub fn has_tool_call(&self, tool_call_id: &str) -> bool {
        self.tool_calls()
            .any(|call| call.tool_call_id.as_deref() == Some(tool_call_id))
    }

    /// Push a part and make it the only active one.
    pub fn push_active(&mut self, part: Part) -> usize {
        self.deactivate();
        let kind = part.kind();
        self.parts.push(part);
        let index = self.parts.len() - 1;
        if self.phase != TurnPhase::Closed {
            self.phase = TurnPhase::Streaming(OpenPart { kind, index });
        }
        index
    }

    /// Push a part that is already complete.
    pub fn push_settled(&mut self, part: Part) -> usize {
        self.deactivate();
        self.parts.push(part);
        self.parts.len() - 1
    }

    /// Insert a complete part at `index`, keeping the active pointer valid.
    pub fn insert_settled(&mut self, index: usize, part: Part) {
        let index = index.min(self.parts.len());
        self.parts.insert(index, part);
        if let TurnPhase::Streaming(open) = &mut self.phase {
            if open.index >= index {
                open.index += 1;
            }
        }
    }

    /// Stop streaming into the active part. A tool call leaving the active
    /// state gets its raw arguments settled.
    pub fn deactivate(&mut self) {
        if let TurnPhase::Streaming(open) = self.phase {
            self.settle_tool_call(open.index);
            self.phase = TurnPhase::Idle;
        }
    }

    /// Finalize the turn. Raw arguments are parsed best-effort.
    pub fn close(&mut self) {
        self.deactivate();
        for index in 0..self.parts.len() {
            self.settle_tool_call(index);
        }
        self.phase = TurnPhase::Closed;
    }

    fn settle_tool_call(&mut self, index: usize) {
        if let Some(Part::ToolCall(call)) = self.parts.get_mut(index) {
            if call.arguments.is_raw() {
                let raw = std::mem::replace(&mut call.arguments, ToolArguments::Raw(String::new()));
                call.arguments = raw.settle();
            }
        }
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Serialize for AssistantTurn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct PartView<'a> {
            #[serde(flatten)]
            part: &'a Part,
            active: bool,
        }

        #[derive(Serialize)]
        struct View<'a> {
            parts: Vec<PartView<'a>>,
            open: bool,
        }

        View {
            parts: self
                .parts
                .iter()
                .enumerate()
                .map(|(index, part)| PartView {
                    part,
                    active: self.is_active(index),
                })
                .collect(),
            open: self.is_open(),
        }
        .serialize(serializer)
    }
}

/// Role-specific contents of a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TurnBody {
    User {
        content: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
    Assistant(AssistantTurn),
    ToolResult {
        tool_call_id: Option<String>,
        output: Value,
    },
    Error {
        message: String,
    },
    Approval {
        action: String,
        description: String,
        approved: Option<bool>,
    },
}

impl TurnBody {
    pub fn role(&self) -> Role {
        match self {
            TurnBody::User { .. } => Role::User,
            TurnBody::Assistant(_) => Role::Assistant,
            TurnBody::ToolResult { .. } => Role::ToolResult,
            TurnBody::Error { .. } => Role::Error,
            TurnBody::Approval { .. } => Role::Approval,
        }
    }
}

/// One entry of the transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub id: String,
    #[serde(flatten)]
    pub body: TurnBody,
}

impl Turn {
    pub fn new(id: impl Into<String>, body: TurnBody) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }

    pub fn role(&self) -> Role {
        self.body.role()
    }

    pub fn as_assistant(&self) -> Option<&AssistantTurn> {
        match &self.body {
            TurnBody::Assistant(turn) => Some(turn),
            _ => None,
        }
    }

    pub fn as_assistant_mut(&mut self) -> Option<&mut AssistantTurn> {
        match &mut self.body {
            TurnBody::Assistant(turn) => Some(turn),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.as_assistant().is_some_and(AssistantTurn::is_open)
    }
}
